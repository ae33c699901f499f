//! SQL 脚本处理
//!
//! 内嵌脚本按 `;` 拆分为单条语句逐条执行，脚本中不应在字符串字面量里出现分号。

/// 将脚本拆分为非空语句
pub fn split_statements(script: &str) -> impl Iterator<Item = &str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty() && !is_comment_only(statement))
}

/// 语句是否只包含 `--` 注释
fn is_comment_only(statement: &str) -> bool {
    statement
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}
