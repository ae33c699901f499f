//! 数据库类型
//!
//! 每种数据库各自提供存在性检查/建库语句、内嵌脚本以及可忽略错误的判定规则。

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// MySQL 中可忽略的错误码：表已存在、列重复、未知列、索引名重复
const MYSQL_IGNORABLE: [u16; 4] = [1050, 1060, 1054, 1061];

/// PostgreSQL 中可忽略的 SQLSTATE：唯一约束冲突、列重复、对象重复、表重复
const POSTGRES_IGNORABLE: [&str; 4] = ["23505", "42701", "42710", "42P07"];

/// 支持的数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// MySQL
    MySql,
    /// PostgreSQL
    Postgres,
}

/// 语句执行失败的关键信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementFailure {
    /// SQLSTATE 或驱动错误码
    pub code: Option<String>,
    /// MySQL 数字错误码
    pub number: Option<u16>,
    /// 错误消息
    pub message: String,
}

impl StatementFailure {
    /// 从 sqlx 错误中提取失败信息
    pub fn from_sqlx(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => Self {
                code: db_err.code().map(|code| code.into_owned()),
                number: db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number()),
                message: db_err.message().to_string(),
            },
            other => Self {
                message: other.to_string(),
                ..Default::default()
            },
        }
    }
}

impl Provider {
    /// 名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::MySql => "mysql",
            Provider::Postgres => "postgres",
        }
    }

    /// 迁移脚本
    pub fn migration_script(&self) -> &'static str {
        match self {
            Provider::MySql => include_str!("../assets/database/db_migration_v1.0.2.sql"),
            Provider::Postgres => include_str!("../assets/database/db_migration_postgre_v1.0.2.sql"),
        }
    }

    /// 种子数据脚本
    pub fn seed_script(&self) -> &'static str {
        match self {
            Provider::MySql => include_str!("../assets/database/db_seeder_v1.0.2.sql"),
            Provider::Postgres => include_str!("../assets/database/db_seeder_postgre_v1.0.2.sql"),
        }
    }

    /// 检查数据库是否存在的查询
    pub fn exists_query(&self, database: &str) -> String {
        match self {
            Provider::MySql => format!("SHOW DATABASES LIKE '{database}'"),
            Provider::Postgres => format!("SELECT 1 FROM pg_database WHERE datname='{database}'"),
        }
    }

    /// 建库语句
    pub fn create_query(&self, database: &str) -> String {
        match self {
            Provider::MySql => format!("CREATE DATABASE `{database}`"),
            Provider::Postgres => format!("CREATE DATABASE \"{database}\""),
        }
    }

    /// 判定语句失败能否忽略（重复执行迁移时的常见错误）
    pub fn is_ignorable(&self, failure: &StatementFailure) -> bool {
        match self {
            Provider::MySql => {
                failure.number.map_or(false, |n| MYSQL_IGNORABLE.contains(&n))
                    || MYSQL_IGNORABLE
                        .iter()
                        .any(|n| failure.message.contains(&format!("Error {n}")))
            }
            Provider::Postgres => {
                failure
                    .code
                    .as_deref()
                    .map_or(false, |code| POSTGRES_IGNORABLE.contains(&code))
                    || failure.message.contains("duplicate_key")
                    || failure.message.contains("duplicate key")
                    || failure.message.contains("already exists")
            }
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Provider::MySql),
            "postgres" => Ok(Provider::Postgres),
            other => Err(Error::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 校验数据库名，避免拼接进 SQL 时破坏语句
pub fn validate_database_name(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '$');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidDatabaseName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::split_statements;
    use rstest::rstest;

    fn mysql_failure(number: u16, message: &str) -> StatementFailure {
        StatementFailure {
            code: Some("42S01".to_string()),
            number: Some(number),
            message: message.to_string(),
        }
    }

    fn postgres_failure(code: &str, message: &str) -> StatementFailure {
        StatementFailure {
            code: Some(code.to_string()),
            number: None,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!("mysql".parse::<Provider>().unwrap(), Provider::MySql);
        assert_eq!("postgres".parse::<Provider>().unwrap(), Provider::Postgres);

        let err = "sqlite".parse::<Provider>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported provider: sqlite");
    }

    #[test]
    fn test_queries() {
        assert_eq!(Provider::MySql.exists_query("iofog"), "SHOW DATABASES LIKE 'iofog'");
        assert_eq!(Provider::MySql.create_query("iofog"), "CREATE DATABASE `iofog`");
        assert_eq!(
            Provider::Postgres.exists_query("iofog"),
            "SELECT 1 FROM pg_database WHERE datname='iofog'"
        );
        assert_eq!(Provider::Postgres.create_query("iofog"), "CREATE DATABASE \"iofog\"");
    }

    #[rstest]
    #[case(1050, true)]
    #[case(1060, true)]
    #[case(1054, true)]
    #[case(1061, true)]
    #[case(1064, false)]
    #[case(1146, false)]
    fn test_mysql_ignorable(#[case] number: u16, #[case] expected: bool) {
        assert_eq!(Provider::MySql.is_ignorable(&mysql_failure(number, "boom")), expected);
    }

    #[test]
    fn test_mysql_ignorable_by_message() {
        let failure = StatementFailure {
            message: "Error 1050: Table 'Fogs' already exists".to_string(),
            ..Default::default()
        };
        assert!(Provider::MySql.is_ignorable(&failure));
    }

    #[rstest]
    #[case("42P07", "relation \"Fogs\" already exists", true)]
    #[case("23505", "duplicate key value violates unique constraint", true)]
    #[case("42701", "column \"uuid\" of relation \"Fogs\" already exists", true)]
    #[case("XX000", "index already exists", true)]
    #[case("42601", "syntax error at or near \"CREAT\"", false)]
    fn test_postgres_ignorable(#[case] code: &str, #[case] message: &str, #[case] expected: bool) {
        assert_eq!(
            Provider::Postgres.is_ignorable(&postgres_failure(code, message)),
            expected
        );
    }

    #[test]
    fn test_validate_database_name() {
        assert!(validate_database_name("iofog_controller").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name("iofog'; DROP DATABASE x; --").is_err());
    }

    #[rstest]
    #[case(Provider::MySql)]
    #[case(Provider::Postgres)]
    fn test_embedded_scripts(#[case] provider: Provider) {
        let migration: Vec<_> = split_statements(provider.migration_script()).collect();
        assert!(migration.iter().any(|s| s.contains("CREATE TABLE")));

        let seed: Vec<_> = split_statements(provider.seed_script()).collect();
        assert!(!seed.is_empty());
        assert!(seed.iter().all(|s| s.contains("INSERT INTO")));
    }
}
