//! 数据库初始化错误类型

use thiserror::Error;

/// 数据库初始化错误
#[derive(Error, Debug)]
pub enum Error {
    /// 不支持的数据库类型
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// 数据库名包含非法字符
    #[error("invalid database name: {0:?}")]
    InvalidDatabaseName(String),

    /// 无法连接数据库服务器
    #[error("failed to connect to the {provider} server: {source}")]
    Connect {
        /// 数据库类型
        provider: String,
        /// 底层错误
        #[source]
        source: sqlx::Error,
    },

    /// 查询数据库列表失败
    #[error("failed to query databases: {0}")]
    Query(#[source] sqlx::Error),

    /// 创建数据库失败
    #[error("failed to create database: {0}")]
    Create(#[source] sqlx::Error),

    /// 切换到目标数据库失败
    #[error("failed to switch to database: {0}")]
    Switch(#[source] sqlx::Error),

    /// 执行脚本语句失败
    #[error("failed to execute SQL statement: {0}")]
    Statement(#[source] sqlx::Error),
}

/// 数据库初始化结果类型
pub type Result<T> = std::result::Result<T, Error>;
