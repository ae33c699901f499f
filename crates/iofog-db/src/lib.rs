//! ioFog DB - Controller 数据库初始化
//!
//! 在 Controller 使用外部 MySQL/PostgreSQL 时，Operator 负责在部署前
//! 创建数据库并执行内嵌的迁移脚本；只有新建的数据库才会写入种子数据。

pub mod bootstrap;
pub mod error;
pub mod provider;
pub mod script;

pub use bootstrap::{create_controller_database, BootstrapOutcome, DatabaseSettings};
pub use error::{Error, Result};
pub use provider::Provider;
