//! ioFog Common - 跨模块共享工具与数据结构
//!
//! 该模块提供 ioFog Operator 各组件共享的错误类型和数据模型，
//! 包括 Controller REST API 的请求/响应结构以及 Router 配置模板。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::api::*;
pub use models::router::*;
