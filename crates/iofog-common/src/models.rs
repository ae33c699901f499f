//! 数据模型模块
//!
//! 该模块定义了 ioFog Controller REST API 使用的数据结构，
//! 以及 Router（skrouterd）配置文件模板。

pub mod api;
pub mod router;
