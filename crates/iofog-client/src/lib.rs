//! ioFog Client - Controller REST API 客户端
//!
//! 该模块封装了 Operator 需要调用的少量 ioFog Controller 接口
//! （状态检查、默认 Router 注册），以及通过 OIDC client-credentials
//! 流程获取访问令牌的逻辑。

pub mod auth;
pub mod client;

pub use auth::{fetch_client_token, OidcCredentials};
pub use client::{ClientOptions, ControllerClient};

use iofog_common::Error;

/// 将 reqwest 错误连同其完整来源链转换为网络错误
pub(crate) fn network_error(err: reqwest::Error) -> Error {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    Error::Network(message)
}
