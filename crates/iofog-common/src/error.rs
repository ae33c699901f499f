//! 错误处理模块
//!
//! 该模块提供 ioFog 客户端与模型层的统一错误类型，
//! 覆盖配置、网络、认证以及 Controller API 返回的错误。

use std::io;
use thiserror::Error;

/// ioFog 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// Controller 地址无法解析为 URL
    #[error("failed to parse Controller endpoint as URL ({url}): {reason}")]
    InvalidUrl {
        /// 原始地址
        url: String,
        /// 解析失败原因
        reason: String,
    },

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 服务端返回非预期状态码
    #[error("unexpected status code: {code}: {body}")]
    UnexpectedStatus {
        /// HTTP 状态码
        code: u16,
        /// 响应正文
        body: String,
    },

    /// 身份验证错误
    #[error("身份验证错误: {0}")]
    Authentication(String),

    /// 序列化/反序列化错误
    #[error("序列化/反序列化错误: {0}")]
    Serialization(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// ioFog 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 是否为 Controller 返回的"凭证无效"错误
    ///
    /// 首次部署时 Controller 可能尚未同步认证配置，此类错误可以忽略。
    pub fn is_invalid_credentials(&self) -> bool {
        self.to_string()
            .to_lowercase()
            .contains("invalid credentials")
    }

    /// 是否为连接被拒绝（Controller 尚未启动）
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Error::Network(msg) if msg.to_lowercase().contains("connection refused"))
    }
}

/// 从字符串创建错误
pub trait IntoError<T> {
    /// 将当前类型转换为错误
    fn into_error(self, kind: fn(String) -> Error) -> Result<T>;
}

impl<T> IntoError<T> for String {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self))
    }
}

impl<T> IntoError<T> for &str {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self.to_string()))
    }
}
