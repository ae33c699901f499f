//! Controller REST API 数据模型
//!
//! 这些结构与 ioFog Controller `/api/v3` 接口的 JSON 格式保持一致。

use serde::{Deserialize, Serialize};

/// `GET /status` 返回的 Controller 状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    /// 运行状态，例如 "online"
    #[serde(default)]
    pub status: String,
    /// 服务器时间戳（毫秒）
    #[serde(default)]
    pub timestamp: i64,
    /// 组件版本
    #[serde(default)]
    pub versions: Versions,
    /// 运行时长（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_sec: Option<f64>,
}

/// 组件版本信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    /// Controller 版本
    #[serde(default)]
    pub controller: String,
    /// ECN Viewer 版本
    #[serde(default)]
    pub ecn_viewer: String,
}

/// 默认 Router 注册请求（`PUT /router`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRouter {
    /// Router 对外地址
    pub host: String,
    /// AMQPS 消息端口
    pub messaging_port: u16,
    /// Router 间互联端口
    pub inter_router_port: u16,
    /// 边缘 Router 接入端口
    pub edge_router_port: u16,
    /// 是否要求 SSL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_ssl: Option<String>,
    /// SASL 机制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_mechanisms: Option<String>,
    /// 是否验证对端
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticate_peer: Option<String>,
}

/// OIDC 令牌端点响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// 访问令牌
    pub access_token: String,
    /// 有效期（秒）
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// 令牌类型
    #[serde(default)]
    pub token_type: Option<String>,
}
