//! 错误处理模块
//!
//! Operator 内部统一使用该错误类型；kube Controller 要求错误类型实现 `std::error::Error`。

use thiserror::Error;

/// Router 地址缺失时的错误描述
pub const ERR_PROXY_ROUTER_MISSING: &str = "missing Proxy.Router data for non LoadBalancer Router service";

/// Operator 错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// Controller 客户端错误
    #[error("Controller 客户端错误: {0}")]
    Client(#[from] iofog_common::Error),

    /// 数据库初始化错误
    #[error("数据库初始化错误: {0}")]
    Database(#[from] iofog_db::Error),

    /// 组件协调失败
    #[error("reconcile {component} failed: {message}")]
    Reconcile {
        /// 组件名称
        component: &'static str,
        /// 失败原因
        message: String,
    },

    /// 镜像拉取 Secret 无效
    #[error("image pull secret {name} is missing or not of type kubernetes.io/dockerconfigjson")]
    InvalidPullSecret {
        /// Secret 名称
        name: String,
    },

    /// 等待负载均衡地址超时
    #[error("timed out after {seconds}s waiting for LoadBalancer address of Service {service}")]
    LoadBalancerTimeout {
        /// 服务名称
        service: String,
        /// 超时时间
        seconds: u64,
    },

    /// 证书生成失败
    #[error("证书生成失败: {0}")]
    Certificate(String),

    /// 资源缺少必要字段
    #[error("资源缺少字段: {0}")]
    MissingField(&'static str),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

/// Operator 结果类型
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// 构造组件协调错误
    pub fn reconcile(component: &'static str, message: impl Into<String>) -> Self {
        Error::Reconcile {
            component,
            message: message.into(),
        }
    }

    /// 用于指标标签的错误类别
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::Kube(_) => "kube",
            Error::Client(_) => "client",
            Error::Database(_) => "database",
            Error::Reconcile { .. } => "reconcile",
            Error::InvalidPullSecret { .. } => "pull_secret",
            Error::LoadBalancerTimeout { .. } => "load_balancer",
            Error::Certificate(_) => "certificate",
            Error::MissingField(_) => "missing_field",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
        }
    }
}

/// 判断 kube 错误是否为 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// 判断 kube 错误是否为 409（已存在）
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}
