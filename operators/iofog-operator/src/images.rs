//! 默认镜像
//!
//! ControlPlane 未指定镜像时使用的默认值，仓库与标签可通过配置覆盖。

use serde::{Deserialize, Serialize};

/// 默认镜像仓库与标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDefaults {
    /// 镜像仓库前缀
    pub repository: String,
    /// Controller 镜像标签
    pub controller_tag: String,
    /// Router 镜像标签
    pub router_tag: String,
    /// Port Manager 镜像标签
    pub port_manager_tag: String,
    /// Proxy 镜像标签
    pub proxy_tag: String,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            repository: "ghcr.io/datasance".to_string(),
            controller_tag: "latest".to_string(),
            router_tag: "latest".to_string(),
            port_manager_tag: "latest".to_string(),
            proxy_tag: "latest".to_string(),
        }
    }
}

impl ImageDefaults {
    fn image(&self, name: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.repository.trim_end_matches('/'), name, tag)
    }

    pub fn controller(&self) -> String {
        self.image("controller", &self.controller_tag)
    }

    pub fn router(&self) -> String {
        self.image("router", &self.router_tag)
    }

    pub fn port_manager(&self) -> String {
        self.image("port-manager", &self.port_manager_tag)
    }

    pub fn proxy(&self) -> String {
        self.image("proxy", &self.proxy_tag)
    }
}

/// 为空时返回默认值
pub fn or_default(image: &str, default: impl FnOnce() -> String) -> String {
    if image.is_empty() {
        default()
    } else {
        image.to_string()
    }
}
