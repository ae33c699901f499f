//! 配置管理模块
//!
//! 按优先级合并配置：内置默认值 < 配置文件（YAML/JSON）< `IOFOG_OPERATOR__*` 环境变量，
//! 命令行参数最后覆盖。

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::images::ImageDefaults;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "IOFOG_OPERATOR";

/// Operator 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// 指标服务监听地址
    pub metrics_addr: String,
    /// 监听的命名空间，为空时监听整个集群
    pub watch_namespace: String,
    /// 日志级别
    pub log_level: String,
    /// 是否输出 JSON 日志
    pub log_json: bool,
    /// 等待负载均衡地址的超时（秒）
    pub load_balancer_timeout_secs: u64,
    /// 协调失败后的重试间隔（秒）
    pub error_requeue_secs: u64,
    /// 默认镜像
    pub images: ImageDefaults,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_addr: "0.0.0.0:8080".to_string(),
            watch_namespace: String::new(),
            log_level: "info".to_string(),
            log_json: false,
            load_balancer_timeout_secs: 360,
            error_requeue_secs: 30,
            images: ImageDefaults::default(),
        }
    }
}

impl OperatorConfig {
    /// 加载配置，`path` 为可选的配置文件
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => {
                    return Err(Error::Config(format!(
                        "不支持的配置文件格式 {}，仅支持 YAML 或 JSON",
                        path.display()
                    )))
                }
            };
            builder = builder.add_source(File::from(path).format(format));
        }

        let config = builder
            .add_source(env.try_parsing(true))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: OperatorConfig = config
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.load_balancer_timeout_secs == 0 {
            return Err(Error::Config("load_balancer_timeout_secs 必须大于 0".to_string()));
        }
        if self.error_requeue_secs == 0 {
            return Err(Error::Config("error_requeue_secs 必须大于 0".to_string()));
        }
        if self.images.repository.is_empty() {
            return Err(Error::Config("images.repository 不能为空".to_string()));
        }
        Ok(())
    }

    pub fn load_balancer_timeout(&self) -> Duration {
        Duration::from_secs(self.load_balancer_timeout_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// 监听命名空间，空字符串视为集群范围
    pub fn namespace(&self) -> Option<&str> {
        let ns = self.watch_namespace.trim();
        (!ns.is_empty()).then_some(ns)
    }
}
