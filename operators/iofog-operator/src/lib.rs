//! ioFog Operator - 在 Kubernetes 上部署与维护 ioFog 控制平面
//!
//! 该模块实现了 ControlPlane 自定义资源的 Operator：根据资源描述部署
//! Controller、Router 与 Port Manager，初始化 Controller 数据库，
//! 生成 Router 证书，并向 Controller 注册默认 Router。

pub mod certs;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod event_handler;
pub mod images;
pub mod k8s;
pub mod metrics;
pub mod microservice;
pub mod reconcile;
pub mod resources;

use std::sync::Arc;

use kube::Client;
use tokio::sync::RwLock;

pub use config::OperatorConfig;
pub use crd::ControlPlane;
pub use error::{Error, Result};

use event_handler::EventPublisher;
use metrics::Metrics;
use reconcile::{Context, HttpControllerApi};

/// Operator 主结构体
pub struct IofogOperator {
    /// 控制器
    controller: Arc<RwLock<controller::Controller>>,
}

impl IofogOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, config, metrics))
    }

    /// 使用已有的 Kubernetes 客户端创建 Operator
    pub fn with_client(client: Client, config: OperatorConfig, metrics: Arc<Metrics>) -> Self {
        // Pod 名称用于区分事件来源
        let instance = std::env::var("POD_NAME").ok();

        let context = Arc::new(Context {
            client: client.clone(),
            config,
            metrics,
            events: EventPublisher::new(client, instance),
            controller_api: Arc::new(HttpControllerApi),
        });

        Self {
            controller: Arc::new(RwLock::new(controller::Controller::new(context))),
        }
    }

    /// 启动 Operator
    pub async fn start(&self) -> Result<()> {
        self.controller.write().await.start().await
    }

    /// 停止 Operator
    pub async fn stop(&self) -> Result<()> {
        self.controller.write().await.stop().await
    }

    /// 等待控制器退出
    pub async fn wait(&self) {
        self.controller.write().await.wait().await
    }
}
