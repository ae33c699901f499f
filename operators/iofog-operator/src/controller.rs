//! 控制器模块
//!
//! 该模块负责启动与停止 ControlPlane 控制器：监听 ControlPlane 以及它所拥有的
//! Deployment、Service、Secret、ConfigMap，变化时触发协调。

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::client::Client;
use kube::runtime::controller::Controller as KubeController;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Resource;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crd::ControlPlane;
use crate::error::Result;
use crate::reconcile::{self, Context};

/// 按监听范围创建 API：指定命名空间或整个集群
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// 控制器结构体
pub struct Controller {
    /// 协调上下文
    context: Arc<Context>,
    /// 停止信号
    shutdown: Option<oneshot::Sender<()>>,
    /// 控制器任务
    task: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            shutdown: None,
            task: None,
        }
    }

    /// 控制器是否正在运行
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// 启动控制器
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("ControlPlane 控制器已在运行");
            return Ok(());
        }

        let client = self.context.client.clone();
        let namespace = self.context.config.namespace().map(str::to_string);
        let ns = namespace.as_deref();

        let (tx, rx) = oneshot::channel::<()>();
        let controller = KubeController::new(scoped_api::<ControlPlane>(client.clone(), ns), WatcherConfig::default())
            .owns(scoped_api::<Deployment>(client.clone(), ns), WatcherConfig::default())
            .owns(scoped_api::<Service>(client.clone(), ns), WatcherConfig::default())
            .owns(scoped_api::<Secret>(client.clone(), ns), WatcherConfig::default())
            .owns(scoped_api::<ConfigMap>(client, ns), WatcherConfig::default())
            .graceful_shutdown_on(async move {
                rx.await.ok();
            })
            .run(reconcile::reconcile, reconcile::error_policy, self.context.clone())
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => debug!("协调完成: {} -> {:?}", obj.name, action),
                    Err(e) => debug!("协调未完成: {}", e),
                }
            });

        let metrics = self.context.metrics.clone();
        self.task = Some(tokio::spawn(async move {
            metrics.mark_started();
            controller.await;
            info!("ControlPlane 控制器已退出");
        }));
        self.shutdown = Some(tx);

        match namespace {
            Some(ns) => info!("ControlPlane 控制器已启动，监听命名空间 {}", ns),
            None => info!("ControlPlane 控制器已启动，监听整个集群"),
        }
        Ok(())
    }

    /// 停止控制器，等待正在进行的协调结束
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            // 接收端已退出说明控制器已停止
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("等待控制器退出失败: {}", e);
            }
        }

        info!("ControlPlane 控制器已停止");
        Ok(())
    }

    /// 等待控制器自行退出
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                warn!("控制器任务异常退出: {}", e);
            }
            self.task = None;
        }
    }
}
