//! Kubernetes 操作模块
//!
//! `ClusterClient` 抽象了协调过程需要的集群操作（创建或跳过、创建或替换、
//! 等待负载均衡地址、滚动重启），便于在测试中替换为 mock。
//! 本模块中的 `ensure_*` 函数在其之上实现各组件共用的步骤。

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::certs::CA_CERT_KEY;
use crate::crd::{ControlPlane, ControlPlaneStatus};
use crate::error::{is_already_exists, is_not_found, Error, Result};
use crate::microservice::Microservice;
use crate::resources::{self, Owner};

/// 镜像拉取 Secret 必须的类型
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// 滚动重启使用的 Pod 模板注解
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

const LOAD_BALANCER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 协调过程使用的集群操作，作用于单个命名空间
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// 不存在时创建 ServiceAccount
    async fn ensure_service_account(&self, account: ServiceAccount) -> Result<()>;

    /// 不存在时创建 Role
    async fn ensure_role(&self, role: Role) -> Result<()>;

    /// 不存在时创建 RoleBinding
    async fn ensure_role_binding(&self, binding: RoleBinding) -> Result<()>;

    /// 不存在时创建 Service
    async fn ensure_service(&self, service: Service) -> Result<()>;

    /// 不存在时创建 PVC
    async fn ensure_pvc(&self, claim: PersistentVolumeClaim) -> Result<()>;

    /// 不存在时创建 Secret，`update` 为 true 时覆盖已有的 Secret
    ///
    /// 返回 Secret 原本是否存在。
    async fn ensure_secret(&self, secret: Secret, update: bool) -> Result<bool>;

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>>;

    /// 创建或替换 Ingress
    async fn apply_ingress(&self, ingress: Ingress) -> Result<()>;

    /// 创建或替换 ConfigMap
    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()>;

    /// 创建或替换 Deployment
    async fn apply_deployment(&self, deployment: Deployment) -> Result<()>;

    async fn deployment_exists(&self, name: &str) -> Result<bool>;

    /// 触发 Deployment 滚动重启
    async fn restart_deployment(&self, name: &str) -> Result<()>;

    /// 等待 LoadBalancer Service 分配外部地址（IP 或主机名）
    async fn wait_for_load_balancer(&self, service: &str, timeout: Duration) -> Result<String>;

    /// Ingress 是否已有负载均衡入口
    async fn ingress_has_load_balancer(&self, name: &str) -> Result<bool>;

    /// 读取线上最新的 ControlPlane，已删除时返回 None
    async fn get_control_plane(&self, name: &str) -> Result<Option<ControlPlane>>;

    /// 写回 ControlPlane 状态
    async fn patch_control_plane_status(&self, name: &str, status: ControlPlaneStatus) -> Result<()>;
}

/// 基于 kube 客户端的实现
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl KubeClusterClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// 不存在时创建，返回对象原本是否存在
    async fn create_if_missing<K>(&self, obj: &K) -> Result<bool>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let api = self.api::<K>();
        let name = obj.name_any();

        if api.get_opt(&name).await?.is_some() {
            debug!("{} {}/{} 已存在，跳过", K::kind(&()), self.namespace, name);
            return Ok(true);
        }

        info!("创建 {} {}/{}", K::kind(&()), self.namespace, name);
        match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(false),
            // 并发协调时可能已被创建
            Err(e) if is_already_exists(&e) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// 创建或替换，替换时沿用线上对象的 resourceVersion
    async fn create_or_replace<K>(&self, mut obj: K) -> Result<bool>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let api = self.api::<K>();
        let name = obj.name_any();

        match api.get_opt(&name).await? {
            None => {
                info!("创建 {} {}/{}", K::kind(&()), self.namespace, name);
                api.create(&PostParams::default(), &obj).await?;
                Ok(false)
            }
            Some(existing) => {
                info!("更新 {} {}/{}", K::kind(&()), self.namespace, name);
                obj.meta_mut().resource_version = existing.meta().resource_version.clone();
                api.replace(&name, &PostParams::default(), &obj).await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn ensure_service_account(&self, account: ServiceAccount) -> Result<()> {
        self.create_if_missing(&account).await.map(|_| ())
    }

    async fn ensure_role(&self, role: Role) -> Result<()> {
        self.create_if_missing(&role).await.map(|_| ())
    }

    async fn ensure_role_binding(&self, binding: RoleBinding) -> Result<()> {
        self.create_if_missing(&binding).await.map(|_| ())
    }

    async fn ensure_service(&self, service: Service) -> Result<()> {
        self.create_if_missing(&service).await.map(|_| ())
    }

    async fn ensure_pvc(&self, claim: PersistentVolumeClaim) -> Result<()> {
        self.create_if_missing(&claim).await.map(|_| ())
    }

    async fn ensure_secret(&self, secret: Secret, update: bool) -> Result<bool> {
        if update {
            self.create_or_replace(secret).await
        } else {
            self.create_if_missing(&secret).await
        }
    }

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>> {
        Ok(self.api::<Secret>().get_opt(name).await?)
    }

    async fn apply_ingress(&self, ingress: Ingress) -> Result<()> {
        self.create_or_replace(ingress).await.map(|_| ())
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()> {
        self.create_or_replace(config_map).await.map(|_| ())
    }

    async fn apply_deployment(&self, mut deployment: Deployment) -> Result<()> {
        let name = deployment.name_any();
        if let Some(existing) = self.api::<Deployment>().get_opt(&name).await? {
            carry_restart_annotation(&existing, &mut deployment);
        }
        self.create_or_replace(deployment).await.map(|_| ())
    }

    async fn deployment_exists(&self, name: &str) -> Result<bool> {
        Ok(self.api::<Deployment>().get_opt(name).await?.is_some())
    }

    async fn restart_deployment(&self, name: &str) -> Result<()> {
        info!("滚动重启 Deployment {}/{}", self.namespace, name);
        let patch = restart_patch(chrono::Utc::now());
        self.api::<Deployment>()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn wait_for_load_balancer(&self, service: &str, timeout: Duration) -> Result<String> {
        let api = self.api::<Service>();
        let deadline = Instant::now() + timeout;

        info!("等待 Service {}/{} 的负载均衡地址", self.namespace, service);
        loop {
            if let Some(address) = api.get_opt(service).await?.as_ref().and_then(load_balancer_address) {
                info!("Service {}/{} 地址为 {}", self.namespace, service, address);
                return Ok(address);
            }

            if Instant::now() >= deadline {
                return Err(Error::LoadBalancerTimeout {
                    service: service.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(LOAD_BALANCER_POLL_INTERVAL).await;
        }
    }

    async fn ingress_has_load_balancer(&self, name: &str) -> Result<bool> {
        match self.api::<Ingress>().get(name).await {
            Ok(ingress) => Ok(ingress_load_balanced(&ingress)),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_control_plane(&self, name: &str) -> Result<Option<ControlPlane>> {
        Ok(self.api::<ControlPlane>().get_opt(name).await?)
    }

    async fn patch_control_plane_status(&self, name: &str, status: ControlPlaneStatus) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<ControlPlane>()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Service 的第一个负载均衡入口：优先 IP，其次主机名
pub fn load_balancer_address(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .find_map(|ingress| {
            ingress
                .ip
                .clone()
                .filter(|ip| !ip.is_empty())
                .or_else(|| ingress.hostname.clone().filter(|h| !h.is_empty()))
        })
}

pub fn ingress_load_balanced(ingress: &Ingress) -> bool {
    ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(false, |entries| !entries.is_empty())
}

/// 滚动重启补丁
pub fn restart_patch(now: chrono::DateTime<chrono::Utc>) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                    }
                }
            }
        }
    })
}

/// 替换 Deployment 时保留上一次滚动重启的注解，避免每次协调都触发重启
pub fn carry_restart_annotation(existing: &Deployment, deployment: &mut Deployment) {
    let Some(restarted_at) = existing
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(RESTARTED_AT_ANNOTATION))
    else {
        return;
    };

    if let Some(spec) = deployment.spec.as_mut() {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .entry(RESTARTED_AT_ANNOTATION.to_string())
            .or_insert_with(|| restarted_at.clone());
    }
}

/// Secret 是否包含 `ca.crt`
pub fn secret_has_ca(secret: &Secret) -> bool {
    secret.data.as_ref().map_or(false, |d| d.contains_key(CA_CERT_KEY))
        || secret
            .string_data
            .as_ref()
            .map_or(false, |d| d.contains_key(CA_CERT_KEY))
}

/// 校验镜像拉取 Secret：必须存在且类型为 dockerconfigjson
pub fn check_pull_secret(name: &str, secret: Option<&Secret>) -> Result<()> {
    match secret {
        Some(s) if s.type_.as_deref() == Some(DOCKER_CONFIG_JSON_TYPE) => Ok(()),
        _ => Err(Error::InvalidPullSecret {
            name: name.to_string(),
        }),
    }
}

/// 创建组件的 ServiceAccount，配置了拉取 Secret 时先校验
pub async fn ensure_service_account<C>(cluster: &C, owner: &Owner, ms: &Microservice) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    if !ms.image_pull_secret.is_empty() {
        let secret = cluster.get_secret(&ms.image_pull_secret).await?;
        check_pull_secret(&ms.image_pull_secret, secret.as_ref())?;
    }
    cluster
        .ensure_service_account(resources::new_service_account(owner, ms))
        .await
}

/// 创建组件的 Role 与 RoleBinding
pub async fn ensure_rbac<C>(cluster: &C, owner: &Owner, ms: &Microservice) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    cluster.ensure_role(resources::new_role(owner, ms)).await?;
    cluster
        .ensure_role_binding(resources::new_role_binding(owner, ms))
        .await
}

pub async fn ensure_services<C>(cluster: &C, owner: &Owner, ms: &Microservice) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    for service in resources::new_services(owner, ms) {
        cluster.ensure_service(service).await?;
    }
    Ok(())
}

/// 创建组件的 Secret，`skip` 中的 Secret 由调用方单独处理
pub async fn ensure_secrets<C>(
    cluster: &C,
    owner: &Owner,
    ms: &Microservice,
    skip: &[&str],
) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    for secret in &ms.secrets {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        if skip.contains(&name) {
            continue;
        }
        cluster
            .ensure_secret(resources::owned_secret(owner, secret), false)
            .await?;
    }
    Ok(())
}

/// 为每个 PVC 卷创建 PVC
pub async fn ensure_pvcs<C>(cluster: &C, owner: &Owner, ms: &Microservice) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    for volume in ms.pvc_volumes() {
        cluster
            .ensure_pvc(resources::new_persistent_volume_claim(owner, &volume.name))
            .await?;
    }
    Ok(())
}
