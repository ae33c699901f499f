//! Controller 组件协调
//!
//! 初始化外部数据库，部署 Controller，等待其 API 可用后注册默认 Router，
//! 最后确认对外入口已就绪。

use std::time::Duration;

use async_trait::async_trait;
use iofog_client::{fetch_client_token, ControllerClient, OidcCredentials};
use iofog_common::DefaultRouter;
use iofog_db::{create_controller_database, BootstrapOutcome, DatabaseSettings};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::{resolve_router_endpoint, Reconciliation};
use crate::config::OperatorConfig;
use crate::crd::ControlPlane;
use crate::error::{Error, Result};
use crate::k8s::{self, ClusterClient};
use crate::microservice::controller::controller_port;
use crate::microservice::{
    is_cluster_ip, is_load_balancer, new_controller_microservice, ControllerMicroserviceConfig,
    CONTROLLER_DB_SECRET, CONTROLLER_NAME,
};
use crate::resources::{self, Owner, CONTROLLER_INGRESS_NAME};

pub const COMPONENT: &str = "Controller";

/// 新建 Deployment 后等待 Pod 启动的间隔
const DEPLOYMENT_CREATED_REQUEUE: Duration = Duration::from_secs(5);
/// Controller API 不可用时的重试间隔
const STATUS_REQUEUE: Duration = Duration::from_secs(3);

/// Controller REST 端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ControllerEndpoint {
    /// 集群内部 DNS 地址
    pub fn in_cluster(scheme: &str, namespace: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: format!("{CONTROLLER_NAME}.{namespace}.svc.cluster.local"),
            port,
        }
    }
}

/// 协调 Controller 时需要的外部调用
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// 创建 Controller 数据库并执行迁移
    async fn bootstrap_database(&self, settings: DatabaseSettings) -> iofog_db::Result<BootstrapOutcome>;

    /// 请求 `GET /status`
    async fn check_status(&self, endpoint: ControllerEndpoint) -> iofog_common::Result<()>;

    /// 通过 client-credentials 获取访问令牌
    async fn fetch_token(&self, credentials: OidcCredentials) -> iofog_common::Result<String>;

    /// 请求 `PUT /router`
    async fn register_default_router(
        &self,
        endpoint: ControllerEndpoint,
        token: Option<String>,
        router: DefaultRouter,
    ) -> iofog_common::Result<()>;
}

/// 基于 HTTP 客户端与 sqlx 的实现
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpControllerApi;

#[async_trait]
impl ControllerApi for HttpControllerApi {
    async fn bootstrap_database(&self, settings: DatabaseSettings) -> iofog_db::Result<BootstrapOutcome> {
        create_controller_database(&settings).await
    }

    async fn check_status(&self, endpoint: ControllerEndpoint) -> iofog_common::Result<()> {
        let client = ControllerClient::new(&endpoint.scheme, &endpoint.host, endpoint.port)?;
        let status = client.status().await?;
        debug!("Controller {} 状态: {}", endpoint.host, status.status);
        Ok(())
    }

    async fn fetch_token(&self, credentials: OidcCredentials) -> iofog_common::Result<String> {
        fetch_client_token(&credentials).await
    }

    async fn register_default_router(
        &self,
        endpoint: ControllerEndpoint,
        token: Option<String>,
        router: DefaultRouter,
    ) -> iofog_common::Result<()> {
        let mut client = ControllerClient::new(&endpoint.scheme, &endpoint.host, endpoint.port)?;
        if let Some(token) = token {
            client.set_access_token(token);
        }
        client.put_default_router(&router).await
    }
}

/// 由 ControlPlane 生成 Controller 配置（已填充默认值）
pub fn controller_config(cp: &ControlPlane, config: &OperatorConfig) -> ControllerMicroserviceConfig {
    let spec = &cp.spec;
    ControllerMicroserviceConfig {
        replicas: spec.replicas.controller,
        image: spec.images.controller.clone(),
        image_pull_secret: spec.images.pull_secret.clone(),
        service_type: spec.services.controller.type_.clone(),
        service_annotations: spec.services.controller.annotations.clone(),
        load_balancer_addr: spec.services.controller.address.clone(),
        https: spec.controller.https,
        secret_name: spec.controller.secret_name.clone(),
        auth: spec.auth.clone(),
        db: spec.database.clone(),
        proxy_image: crate::images::or_default(&spec.images.proxy, || config.images.proxy()),
        router_image: crate::images::or_default(&spec.images.router, || config.images.router()),
        ecn: spec.controller.ecn_name.clone(),
        pid_base_dir: spec.controller.pid_base_dir.clone(),
        ecn_viewer_port: spec.controller.ecn_viewer_port,
        ecn_viewer_url: spec.controller.ecn_viewer_url.clone(),
    }
    .with_defaults(|| config.images.controller())
}

fn database_settings(cp: &ControlPlane) -> DatabaseSettings {
    let db = &cp.spec.database;
    DatabaseSettings {
        provider: db.provider.clone(),
        host: db.host.clone(),
        port: db.port,
        user: db.user.clone(),
        password: db.password.clone(),
        database_name: db.database_name.clone(),
    }
}

fn oidc_credentials(cp: &ControlPlane) -> OidcCredentials {
    let auth = &cp.spec.auth;
    OidcCredentials {
        auth_url: auth.url.clone(),
        realm: auth.realm.clone(),
        client_id: auth.controller_client.clone(),
        client_secret: auth.controller_secret.clone(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// 协调 Controller 组件
pub async fn reconcile<C, A>(
    cp: &ControlPlane,
    owner: &Owner,
    cluster: &C,
    api: &A,
    config: &OperatorConfig,
) -> Reconciliation
where
    C: ClusterClient + ?Sized,
    A: ControllerApi + ?Sized,
{
    run(cp, owner, cluster, api, config).await.into()
}

async fn run<C, A>(
    cp: &ControlPlane,
    owner: &Owner,
    cluster: &C,
    api: &A,
    config: &OperatorConfig,
) -> Result<Reconciliation>
where
    C: ClusterClient + ?Sized,
    A: ControllerApi + ?Sized,
{
    let namespace = owner.namespace.as_str();

    if !cp.spec.database.provider.is_empty() {
        match api.bootstrap_database(database_settings(cp)).await? {
            BootstrapOutcome::Created => info!("已创建 Controller 数据库 {}", cp.spec.database.database_name),
            BootstrapOutcome::Migrated => debug!("Controller 数据库 {} 已存在，已执行迁移", cp.spec.database.database_name),
        }
    }

    let cfg = controller_config(cp, config);
    let ms = new_controller_microservice(namespace, &cfg);

    k8s::ensure_service_account(cluster, owner, &ms).await?;

    // 数据库凭证变化后需要重启 Pod 才能生效
    let mut should_restart = false;
    if let Some(secret) = ms.secret(CONTROLLER_DB_SECRET) {
        should_restart = cluster
            .ensure_secret(resources::owned_secret(owner, secret), true)
            .await?;
    }

    k8s::ensure_secrets(cluster, owner, &ms, &[CONTROLLER_DB_SECRET]).await?;
    k8s::ensure_services(cluster, owner, &ms).await?;

    if is_cluster_ip(&cfg.service_type) {
        let ingress = resources::new_controller_ingress(owner, &cp.spec.ingresses.controller);
        cluster.apply_ingress(ingress).await?;
    }

    k8s::ensure_pvcs(cluster, owner, &ms).await?;

    let existed = cluster.deployment_exists(&ms.name).await?;
    cluster
        .apply_deployment(resources::new_deployment(owner, &ms))
        .await?;
    if !existed {
        info!("已创建 Controller Deployment，等待 Pod 启动");
        return Ok(Reconciliation::Requeue(DEPLOYMENT_CREATED_REQUEUE));
    }

    let port = controller_port(&ms)?;
    let endpoint = ControllerEndpoint::in_cluster(cfg.scheme(), namespace, port);

    if let Err(e) = api.check_status(endpoint.clone()).await {
        if matches!(e, iofog_common::Error::InvalidUrl { .. }) {
            return Err(e.into());
        }
        if e.is_connection_refused() {
            debug!("Controller 尚未启动: {}", e);
        } else {
            warn!("Controller API 尚不可用: {}", e);
        }
        return Ok(Reconciliation::Requeue(STATUS_REQUEUE));
    }

    // 首次部署时认证配置可能尚未生效，此时不带令牌继续
    let token = match api.fetch_token(oidc_credentials(cp)).await {
        Ok(token) => Some(token),
        Err(e) if e.is_invalid_credentials() => {
            warn!("获取 Controller 访问令牌失败，忽略: {}", e);
            None
        }
        Err(e) => return Err(e.into()),
    };

    let router = resolve_router_endpoint(cp, cluster, config.load_balancer_timeout(), COMPONENT).await?;
    let spec = &cp.spec.router;
    let default_router = DefaultRouter {
        host: router.address,
        messaging_port: router.message_port,
        inter_router_port: router.interior_port,
        edge_router_port: router.edge_port,
        require_ssl: non_empty(&spec.require_ssl),
        sasl_mechanisms: non_empty(&spec.sasl_mechanisms),
        authenticate_peer: non_empty(&spec.authenticate_peer),
    };
    info!("向 Controller 注册默认 Router {}", default_router.host);
    api.register_default_router(endpoint, token, default_router)
        .await?;

    if is_load_balancer(&cfg.service_type) {
        let host = cluster
            .wait_for_load_balancer(CONTROLLER_NAME, config.load_balancer_timeout())
            .await?;
        let external = ControllerEndpoint {
            scheme: cfg.scheme().to_string(),
            host,
            port,
        };
        if let Err(e) = api.check_status(external).await {
            debug!("无法通过负载均衡地址访问 Controller: {}", e);
            return Ok(Reconciliation::Requeue(STATUS_REQUEUE));
        }
    } else if is_cluster_ip(&cfg.service_type)
        && !cluster.ingress_has_load_balancer(CONTROLLER_INGRESS_NAME).await?
    {
        return Err(Error::reconcile(
            COMPONENT,
            "no LoadBalancer ingress found for Ingress resource",
        ));
    }

    if should_restart {
        cluster.restart_deployment(&ms.name).await?;
    }

    Ok(Reconciliation::Continue)
}
