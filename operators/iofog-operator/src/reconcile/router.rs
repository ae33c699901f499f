//! Router 组件协调
//!
//! 用户未提供证书时生成 Router 的 CA 与证书，渲染 `skrouterd.json` 并部署 Router。

use tracing::{debug, info, warn};

use super::{resolve_router_endpoint, Reconciliation};
use crate::certs::{self, ROUTER_SECRETS};
use crate::config::OperatorConfig;
use crate::crd::ControlPlane;
use crate::error::{Error, Result};
use crate::k8s::{self, secret_has_ca, ClusterClient};
use crate::microservice::router::{DEFAULT_AMQPS_SECRET, DEFAULT_INTERNAL_SECRET};
use crate::microservice::{new_router_microservice, RouterMicroserviceConfig};
use crate::resources::{self, Owner};

pub const COMPONENT: &str = "Router";

/// 证书来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CertSource {
    /// 用户提供了两个证书 Secret
    User { with_ca: bool },
    /// 由 Operator 生成
    Generated,
    /// 只提供了其中一个，另一个沿用默认名称
    Partial,
}

/// 由 ControlPlane 生成 Router 配置（已填充默认值）
pub fn router_config(cp: &ControlPlane, config: &OperatorConfig, secret_with_ca: bool) -> RouterMicroserviceConfig {
    let spec = &cp.spec;
    RouterMicroserviceConfig {
        image: spec.images.router.clone(),
        image_pull_secret: spec.images.pull_secret.clone(),
        service_type: spec.services.router.type_.clone(),
        service_annotations: spec.services.router.annotations.clone(),
        load_balancer_addr: spec.services.router.address.clone(),
        internal_secret: spec.router.internal_secret.clone(),
        amqps_secret: spec.router.amqps_secret.clone(),
        secret_with_ca,
        sasl_mechanisms: spec.router.sasl_mechanisms.clone(),
        authenticate_peer: spec.router.authenticate_peer.clone(),
    }
    .with_defaults(|| config.images.router())
}

async fn cert_source<C>(cp: &ControlPlane, cluster: &C) -> Result<CertSource>
where
    C: ClusterClient + ?Sized,
{
    let internal = cp.spec.router.internal_secret.as_str();
    let amqps = cp.spec.router.amqps_secret.as_str();

    match (internal.is_empty(), amqps.is_empty()) {
        (true, true) => Ok(CertSource::Generated),
        (false, false) => {
            let mut with_ca = true;
            for name in [internal, amqps] {
                let secret = cluster.get_secret(name).await?.ok_or_else(|| {
                    Error::reconcile(COMPONENT, format!("router secret {name} not found"))
                })?;
                with_ca &= secret_has_ca(&secret);
            }
            Ok(CertSource::User { with_ca })
        }
        _ => Ok(CertSource::Partial),
    }
}

/// 只指定了一个用户证书时，另一个挂载默认名称的 Secret，该 Secret 不会被生成
async fn check_partial_secrets<C>(cp: &ControlPlane, cluster: &C) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    let (field, fallback) = if cp.spec.router.internal_secret.is_empty() {
        ("internalSecret", DEFAULT_INTERNAL_SECRET)
    } else {
        ("amqpsSecret", DEFAULT_AMQPS_SECRET)
    };

    if cluster.get_secret(fallback).await?.is_none() {
        warn!(
            "router.{} 未设置，Router 将挂载 Secret {}，但该 Secret 不存在，Pod 会一直等待其创建",
            field, fallback
        );
    }
    Ok(())
}

/// 三个证书 Secret 缺任意一个时全部重新生成
async fn ensure_router_certs<C>(cluster: &C, owner: &Owner, address: &str) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    let mut missing = false;
    for name in ROUTER_SECRETS {
        if cluster.get_secret(name).await?.is_none() {
            missing = true;
            break;
        }
    }
    if !missing {
        debug!("Router 证书已存在");
        return Ok(());
    }

    info!("为 Router 地址 {} 生成证书", address);
    for secret in certs::router_secrets(&owner.namespace, address)? {
        cluster
            .ensure_secret(resources::owned_secret(owner, &secret), true)
            .await?;
    }
    Ok(())
}

/// 协调 Router 组件
pub async fn reconcile<C>(cp: &ControlPlane, owner: &Owner, cluster: &C, config: &OperatorConfig) -> Reconciliation
where
    C: ClusterClient + ?Sized,
{
    run(cp, owner, cluster, config).await.into()
}

async fn run<C>(cp: &ControlPlane, owner: &Owner, cluster: &C, config: &OperatorConfig) -> Result<Reconciliation>
where
    C: ClusterClient + ?Sized,
{
    let source = cert_source(cp, cluster).await?;
    let secret_with_ca = match source {
        CertSource::User { with_ca } => with_ca,
        // 生成的证书总是带有 ca.crt
        CertSource::Generated => true,
        CertSource::Partial => {
            check_partial_secrets(cp, cluster).await?;
            false
        }
    };

    let cfg = router_config(cp, config, secret_with_ca);
    let ms = new_router_microservice(&owner.namespace, &cfg);

    k8s::ensure_service_account(cluster, owner, &ms).await?;
    k8s::ensure_rbac(cluster, owner, &ms).await?;
    k8s::ensure_services(cluster, owner, &ms).await?;

    let endpoint = resolve_router_endpoint(cp, cluster, config.load_balancer_timeout(), COMPONENT).await?;

    if source == CertSource::Generated {
        ensure_router_certs(cluster, owner, &endpoint.address).await?;
    }

    k8s::ensure_secrets(cluster, owner, &ms, &[]).await?;
    cluster
        .apply_config_map(resources::new_router_config_map(
            owner,
            cfg.router_config(&owner.namespace),
        ))
        .await?;
    cluster
        .apply_deployment(resources::new_deployment(owner, &ms))
        .await?;

    Ok(Reconciliation::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use rstest::rstest;

    use crate::crd::ControlPlaneSpec;
    use crate::k8s::MockClusterClient;
    use crate::microservice::ROUTER_NAME;
    use crate::resources::ROUTER_CONFIG_MAP_NAME;

    fn control_plane() -> ControlPlane {
        let mut cp = ControlPlane::new("pot", ControlPlaneSpec::default());
        cp.metadata.namespace = Some("iofog".to_string());
        cp
    }

    fn owner() -> Owner {
        Owner {
            namespace: "iofog".to_string(),
            reference: None,
        }
    }

    fn secret(with_ca: bool) -> Secret {
        let mut data = BTreeMap::from([("tls.crt".to_string(), ByteString(b"pem".to_vec()))]);
        if with_ca {
            data.insert("ca.crt".to_string(), ByteString(b"pem".to_vec()));
        }
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    /// 部署阶段的集群操作全部成功
    fn deploy_expectations(cluster: &mut MockClusterClient) {
        cluster.expect_ensure_service_account().returning(|_| Ok(()));
        cluster.expect_ensure_role().returning(|_| Ok(()));
        cluster.expect_ensure_role_binding().returning(|_| Ok(()));
        cluster.expect_ensure_service().returning(|_| Ok(()));
        cluster
            .expect_apply_config_map()
            .withf(|cm| cm.metadata.name.as_deref() == Some(ROUTER_CONFIG_MAP_NAME))
            .times(1)
            .returning(|_| Ok(()));
        cluster
            .expect_apply_deployment()
            .withf(|d| d.metadata.name.as_deref() == Some(ROUTER_NAME))
            .times(1)
            .returning(|_| Ok(()));
    }

    #[rstest]
    #[case(true, true, true)]
    #[case(true, false, false)]
    #[case(false, false, false)]
    #[tokio::test]
    async fn test_user_secrets_ca_detection(
        #[case] internal_ca: bool,
        #[case] amqps_ca: bool,
        #[case] expected: bool,
    ) {
        let mut cp = control_plane();
        cp.spec.router.internal_secret = "my-internal".to_string();
        cp.spec.router.amqps_secret = "my-amqps".to_string();

        let mut cluster = MockClusterClient::new();
        cluster.expect_get_secret().returning(move |name| {
            Ok(Some(secret(if name == "my-internal" { internal_ca } else { amqps_ca })))
        });

        let source = cert_source(&cp, &cluster).await.unwrap();
        assert_eq!(source, CertSource::User { with_ca: expected });
    }

    #[tokio::test]
    async fn test_missing_user_secret_fails() {
        let mut cp = control_plane();
        cp.spec.router.internal_secret = "my-internal".to_string();
        cp.spec.router.amqps_secret = "my-amqps".to_string();

        let mut cluster = MockClusterClient::new();
        cluster.expect_get_secret().returning(|_| Ok(None));
        cluster.expect_apply_deployment().never();

        let result = reconcile(&cp, &owner(), &cluster, &OperatorConfig::default()).await;
        match result {
            Reconciliation::Failed(err) => {
                assert_eq!(err.to_string(), "reconcile Router failed: router secret my-internal not found")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_generates_certs_when_missing() {
        let mut cp = control_plane();
        cp.spec.services.router.type_ = "LoadBalancer".to_string();

        let mut cluster = MockClusterClient::new();
        deploy_expectations(&mut cluster);
        cluster
            .expect_wait_for_load_balancer()
            .withf(|service, _| service == ROUTER_NAME)
            .returning(|_, _| Ok("10.0.0.12".to_string()));
        // router-amqps 缺失
        cluster
            .expect_get_secret()
            .returning(|name| Ok((name != "router-amqps").then(|| secret(true))));
        cluster
            .expect_ensure_secret()
            .withf(|s, update| {
                *update
                    && ROUTER_SECRETS.contains(&s.metadata.name.as_deref().unwrap_or_default())
                    && s.metadata.namespace.as_deref() == Some("iofog")
            })
            .times(3)
            .returning(|_, _| Ok(true));

        let result = reconcile(&cp, &owner(), &cluster, &OperatorConfig::default()).await;
        assert!(matches!(result, Reconciliation::Continue));
    }

    #[tokio::test]
    async fn test_existing_certs_are_kept() {
        let mut cp = control_plane();
        cp.spec.services.router.type_ = "ClusterIP".to_string();
        cp.spec.ingresses.router.address = "router.example.com".to_string();

        let mut cluster = MockClusterClient::new();
        deploy_expectations(&mut cluster);
        cluster.expect_get_secret().returning(|_| Ok(Some(secret(true))));
        cluster.expect_ensure_secret().never();

        let result = reconcile(&cp, &owner(), &cluster, &OperatorConfig::default()).await;
        assert!(matches!(result, Reconciliation::Continue));
    }

    #[tokio::test]
    async fn test_missing_router_address_fails() {
        let mut cp = control_plane();
        cp.spec.services.router.type_ = "ClusterIP".to_string();

        let mut cluster = MockClusterClient::new();
        cluster.expect_ensure_service_account().returning(|_| Ok(()));
        cluster.expect_ensure_role().returning(|_| Ok(()));
        cluster.expect_ensure_role_binding().returning(|_| Ok(()));
        cluster.expect_ensure_service().returning(|_| Ok(()));
        cluster.expect_apply_deployment().never();

        let result = reconcile(&cp, &owner(), &cluster, &OperatorConfig::default()).await;
        assert!(matches!(result, Reconciliation::Failed(Error::Reconcile { component: "Router", .. })));
    }

    #[test]
    fn test_router_config_uses_ca_flag() {
        let cp = control_plane();
        let cfg = router_config(&cp, &OperatorConfig::default(), true);
        let rendered = cfg.router_config("iofog");
        assert!(rendered.contains("ca.crt"));
        assert_eq!(cfg.internal_secret, "router-internal");
    }

    #[rstest]
    #[case("my-internal", "", "router-amqps")]
    #[case("", "my-amqps", "router-internal")]
    #[tokio::test]
    async fn test_partial_user_secret_checks_fallback(
        #[case] internal: &str,
        #[case] amqps: &str,
        #[case] fallback: &'static str,
    ) {
        let mut cp = control_plane();
        cp.spec.router.internal_secret = internal.to_string();
        cp.spec.router.amqps_secret = amqps.to_string();
        cp.spec.services.router.type_ = "ClusterIP".to_string();
        cp.spec.ingresses.router.address = "router.example.com".to_string();

        let mut cluster = MockClusterClient::new();
        deploy_expectations(&mut cluster);
        cluster
            .expect_get_secret()
            .withf(move |name| name == fallback)
            .times(1)
            .returning(|_| Ok(None));
        cluster.expect_ensure_secret().never();

        let result = reconcile(&cp, &owner(), &cluster, &OperatorConfig::default()).await;
        assert!(matches!(result, Reconciliation::Continue));
    }
}
