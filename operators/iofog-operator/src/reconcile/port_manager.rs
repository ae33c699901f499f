//! Port Manager 组件协调

use super::Reconciliation;
use crate::config::OperatorConfig;
use crate::crd::ControlPlane;
use crate::error::Result;
use crate::k8s::{self, ClusterClient};
use crate::microservice::{new_port_manager_microservice, PortManagerConfig};
use crate::resources::{self, Owner};

pub const COMPONENT: &str = "PortManager";

/// 由 ControlPlane 生成 Port Manager 配置（已填充默认值）
pub fn port_manager_config(cp: &ControlPlane, namespace: &str, config: &OperatorConfig) -> PortManagerConfig {
    let spec = &cp.spec;
    PortManagerConfig {
        image: spec.images.port_manager.clone(),
        image_pull_secret: spec.images.pull_secret.clone(),
        proxy_image: spec.images.proxy.clone(),
        https: spec.controller.https,
        service_annotations: spec.services.proxy.annotations.clone(),
        router_server_name: spec.proxy.server_name.clone(),
        router_transport: spec.proxy.transport.clone(),
        http_proxy_address: spec.ingresses.http_proxy.address.clone(),
        tcp_proxy_address: spec.ingresses.tcp_proxy.address.clone(),
        watch_namespace: namespace.to_string(),
    }
    .with_defaults(|| config.images.port_manager(), || config.images.proxy())
}

/// 协调 Port Manager 组件
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
    let cfg = port_manager_config(cp, &owner.namespace, config);
    let ms = new_port_manager_microservice(&cfg);

    k8s::ensure_service_account(cluster, owner, &ms).await?;
    k8s::ensure_rbac(cluster, owner, &ms).await?;
    k8s::ensure_secrets(cluster, owner, &ms, &[]).await?;
    cluster
        .apply_deployment(resources::new_deployment(owner, &ms))
        .await?;

    Ok(Reconciliation::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ControlPlaneSpec;
    use crate::error::Error;
    use crate::k8s::MockClusterClient;
    use crate::microservice::{CONTROLLER_CREDENTIALS_SECRET, PORT_MANAGER_NAME};

    fn control_plane() -> ControlPlane {
        let mut cp = ControlPlane::new("pot", ControlPlaneSpec::default());
        cp.metadata.namespace = Some("iofog".to_string());
        cp.spec.ingresses.http_proxy.address = "http.example.com".to_string();
        cp
    }

    fn owner() -> Owner {
        Owner {
            namespace: "iofog".to_string(),
            reference: None,
        }
    }

    #[test]
    fn test_port_manager_config() {
        let config = OperatorConfig::default();
        let cfg = port_manager_config(&control_plane(), "iofog", &config);
        assert_eq!(cfg.image, config.images.port_manager());
        assert_eq!(cfg.proxy_image, config.images.proxy());
        assert_eq!(cfg.watch_namespace, "iofog");
        assert_eq!(cfg.http_proxy_address, "http.example.com");
    }

    #[tokio::test]
    async fn test_reconcile_port_manager() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_ensure_service_account()
            .withf(|sa| sa.metadata.name.as_deref() == Some(PORT_MANAGER_NAME))
            .times(1)
            .returning(|_| Ok(()));
        cluster.expect_ensure_role().times(1).returning(|_| Ok(()));
        cluster.expect_ensure_role_binding().times(1).returning(|_| Ok(()));
        cluster
            .expect_ensure_secret()
            .withf(|secret, update| {
                secret.metadata.name.as_deref() == Some(CONTROLLER_CREDENTIALS_SECRET) && !update
            })
            .times(1)
            .returning(|_, _| Ok(false));
        cluster
            .expect_apply_deployment()
            .withf(|d| d.metadata.name.as_deref() == Some(PORT_MANAGER_NAME))
            .times(1)
            .returning(|_| Ok(()));

        let result = reconcile(&control_plane(), &owner(), &cluster, &OperatorConfig::default()).await;
        assert!(matches!(result, Reconciliation::Continue));
    }

    #[tokio::test]
    async fn test_reconcile_port_manager_bad_pull_secret() {
        let mut cp = control_plane();
        cp.spec.images.pull_secret = "regcred".to_string();

        let mut cluster = MockClusterClient::new();
        cluster.expect_get_secret().returning(|_| Ok(None));
        cluster.expect_apply_deployment().never();

        let result = reconcile(&cp, &owner(), &cluster, &OperatorConfig::default()).await;
        assert!(matches!(result, Reconciliation::Failed(Error::InvalidPullSecret { .. })));
    }
}
