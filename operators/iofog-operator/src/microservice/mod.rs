//! 组件描述模块
//!
//! `Microservice` 是一个组件（Controller、Router、Port Manager）在集群中的完整描述：
//! 服务、容器、Secret、卷和 RBAC 规则。`resources` 模块据此生成 Kubernetes 对象。

pub mod controller;
pub mod port_manager;
pub mod router;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, ObjectFieldSelector, Probe, Secret, SecretKeySelector, ServicePort,
    Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub use controller::{new_controller_microservice, ControllerMicroserviceConfig};
pub use port_manager::{new_port_manager_microservice, PortManagerConfig};
pub use router::{new_router_microservice, RouterMicroserviceConfig};

/// Controller 组件名
pub const CONTROLLER_NAME: &str = "controller";
/// Router 组件名
pub const ROUTER_NAME: &str = "router";
/// Port Manager 组件名
pub const PORT_MANAGER_NAME: &str = "port-manager";

/// Port Manager 使用的空凭证 Secret
pub const CONTROLLER_CREDENTIALS_SECRET: &str = "controller-credentials";
/// Controller 认证 Secret
pub const CONTROLLER_AUTH_SECRET: &str = "controller-auth-credentials";
/// Controller 数据库 Secret
pub const CONTROLLER_DB_SECRET: &str = "controller-db-credentials";

/// 认证 Secret 的键
pub mod auth_keys {
    pub const URL: &str = "auth-url";
    pub const REALM: &str = "auth-realm";
    pub const REALM_KEY: &str = "auth-realm-key";
    pub const SSL: &str = "auth-ssl-req";
    pub const CONTROLLER_CLIENT: &str = "auth-controller-client";
    pub const CONTROLLER_CLIENT_SECRET: &str = "auth-controller-client-secret";
    pub const VIEWER_CLIENT: &str = "auth-viewer-client";
}

/// 数据库 Secret 的键
pub mod db_keys {
    pub const NAME: &str = "dbname";
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const USER: &str = "username";
    pub const PASSWORD: &str = "password";
}

const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// 组件的 Service 描述
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MicroserviceService {
    pub name: String,
    /// 服务类型
    pub type_: String,
    pub annotations: BTreeMap<String, String>,
    /// externalTrafficPolicy
    pub traffic_policy: Option<String>,
    /// 指定的负载均衡 IP
    pub load_balancer_ip: Option<String>,
    pub ports: Vec<ServicePort>,
}

/// 容器描述
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub readiness_probe: Option<Probe>,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// 组件描述
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Microservice {
    /// 名称，同时用于 Deployment、ServiceAccount、Role 与 RoleBinding
    pub name: String,
    pub services: Vec<MicroserviceService>,
    /// 镜像拉取 Secret
    pub image_pull_secret: String,
    pub replicas: i32,
    pub containers: Vec<Container>,
    /// Pod 标签，同时作为 Deployment 与 Service 的选择器
    pub labels: BTreeMap<String, String>,
    /// Pod 注解
    pub annotations: BTreeMap<String, String>,
    pub secrets: Vec<Secret>,
    pub volumes: Vec<Volume>,
    pub rbac_rules: Vec<PolicyRule>,
    /// 为 true 时使用 Recreate 策略
    pub recreate_on_rollout: bool,
    pub min_ready_seconds: i32,
}

impl Microservice {
    /// 使用 PVC 的卷
    pub fn pvc_volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes
            .iter()
            .filter(|v| v.persistent_volume_claim.is_some())
    }

    /// 查找指定名称的 Secret
    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets
            .iter()
            .find(|s| s.metadata.name.as_deref() == Some(name))
    }
}

/// LoadBalancer 服务使用 Local 流量策略
pub fn traffic_policy(service_type: &str) -> Option<String> {
    service_type
        .eq_ignore_ascii_case(SERVICE_TYPE_LOAD_BALANCER)
        .then(|| "Local".to_string())
}

/// Controller 访问协议
pub fn scheme(https: Option<bool>) -> &'static str {
    if https == Some(true) {
        "https"
    } else {
        "http"
    }
}

/// 为空时取默认服务类型 LoadBalancer
pub fn service_type_or_default(service_type: &str) -> String {
    if service_type.is_empty() {
        SERVICE_TYPE_LOAD_BALANCER.to_string()
    } else {
        service_type.to_string()
    }
}

pub fn is_load_balancer(service_type: &str) -> bool {
    service_type.eq_ignore_ascii_case(SERVICE_TYPE_LOAD_BALANCER)
}

pub fn is_cluster_ip(service_type: &str) -> bool {
    service_type.eq_ignore_ascii_case("ClusterIP")
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn tcp_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn value_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                api_version: None,
            }),
            ..Default::default()
        }),
    }
}

fn opaque_secret(namespace: &str, name: &str, string_data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: (!string_data.is_empty()).then_some(string_data),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("LoadBalancer", Some("Local"))]
    #[case("loadbalancer", Some("Local"))]
    #[case("ClusterIP", None)]
    #[case("", None)]
    fn test_traffic_policy(#[case] service_type: &str, #[case] expected: Option<&str>) {
        assert_eq!(traffic_policy(service_type).as_deref(), expected);
    }

    #[rstest]
    #[case(None, "http")]
    #[case(Some(false), "http")]
    #[case(Some(true), "https")]
    fn test_scheme(#[case] https: Option<bool>, #[case] expected: &str) {
        assert_eq!(scheme(https), expected);
    }

    #[test]
    fn test_service_type_default() {
        assert_eq!(service_type_or_default(""), "LoadBalancer");
        assert_eq!(service_type_or_default("ClusterIP"), "ClusterIP");
        assert!(is_cluster_ip("clusterip"));
    }

    #[test]
    fn test_secret_env() {
        let env = secret_env("KC_URL", CONTROLLER_AUTH_SECRET, auth_keys::URL);
        let selector = env.value_from.unwrap().secret_key_ref.unwrap();
        assert_eq!(selector.name.as_deref(), Some("controller-auth-credentials"));
        assert_eq!(selector.key, "auth-url");
    }
}
