//! Port Manager 组件描述

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ExecAction, Probe};
use k8s_openapi::api::rbac::v1::PolicyRule;

use super::{
    auth_keys, field_env, labels, opaque_secret, scheme, secret_env, value_env, Container,
    Microservice, CONTROLLER_AUTH_SECRET, CONTROLLER_CREDENTIALS_SECRET, PORT_MANAGER_NAME,
    ROUTER_NAME,
};

/// Port Manager 配置
#[derive(Debug, Clone, Default)]
pub struct PortManagerConfig {
    pub image: String,
    pub image_pull_secret: String,
    pub proxy_image: String,
    pub https: Option<bool>,
    /// Proxy 服务注解，以 JSON 形式传给 Port Manager
    pub service_annotations: BTreeMap<String, String>,
    pub router_server_name: String,
    pub router_transport: String,
    pub http_proxy_address: String,
    pub tcp_proxy_address: String,
    pub watch_namespace: String,
}

impl PortManagerConfig {
    pub fn with_defaults(
        mut self,
        default_image: impl FnOnce() -> String,
        default_proxy_image: impl FnOnce() -> String,
    ) -> Self {
        if self.image.is_empty() {
            self.image = default_image();
        }
        if self.proxy_image.is_empty() {
            self.proxy_image = default_proxy_image();
        }
        self
    }
}

/// 构建 Port Manager 组件描述
pub fn new_port_manager_microservice(cfg: &PortManagerConfig) -> Microservice {
    // 序列化失败时退化为空字符串，与未配置注解等价
    let annotations = if cfg.service_annotations.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&cfg.service_annotations).unwrap_or_default()
    };

    let all_verbs = ["get", "list", "watch", "create", "update", "patch", "delete"];

    Microservice {
        name: PORT_MANAGER_NAME.to_string(),
        labels: labels(&[("name", PORT_MANAGER_NAME)]),
        image_pull_secret: cfg.image_pull_secret.clone(),
        replicas: 1,
        recreate_on_rollout: true,
        rbac_rules: vec![PolicyRule {
            api_groups: Some(vec![String::new(), "apps".to_string()]),
            resources: Some(
                ["deployments", "services", "pods", "configmaps"]
                    .iter()
                    .map(|r| r.to_string())
                    .collect(),
            ),
            verbs: all_verbs.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }],
        secrets: vec![opaque_secret(
            &cfg.watch_namespace,
            CONTROLLER_CREDENTIALS_SECRET,
            BTreeMap::new(),
        )],
        containers: vec![Container {
            name: PORT_MANAGER_NAME.to_string(),
            image: cfg.image.clone(),
            image_pull_policy: "Always".to_string(),
            readiness_probe: Some(Probe {
                exec: Some(ExecAction {
                    command: Some(vec!["stat".to_string(), "/tmp/operator-sdk-ready".to_string()]),
                }),
                initial_delay_seconds: Some(4),
                timeout_seconds: Some(10),
                period_seconds: Some(5),
                failure_threshold: Some(2),
                ..Default::default()
            }),
            env: vec![
                value_env("WATCH_NAMESPACE", cfg.watch_namespace.as_str()),
                field_env("POD_NAME", "metadata.name"),
                value_env("OPERATOR_NAME", PORT_MANAGER_NAME),
                secret_env("KC_URL", CONTROLLER_AUTH_SECRET, auth_keys::URL),
                secret_env("KC_REALM", CONTROLLER_AUTH_SECRET, auth_keys::REALM),
                secret_env("KC_CLIENT", CONTROLLER_AUTH_SECRET, auth_keys::CONTROLLER_CLIENT),
                secret_env("KC_CLIENT_SECRET", CONTROLLER_AUTH_SECRET, auth_keys::CONTROLLER_CLIENT_SECRET),
                value_env("PROXY_IMAGE", cfg.proxy_image.as_str()),
                value_env("HTTP_PROXY_ADDRESS", cfg.http_proxy_address.as_str()),
                value_env("TCP_PROXY_ADDRESS", cfg.tcp_proxy_address.as_str()),
                value_env("ROUTER_ADDRESS", ROUTER_NAME),
                value_env("PROXY_SERVICE_ANNOTATIONS", annotations),
                value_env("CONTROLLER_SCHEME", scheme(cfg.https)),
                value_env("PULL_SECRET_NAME", cfg.image_pull_secret.as_str()),
                value_env("ROUTER_SERVER_NAME", cfg.router_server_name.as_str()),
                value_env("ROUTER_TRANSPORT", cfg.router_transport.as_str()),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}
