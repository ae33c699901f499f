//! Router 组件描述

use std::collections::BTreeMap;

use iofog_common::{
    RouterConfigParams, EDGE_PORT, HTTP_PORT, INTERIOR_PORT, MESSAGE_PORT, ROUTER_CERTS_DIR,
};
use k8s_openapi::api::core::v1::{HTTPGetAction, Probe, SecretVolumeSource, Volume, VolumeMount};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    field_env, labels, service_type_or_default, tcp_port, traffic_policy, value_env, Container,
    Microservice, MicroserviceService, ROUTER_NAME,
};

/// 默认内部证书 Secret
pub const DEFAULT_INTERNAL_SECRET: &str = "router-internal";
/// 默认 AMQPS 证书 Secret
pub const DEFAULT_AMQPS_SECRET: &str = "router-amqps";

const LAUNCH_SCRIPT: &str = "/home/skrouterd/bin/launch.sh";

/// Router 配置
#[derive(Debug, Clone, Default)]
pub struct RouterMicroserviceConfig {
    pub image: String,
    pub image_pull_secret: String,
    pub service_type: String,
    pub service_annotations: BTreeMap<String, String>,
    pub load_balancer_addr: String,
    /// 用户提供的内部证书 Secret，为空时使用生成的证书
    pub internal_secret: String,
    /// 用户提供的 AMQPS 证书 Secret
    pub amqps_secret: String,
    /// 证书 Secret 是否包含 `ca.crt`
    pub secret_with_ca: bool,
    pub sasl_mechanisms: String,
    pub authenticate_peer: String,
}

impl RouterMicroserviceConfig {
    pub fn with_defaults(mut self, default_image: impl FnOnce() -> String) -> Self {
        if self.image.is_empty() {
            self.image = default_image();
        }
        self.service_type = service_type_or_default(&self.service_type);
        if self.internal_secret.is_empty() {
            self.internal_secret = DEFAULT_INTERNAL_SECRET.to_string();
        }
        if self.amqps_secret.is_empty() {
            self.amqps_secret = DEFAULT_AMQPS_SECRET.to_string();
        }
        self
    }

    /// 渲染 `skrouterd.json`，证书目录与容器挂载保持一致
    pub fn router_config(&self, namespace: &str) -> String {
        RouterConfigParams::new(namespace)
            .with_sasl_mechanisms(&self.sasl_mechanisms)
            .with_authenticate_peer(&self.authenticate_peer)
            .with_ca(self.secret_with_ca)
            .with_cert_dirs(&internal_cert_dir(), &amqps_cert_dir())
            .render()
    }
}

fn internal_cert_dir() -> String {
    format!("{ROUTER_CERTS_DIR}/{DEFAULT_INTERNAL_SECRET}")
}

fn amqps_cert_dir() -> String {
    format!("{ROUTER_CERTS_DIR}/{DEFAULT_AMQPS_SECRET}")
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: String) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path,
        ..Default::default()
    }
}

/// 构建 Router 组件描述
pub fn new_router_microservice(namespace: &str, cfg: &RouterMicroserviceConfig) -> Microservice {
    let port = |p: u16| i32::from(p);

    Microservice {
        name: ROUTER_NAME.to_string(),
        labels: labels(&[
            ("name", ROUTER_NAME),
            ("application", "interior-router"),
            ("skupper.io/component", "router"),
        ]),
        annotations: labels(&[
            ("prometheus.io/port", &HTTP_PORT.to_string()),
            ("prometheus.io/scrape", "true"),
        ]),
        image_pull_secret: cfg.image_pull_secret.clone(),
        replicas: 1,
        services: vec![MicroserviceService {
            name: ROUTER_NAME.to_string(),
            type_: cfg.service_type.clone(),
            annotations: cfg.service_annotations.clone(),
            traffic_policy: traffic_policy(&cfg.service_type),
            load_balancer_ip: (!cfg.load_balancer_addr.is_empty()).then(|| cfg.load_balancer_addr.clone()),
            ports: vec![
                tcp_port("router-message", port(MESSAGE_PORT), port(MESSAGE_PORT)),
                tcp_port("router-interior", port(INTERIOR_PORT), port(INTERIOR_PORT)),
                tcp_port("router-edge", port(EDGE_PORT), port(EDGE_PORT)),
            ],
        }],
        rbac_rules: vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["pods".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }],
        volumes: vec![
            secret_volume(DEFAULT_INTERNAL_SECRET, &cfg.internal_secret),
            secret_volume(DEFAULT_AMQPS_SECRET, &cfg.amqps_secret),
        ],
        containers: vec![Container {
            name: ROUTER_NAME.to_string(),
            image: cfg.image.clone(),
            image_pull_policy: "Always".to_string(),
            command: vec![LAUNCH_SCRIPT.to_string()],
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/healthz".to_string()),
                    port: IntOrString::Int(port(HTTP_PORT)),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(10),
                timeout_seconds: Some(10),
                period_seconds: Some(5),
                failure_threshold: Some(2),
                ..Default::default()
            }),
            env: vec![
                value_env("APPLICATION_NAME", ROUTER_NAME),
                value_env("QDROUTERD_AUTO_MESH_DISCOVERY", "QUERY"),
                value_env("QDROUTERD_CONF", cfg.router_config(namespace)),
                field_env("POD_NAMESPACE", "metadata.namespace"),
                field_env("POD_IP", "status.podIP"),
            ],
            volume_mounts: vec![
                mount(DEFAULT_INTERNAL_SECRET, internal_cert_dir()),
                mount(DEFAULT_AMQPS_SECRET, amqps_cert_dir()),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}
