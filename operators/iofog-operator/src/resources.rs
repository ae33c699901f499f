//! Kubernetes 对象构建模块
//!
//! 根据 `Microservice` 描述生成 Service、Deployment、RBAC 等对象。
//! 所有对象都带有 ControlPlane 的 controller owner reference，由 Kubernetes 负责级联删除。

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container as PodContainer, LocalObjectReference, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements, Secret, Service,
    ServiceAccount, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::{ControlPlane, ControllerIngress};
use crate::error::{Error, Result};
use crate::microservice::{Microservice, CONTROLLER_NAME};

/// Controller Ingress 名称
pub const CONTROLLER_INGRESS_NAME: &str = "pot-controller";
/// Router 配置 ConfigMap 名称
pub const ROUTER_CONFIG_MAP_NAME: &str = "pot-router";
/// Router 配置文件名
pub const ROUTER_CONFIG_KEY: &str = "skrouterd.json";

const PVC_STORAGE: &str = "1Gi";

/// 资源归属
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    /// 资源所在命名空间
    pub namespace: String,
    /// ControlPlane 的 controller owner reference
    pub reference: Option<OwnerReference>,
}

impl Owner {
    pub fn of(cp: &ControlPlane) -> Result<Self> {
        let namespace = cp.namespace().ok_or(Error::MissingField("metadata.namespace"))?;
        Ok(Self {
            namespace,
            reference: cp.controller_owner_ref(&()),
        })
    }

    /// 生成带命名空间与 owner reference 的元数据
    pub fn meta(&self, name: &str) -> ObjectMeta {
        let mut meta = ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        };
        self.adopt(&mut meta);
        meta
    }

    /// 为已有元数据设置命名空间与 owner reference
    pub fn adopt(&self, meta: &mut ObjectMeta) {
        meta.namespace = Some(self.namespace.clone());
        if let Some(reference) = &self.reference {
            meta.owner_references = Some(vec![reference.clone()]);
        }
    }
}

fn non_empty<K: Ord + Clone, V: Clone>(map: &BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!map.is_empty()).then(|| map.clone())
}

fn non_empty_vec<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

/// 组件的全部 Service
pub fn new_services(owner: &Owner, ms: &Microservice) -> Vec<Service> {
    ms.services
        .iter()
        .map(|svc| {
            let mut meta = owner.meta(&svc.name);
            meta.labels = non_empty(&ms.labels);
            meta.annotations = non_empty(&svc.annotations);

            Service {
                metadata: meta,
                spec: Some(ServiceSpec {
                    type_: Some(svc.type_.clone()),
                    external_traffic_policy: svc.traffic_policy.clone(),
                    load_balancer_ip: svc.load_balancer_ip.clone(),
                    selector: non_empty(&ms.labels),
                    ports: Some(svc.ports.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect()
}

/// 组件 Deployment
pub fn new_deployment(owner: &Owner, ms: &Microservice) -> Deployment {
    let strategy = if ms.recreate_on_rollout {
        DeploymentStrategy {
            type_: Some("Recreate".to_string()),
            rolling_update: None,
        }
    } else {
        DeploymentStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: Some(RollingUpdateDeployment {
                max_unavailable: Some(IntOrString::Int(0)),
                max_surge: Some(IntOrString::Int(1)),
            }),
        }
    };

    let containers = ms
        .containers
        .iter()
        .map(|c| PodContainer {
            name: c.name.clone(),
            image: Some(c.image.clone()),
            image_pull_policy: (!c.image_pull_policy.is_empty()).then(|| c.image_pull_policy.clone()),
            command: non_empty_vec(&c.command),
            args: non_empty_vec(&c.args),
            env: non_empty_vec(&c.env),
            readiness_probe: c.readiness_probe.clone(),
            volume_mounts: non_empty_vec(&c.volume_mounts),
            ..Default::default()
        })
        .collect();

    let mut meta = owner.meta(&ms.name);
    meta.labels = non_empty(&ms.labels);

    Deployment {
        metadata: meta,
        spec: Some(DeploymentSpec {
            min_ready_seconds: (ms.min_ready_seconds > 0).then_some(ms.min_ready_seconds),
            replicas: Some(ms.replicas),
            selector: LabelSelector {
                match_labels: non_empty(&ms.labels),
                ..Default::default()
            },
            strategy: Some(strategy),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: non_empty(&ms.labels),
                    annotations: non_empty(&ms.annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(ms.name.clone()),
                    volumes: non_empty_vec(&ms.volumes),
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 组件 ServiceAccount，`pull_secret` 须事先校验
pub fn new_service_account(owner: &Owner, ms: &Microservice) -> ServiceAccount {
    ServiceAccount {
        metadata: owner.meta(&ms.name),
        image_pull_secrets: (!ms.image_pull_secret.is_empty()).then(|| {
            vec![LocalObjectReference {
                name: Some(ms.image_pull_secret.clone()),
            }]
        }),
        ..Default::default()
    }
}

pub fn new_role(owner: &Owner, ms: &Microservice) -> Role {
    Role {
        metadata: owner.meta(&ms.name),
        rules: Some(ms.rbac_rules.clone()),
    }
}

pub fn new_role_binding(owner: &Owner, ms: &Microservice) -> RoleBinding {
    RoleBinding {
        metadata: owner.meta(&ms.name),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: ms.name.clone(),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: ms.name.clone(),
        },
    }
}

fn controller_path(path: &str, port_name: &str) -> HTTPIngressPath {
    HTTPIngressPath {
        path: Some(path.to_string()),
        path_type: "Prefix".to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: CONTROLLER_NAME.to_string(),
                port: Some(ServiceBackendPort {
                    name: Some(port_name.to_string()),
                    number: None,
                }),
            }),
            resource: None,
        },
    }
}

/// Controller 的 `pot-controller` Ingress
pub fn new_controller_ingress(owner: &Owner, cfg: &ControllerIngress) -> Ingress {
    let mut meta = owner.meta(CONTROLLER_INGRESS_NAME);
    meta.annotations = non_empty(&cfg.annotations);

    Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            ingress_class_name: Some(cfg.ingress_class_name.clone()),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![cfg.host.clone()]),
                secret_name: Some(cfg.secret_name.clone()),
            }]),
            rules: Some(vec![IngressRule {
                host: Some(cfg.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![
                        controller_path("/", "ecn-viewer"),
                        controller_path("/api/v3", "controller-api"),
                    ],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 1Gi、ReadWriteOnce 的 PVC
pub fn new_persistent_volume_claim(owner: &Owner, name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: owner.meta(name),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(PVC_STORAGE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 保存 `skrouterd.json` 的 ConfigMap
pub fn new_router_config_map(owner: &Owner, router_config: String) -> ConfigMap {
    ConfigMap {
        metadata: owner.meta(ROUTER_CONFIG_MAP_NAME),
        data: Some(BTreeMap::from([(ROUTER_CONFIG_KEY.to_string(), router_config)])),
        ..Default::default()
    }
}

/// 为组件描述中的 Secret 设置归属
pub fn owned_secret(owner: &Owner, secret: &Secret) -> Secret {
    let mut secret = secret.clone();
    owner.adopt(&mut secret.metadata);
    secret
}
