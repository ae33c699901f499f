//! 自定义资源定义模块
//!
//! 该模块定义了 ControlPlane 自定义资源，描述期望的 ioFog 控制平面配置
//! （认证、数据库、服务、入口、镜像等），以及基于 Condition 的部署状态机。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition 状态值
const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";

/// ControlPlane 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "datasance.com",
    version = "v3",
    kind = "ControlPlane",
    plural = "controlplanes",
    shortname = "cp",
    namespaced
)]
#[kube(status = "ControlPlaneStatus")]
#[kube(printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"ready\")].status"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Controller 与 ECN Viewer 的 Keycloak 客户端配置
    pub auth: Auth,

    /// Controller 数据库
    #[serde(default)]
    pub database: Database,

    /// 入口配置，Router 与 Port Manager 依赖它生成正确的端点地址
    #[serde(default)]
    pub ingresses: Ingresses,

    /// 服务配置，未配置 Ingress 时应为 LoadBalancer
    #[serde(default)]
    pub services: Services,

    /// 副本数，除非配置了外部数据库，否则 Controller 应为 1
    #[serde(default)]
    pub replicas: Replicas,

    /// 各组件镜像
    #[serde(default)]
    pub images: Images,

    /// Controller 运行时配置
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Router 运行时配置
    #[serde(default)]
    pub router: RouterConfig,

    /// Proxy 运行时配置
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Keycloak 认证配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    /// 认证服务地址
    pub url: String,
    /// Realm
    pub realm: String,
    /// SSL 要求
    pub ssl: String,
    /// Realm 公钥
    pub realm_key: String,
    /// Controller 客户端 ID
    pub controller_client: String,
    /// Controller 客户端密钥
    pub controller_secret: String,
    /// ECN Viewer 客户端 ID
    pub viewer_client: String,
}

/// 数据库配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database_name: String,
}

/// 副本配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Replicas {
    /// Controller 副本数，0 表示使用默认值 1
    #[serde(default)]
    pub controller: i32,
}

/// 各组件服务配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Services {
    #[serde(default)]
    pub controller: ServiceConfig,
    #[serde(default)]
    pub router: ServiceConfig,
    #[serde(default)]
    pub proxy: ServiceConfig,
}

/// 单个服务配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// 服务类型：LoadBalancer、ClusterIP 等
    #[serde(default, rename = "type")]
    pub type_: String,
    /// 负载均衡地址
    #[serde(default)]
    pub address: String,
    /// 服务注解
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// 镜像配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Images {
    /// 镜像拉取 Secret（须为 dockerconfigjson 类型）
    #[serde(default)]
    pub pull_secret: String,
    #[serde(default)]
    pub controller: String,
    #[serde(default)]
    pub router: String,
    #[serde(default)]
    pub port_manager: String,
    #[serde(default)]
    pub proxy: String,
}

/// 入口配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ingresses {
    #[serde(default)]
    pub controller: ControllerIngress,
    #[serde(default)]
    pub router: RouterIngress,
    #[serde(default)]
    pub http_proxy: ProxyIngress,
    #[serde(default)]
    pub tcp_proxy: ProxyIngress,
}

/// Controller Ingress 配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerIngress {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub ingress_class_name: String,
    #[serde(default)]
    pub host: String,
    /// TLS 证书 Secret
    #[serde(default)]
    pub secret_name: String,
}

/// Router 对外入口
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouterIngress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub message_port: u16,
    #[serde(default)]
    pub interior_port: u16,
    #[serde(default)]
    pub edge_port: u16,
}

/// Proxy 入口地址
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyIngress {
    #[serde(default)]
    pub address: String,
}

/// Controller 运行时配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub pid_base_dir: String,
    #[serde(default)]
    pub ecn_viewer_port: u16,
    #[serde(default)]
    pub ecn_viewer_url: String,
    /// ECN 名称
    #[serde(default, rename = "ecn")]
    pub ecn_name: String,
    /// 是否启用 HTTPS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<bool>,
    /// HTTPS 证书 Secret
    #[serde(default)]
    pub secret_name: String,
}

/// Router 运行时配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// 用户提供的内部证书 Secret
    #[serde(default)]
    pub internal_secret: String,
    /// 用户提供的 AMQPS 证书 Secret
    #[serde(default)]
    pub amqps_secret: String,
    #[serde(default)]
    pub require_ssl: String,
    #[serde(default)]
    pub sasl_mechanisms: String,
    #[serde(default)]
    pub authenticate_peer: String,
}

/// Proxy 运行时配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub transport: String,
}

/// ControlPlane 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// 部署状态（三者互斥）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// 已就绪
    Ready,
    /// 部署中
    Deploying,
    /// 规范已变更，等待重新部署
    Updating,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Ready => "ready",
            ConditionKind::Deploying => "deploying",
            ConditionKind::Updating => "updating",
        }
    }

    fn from_type(type_: &str) -> Option<Self> {
        match type_ {
            "ready" => Some(ConditionKind::Ready),
            "deploying" => Some(ConditionKind::Deploying),
            "updating" => Some(ConditionKind::Updating),
            _ => None,
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ControlPlane {
    /// 当前 generation
    fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }

    /// 已有的 Condition 列表
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// 切换到指定状态
    ///
    /// 先将所有为 True 的 Condition 置为 False 并记录迁移原因，
    /// 再插入或覆盖目标 Condition。
    pub fn set_condition(&mut self, kind: ConditionKind, now: DateTime<Utc>) {
        let generation = self.generation();
        let status = self.status.get_or_insert_with(ControlPlaneStatus::default);

        for condition in status.conditions.iter_mut() {
            condition.reason = normalize_reason(&condition.reason);

            if condition.status == STATUS_TRUE {
                condition.status = STATUS_FALSE.to_string();
                condition.reason = format!("transition_to_{kind}");
                condition.last_transition_time = Time(now);
                condition.observed_generation = generation;
            }
        }

        let condition = Condition {
            type_: kind.as_str().to_string(),
            status: STATUS_TRUE.to_string(),
            reason: "initial_status".to_string(),
            message: String::new(),
            last_transition_time: Time(now),
            observed_generation: generation,
        };
        set_status_condition(&mut status.conditions, condition);
    }

    /// 当前部署状态
    ///
    /// 第一个为 True 的 Condition 决定状态：generation 未变化时取其类型，
    /// 否则为 updating；没有 True 的 Condition 时为 deploying。
    pub fn state(&self) -> ConditionKind {
        let generation = self.generation();
        self.conditions()
            .iter()
            .find(|c| c.status == STATUS_TRUE)
            .map(|c| {
                if c.observed_generation == generation {
                    ConditionKind::from_type(&c.type_).unwrap_or(ConditionKind::Deploying)
                } else {
                    ConditionKind::Updating
                }
            })
            .unwrap_or(ConditionKind::Deploying)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConditionKind::Ready
    }

    pub fn is_deploying(&self) -> bool {
        self.state() == ConditionKind::Deploying
    }

    /// 规范在 ready 或 deploying 之后发生了变化
    pub fn is_updating(&self) -> bool {
        self.state() == ConditionKind::Updating
    }

    /// 是否存在为 True 的 Condition
    pub fn has_active_condition(&self) -> bool {
        self.conditions().iter().any(|c| c.status == STATUS_TRUE)
    }
}

/// 旧版本 reason 迁移：全部小写，空格与连字符替换为下划线
fn normalize_reason(reason: &str) -> String {
    reason.to_lowercase().replace([' ', '-'], "_")
}

/// 插入或覆盖 Condition，状态未变化时保留原迁移时间
fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
            }
            existing.reason = new.reason;
            existing.message = new.message;
            existing.observed_generation = new.observed_generation;
        }
        None => conditions.push(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kube::CustomResourceExt;

    fn control_plane(generation: i64) -> ControlPlane {
        let mut cp = ControlPlane::new("pot", ControlPlaneSpec::default());
        cp.metadata.namespace = Some("iofog".to_string());
        cp.metadata.generation = Some(generation);
        cp
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn find<'a>(cp: &'a ControlPlane, type_: &str) -> &'a Condition {
        cp.conditions().iter().find(|c| c.type_ == type_).unwrap()
    }

    #[test]
    fn test_default_state_is_deploying() {
        let cp = control_plane(1);
        assert_eq!(cp.state(), ConditionKind::Deploying);
        assert!(cp.is_deploying());
        assert!(!cp.has_active_condition());
    }

    #[test]
    fn test_state_predicates() {
        let mut cp = control_plane(1);
        cp.set_condition(ConditionKind::Deploying, at(100));
        assert!(cp.is_deploying());
        assert!(!cp.is_ready());
        assert!(!cp.is_updating());

        cp.set_condition(ConditionKind::Ready, at(200));
        assert!(cp.is_ready());
        assert!(!cp.is_deploying());
        assert!(!cp.is_updating());

        cp.metadata.generation = Some(2);
        assert!(cp.is_updating());
        assert!(!cp.is_ready());
        assert!(!cp.is_deploying());
    }

    #[test]
    fn test_set_condition_transitions() {
        let mut cp = control_plane(1);
        cp.set_condition(ConditionKind::Deploying, at(100));
        cp.set_condition(ConditionKind::Ready, at(200));

        assert_eq!(cp.state(), ConditionKind::Ready);

        let deploying = find(&cp, "deploying");
        assert_eq!(deploying.status, "False");
        assert_eq!(deploying.reason, "transition_to_ready");
        assert_eq!(deploying.last_transition_time, Time(at(200)));

        let ready = find(&cp, "ready");
        assert_eq!(ready.status, "True");
        assert_eq!(ready.reason, "initial_status");
        assert_eq!(ready.observed_generation, Some(1));

        // 只有一个 True
        assert_eq!(cp.conditions().iter().filter(|c| c.status == "True").count(), 1);
    }

    #[test]
    fn test_generation_change_means_updating() {
        let mut cp = control_plane(1);
        cp.set_condition(ConditionKind::Ready, at(100));
        assert_eq!(cp.state(), ConditionKind::Ready);

        cp.metadata.generation = Some(2);
        assert_eq!(cp.state(), ConditionKind::Updating);

        cp.set_condition(ConditionKind::Deploying, at(200));
        assert_eq!(cp.state(), ConditionKind::Deploying);
        assert_eq!(find(&cp, "ready").observed_generation, Some(2));
    }

    #[test]
    fn test_reason_is_normalized() {
        let mut cp = control_plane(1);
        cp.status = Some(ControlPlaneStatus {
            conditions: vec![Condition {
                type_: "ready".to_string(),
                status: "False".to_string(),
                reason: "Legacy Reason-Text".to_string(),
                message: String::new(),
                last_transition_time: Time(at(1)),
                observed_generation: Some(1),
            }],
        });

        cp.set_condition(ConditionKind::Deploying, at(10));
        let ready = find(&cp, "ready");
        assert_eq!(ready.reason, "legacy_reason_text");
        // 原本为 False，迁移时间不变
        assert_eq!(ready.last_transition_time, Time(at(1)));
    }

    #[test]
    fn test_spec_defaults_and_wire_names() {
        let spec: ControlPlaneSpec = serde_json::from_value(serde_json::json!({
            "auth": {
                "url": "https://auth.example.com/",
                "realm": "pot",
                "ssl": "external",
                "realmKey": "key",
                "controllerClient": "pot-controller",
                "controllerSecret": "secret",
                "viewerClient": "ecn-viewer"
            },
            "services": {"controller": {"type": "ClusterIP"}},
            "controller": {"ecn": "edge", "https": true},
            "ingresses": {"router": {"address": "router.example.com", "messagePort": 5671}}
        }))
        .unwrap();

        assert_eq!(spec.auth.controller_client, "pot-controller");
        assert_eq!(spec.services.controller.type_, "ClusterIP");
        assert_eq!(spec.controller.ecn_name, "edge");
        assert_eq!(spec.controller.https, Some(true));
        assert_eq!(spec.ingresses.router.message_port, 5671);
        assert_eq!(spec.replicas.controller, 0);
        assert!(spec.database.provider.is_empty());
    }

    #[test]
    fn test_crd_definition() {
        let crd = ControlPlane::crd();
        assert_eq!(crd.spec.group, "datasance.com");
        assert_eq!(crd.spec.names.kind, "ControlPlane");
        assert_eq!(crd.spec.names.plural, "controlplanes");
        assert_eq!(crd.spec.names.short_names, Some(vec!["cp".to_string()]));
        assert_eq!(crd.spec.versions[0].name, "v3");
    }
}
