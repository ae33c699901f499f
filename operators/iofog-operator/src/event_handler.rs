//! 事件发布模块
//!
//! 将协调过程中的关键节点与错误以 Kubernetes Event 的形式记录在 ControlPlane 上，
//! 方便通过 `kubectl describe cp` 查看部署进展。

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::{ConditionKind, ControlPlane};

/// 事件上报者名称
pub const REPORTER: &str = "iofog-operator";

/// 事件原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// 状态迁移
    StateChanged,
    /// 组件协调失败
    ReconcileFailed,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::StateChanged => "StateChanged",
            Reason::ReconcileFailed => "ReconcileFailed",
        }
    }
}

/// 事件发布器
#[derive(Clone)]
pub struct EventPublisher {
    client: Client,
    reporter: Reporter,
}

impl EventPublisher {
    pub fn new(client: Client, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: REPORTER.to_string(),
                instance,
            },
        }
    }

    async fn publish(&self, cp: &ControlPlane, event: Event) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), cp.object_ref(&()));
        // 事件只用于展示，发布失败不影响协调
        if let Err(e) = recorder.publish(event).await {
            warn!("发布事件失败: {}", e);
        }
    }

    /// 记录状态迁移
    pub async fn state_changed(&self, cp: &ControlPlane, state: ConditionKind) {
        self.publish(cp, state_event(state)).await;
    }

    /// 记录协调失败
    pub async fn reconcile_failed(&self, cp: &ControlPlane, note: String) {
        self.publish(cp, failure_event(note)).await;
    }
}

fn state_event(state: ConditionKind) -> Event {
    Event {
        type_: EventType::Normal,
        reason: Reason::StateChanged.as_str().to_string(),
        note: Some(format!("ControlPlane is {state}")),
        action: "Reconcile".to_string(),
        secondary: None,
    }
}

fn failure_event(note: String) -> Event {
    Event {
        type_: EventType::Warning,
        reason: Reason::ReconcileFailed.as_str().to_string(),
        note: Some(note),
        action: "Reconcile".to_string(),
        secondary: None,
    }
}
