//! 资源协调模块
//!
//! ControlPlane 的顶层状态机：ready 时等待变更；updating 时切回 deploying；
//! deploying 时并发协调 Port Manager、Controller 与 Router 三个组件，
//! 全部完成后置为 ready。

pub mod controller;
pub mod port_manager;
pub mod router;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iofog_common::{EDGE_PORT, INTERIOR_PORT, MESSAGE_PORT};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{ConditionKind, ControlPlane, RouterIngress};
use crate::error::{Error, Result, ERR_PROXY_ROUTER_MISSING};
use crate::event_handler::EventPublisher;
use crate::k8s::{ClusterClient, KubeClusterClient};
use crate::metrics::Metrics;
use crate::microservice::{is_load_balancer, service_type_or_default, ROUTER_NAME};
use crate::resources::Owner;

pub use self::controller::{ControllerApi, HttpControllerApi};

/// 状态切换后的短暂重排间隔
const STATE_REQUEUE: Duration = Duration::from_secs(1);

/// 组件协调结果
#[derive(Debug)]
pub enum Reconciliation {
    /// 本组件已完成
    Continue,
    /// 稍后重试
    Requeue(Duration),
    /// 失败
    Failed(Error),
}

impl Reconciliation {
    /// Requeue 与 Failed 都会结束当前组件的协调
    pub fn is_final(&self) -> bool {
        !matches!(self, Reconciliation::Continue)
    }

    /// 合并多个组件的结果
    ///
    /// 任一失败即失败（返回第一个错误，其余只记录日志）；
    /// 否则任一重试即以最短间隔重试；全部完成才为 Continue。
    pub fn merge(results: impl IntoIterator<Item = (&'static str, Reconciliation)>) -> Reconciliation {
        let mut first_error = None;
        let mut requeue: Option<Duration> = None;

        for (component, result) in results {
            match result {
                Reconciliation::Continue => {}
                Reconciliation::Requeue(after) => {
                    requeue = Some(requeue.map_or(after, |current| current.min(after)));
                }
                Reconciliation::Failed(err) => {
                    error!("组件 {} 协调失败: {}", component, err);
                    first_error.get_or_insert(err);
                }
            }
        }

        match (first_error, requeue) {
            (Some(err), _) => Reconciliation::Failed(err),
            (None, Some(after)) => Reconciliation::Requeue(after),
            (None, None) => Reconciliation::Continue,
        }
    }
}

impl From<Result<Reconciliation>> for Reconciliation {
    fn from(result: Result<Reconciliation>) -> Self {
        match result {
            Ok(r) => r,
            Err(e) => Reconciliation::Failed(e),
        }
    }
}

/// 协调上下文
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub metrics: Arc<Metrics>,
    pub events: EventPublisher,
    pub controller_api: Arc<dyn ControllerApi>,
}

/// 顶层状态机的下一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// 已就绪，等待变更
    Idle,
    /// 规范已变更，先切回 deploying
    Redeploy,
    /// 部署组件；`mark_deploying` 表示尚无任何 True Condition
    Deploy { mark_deploying: bool },
}

pub fn plan(cp: &ControlPlane) -> Plan {
    if cp.is_ready() {
        Plan::Idle
    } else if cp.is_updating() {
        Plan::Redeploy
    } else {
        Plan::Deploy {
            mark_deploying: !cp.has_active_condition(),
        }
    }
}

/// 解析 Router 对外端点
///
/// Router 服务为 LoadBalancer 时等待其外部地址并使用固定端口；
/// 否则使用 Ingress 中配置的地址。
pub async fn resolve_router_endpoint<C>(
    cp: &ControlPlane,
    cluster: &C,
    timeout: Duration,
    component: &'static str,
) -> Result<RouterIngress>
where
    C: ClusterClient + ?Sized,
{
    let service_type = service_type_or_default(&cp.spec.services.router.type_);

    if is_load_balancer(&service_type) {
        let address = cluster.wait_for_load_balancer(ROUTER_NAME, timeout).await?;
        return Ok(RouterIngress {
            address,
            message_port: MESSAGE_PORT,
            interior_port: INTERIOR_PORT,
            edge_port: EDGE_PORT,
        });
    }

    if !cp.spec.ingresses.router.address.is_empty() {
        return Ok(cp.spec.ingresses.router.clone());
    }

    Err(Error::reconcile(component, ERR_PROXY_ROUTER_MISSING))
}

/// 顶层状态机
///
/// 组件部署由调用方传入，状态通过 `ClusterClient` 读取与写回。
struct StateMachine<'a, C: ?Sized> {
    cluster: &'a C,
    metrics: &'a Metrics,
    /// 本次协调中的状态迁移，协调结束后发布为事件
    transitions: Vec<(ControlPlane, ConditionKind)>,
}

impl<'a, C> StateMachine<'a, C>
where
    C: ClusterClient + ?Sized,
{
    fn new(cluster: &'a C, metrics: &'a Metrics) -> Self {
        Self {
            cluster,
            metrics,
            transitions: Vec::new(),
        }
    }

    async fn transition(&mut self, cp: &mut ControlPlane, kind: ConditionKind) -> Result<()> {
        cp.set_condition(kind, Utc::now());
        let status = cp.status.clone().unwrap_or_default();
        self.cluster
            .patch_control_plane_status(&cp.name_any(), status)
            .await?;
        info!("ControlPlane {}/{} 状态切换为 {}", cp.namespace().unwrap_or_default(), cp.name_any(), kind);
        self.transitions.push((cp.clone(), kind));
        Ok(())
    }

    async fn run<F, Fut>(&mut self, name: &str, key: &str, deploy: F) -> Result<Action>
    where
        F: FnOnce(ControlPlane, Owner) -> Fut,
        Fut: Future<Output = Reconciliation>,
    {
        // 以线上最新版本为准
        let Some(mut cp) = self.cluster.get_control_plane(name).await? else {
            debug!("ControlPlane {} 已删除", key);
            self.metrics.set_ready(key, false);
            return Ok(Action::await_change());
        };

        match plan(&cp) {
            Plan::Idle => {
                self.metrics.set_ready(key, true);
                Ok(Action::await_change())
            }
            Plan::Redeploy => {
                self.metrics.set_ready(key, false);
                self.transition(&mut cp, ConditionKind::Deploying).await?;
                Ok(Action::requeue(STATE_REQUEUE))
            }
            Plan::Deploy { mark_deploying } => {
                self.metrics.set_ready(key, false);
                if mark_deploying {
                    self.transition(&mut cp, ConditionKind::Deploying).await?;
                }

                let owner = Owner::of(&cp)?;
                match deploy(cp.clone(), owner).await {
                    Reconciliation::Failed(err) => Err(err),
                    Reconciliation::Requeue(after) => {
                        debug!("ControlPlane {} 将在 {:?} 后重新协调", key, after);
                        Ok(Action::requeue(after))
                    }
                    Reconciliation::Continue => {
                        self.transition(&mut cp, ConditionKind::Ready).await?;
                        self.metrics.set_ready(key, true);
                        Ok(Action::await_change())
                    }
                }
            }
        }
    }
}

/// 并发协调三个组件并合并结果
async fn deploy_components<C>(cp: ControlPlane, owner: Owner, cluster: &C, ctx: &Context) -> Reconciliation
where
    C: ClusterClient + ?Sized,
{
    let config = &ctx.config;
    let (port_manager, controller, router) = futures::join!(
        port_manager::reconcile(&cp, &owner, cluster, config),
        controller::reconcile(&cp, &owner, cluster, ctx.controller_api.as_ref(), config),
        router::reconcile(&cp, &owner, cluster, config),
    );

    let results = [
        (port_manager::COMPONENT, port_manager),
        (controller::COMPONENT, controller),
        (router::COMPONENT, router),
    ];
    for (component, result) in &results {
        if let Reconciliation::Failed(err) = result {
            ctx.metrics.reconcile_failed(component, err);
        }
    }

    Reconciliation::merge(results)
}

/// 协调 ControlPlane
pub async fn reconcile(obj: Arc<ControlPlane>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.reconcile_started();

    let namespace = obj.namespace().ok_or(Error::MissingField("metadata.namespace"))?;
    let name = obj.name_any();
    let key = format!("{namespace}/{name}");

    let cluster = KubeClusterClient::new(ctx.client.clone(), namespace.as_str());
    let context = ctx.as_ref();
    let cluster_ref = &cluster;

    let mut machine = StateMachine::new(cluster_ref, &ctx.metrics);
    let result = machine
        .run(&name, &key, move |cp, owner| deploy_components(cp, owner, cluster_ref, context))
        .await;

    for (cp, kind) in &machine.transitions {
        ctx.events.state_changed(cp, *kind).await;
    }
    result
}

/// 协调失败时的处理：记录日志与事件后按固定间隔重试
pub fn error_policy(cp: Arc<ControlPlane>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "协调 ControlPlane {}/{} 失败: {}",
        cp.namespace().unwrap_or_default(),
        cp.name_any(),
        err
    );

    let events = ctx.events.clone();
    let note = err.to_string();
    tokio::spawn(async move {
        events.reconcile_failed(&cp, note).await;
    });

    Action::requeue(ctx.config.error_requeue())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use futures::future;

    use crate::crd::ControlPlaneSpec;
    use crate::k8s::MockClusterClient;

    fn control_plane() -> ControlPlane {
        let mut cp = ControlPlane::new("pot", ControlPlaneSpec::default());
        cp.metadata.namespace = Some("iofog".to_string());
        cp
    }

    #[test]
    fn test_plan() {
        let mut cp = control_plane();
        assert_eq!(plan(&cp), Plan::Deploy { mark_deploying: true });

        cp.set_condition(ConditionKind::Deploying, Utc::now());
        assert_eq!(plan(&cp), Plan::Deploy { mark_deploying: false });

        cp.set_condition(ConditionKind::Ready, Utc::now());
        assert_eq!(plan(&cp), Plan::Idle);

        cp.set_condition(ConditionKind::Updating, Utc::now());
        assert_eq!(plan(&cp), Plan::Redeploy);
    }

    #[test]
    fn test_merge_all_continue() {
        let merged = Reconciliation::merge([
            ("PortManager", Reconciliation::Continue),
            ("Controller", Reconciliation::Continue),
        ]);
        assert!(matches!(merged, Reconciliation::Continue));
        assert!(!merged.is_final());
    }

    #[test]
    fn test_merge_shortest_requeue() {
        let merged = Reconciliation::merge([
            ("PortManager", Reconciliation::Continue),
            ("Controller", Reconciliation::Requeue(Duration::from_secs(5))),
            ("Router", Reconciliation::Requeue(Duration::from_secs(3))),
        ]);
        assert!(matches!(merged, Reconciliation::Requeue(d) if d == Duration::from_secs(3)));
    }

    #[test_log::test]
    fn test_merge_error_wins() {
        let merged = Reconciliation::merge([
            ("Controller", Reconciliation::Requeue(Duration::from_secs(3))),
            ("Router", Reconciliation::Failed(Error::reconcile("Router", "first"))),
            ("PortManager", Reconciliation::Failed(Error::reconcile("PortManager", "second"))),
        ]);
        match merged {
            Reconciliation::Failed(err) => assert_eq!(err.to_string(), "reconcile Router failed: first"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_router_endpoint_load_balancer() {
        let cp = control_plane();
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_wait_for_load_balancer()
            .withf(|service, timeout| service == ROUTER_NAME && *timeout == Duration::from_secs(10))
            .returning(|_, _| Ok("lb.example.com".to_string()));

        let endpoint = resolve_router_endpoint(&cp, &cluster, Duration::from_secs(10), "Router")
            .await
            .unwrap();
        assert_eq!(endpoint.address, "lb.example.com");
        assert_eq!(endpoint.message_port, MESSAGE_PORT);
        assert_eq!(endpoint.interior_port, INTERIOR_PORT);
        assert_eq!(endpoint.edge_port, EDGE_PORT);
    }

    #[tokio::test]
    async fn test_resolve_router_endpoint_ingress() {
        let mut cp = control_plane();
        cp.spec.services.router.type_ = "ClusterIP".to_string();
        cp.spec.ingresses.router = RouterIngress {
            address: "router.example.com".to_string(),
            message_port: 30671,
            interior_port: 30672,
            edge_port: 30673,
        };

        let mut cluster = MockClusterClient::new();
        cluster.expect_wait_for_load_balancer().never();

        let endpoint = resolve_router_endpoint(&cp, &cluster, Duration::from_secs(10), "Router")
            .await
            .unwrap();
        assert_eq!(endpoint, cp.spec.ingresses.router);
    }

    #[tokio::test]
    async fn test_resolve_router_endpoint_missing() {
        let mut cp = control_plane();
        cp.spec.services.router.type_ = "NodePort".to_string();
        let cluster = MockClusterClient::new();

        let err = resolve_router_endpoint(&cp, &cluster, Duration::from_secs(10), "Controller")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("reconcile Controller failed: {ERR_PROXY_ROUTER_MISSING}")
        );
    }

    const KEY: &str = "iofog/pot";

    /// 返回给定的 ControlPlane，并记录每次写回的 True Condition
    fn status_cluster(cp: Option<ControlPlane>, patched: Arc<Mutex<Vec<String>>>) -> MockClusterClient {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_control_plane()
            .withf(|name| name == "pot")
            .returning(move |_| Ok(cp.clone()));
        cluster
            .expect_patch_control_plane_status()
            .returning(move |_, status| {
                let active = status
                    .conditions
                    .iter()
                    .find(|c| c.status == "True")
                    .map(|c| c.type_.clone())
                    .unwrap_or_default();
                patched.lock().unwrap().push(active);
                Ok(())
            });
        cluster
    }

    fn ready_gauge(metrics: &Metrics) -> String {
        let (_, body) = metrics.encode().unwrap();
        String::from_utf8(body)
            .unwrap()
            .lines()
            .find(|line| line.starts_with("iofog_operator_control_planes_ready "))
            .unwrap()
            .to_string()
    }

    #[test_log::test(tokio::test)]
    async fn test_deploying_to_ready_on_continue() {
        let patched = Arc::new(Mutex::new(Vec::new()));
        let cluster = status_cluster(Some(control_plane()), patched.clone());
        let metrics = Metrics::new().unwrap();

        let mut machine = StateMachine::new(&cluster, &metrics);
        let action = machine
            .run("pot", KEY, |_, _| future::ready(Reconciliation::Continue))
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*patched.lock().unwrap(), vec!["deploying", "ready"]);
        let kinds: Vec<_> = machine.transitions.iter().map(|(_, kind)| *kind).collect();
        assert_eq!(kinds, vec![ConditionKind::Deploying, ConditionKind::Ready]);
        assert!(machine.transitions[1].0.is_ready());
        assert_eq!(ready_gauge(&metrics), "iofog_operator_control_planes_ready 1");
    }

    #[tokio::test]
    async fn test_requeue_stays_deploying() {
        let mut cp = control_plane();
        cp.set_condition(ConditionKind::Deploying, Utc::now());
        let patched = Arc::new(Mutex::new(Vec::new()));
        let cluster = status_cluster(Some(cp), patched.clone());
        let metrics = Metrics::new().unwrap();

        let mut machine = StateMachine::new(&cluster, &metrics);
        let action = machine
            .run("pot", KEY, |_, _| future::ready(Reconciliation::Requeue(Duration::from_secs(5))))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert!(patched.lock().unwrap().is_empty());
        assert!(machine.transitions.is_empty());
        assert_eq!(ready_gauge(&metrics), "iofog_operator_control_planes_ready 0");
    }

    #[tokio::test]
    async fn test_failure_does_not_reach_ready() {
        let patched = Arc::new(Mutex::new(Vec::new()));
        let cluster = status_cluster(Some(control_plane()), patched.clone());
        let metrics = Metrics::new().unwrap();

        let mut machine = StateMachine::new(&cluster, &metrics);
        let err = machine
            .run("pot", KEY, |_, _| {
                future::ready(Reconciliation::Failed(Error::reconcile("Router", "boom")))
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "reconcile Router failed: boom");
        assert_eq!(*patched.lock().unwrap(), vec!["deploying"]);
        assert_eq!(ready_gauge(&metrics), "iofog_operator_control_planes_ready 0");
    }

    #[tokio::test]
    async fn test_ready_waits_for_change() {
        let mut cp = control_plane();
        cp.set_condition(ConditionKind::Ready, Utc::now());
        let patched = Arc::new(Mutex::new(Vec::new()));
        let cluster = status_cluster(Some(cp), patched.clone());
        let metrics = Metrics::new().unwrap();

        let mut deployed = false;
        let mut machine = StateMachine::new(&cluster, &metrics);
        let action = machine
            .run("pot", KEY, |_, _| {
                deployed = true;
                future::ready(Reconciliation::Continue)
            })
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        assert!(!deployed);
        assert!(patched.lock().unwrap().is_empty());
        assert_eq!(ready_gauge(&metrics), "iofog_operator_control_planes_ready 1");
    }

    #[tokio::test]
    async fn test_updating_switches_back_to_deploying() {
        let mut cp = control_plane();
        cp.metadata.generation = Some(1);
        cp.set_condition(ConditionKind::Ready, Utc::now());
        cp.metadata.generation = Some(2);
        let patched = Arc::new(Mutex::new(Vec::new()));
        let cluster = status_cluster(Some(cp), patched.clone());
        let metrics = Metrics::new().unwrap();
        metrics.set_ready(KEY, true);

        let mut deployed = false;
        let mut machine = StateMachine::new(&cluster, &metrics);
        let action = machine
            .run("pot", KEY, |_, _| {
                deployed = true;
                future::ready(Reconciliation::Continue)
            })
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(STATE_REQUEUE));
        assert!(!deployed);
        assert_eq!(*patched.lock().unwrap(), vec!["deploying"]);
        assert!(machine.transitions[0].0.is_deploying());
        assert_eq!(ready_gauge(&metrics), "iofog_operator_control_planes_ready 0");
    }

    #[tokio::test]
    async fn test_deleted_control_plane_clears_ready() {
        let patched = Arc::new(Mutex::new(Vec::new()));
        let cluster = status_cluster(None, patched.clone());
        let metrics = Metrics::new().unwrap();
        metrics.set_ready(KEY, true);

        let mut machine = StateMachine::new(&cluster, &metrics);
        let action = machine
            .run("pot", KEY, |_, _| future::ready(Reconciliation::Continue))
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        assert!(patched.lock().unwrap().is_empty());
        assert_eq!(ready_gauge(&metrics), "iofog_operator_control_planes_ready 0");
    }
}
