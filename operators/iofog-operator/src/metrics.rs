//! 指标与探针模块
//!
//! 以 Prometheus 格式导出协调指标，并在同一端口上提供 `/healthz` 与 `/readyz` 探针。

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tracing::{error, info};

use crate::error::Error;

/// Operator 指标
pub struct Metrics {
    registry: Registry,
    /// 协调次数
    reconciliations: IntCounter,
    /// 按组件与错误类别统计的协调失败次数
    failures: IntCounterVec,
    /// 协调耗时
    duration: Histogram,
    /// 处于 ready 状态的 ControlPlane 数
    ready: IntGauge,
    ready_set: Mutex<HashSet<String>>,
    /// Controller 是否已开始运行
    started: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounter::new(
            "iofog_operator_reconciliations_total",
            "Total number of ControlPlane reconciliations",
        )?;
        let failures = IntCounterVec::new(
            Opts::new(
                "iofog_operator_reconcile_failures_total",
                "Total number of failed ControlPlane reconciliations",
            ),
            &["component", "error"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "iofog_operator_reconcile_duration_seconds",
                "Duration of ControlPlane reconciliations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 180.0, 360.0]),
        )?;
        let ready = IntGauge::new(
            "iofog_operator_control_planes_ready",
            "Number of ControlPlanes in the ready state",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(ready.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            failures,
            duration,
            ready,
            ready_set: Mutex::new(HashSet::new()),
            started: AtomicBool::new(false),
        })
    }

    /// 开始一次协调，返回的计时器在 drop 时记录耗时
    pub fn reconcile_started(&self) -> HistogramTimer {
        self.reconciliations.inc();
        self.duration.start_timer()
    }

    pub fn reconcile_failed(&self, component: &str, err: &Error) {
        self.failures
            .with_label_values(&[component, err.metric_label()])
            .inc();
    }

    /// 更新 ControlPlane 的 ready 状态
    pub fn set_ready(&self, key: &str, ready: bool) {
        let mut set = match self.ready_set.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ready {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
        self.ready.set(set.len() as i64);
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 以文本格式编码全部指标
    pub fn encode(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

/// 处理指标与探针请求
pub fn handle(req: &Request<Body>, metrics: &Metrics) -> Response<Body> {
    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok((content_type, buffer)) => {
                let mut response = Response::new(Body::from(buffer));
                if let Ok(value) = content_type.parse() {
                    response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!("编码指标失败: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
            }
        },
        "/healthz" => text(StatusCode::OK, "ok"),
        "/readyz" if metrics.is_started() => text(StatusCode::OK, "ok"),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

/// 启动指标服务器，`shutdown` 完成后退出
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: impl Future<Output = ()>,
) -> hyper::Result<()> {
    let make_svc = make_service_fn(move |_| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = handle(&req, &metrics);
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("指标服务器启动在 {}", server.local_addr());
    server.with_graceful_shutdown(shutdown).await
}
