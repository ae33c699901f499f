//! ioFog Operator 入口

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use iofog_operator::metrics::{self, Metrics};
use iofog_operator::{ControlPlane, IofogOperator, OperatorConfig};

/// ioFog Operator - 在 Kubernetes 上部署 ioFog 控制平面
#[derive(Parser, Debug)]
#[command(name = "iofog-operator", version, about, long_about = None)]
struct Cli {
    /// 指标与探针服务监听地址
    #[arg(long)]
    metrics_addr: Option<String>,

    /// 配置文件（YAML 或 JSON）
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 监听的命名空间，为空时监听整个集群
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 输出 JSON 格式日志
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行 Operator（默认）
    Run,
    /// 输出 ControlPlane CRD 的 YAML 后退出
    Crd,
}

impl Cli {
    /// 命令行参数覆盖配置
    fn apply(&self, config: &mut OperatorConfig) {
        if let Some(addr) = &self.metrics_addr {
            config.metrics_addr = addr.clone();
        }
        if let Some(ns) = &self.watch_namespace {
            config.watch_namespace = ns.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.log_json {
            config.log_json = true;
        }
    }
}

fn init_tracing(config: &OperatorConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听 Ctrl-C 失败: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("监听 SIGTERM 失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Crd) = cli.command {
        let crd = serde_yaml::to_string(&ControlPlane::crd()).context("序列化 CRD 失败")?;
        print!("{crd}");
        return Ok(());
    }

    let mut config = OperatorConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    cli.apply(&mut config);
    config.validate().context("配置无效")?;

    init_tracing(&config);

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .with_context(|| format!("无效的指标服务地址: {}", config.metrics_addr))?;
    let metrics = Arc::new(Metrics::new().context("创建指标失败")?);

    let (metrics_tx, metrics_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(metrics::serve(metrics_addr, metrics.clone(), async move {
        metrics_rx.await.ok();
    }));

    let operator = IofogOperator::new(config, metrics)
        .await
        .context("创建 Kubernetes 客户端失败")?;
    operator.start().await?;
    info!("ioFog Operator 已启动");

    tokio::select! {
        _ = shutdown_signal() => info!("收到退出信号，正在停止"),
        _ = operator.wait() => info!("控制器已退出"),
    }

    operator.stop().await?;
    let _ = metrics_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("指标服务器异常退出: {}", e),
        Err(e) => error!("指标服务器任务失败: {}", e),
    }

    info!("ioFog Operator 已停止");
    Ok(())
}
