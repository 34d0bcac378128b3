//! WAVY 聚合器进程：装配各能力模块，运行直到停机流程完成。

use std::sync::Arc;
use tracing::{info, warn};
use wavy_config::{AppConfig, DeliveryMode, FlushFailurePolicy};
use wavy_control::{ControlListener, ControlService, ShutdownCoordinator, spawn_console};
use wavy_ingest::DeviceCommandHandler;
use wavy_pipeline::{
    BatchSink, InlineForwardSink, Pipeline, PipelineConfig, StagingFileSink, spawn_flush_scheduler,
};
use wavy_protocol::{DeviceServer, Forwarder, ForwarderConfig, TcpForwarder, TcpServerConfig};
use wavy_storage::{CsvTableSource, StateRegistry};
use wavy_telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 设备状态表与路由表：外部源不可用时以空表启动，所有请求走"未找到"分支
    let source = Arc::new(CsvTableSource::new(
        &config.devices_path,
        &config.routing_path,
    ));
    let registry = Arc::new(StateRegistry::in_memory(source));
    if let Err(e) = registry.reload().await {
        warn!(target: "wavy.storage", error = %e, "initial_load_failed_starting_empty");
    }

    let forwarder: Arc<dyn Forwarder> = Arc::new(TcpForwarder::new(ForwarderConfig {
        connect_timeout_ms: config.forward_connect_timeout_ms,
        io_timeout_ms: config.forward_read_timeout_ms,
    }));

    let sink: Arc<dyn BatchSink> = match config.delivery_mode {
        DeliveryMode::File => Arc::new(StagingFileSink::new(
            &config.staging_path,
            config.server.clone(),
            forwarder.clone(),
        )),
        DeliveryMode::Inline => Arc::new(InlineForwardSink::new(forwarder.clone())),
    };
    let pipeline = Pipeline::with_config(
        sink,
        PipelineConfig {
            failure_policy: config.flush_failure,
            max_buffered: config.max_buffered,
        },
    );
    if config.flush_failure == FlushFailurePolicy::Requeue {
        info!(target: "wavy.pipeline", max_buffered = config.max_buffered, "flush_failure_requeue_enabled");
    }

    let handler = Arc::new(DeviceCommandHandler::new(
        registry.clone(),
        pipeline.clone(),
        forwarder.clone(),
        config.server.clone(),
        config.forward_mode,
    ));
    let server = DeviceServer::bind(TcpServerConfig::new(config.listen_addr.clone())).await?;
    let listener = Arc::new(server.spawn(handler)?);

    let coordinator = Arc::new(ShutdownCoordinator::new(
        listener.clone(),
        pipeline.clone(),
        forwarder,
        config.server.clone(),
        config.shutdown_grace(),
    ));
    let background = coordinator.background_token();

    let _scheduler = spawn_flush_scheduler(pipeline.clone(), config.flush_interval(), background.clone());

    let service = ControlService::new(registry, pipeline, coordinator.clone());
    let control = ControlListener::bind(&config.control_addr).await?;
    let _control = control.spawn(service.clone(), background.clone());
    if config.console_enabled {
        let _console = spawn_console(service, background.clone());
    }

    info!(
        target: "wavy.control",
        listen_addr = %listener.local_addr(),
        control_addr = %config.control_addr,
        server = %config.server,
        forward_mode = ?config.forward_mode,
        delivery = ?config.delivery_mode,
        flush_interval_secs = config.flush_interval_secs,
        "aggregator_started"
    );

    // Ctrl-C 与控制通道触发同一停机流程
    tokio::select! {
        _ = coordinator.wait() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                coordinator.run("signal").await;
            }
            Err(e) => {
                warn!(target: "wavy.control", error = %e, "ctrl_c_listener_failed");
            }
        },
    }
    coordinator.wait().await;

    info!(target: "wavy.control", "aggregator_stopped");
    Ok(())
}
