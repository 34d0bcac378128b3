#![allow(dead_code)]

use domain::Destination;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use wavy_config::ForwardMode;
use wavy_control::{ControlService, ShutdownCoordinator};
use wavy_ingest::DeviceCommandHandler;
use wavy_pipeline::{BatchSink, InlineForwardSink, Pipeline, StagingFileSink};
use wavy_protocol::{
    DeviceServer, Forwarder, ForwarderConfig, ListenerHandle, TcpForwarder, TcpServerConfig,
};
use wavy_storage::{CsvTableSource, StateRegistry};

/// 桩服务器按请求种类延迟应答的时长。
#[derive(Debug, Clone, Copy, Default)]
pub struct StubDelays {
    pub register: Duration,
    pub batch: Duration,
    pub quit: Duration,
}

/// 桩服务器：每个连接读一个请求、回一行，记录请求首行。
pub struct StubServer {
    pub destination: Destination,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start() -> Self {
        Self::start_with(StubDelays::default()).await
    }

    /// 收到请求即记录，延迟后再应答。
    pub async fn start_with(delays: StubDelays) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let line = line.trim_end().to_string();
                    // 内联批次：继续读完 n 行
                    if let Some(count) = line.strip_prefix("FORWARD BATCH ") {
                        let count: usize = count.parse().unwrap_or(0);
                        for _ in 0..count {
                            let mut row = String::new();
                            reader.read_line(&mut row).await.unwrap();
                        }
                    }
                    let (reply, delay) = if line.starts_with("FORWARD REGISTER") {
                        ("ACK REGISTERED", delays.register)
                    } else if line == "FORWARD QUIT" {
                        ("400 BYE", delays.quit)
                    } else if line.starts_with("FORWARD BATCH") {
                        ("100 OK", delays.batch)
                    } else {
                        ("100 OK", Duration::ZERO)
                    };
                    recorded.lock().unwrap().push(line);
                    tokio::time::sleep(delay).await;
                    let _ = writer.write_all(format!("{reply}\n").as_bytes()).await;
                });
            }
        });
        Self {
            destination: Destination::new("127.0.0.1", port),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub stub: StubServer,
    pub registry: Arc<StateRegistry>,
    pub pipeline: Pipeline,
    pub listener: Arc<ListenerHandle>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub service: ControlService,
}

pub enum Delivery {
    Inline,
    File(std::path::PathBuf),
}

/// 组装完整的聚合器（CSV 外部源 + 真实 TCP 转发器 + 设备监听器）。
pub async fn harness(dir: &Path, delivery: Delivery) -> Harness {
    harness_with(dir, delivery, StubDelays::default()).await
}

pub async fn harness_with(dir: &Path, delivery: Delivery, delays: StubDelays) -> Harness {
    let stub = StubServer::start_with(delays).await;
    let devices_path = dir.join("waves.csv");
    let routing_path = dir.join("routing.csv");
    std::fs::write(&devices_path, "wavy_id,state\nW1,operating\nW2,operating\n").unwrap();
    std::fs::write(
        &routing_path,
        format!(
            "wavy_id,data_type,preprocess,ip,port\n\
             W1,TEMP,false,127.0.0.1,{port}\n\
             W2,TEMP,true,127.0.0.1,{port}\n",
            port = stub.destination.port
        ),
    )
    .unwrap();

    let registry = Arc::new(StateRegistry::in_memory(Arc::new(CsvTableSource::new(
        devices_path,
        routing_path,
    ))));
    registry.reload().await.unwrap();

    let forwarder: Arc<dyn Forwarder> = Arc::new(TcpForwarder::new(ForwarderConfig {
        connect_timeout_ms: 1000,
        io_timeout_ms: 1000,
    }));
    let sink: Arc<dyn BatchSink> = match delivery {
        Delivery::Inline => Arc::new(InlineForwardSink::new(forwarder.clone())),
        Delivery::File(path) => Arc::new(StagingFileSink::new(
            path,
            stub.destination.clone(),
            forwarder.clone(),
        )),
    };
    let pipeline = Pipeline::new(sink);

    let handler = DeviceCommandHandler::new(
        registry.clone(),
        pipeline.clone(),
        forwarder.clone(),
        stub.destination.clone(),
        ForwardMode::Batch,
    );
    let server = DeviceServer::bind(TcpServerConfig::new("127.0.0.1:0"))
        .await
        .unwrap();
    let listener = Arc::new(server.spawn(Arc::new(handler)).unwrap());
    let coordinator = Arc::new(ShutdownCoordinator::new(
        listener.clone(),
        pipeline.clone(),
        forwarder,
        stub.destination.clone(),
        Duration::from_secs(2),
    ));
    let service = ControlService::new(registry.clone(), pipeline.clone(), coordinator.clone());

    Harness {
        stub,
        registry,
        pipeline,
        listener,
        coordinator,
        service,
    }
}

pub struct Device {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Device {
    pub async fn connect(listener: &ListenerHandle) -> Self {
        let stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// 读一行应答（去掉换行）；连接关闭时返回空串。
    pub async fn recv(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(3), self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line.trim_end().to_string()
    }

    /// 对端可能已关闭，写失败不视为错误。
    pub async fn try_send(&mut self, line: &str) {
        let _ = self.writer.write_all(format!("{line}\n").as_bytes()).await;
    }

    /// 连接被服务端关闭（EOF 或复位）时返回 true；收到应答行返回 false。
    pub async fn closed(&mut self) -> bool {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(3), self.reader.read_line(&mut line))
            .await
            .unwrap();
        matches!(read, Ok(0) | Err(_))
    }

    pub async fn request(&mut self, line: &str) -> String {
        self.send(line).await;
        self.recv().await
    }

    /// 发送一条无应答的 DATA，并用一条必有应答的命令确认它已处理完。
    pub async fn data(&mut self, line: &str) {
        self.send(line).await;
        assert_eq!(self.request("REGISTER NOBODY").await, "403 NOT ASSOCIATED");
    }
}
