use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use wavy_protocol::{
    DeviceCommand, DeviceServer, ListenerHandle, Reply, SessionHandler, SessionOutcome,
    TcpServerConfig,
};

/// 回显处理器：REGISTER 回 `ACK <id>`，DATA 无应答，QUIT 回 BYE 并关闭。
#[derive(Default)]
struct EchoHandler {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionHandler for EchoHandler {
    async fn handle(&self, line: &str, command: DeviceCommand) -> SessionOutcome {
        self.seen.lock().unwrap().push(line.to_string());
        match command {
            DeviceCommand::Register { device_id } => {
                SessionOutcome::reply(Reply::Relayed(format!("ACK {}", device_id)))
            }
            DeviceCommand::Data(_) => SessionOutcome::silent(),
            DeviceCommand::Quit => SessionOutcome::reply_and_close(Reply::Bye),
        }
    }
}

async fn start(handler: Arc<EchoHandler>, max_line_bytes: usize) -> ListenerHandle {
    let mut config = TcpServerConfig::new("127.0.0.1:0");
    config.max_line_bytes = max_line_bytes;
    let server = DeviceServer::bind(config).await.unwrap();
    server.spawn(handler).unwrap()
}

async fn connect(handle: &ListenerHandle) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let (reader, writer) = stream.into_split();
    (BufReader::new(reader), writer)
}

async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    line
}

#[tokio::test]
async fn session_dispatches_commands_in_order() {
    let handler = Arc::new(EchoHandler::default());
    let handle = start(Arc::clone(&handler), 4096).await;
    let (mut reader, mut writer) = connect(&handle).await;

    writer
        .write_all(b"REGISTER W1\r\nDATA W1 TEMP 25\nREGISTER W2\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut reader).await, "ACK W1\n");
    assert_eq!(read_reply(&mut reader).await, "ACK W2\n");

    writer.write_all(b"QUIT\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "400 BYE\n");
    assert_eq!(read_reply(&mut reader).await, "");

    assert_eq!(
        *handler.seen.lock().unwrap(),
        vec!["REGISTER W1", "DATA W1 TEMP 25", "REGISTER W2", "QUIT"]
    );
}

#[tokio::test]
async fn malformed_lines_keep_session_open() {
    let handler = Arc::new(EchoHandler::default());
    let handle = start(Arc::clone(&handler), 4096).await;
    let (mut reader, mut writer) = connect(&handle).await;

    writer.write_all(b"HELLO\nDATA W1\n\xff\xfe\n").await.unwrap();
    for _ in 0..3 {
        assert_eq!(read_reply(&mut reader).await, "400 INVALID COMMAND\n");
    }
    writer.write_all(b"REGISTER W1\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "ACK W1\n");
    assert_eq!(handler.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn overlong_line_closes_session() {
    let handler = Arc::new(EchoHandler::default());
    let handle = start(Arc::clone(&handler), 16).await;
    let (mut reader, mut writer) = connect(&handle).await;

    // 恰好 16 字节且无换行
    writer.write_all(b"DATA W1 TEMP 25 ").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "400 INVALID COMMAND\n");
    assert_eq!(read_reply(&mut reader).await, "");
    assert!(handler.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_refuses_new_connections_and_closes_idle_sessions() {
    let handler = Arc::new(EchoHandler::default());
    let handle = start(Arc::clone(&handler), 4096).await;
    let (mut reader, mut writer) = connect(&handle).await;
    writer.write_all(b"REGISTER W1\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "ACK W1\n");

    handle.stop_accepting().await;
    assert!(TcpStream::connect(handle.local_addr()).await.is_err());

    assert!(handle.close_sessions(Duration::from_secs(2)).await);
    assert_eq!(read_reply(&mut reader).await, "");
    assert_eq!(handle.active_sessions(), 0);
}
