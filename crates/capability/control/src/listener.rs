//! 控制通道前端：本地 TCP 管理端口与标准输入控制台。

use crate::{ControlError, ControlService};
use std::io::BufRead;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 管理端口监听器。
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub async fn bind(addr: &str) -> Result<Self, ControlError> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    /// 逐连接处理控制命令，直到 `cancel` 被取消。
    pub fn spawn(self, service: ControlService, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Ok(addr) = self.listener.local_addr() {
                info!(target: "wavy.control", addr = %addr, "control_listener_started");
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(target: "wavy.control", peer = %peer, "control_connection_opened");
                            tokio::spawn(serve_connection(stream, service.clone(), cancel.clone()));
                        }
                        Err(e) => {
                            warn!(target: "wavy.control", error = %e, "control_accept_failed");
                        }
                    },
                }
            }
            info!(target: "wavy.control", "control_listener_stopped");
        })
    }
}

async fn serve_connection(stream: TcpStream, service: ControlService, cancel: CancellationToken) {
    let (reader, writer) = stream.into_split();
    if let Err(e) = run_console(BufReader::new(reader), writer, service, cancel).await {
        warn!(target: "wavy.control", error = %e, "control_connection_failed");
    }
}

/// 逐行读取控制命令并写回应答；读到 EOF 或被取消时结束。空行忽略。
pub async fn run_console<R, W>(
    mut reader: R,
    mut writer: W,
    service: ControlService,
    cancel: CancellationToken,
) -> Result<(), ControlError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_line(&mut line) => read?,
        };
        if n == 0 {
            return Ok(());
        }
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        let mut reply = service.handle_line(command).await;
        reply.push('\n');
        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
}

/// 标准输入控制台。
///
/// 标准输入在独立线程上阻塞读取，按行送入通道；进程退出不等待该线程。
pub fn spawn_console(service: ControlService, cancel: CancellationToken) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<String>(16);
    let spawned = std::thread::Builder::new()
        .name("wavy-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(target: "wavy.control", error = %e, "console_thread_spawn_failed");
    }

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            let mut reply = service.handle_line(command).await;
            reply.push('\n');
            if let Err(e) = stdout.write_all(reply.as_bytes()).await {
                warn!(target: "wavy.control", error = %e, "console_write_failed");
                break;
            }
            let _ = stdout.flush().await;
        }
        debug!(target: "wavy.control", "console_stopped");
    })
}
