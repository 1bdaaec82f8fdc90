//! TCP Syslog 수집기
//!
//! 개행으로 구분된 syslog 메시지를 TCP 소켓으로 수신합니다.
//! 각 연결은 별도의 tokio 태스크에서 처리되며, 동시 연결 수는 세마포어로
//! 제한됩니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use natlog_core::metrics as m;

use super::{CollectorStatus, RawLog, Transport, trim_line_end};
use crate::error::NatlogPipelineError;

/// TCP syslog 수집기 설정
#[derive(Debug, Clone)]
pub struct SyslogTcpConfig {
    /// 바인드 주소 (예: "0.0.0.0:514")
    pub bind_addr: String,
    /// 최대 동시 연결 수
    pub max_connections: usize,
    /// 최대 메시지 크기 (바이트)
    pub max_message_size: usize,
    /// 연결 유휴 타임아웃 (초)
    pub idle_timeout_secs: u64,
}

impl Default for SyslogTcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:514".to_owned(),
            max_connections: 256,
            max_message_size: 65535,
            idle_timeout_secs: 300, // 5 minutes
        }
    }
}

/// 라인 읽기 결과
enum ReadOutcome {
    /// 한 줄 (개행 제외)
    Line(Vec<u8>),
    /// 최대 크기 초과
    Oversized,
    /// 연결 종료
    Eof,
}

/// TCP Syslog 수집기
pub struct SyslogTcpCollector {
    /// 수집기 설정
    config: SyslogTcpConfig,
    /// 바인드된 리스너
    listener: TcpListener,
    /// 수집된 라인 전송 채널
    tx: mpsc::Sender<RawLog>,
    /// graceful shutdown 토큰
    cancel_token: CancellationToken,
    /// 현재 상태
    status: CollectorStatus,
    /// 지금까지 수락한 연결 수
    accepted_connections: u64,
}

impl SyslogTcpCollector {
    /// TCP 리스너를 바인드하여 수집기를 생성합니다.
    ///
    /// # Errors
    /// 주소 바인드에 실패하면 [`NatlogPipelineError::Collector`]를 반환합니다.
    pub async fn bind(
        config: SyslogTcpConfig,
        tx: mpsc::Sender<RawLog>,
        cancel_token: CancellationToken,
    ) -> Result<Self, NatlogPipelineError> {
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
            NatlogPipelineError::Collector {
                source_type: "syslog_tcp".to_owned(),
                reason: format!("failed to bind to {}: {e}", config.bind_addr),
            }
        })?;

        Ok(Self {
            config,
            listener,
            tx,
            cancel_token,
            status: CollectorStatus::Idle,
            accepted_connections: 0,
        })
    }

    /// 실제로 바인드된 로컬 주소를 반환합니다.
    pub fn local_addr(&self) -> Result<SocketAddr, NatlogPipelineError> {
        Ok(self.listener.local_addr()?)
    }

    /// 연결 수락 루프를 실행합니다.
    ///
    /// 각 연결은 별도 태스크에서 처리됩니다.
    /// CancellationToken을 통해 graceful shutdown을 지원합니다.
    pub async fn run(&mut self) -> Result<(), NatlogPipelineError> {
        self.status = CollectorStatus::Running;
        info!(bind = %self.config.bind_addr, "TCP syslog collector listening");

        // 연결 수 제한을 위한 세마포어
        let connection_semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "TCP accept error");
                            continue;
                        }
                    };

                    // 연결 수 제한 확인
                    let Ok(permit) = connection_semaphore.clone().try_acquire_owned() else {
                        warn!(peer = %peer, "max connections reached, rejecting connection");
                        continue;
                    };

                    debug!(peer = %peer, "accepted connection");
                    self.accepted_connections += 1;

                    let tx = self.tx.clone();
                    let config = self.config.clone();
                    let cancel = self.cancel_token.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, peer, tx, config, cancel).await {
                            error!(peer = %peer, error = %e, "connection handler error");
                        }
                        drop(permit);
                    });
                }
                () = self.cancel_token.cancelled() => {
                    info!("TCP syslog collector received shutdown signal");
                    break;
                }
            }
        }

        self.status = CollectorStatus::Stopped;
        Ok(())
    }

    /// 단일 TCP 연결을 처리합니다 (개행 구분 프레이밍).
    async fn handle_connection(
        stream: TcpStream,
        peer: SocketAddr,
        tx: mpsc::Sender<RawLog>,
        config: SyslogTcpConfig,
        cancel: CancellationToken,
    ) -> Result<(), NatlogPipelineError> {
        let mut reader = BufReader::new(stream);
        let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

        loop {
            let outcome = tokio::select! {
                result = timeout(idle_timeout, Self::read_line(&mut reader, config.max_message_size)) => {
                    match result {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => {
                            return Err(NatlogPipelineError::Collector {
                                source_type: "syslog_tcp".to_owned(),
                                reason: format!("read error from {peer}: {e}"),
                            });
                        }
                        Err(_) => {
                            debug!(peer = %peer, "idle timeout, closing connection");
                            break;
                        }
                    }
                }
                () = cancel.cancelled() => {
                    debug!(peer = %peer, "connection handler received shutdown signal");
                    break;
                }
            };

            let line = match outcome {
                ReadOutcome::Eof => {
                    debug!(peer = %peer, "connection closed by peer");
                    break;
                }
                ReadOutcome::Oversized => {
                    warn!(
                        peer = %peer,
                        max = config.max_message_size,
                        "message exceeds max size, closing connection"
                    );
                    counter!(m::SYSLOG_LINES_DROPPED_TOTAL).increment(1);
                    break;
                }
                ReadOutcome::Line(line) => line,
            };

            counter!(m::SYSLOG_LINES_RECEIVED_TOTAL, m::LABEL_TRANSPORT => "tcp").increment(1);

            let data = trim_line_end(&line);
            if data.is_empty() {
                continue;
            }

            let raw = RawLog::new(Bytes::copy_from_slice(data), Transport::Tcp).with_peer(peer);
            tokio::select! {
                result = tx.send(raw) => {
                    if result.is_err() {
                        return Err(NatlogPipelineError::Channel(
                            "listener channel closed".to_owned(),
                        ));
                    }
                }
                () = cancel.cancelled() => break,
            }
        }

        Ok(())
    }

    /// 개행까지 최대 `max_message_size + 1` 바이트를 읽습니다.
    async fn read_line(
        reader: &mut BufReader<TcpStream>,
        max_message_size: usize,
    ) -> std::io::Result<ReadOutcome> {
        let limit = max_message_size as u64 + 1;
        let mut line = Vec::new();
        let mut limited = (&mut *reader).take(limit);
        let n = limited.read_until(b'\n', &mut line).await?;

        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }
        if !line.ends_with(b"\n") && n as u64 >= limit {
            return Ok(ReadOutcome::Oversized);
        }
        Ok(ReadOutcome::Line(line))
    }

    /// 설정된 바인드 주소를 반환합니다.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// 지금까지 수락한 연결 수를 반환합니다.
    pub fn accepted_connections(&self) -> u64 {
        self.accepted_connections
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn local_config() -> SyslogTcpConfig {
        SyslogTcpConfig {
            bind_addr: "127.0.0.1:0".to_owned(),
            max_message_size: 64,
            ..Default::default()
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<RawLog>) -> RawLog {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn default_config() {
        let config = SyslogTcpConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:514");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.idle_timeout_secs, 300);
    }

    #[tokio::test]
    async fn collector_starts_idle() {
        let (tx, _rx) = mpsc::channel(10);
        let collector = SyslogTcpCollector::bind(local_config(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*collector.status(), CollectorStatus::Idle);
        assert_eq!(collector.accepted_connections(), 0);
        assert_eq!(collector.bind_addr(), "127.0.0.1:0");
    }

    #[tokio::test]
    async fn receives_newline_framed_lines() {
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let mut collector = SyslogTcpCollector::bind(local_config(), tx, cancel.clone())
            .await
            .unwrap();
        let addr = collector.local_addr().unwrap();
        let handle = tokio::spawn(async move { collector.run().await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"<14>first line\r\n\n<14>second line\n<14>tail")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(&recv(&mut rx).await.data[..], b"<14>first line");
        assert_eq!(&recv(&mut rx).await.data[..], b"<14>second line");
        let last = recv(&mut rx).await;
        assert_eq!(&last.data[..], b"<14>tail");
        assert_eq!(last.transport, Transport::Tcp);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_line_closes_connection() {
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let mut collector = SyslogTcpCollector::bind(local_config(), tx, cancel.clone())
            .await
            .unwrap();
        let addr = collector.local_addr().unwrap();
        let handle = tokio::spawn(async move { collector.run().await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ok\n").await.unwrap();
        client.write_all(&[b'x'; 200]).await.unwrap();
        client.write_all(b"\nafter\n").await.unwrap();

        assert_eq!(&recv(&mut rx).await.data[..], b"ok");

        // 연결이 닫혀 이후 라인은 전달되지 않음
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
