//! UDP Syslog 수집기
//!
//! UDP 데이터그램 하나를 syslog 메시지 하나로 취급합니다.
//! 표준 syslog 포트(514/udp) 또는 설정된 주소에 바인드합니다.

use std::net::SocketAddr;

use bytes::Bytes;
use metrics::counter;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use natlog_core::metrics as m;

use super::{CollectorStatus, RawLog, Transport, trim_line_end};
use crate::error::NatlogPipelineError;

/// UDP syslog 수집기 설정
#[derive(Debug, Clone)]
pub struct SyslogUdpConfig {
    /// 바인드 주소 (예: "0.0.0.0:514")
    pub bind_addr: String,
    /// 최대 메시지 크기 (바이트, UDP이므로 일반적으로 65535 이하)
    pub max_message_size: usize,
}

impl Default for SyslogUdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:514".to_owned(),
            max_message_size: 65535,
        }
    }
}

/// UDP Syslog 수집기
///
/// [`bind`](Self::bind)로 소켓을 먼저 연 뒤 [`run`](Self::run)으로 수신 루프를
/// 실행합니다. 바인드를 분리해 두면 시작 시 포트 충돌을 즉시 치명적 에러로
/// 보고할 수 있습니다.
pub struct SyslogUdpCollector {
    /// 수집기 설정
    config: SyslogUdpConfig,
    /// 바인드된 소켓
    socket: UdpSocket,
    /// 수집된 라인 전송 채널
    tx: mpsc::Sender<RawLog>,
    /// graceful shutdown 토큰
    cancel_token: CancellationToken,
    /// 현재 상태
    status: CollectorStatus,
}

impl SyslogUdpCollector {
    /// 소켓을 바인드하여 수집기를 생성합니다.
    ///
    /// # Errors
    /// 주소 바인드에 실패하면 [`NatlogPipelineError::Collector`]를 반환합니다.
    pub async fn bind(
        config: SyslogUdpConfig,
        tx: mpsc::Sender<RawLog>,
        cancel_token: CancellationToken,
    ) -> Result<Self, NatlogPipelineError> {
        let socket = UdpSocket::bind(&config.bind_addr).await.map_err(|e| {
            NatlogPipelineError::Collector {
                source_type: "syslog_udp".to_owned(),
                reason: format!("failed to bind to {}: {e}", config.bind_addr),
            }
        })?;

        Ok(Self {
            config,
            socket,
            tx,
            cancel_token,
            status: CollectorStatus::Idle,
        })
    }

    /// 실제로 바인드된 로컬 주소를 반환합니다 (포트 0 바인드 시 유용).
    pub fn local_addr(&self) -> Result<SocketAddr, NatlogPipelineError> {
        Ok(self.socket.local_addr()?)
    }

    /// 수신 루프를 실행합니다.
    ///
    /// 취소 토큰이 발동하거나 리스너 채널이 닫힐 때까지 실행됩니다.
    pub async fn run(&mut self) -> Result<(), NatlogPipelineError> {
        self.status = CollectorStatus::Running;
        info!(bind = %self.config.bind_addr, "UDP syslog collector listening");

        // 잘림 감지를 위해 1바이트 여유
        let mut buf = vec![0u8; self.config.max_message_size + 1];

        loop {
            let (len, peer) = tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP port unreachable 등 일시적 에러는 루프를 유지
                        warn!(error = %e, "UDP receive error");
                        continue;
                    }
                },
                () = self.cancel_token.cancelled() => {
                    info!("UDP syslog collector received shutdown signal");
                    break;
                }
            };

            counter!(m::SYSLOG_LINES_RECEIVED_TOTAL, m::LABEL_TRANSPORT => "udp").increment(1);

            if len > self.config.max_message_size {
                warn!(
                    peer = %peer,
                    max = self.config.max_message_size,
                    "datagram exceeds max message size, dropped"
                );
                counter!(m::SYSLOG_LINES_DROPPED_TOTAL).increment(1);
                continue;
            }

            let line = trim_line_end(&buf[..len]);
            if line.is_empty() {
                continue;
            }

            let raw = RawLog::new(Bytes::copy_from_slice(line), Transport::Udp).with_peer(peer);

            tokio::select! {
                result = self.tx.send(raw) => {
                    if result.is_err() {
                        debug!("listener channel closed, stopping UDP collector");
                        break;
                    }
                }
                () = self.cancel_token.cancelled() => break,
            }
        }

        self.status = CollectorStatus::Stopped;
        Ok(())
    }

    /// 설정된 바인드 주소를 반환합니다.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }
}
