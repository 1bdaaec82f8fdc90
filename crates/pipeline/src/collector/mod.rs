//! 수집 모듈 -- 네트워크에서 원시 syslog 라인을 수집합니다.
//!
//! # 수집 소스
//! - [`SyslogUdpCollector`]: UDP syslog 수신 (데이터그램 하나가 메시지 하나)
//! - [`SyslogTcpCollector`]: TCP syslog 수신 (개행 구분 프레이밍)
//!
//! # 아키텍처
//! 각 수집기는 자체 tokio 태스크에서 실행되며, 수집된 원시 라인을
//! `tokio::mpsc::Sender<RawLog>` 채널을 통해 리스너로 전달합니다.
//! 채널이 가득 차면 수집기는 대기합니다.

pub mod syslog_tcp;
pub mod syslog_udp;

pub use syslog_tcp::{SyslogTcpCollector, SyslogTcpConfig};
pub use syslog_udp::{SyslogUdpCollector, SyslogUdpConfig};

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// 수집 전송 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// UDP 데이터그램
    Udp,
    /// TCP 스트림
    Tcp,
}

impl Transport {
    /// 메트릭 레이블 값
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 수집된 원시 라인
///
/// 수집기가 생성하고, 리스너가 소비하는 중간 데이터 형식입니다.
#[derive(Debug, Clone)]
pub struct RawLog {
    /// 원시 바이트 (후행 개행 제거됨)
    pub data: Bytes,
    /// 수신 전송 계층
    pub transport: Transport,
    /// 송신 측 주소
    pub peer: Option<SocketAddr>,
    /// 수신 시각
    pub received_at: std::time::SystemTime,
}

impl RawLog {
    /// 새 RawLog를 생성합니다.
    pub fn new(data: Bytes, transport: Transport) -> Self {
        Self {
            data,
            transport,
            peer: None,
            received_at: std::time::SystemTime::now(),
        }
    }

    /// 송신 측 주소를 설정합니다.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// 수집기 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    /// 실행 대기 중
    Idle,
    /// 실행 중
    Running,
    /// 에러로 중단됨
    Error(String),
    /// 정상 종료됨
    Stopped,
}

/// 라인 끝의 `\r`, `\n`, NUL 문자를 제거합니다.
///
/// 일부 장비는 UDP 데이터그램 끝에 개행이나 NUL을 붙여 보냅니다.
pub(crate) fn trim_line_end(mut data: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r' | b'\0'] = data {
        data = rest;
    }
    data
}
