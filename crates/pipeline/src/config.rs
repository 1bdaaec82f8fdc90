//! 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`NatlogConfig`](natlog_core::config::NatlogConfig)의
//! `syslog`/`storage` 섹션을 기반으로 수집-적재 파이프라인 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use natlog_core::config::NatlogConfig;
//! use natlog_pipeline::config::PipelineConfig;
//!
//! let core_config = NatlogConfig::default();
//! let config = PipelineConfig::from_core(&core_config);
//! ```

use std::path::{Component, Path};
use std::time::Duration;

use natlog_core::config::{ExecFailurePolicy, NatlogConfig, RuleConfig};
use serde::{Deserialize, Serialize};

use crate::error::NatlogPipelineError;

/// 파이프라인 설정
///
/// core의 `SyslogConfig`와 `StorageConfig`에서 파생되며, 파이프라인 내부에서
/// 사용하는 추가 설정을 포함합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// UDP syslog 바인드 주소 (빈 문자열이면 비활성화)
    pub udp_bind: String,
    /// TCP syslog 바인드 주소 (빈 문자열이면 비활성화)
    pub tcp_bind: String,
    /// 최대 메시지 크기 (바이트)
    pub max_message_size: usize,
    /// 수집기 -> 리스너 채널 용량
    pub listener_queue_capacity: usize,
    /// 종료 시 태스크 대기 시간 (초)
    pub shutdown_timeout_secs: u64,
    /// 추가 규칙 파일 디렉토리
    pub rule_dir: String,
    /// 인라인 규칙
    pub rules: Vec<RuleConfig>,
    /// 배치 크기 (누적 필드 수 기준)
    pub batch_size: usize,
    /// 배치 타임아웃 (밀리초), 타이머 주기이기도 함
    pub batch_timeout_ms: u64,
    /// exec 실패 정책
    pub exec_failure_policy: ExecFailurePolicy,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 최대 동시 TCP 연결 수
    pub tcp_max_connections: usize,
    /// TCP 연결 유휴 타임아웃 (초)
    pub tcp_idle_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_core(&NatlogConfig::default())
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &NatlogConfig) -> Self {
        let syslog = &core.syslog;
        let storage = &core.storage;
        Self {
            udp_bind: syslog.udp_bind.clone(),
            tcp_bind: syslog.tcp_bind.clone(),
            max_message_size: syslog.max_message_size,
            listener_queue_capacity: syslog.listener_queue_capacity,
            shutdown_timeout_secs: syslog.shutdown_timeout_secs,
            rule_dir: syslog.rule_dir.clone(),
            rules: syslog.rules.clone(),
            batch_size: storage.batch_size,
            batch_timeout_ms: storage.batch_timeout_ms,
            exec_failure_policy: storage.exec_failure_policy,
            tcp_max_connections: 256,
            tcp_idle_timeout_secs: 300,
        }
    }

    /// 배치 타임아웃을 [`Duration`]으로 반환합니다.
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// 규칙 디렉토리 경로가 안전한지 검증합니다 (path traversal 방지).
    fn validate_rule_dir(path_str: &str) -> Result<(), NatlogPipelineError> {
        if path_str.is_empty() {
            return Ok(());
        }

        let path = Path::new(path_str);
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(NatlogPipelineError::Config {
                field: "rule_dir".to_owned(),
                reason: format!(
                    "rule dir '{}' contains path traversal pattern '..'",
                    path_str
                ),
            });
        }

        Ok(())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NatlogPipelineError> {
        const MAX_BATCH_SIZE: usize = 10_000_000;
        const MAX_BATCH_TIMEOUT_MS: u64 = 86_400_000;
        const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
        const MAX_TCP_CONNECTIONS: usize = 65_536;

        if self.udp_bind.is_empty() && self.tcp_bind.is_empty() {
            return Err(NatlogPipelineError::Config {
                field: "udp_bind".to_owned(),
                reason: "at least one of udp_bind / tcp_bind must be set".to_owned(),
            });
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(NatlogPipelineError::Config {
                field: "batch_size".to_owned(),
                reason: format!("must be 1-{}", MAX_BATCH_SIZE),
            });
        }

        if self.batch_timeout_ms == 0 || self.batch_timeout_ms > MAX_BATCH_TIMEOUT_MS {
            return Err(NatlogPipelineError::Config {
                field: "batch_timeout_ms".to_owned(),
                reason: format!("must be 1-{}", MAX_BATCH_TIMEOUT_MS),
            });
        }

        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(NatlogPipelineError::Config {
                field: "max_message_size".to_owned(),
                reason: format!("must be 1-{}", MAX_MESSAGE_SIZE),
            });
        }

        if self.listener_queue_capacity == 0 {
            return Err(NatlogPipelineError::Config {
                field: "listener_queue_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.tcp_max_connections == 0 || self.tcp_max_connections > MAX_TCP_CONNECTIONS {
            return Err(NatlogPipelineError::Config {
                field: "tcp_max_connections".to_owned(),
                reason: format!("must be 1-{}", MAX_TCP_CONNECTIONS),
            });
        }

        if self.tcp_idle_timeout_secs == 0 {
            return Err(NatlogPipelineError::Config {
                field: "tcp_idle_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Self::validate_rule_dir(&self.rule_dir)?;

        Ok(())
    }
}

/// 파이프라인 설정 빌더
///
/// 3개 이상의 설정 필드가 있으므로 빌더 패턴을 사용합니다.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// UDP 바인드 주소를 설정합니다.
    pub fn udp_bind(mut self, bind: impl Into<String>) -> Self {
        self.config.udp_bind = bind.into();
        self
    }

    /// TCP 바인드 주소를 설정합니다.
    pub fn tcp_bind(mut self, bind: impl Into<String>) -> Self {
        self.config.tcp_bind = bind.into();
        self
    }

    /// 규칙 디렉토리를 설정합니다.
    pub fn rule_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.rule_dir = dir.into();
        self
    }

    /// 인라인 규칙을 추가합니다.
    pub fn rule(mut self, rule: RuleConfig) -> Self {
        self.config.rules.push(rule);
        self
    }

    /// 배치 크기를 설정합니다.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// 배치 타임아웃(밀리초)을 설정합니다.
    pub fn batch_timeout_ms(mut self, millis: u64) -> Self {
        self.config.batch_timeout_ms = millis;
        self
    }

    /// exec 실패 정책을 설정합니다.
    pub fn exec_failure_policy(mut self, policy: ExecFailurePolicy) -> Self {
        self.config.exec_failure_policy = policy;
        self
    }

    /// 리스너 채널 용량을 설정합니다.
    pub fn listener_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.listener_queue_capacity = capacity;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, NatlogPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_preserves_values() {
        let mut core = NatlogConfig::default();
        core.syslog.udp_bind = "127.0.0.1:5514".to_owned();
        core.storage.batch_size = 200;
        core.storage.batch_timeout_ms = 500;
        core.storage.exec_failure_policy = ExecFailurePolicy::SkipRow;

        let config = PipelineConfig::from_core(&core);
        assert_eq!(config.udp_bind, "127.0.0.1:5514");
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.batch_timeout(), Duration::from_millis(500));
        assert_eq!(config.exec_failure_policy, ExecFailurePolicy::SkipRow);
        // 확장 필드는 기본값
        assert_eq!(config.tcp_max_connections, 256);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_traversal_in_rule_dir() {
        let config = PipelineConfig {
            rule_dir: "/etc/natlog/../../root".to_owned(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rule_dir"));
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = PipelineConfigBuilder::new()
            .udp_bind("127.0.0.1:0")
            .batch_size(3)
            .batch_timeout_ms(250)
            .rule_dir("/etc/natlog/rules")
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.batch_timeout_ms, 250);
        assert_eq!(config.rule_dir, "/etc/natlog/rules");
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = PipelineConfigBuilder::new().batch_timeout_ms(0).build();
        assert!(result.is_err());
    }
}
