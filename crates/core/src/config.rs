//! 설정 관리 -- natlog.toml 파싱 및 런타임 설정
//!
//! [`NatlogConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`NATLOG_STORAGE_ADDRESS=10.0.0.5:8123` 형식)
//! 3. 설정 파일 (`natlog.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), natlog_core::error::NatlogError> {
//! use natlog_core::config::NatlogConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = NatlogConfig::load("natlog.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = NatlogConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, NatlogError};

/// natlog 통합 설정
///
/// `natlog.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NatlogConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// syslog 수신 및 규칙 설정
    #[serde(default)]
    pub syslog: SyslogConfig,
    /// 스토리지 및 배치 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP API (health/readiness/version) 설정
    #[serde(default)]
    pub api: ApiConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NatlogConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, NatlogError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, NatlogError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NatlogError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                NatlogError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, NatlogError> {
        toml::from_str(toml_str).map_err(|e| {
            NatlogError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `NATLOG_{SECTION}_{FIELD}`
    /// 예: `NATLOG_STORAGE_BATCH_SIZE=5000`
    ///
    /// 규칙(`syslog.rules`)은 구조가 복잡하므로 오버라이드 대상이 아닙니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "NATLOG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "NATLOG_GENERAL_LOG_FORMAT");

        // Syslog
        override_string(&mut self.syslog.udp_bind, "NATLOG_SYSLOG_UDP_BIND");
        override_string(&mut self.syslog.tcp_bind, "NATLOG_SYSLOG_TCP_BIND");
        override_usize(
            &mut self.syslog.max_message_size,
            "NATLOG_SYSLOG_MAX_MESSAGE_SIZE",
        );
        override_usize(
            &mut self.syslog.listener_queue_capacity,
            "NATLOG_SYSLOG_LISTENER_QUEUE_CAPACITY",
        );
        override_u64(
            &mut self.syslog.shutdown_timeout_secs,
            "NATLOG_SYSLOG_SHUTDOWN_TIMEOUT_SECS",
        );
        override_string(&mut self.syslog.rule_dir, "NATLOG_SYSLOG_RULE_DIR");

        // Storage
        override_string(&mut self.storage.address, "NATLOG_STORAGE_ADDRESS");
        override_string(&mut self.storage.username, "NATLOG_STORAGE_USERNAME");
        override_string(&mut self.storage.password, "NATLOG_STORAGE_PASSWORD");
        override_string(&mut self.storage.database, "NATLOG_STORAGE_DATABASE");
        override_usize(&mut self.storage.batch_size, "NATLOG_STORAGE_BATCH_SIZE");
        override_u64(
            &mut self.storage.batch_timeout_ms,
            "NATLOG_STORAGE_BATCH_TIMEOUT_MS",
        );
        override_u64(
            &mut self.storage.read_timeout_secs,
            "NATLOG_STORAGE_READ_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.storage.write_timeout_secs,
            "NATLOG_STORAGE_WRITE_TIMEOUT_SECS",
        );
        override_policy(
            &mut self.storage.exec_failure_policy,
            "NATLOG_STORAGE_EXEC_FAILURE_POLICY",
        );
        override_bool(&mut self.storage.debug, "NATLOG_STORAGE_DEBUG");

        // API
        override_bool(&mut self.api.enabled, "NATLOG_API_ENABLED");
        override_string(&mut self.api.bind, "NATLOG_API_BIND");

        // Metrics
        override_bool(&mut self.metrics.enabled, "NATLOG_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "NATLOG_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "NATLOG_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NatlogError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.syslog.udp_bind.is_empty() && self.syslog.tcp_bind.is_empty() {
            return Err(invalid(
                "syslog.udp_bind",
                "at least one of udp_bind / tcp_bind must be set".to_owned(),
            ));
        }

        if self.syslog.max_message_size == 0 {
            return Err(invalid(
                "syslog.max_message_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.syslog.listener_queue_capacity == 0 {
            return Err(invalid(
                "syslog.listener_queue_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.storage.address.is_empty() {
            return Err(invalid(
                "storage.address",
                "must not be empty".to_owned(),
            ));
        }

        if self.storage.batch_size == 0 {
            return Err(invalid(
                "storage.batch_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.storage.batch_timeout_ms == 0 {
            return Err(invalid(
                "storage.batch_timeout_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.api.enabled && self.api.bind.is_empty() {
            return Err(invalid(
                "api.bind",
                "must not be empty when api is enabled".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> NatlogError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// syslog 수신 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyslogConfig {
    /// UDP 수신 주소 (빈 문자열이면 비활성화)
    pub udp_bind: String,
    /// TCP 수신 주소 (빈 문자열이면 비활성화)
    pub tcp_bind: String,
    /// 최대 메시지 크기 (바이트)
    pub max_message_size: usize,
    /// 수집기 -> 리스너 채널 용량
    pub listener_queue_capacity: usize,
    /// 종료 시 태스크 대기 시간 (초)
    pub shutdown_timeout_secs: u64,
    /// 추가 규칙 파일 디렉토리 (빈 문자열이면 사용 안 함)
    pub rule_dir: String,
    /// 인라인 규칙 목록
    pub rules: Vec<RuleConfig>,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            udp_bind: "0.0.0.0:514".to_owned(),
            tcp_bind: String::new(),
            max_message_size: 65535,
            listener_queue_capacity: 1024,
            shutdown_timeout_secs: 10,
            rule_dir: String::new(),
            rules: Vec::new(),
        }
    }
}

/// 추출 규칙 선언
///
/// 정규식 캡처 그룹을 선언 순서대로 `fields`에 매핑하고,
/// `table`에 적재합니다. `name`은 배치 라우팅 키로도 사용됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// 규칙 이름 (고유)
    pub name: String,
    /// 적재 대상 테이블
    pub table: String,
    /// 캡처 그룹을 가진 정규식
    pub pattern: String,
    /// 필드 선언 (캡처 그룹 순서와 동일)
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// 필드 선언
///
/// `default`와 `values`의 의미는 `type`에 따라 다릅니다.
/// - `timestamp`: `default` = 시간 레이아웃 (strftime)
/// - `list`: `values` = 문자열 -> 정수 코드 매핑, `default` = 기본 코드
///
/// 형식 중립적인 [`serde_json::Value`]로 보관하여 TOML/YAML 어느 쪽에서
/// 로드하더라도 동일하게 검증됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// 컬럼 이름
    pub name: String,
    /// 필드 타입 태그 (string, timestamp, list, ip2int, int16, uint16)
    #[serde(rename = "type")]
    pub kind: String,
    /// 타입별 기본값
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// list 타입의 값 매핑
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
}

impl FieldSpec {
    /// 옵션 없는 필드 선언을 생성합니다.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            default: None,
            values: None,
        }
    }

    /// `default` 옵션을 설정합니다.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// `values` 옵션을 설정합니다.
    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.values = Some(values);
        self
    }
}

/// exec 실패 시 배치 처리 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecFailurePolicy {
    /// 트랜잭션을 롤백하고 남은 배치를 버립니다 (기본값)
    #[default]
    DiscardBatch,
    /// 실패한 행만 버리고 나머지 행을 계속 실행한 뒤 커밋합니다
    SkipRow,
}

impl std::str::FromStr for ExecFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discard_batch" => Ok(Self::DiscardBatch),
            "skip_row" => Ok(Self::SkipRow),
            other => Err(format!(
                "unknown exec failure policy '{other}', expected 'discard_batch' or 'skip_row'"
            )),
        }
    }
}

/// 스토리지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// ClickHouse HTTP 주소 (host:port)
    pub address: String,
    /// 사용자 이름
    pub username: String,
    /// 비밀번호
    pub password: String,
    /// 데이터베이스 이름
    pub database: String,
    /// 배치 크기 (누적 필드 수 기준)
    pub batch_size: usize,
    /// 배치 플러시 타임아웃 (밀리초)
    pub batch_timeout_ms: u64,
    /// 읽기 타임아웃 (초)
    pub read_timeout_secs: u64,
    /// 쓰기 타임아웃 (초)
    pub write_timeout_secs: u64,
    /// exec 실패 정책
    pub exec_failure_policy: ExecFailurePolicy,
    /// 전송 쿼리 디버그 로깅
    pub debug: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8123".to_owned(),
            username: "default".to_owned(),
            password: String::new(),
            database: "default".to_owned(),
            batch_size: 10_000,
            batch_timeout_ms: 60_000,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            exec_failure_policy: ExecFailurePolicy::DiscardBatch,
            debug: false,
        }
    }
}

/// HTTP API 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8098".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 8090,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_policy(target: &mut ExecFailurePolicy, env_key: &str) {
    override_parsed(target, env_key, "exec failure policy");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = NatlogConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.syslog.udp_bind, "0.0.0.0:514");
        assert!(config.syslog.tcp_bind.is_empty());
        assert_eq!(config.storage.batch_size, 10_000);
        assert_eq!(config.storage.batch_timeout_ms, 60_000);
        assert_eq!(
            config.storage.exec_failure_policy,
            ExecFailurePolicy::DiscardBatch
        );
        assert!(config.api.enabled);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        NatlogConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = NatlogConfig::parse("").unwrap();
        assert_eq!(config.storage.address, "127.0.0.1:8123");
        assert!(config.syslog.rules.is_empty());
    }

    #[test]
    fn parse_rules_with_field_options() {
        let toml = r#"
[syslog]
udp_bind = "127.0.0.1:5514"

[[syslog.rules]]
name = "nat"
table = "natlog.sessions"
pattern = '(\S+) (\S+) (\d+)'
fields = [
  { name = "ts", type = "timestamp", default = "%Y-%m-%d %H:%M:%S" },
  { name = "proto", type = "list", values = { tcp = 6, udp = 17 }, default = 0 },
  { name = "src_port", type = "uint16" },
]
"#;
        let config = NatlogConfig::parse(toml).unwrap();
        let rule = &config.syslog.rules[0];
        assert_eq!(rule.name, "nat");
        assert_eq!(rule.fields.len(), 3);
        assert_eq!(rule.fields[0].kind, "timestamp");
        assert_eq!(
            rule.fields[0].default,
            Some(serde_json::json!("%Y-%m-%d %H:%M:%S"))
        );
        assert_eq!(
            rule.fields[1].values,
            Some(serde_json::json!({"tcp": 6, "udp": 17}))
        );
        assert_eq!(rule.fields[1].default, Some(serde_json::json!(0)));
        assert!(rule.fields[2].values.is_none());
    }

    #[test]
    fn parse_rejects_non_string_field_name() {
        let toml = r#"
[[syslog.rules]]
name = "bad"
table = "t"
pattern = '(\d+)'
fields = [ { name = 5, type = "string" } ]
"#;
        let err = NatlogConfig::parse(toml).unwrap_err();
        assert!(matches!(
            err,
            NatlogError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn parse_exec_failure_policy() {
        let config = NatlogConfig::parse(
            r#"
[storage]
exec_failure_policy = "skip_row"
"#,
        )
        .unwrap();
        assert_eq!(config.storage.exec_failure_policy, ExecFailurePolicy::SkipRow);

        assert!(NatlogConfig::parse("[storage]\nexec_failure_policy = \"retry\"").is_err());
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = NatlogConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            NatlogError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = NatlogConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = NatlogConfig::default();
        config.storage.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn sub_second_batch_timeout_is_valid() {
        let config = NatlogConfig::parse("[storage]\nbatch_timeout_ms = 500\n").unwrap();
        assert_eq!(config.storage.batch_timeout_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_batch_timeout() {
        let mut config = NatlogConfig::default();
        config.storage.batch_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_listeners() {
        let mut config = NatlogConfig::default();
        config.syslog.udp_bind.clear();
        config.syslog.tcp_bind.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("udp_bind"));
    }

    #[test]
    fn validate_rejects_custom_metrics_endpoint() {
        let mut config = NatlogConfig::default();
        config.metrics.enabled = true;
        config.metrics.endpoint = "/prom".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_override_storage_fields() {
        // SAFETY: serial 테스트로 실행되어 다른 테스트와 환경변수를 공유하지 않습니다.
        unsafe {
            std::env::set_var("NATLOG_STORAGE_BATCH_SIZE", "500");
            std::env::set_var("NATLOG_STORAGE_EXEC_FAILURE_POLICY", "skip_row");
            std::env::set_var("NATLOG_STORAGE_ADDRESS", "ch:8123");
        }
        let mut config = NatlogConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.batch_size, 500);
        assert_eq!(config.storage.exec_failure_policy, ExecFailurePolicy::SkipRow);
        assert_eq!(config.storage.address, "ch:8123");
        unsafe {
            std::env::remove_var("NATLOG_STORAGE_BATCH_SIZE");
            std::env::remove_var("NATLOG_STORAGE_EXEC_FAILURE_POLICY");
            std::env::remove_var("NATLOG_STORAGE_ADDRESS");
        }
    }

    #[test]
    #[serial]
    fn env_override_invalid_value_keeps_original() {
        // SAFETY: serial 테스트로 실행되어 다른 테스트와 환경변수를 공유하지 않습니다.
        unsafe { std::env::set_var("NATLOG_API_ENABLED", "not-a-bool") };
        let mut config = NatlogConfig::default();
        config.apply_env_overrides();
        assert!(config.api.enabled);
        unsafe { std::env::remove_var("NATLOG_API_ENABLED") };
    }

    #[test]
    fn config_serialize_roundtrip() {
        let mut config = NatlogConfig::default();
        config.syslog.rules.push(RuleConfig {
            name: "nat".to_owned(),
            table: "sessions".to_owned(),
            pattern: r"(\d+)".to_owned(),
            fields: vec![
                FieldSpec::new("code", "list")
                    .with_values(serde_json::json!({"a": 1}))
                    .with_default(serde_json::json!(0)),
            ],
        });
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = NatlogConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.syslog.rules, config.syslog.rules);
        assert_eq!(parsed.storage.batch_size, config.storage.batch_size);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = NatlogConfig::from_file("/nonexistent/path/natlog.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NatlogError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("natlog.toml");
        tokio::fs::write(&path, "[storage]\nbatch_size = 42\n")
            .await
            .unwrap();
        let config = NatlogConfig::from_file(&path).await.unwrap();
        assert_eq!(config.storage.batch_size, 42);
    }
}
