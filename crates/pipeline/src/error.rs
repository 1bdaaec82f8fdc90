//! natlog 파이프라인 에러 타입
//!
//! [`NatlogPipelineError`]는 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<NatlogPipelineError> for NatlogError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use natlog_core::error::{NatlogError, PipelineError, StorageError};

/// natlog 파이프라인 도메인 에러
///
/// 모델 컴파일, 규칙 로딩, 필드 변환, 수집, 채널 통신, 스토리지 등
/// 파이프라인 내부의 모든 에러 상황을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum NatlogPipelineError {
    /// 알 수 없는 필드 타입 태그
    #[error("unknown field type '{kind}' for field '{field}' in rule '{rule}'")]
    UnknownFieldType {
        /// 규칙 이름
        rule: String,
        /// 필드 이름
        field: String,
        /// 설정된 타입 태그
        kind: String,
    },

    /// 필드 옵션(`default` 등)의 형식 오류
    #[error("invalid option for field '{field}' in rule '{rule}': {reason}")]
    InvalidFieldOption {
        /// 규칙 이름
        rule: String,
        /// 필드 이름
        field: String,
        /// 오류 사유
        reason: String,
    },

    /// list 필드의 `values` 매핑 형식 오류
    #[error("invalid list mapping for field '{field}' in rule '{rule}': {reason}")]
    InvalidListMapping {
        /// 규칙 이름
        rule: String,
        /// 필드 이름
        field: String,
        /// 오류 사유
        reason: String,
    },

    /// 규칙 정규식 컴파일 실패
    #[error("invalid pattern in rule '{rule}': {source}")]
    Pattern {
        /// 규칙 이름
        rule: String,
        /// 정규식 에러
        source: regex::Error,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule '{rule}': {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 이름
        rule: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 필드 값 변환 실패 (레코드 단위, 치명적이지 않음)
    #[error("cannot convert field '{field}' value '{value}': {reason}")]
    Convert {
        /// 필드 이름
        field: String,
        /// 원본 값
        value: String,
        /// 실패 사유
        reason: String,
    },

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// syslog 메시지에 content 페이로드가 없음 (리스너 치명적 에러)
    #[error("syslog message without content payload: {0}")]
    MissingContent(String),

    /// 수집기 에러 (네트워크 등)
    #[error("collector error: {source_type}: {reason}")]
    Collector {
        /// 수집 소스 유형 (syslog_udp, syslog_tcp)
        source_type: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<NatlogPipelineError> for NatlogError {
    fn from(err: NatlogPipelineError) -> Self {
        match err {
            NatlogPipelineError::Storage(e) => NatlogError::Storage(e),
            NatlogPipelineError::MissingContent(_) => {
                NatlogError::Pipeline(PipelineError::Fatal(err.to_string()))
            }
            other => NatlogError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
