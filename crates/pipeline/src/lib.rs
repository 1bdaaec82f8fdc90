#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`collector`]: syslog UDP/TCP 수집기
//! - [`parser`]: RFC 3164 / RFC 5424 syslog 파서
//! - [`rule`]: 정규식 추출 규칙 테이블과 YAML 규칙 로더
//! - [`model`]: 필드 변환기와 모델 컴파일러
//! - [`listener`]: 파싱 + 규칙 디스패치 태스크
//! - [`batch`]: 규칙별 누적 버퍼와 배치 엔진
//! - [`storage`]: 트랜잭션 스토리지 trait, ClickHouse/인메모리 구현
//! - [`pipeline`]: 전체 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Collectors -> SyslogListener -> BatchEngine -> StorageConnection
//!     |               |               |               |
//!  UDP/TCP     parse + dispatch   size/timer     ClickHouse
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod listener;
pub mod model;
pub mod pipeline;
pub mod storage;

pub mod collector;
pub mod parser;
pub mod rule;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{NatlogPipeline, NatlogPipelineBuilder};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::NatlogPipelineError;

// 파서
pub use parser::{SyslogMessage, SyslogParser};

// 규칙
pub use rule::{Rule, RuleLoader, RuleTable, StructuredRecord};

// 모델
pub use model::{CompiledModel, FieldConverter, FieldValue};

// 수집기
pub use collector::{RawLog, SyslogTcpCollector, SyslogUdpCollector, Transport};

// 리스너 / 배치
pub use batch::{BatchEngine, EngineSettings, FlushOutcome, FlushReason};
pub use listener::SyslogListener;

// 스토리지
pub use storage::{
    ClickHouseConfig, ClickHouseConnection, MemoryStorage, StorageConnection, Transaction,
};
