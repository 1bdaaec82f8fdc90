#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, NatlogError, PipelineError, StorageError};

// 설정
pub use config::{ExecFailurePolicy, FieldSpec, NatlogConfig, RuleConfig};

// 파이프라인 trait
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};
