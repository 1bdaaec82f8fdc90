//! 배치 적재 -- 규칙별 누적 버퍼와 단일 엔진 루프
//!
//! - [`Accumulator`]: 규칙 하나의 미적재 레코드
//! - [`BatchEngine`]: 크기/시간 기반 플러시와 트랜잭션 적재

pub mod accumulator;
pub mod engine;

pub use accumulator::Accumulator;
pub use engine::{BatchEngine, EngineSettings, FlushOutcome, FlushReason};
