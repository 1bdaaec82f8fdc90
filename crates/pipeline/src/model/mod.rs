//! 필드 모델 -- 변환기와 모델 컴파일러
//!
//! - [`converter`]: 필드 종류별 값 변환 ([`FieldConverter`], [`FieldValue`])
//! - [`compiler`]: 규칙 선언 -> [`CompiledModel`] (변환기 목록 + INSERT 문)

pub mod compiler;
pub mod converter;

pub use compiler::{CompiledModel, ModelField, compile};
pub use converter::{ConvertError, DEFAULT_TIMESTAMP_LAYOUT, FieldConverter, FieldValue};
