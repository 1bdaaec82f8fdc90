//! 스토리지 추상화 -- 트랜잭션 단위 배치 적재
//!
//! [`StorageConnection`] trait은 배치 엔진이 사용하는 최소한의 트랜잭션 API를
//! 정의합니다. 운영 구현은 [`ClickHouseConnection`], 테스트 구현은
//! [`MemoryStorage`]입니다.
//!
//! ```text
//! begin -> prepare(insert) -> exec(row)* -> close_statement -> commit | rollback
//! ```
//!
//! 배치 엔진이 유일한 호출자이며 호출은 항상 순차적입니다.

pub mod clickhouse;
pub mod memory;

pub use clickhouse::{ClickHouseConfig, ClickHouseConnection, ClickHouseTransaction};
pub use memory::{MemoryStorage, MemoryTransaction};

use std::future::Future;

use natlog_core::error::StorageError;

use crate::model::FieldValue;

/// 스토리지 연결
///
/// 트랜잭션을 시작하고 연결 상태를 확인합니다.
/// `Send + Sync + 'static`이므로 `Arc`로 여러 태스크에서 공유할 수 있습니다.
pub trait StorageConnection: Send + Sync + 'static {
    /// 이 연결이 만드는 트랜잭션 타입
    type Tx: Transaction;

    /// 연결 상태를 확인합니다.
    ///
    /// 시작 시 한 번(실패하면 치명적), 이후 readiness 검사에서 호출됩니다.
    fn ping(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 새 트랜잭션을 시작합니다.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StorageError>> + Send;
}

/// 단일 배치를 적재하는 트랜잭션
///
/// `commit`/`rollback`은 `self`를 소비하므로 종료된 트랜잭션은 재사용할 수
/// 없습니다.
pub trait Transaction: Send {
    /// INSERT 문을 준비합니다.
    fn prepare(&mut self, statement: &str)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 준비된 문으로 한 행을 실행합니다.
    ///
    /// 값의 수는 준비된 문의 placeholder 수와 같아야 합니다.
    fn exec(&mut self, row: &[FieldValue]) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 준비된 문을 닫습니다.
    fn close_statement(&mut self);

    /// 트랜잭션을 커밋하고 적재된 행 수를 반환합니다.
    fn commit(self) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// 트랜잭션을 롤백합니다.
    fn rollback(self) -> impl Future<Output = Result<(), StorageError>> + Send;
}
