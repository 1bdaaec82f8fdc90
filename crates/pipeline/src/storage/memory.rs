//! 인메모리 스토리지 -- 테스트와 로컬 검증용
//!
//! 커밋된 행을 테이블별로 보관하며, 단계별 실패를 주입할 수 있습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use natlog_core::error::StorageError;

use super::{StorageConnection, Transaction};
use crate::model::FieldValue;

/// 실패 주입 설정
#[derive(Debug, Default)]
struct Faults {
    ping: AtomicBool,
    begin: AtomicBool,
    prepare: AtomicBool,
    commit: AtomicBool,
    /// 실패시킬 exec 호출 번호 (1부터 셈, 0이면 비활성)
    exec_nth: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    faults: Faults,
    committed: Mutex<HashMap<String, Vec<Vec<FieldValue>>>>,
    /// 커밋마다 적재된 행 수 (커밋 순서)
    batches: Mutex<Vec<u64>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    execs: AtomicUsize,
}

/// 인메모리 스토리지 연결
///
/// 복제본은 같은 저장소를 공유합니다.
///
/// # 사용 예시
/// ```ignore
/// let storage = MemoryStorage::new();
/// storage.fail_exec_at(2);
/// // ... 엔진 실행 ...
/// assert_eq!(storage.rows("natlog.sessions").len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl MemoryStorage {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// ping 실패 여부를 설정합니다.
    pub fn fail_ping(&self, fail: bool) {
        self.shared.faults.ping.store(fail, Ordering::SeqCst);
    }

    /// begin 실패 여부를 설정합니다.
    pub fn fail_begin(&self, fail: bool) {
        self.shared.faults.begin.store(fail, Ordering::SeqCst);
    }

    /// prepare 실패 여부를 설정합니다.
    pub fn fail_prepare(&self, fail: bool) {
        self.shared.faults.prepare.store(fail, Ordering::SeqCst);
    }

    /// commit 실패 여부를 설정합니다.
    pub fn fail_commit(&self, fail: bool) {
        self.shared.faults.commit.store(fail, Ordering::SeqCst);
    }

    /// 전체 기간 중 `n`번째(1부터) exec 호출을 실패시킵니다. 0이면 해제합니다.
    pub fn fail_exec_at(&self, n: usize) {
        self.shared.faults.exec_nth.store(n, Ordering::SeqCst);
    }

    /// 테이블에 커밋된 행을 반환합니다.
    pub fn rows(&self, table: &str) -> Vec<Vec<FieldValue>> {
        self.committed().get(table).cloned().unwrap_or_default()
    }

    /// 모든 테이블의 커밋된 행 수
    pub fn total_rows(&self) -> usize {
        self.committed().values().map(Vec::len).sum()
    }

    /// 성공한 커밋 수
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// 성공한 커밋별 행 수 (커밋 순서)
    pub fn committed_batches(&self) -> Vec<u64> {
        self.shared
            .batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// 롤백 수
    pub fn rollback_count(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    fn committed(&self) -> MutexGuard<'_, HashMap<String, Vec<Vec<FieldValue>>>> {
        // 다른 스레드의 panic으로 poison되어도 데이터는 유효
        self.shared
            .committed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StorageConnection for MemoryStorage {
    type Tx = MemoryTransaction;

    async fn ping(&self) -> Result<(), StorageError> {
        if self.shared.faults.ping.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("injected ping failure".to_owned()));
        }
        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTransaction, StorageError> {
        if self.shared.faults.begin.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("injected begin failure".to_owned()));
        }
        Ok(MemoryTransaction {
            storage: self.clone(),
            table: None,
            placeholders: 0,
            prepared: false,
            pending: Vec::new(),
        })
    }
}

/// 인메모리 트랜잭션
#[derive(Debug)]
pub struct MemoryTransaction {
    storage: MemoryStorage,
    table: Option<String>,
    placeholders: usize,
    prepared: bool,
    pending: Vec<(String, Vec<FieldValue>)>,
}

/// `INSERT INTO <table> (...) VALUES (?, ...)`에서 테이블과 placeholder 수를 뽑습니다.
fn parse_insert(statement: &str) -> Option<(String, usize)> {
    let rest = statement.trim().strip_prefix("INSERT INTO ")?;
    let (table, _) = rest.split_once(' ')?;
    let (_, values) = rest.rsplit_once("VALUES")?;
    Some((table.to_owned(), values.matches('?').count()))
}

impl Transaction for MemoryTransaction {
    async fn prepare(&mut self, statement: &str) -> Result<(), StorageError> {
        if self.storage.shared.faults.prepare.load(Ordering::SeqCst) {
            return Err(StorageError::Query("injected prepare failure".to_owned()));
        }
        let (table, placeholders) = parse_insert(statement)
            .ok_or_else(|| StorageError::Query(format!("unsupported statement: {statement}")))?;
        self.table = Some(table);
        self.placeholders = placeholders;
        self.prepared = true;
        Ok(())
    }

    async fn exec(&mut self, row: &[FieldValue]) -> Result<(), StorageError> {
        let shared = &self.storage.shared;
        let call = shared.execs.fetch_add(1, Ordering::SeqCst) + 1;
        if shared.faults.exec_nth.load(Ordering::SeqCst) == call {
            return Err(StorageError::Query(format!("injected exec failure #{call}")));
        }

        let Some(table) = self.table.as_ref().filter(|_| self.prepared) else {
            return Err(StorageError::Transaction(
                "exec without a prepared statement".to_owned(),
            ));
        };
        if row.len() != self.placeholders {
            return Err(StorageError::Query(format!(
                "expected {} values, got {}",
                self.placeholders,
                row.len()
            )));
        }
        self.pending.push((table.clone(), row.to_vec()));
        Ok(())
    }

    fn close_statement(&mut self) {
        self.prepared = false;
    }

    async fn commit(self) -> Result<u64, StorageError> {
        let shared = &self.storage.shared;
        if shared.faults.commit.load(Ordering::SeqCst) {
            shared.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Transaction("injected commit failure".to_owned()));
        }

        let count = self.pending.len() as u64;
        {
            let mut committed = self.storage.committed();
            for (table, row) in self.pending {
                committed.entry(table).or_default().push(row);
            }
            shared
                .batches
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(count);
        }
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(count)
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.storage.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
