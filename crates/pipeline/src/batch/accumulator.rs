//! 규칙별 누적 버퍼
//!
//! [`Accumulator`]는 한 규칙의 미적재 레코드와 누적 필드 수, 마지막으로
//! 성공한 플러시 시각을 보관합니다. 배치 엔진 태스크만 접근합니다.

use std::mem;
use std::time::Duration;

use tokio::time::Instant;

use crate::rule::StructuredRecord;

/// 규칙 하나의 누적 버퍼
#[derive(Debug)]
pub struct Accumulator {
    /// 도착 순서대로의 레코드
    records: Vec<StructuredRecord>,
    /// 누적 필드 수 (배치 크기 비교 대상)
    field_count: usize,
    /// 마지막으로 성공한 플러시 시각
    last_flush: Instant,
}

impl Accumulator {
    /// 빈 버퍼를 생성합니다. `now`가 첫 타이머 기준 시각이 됩니다.
    pub fn new(now: Instant) -> Self {
        Self {
            records: Vec::new(),
            field_count: 0,
            last_flush: now,
        }
    }

    /// 레코드를 추가하고 갱신된 누적 필드 수를 반환합니다.
    pub fn push(&mut self, record: StructuredRecord) -> usize {
        self.field_count += record.field_count();
        self.records.push(record);
        self.field_count
    }

    /// 버퍼를 통째로 꺼냅니다. 버퍼는 즉시 비고 필드 수는 0이 됩니다.
    pub fn take(&mut self) -> Vec<StructuredRecord> {
        self.field_count = 0;
        mem::take(&mut self.records)
    }

    /// 플러시 성공 시각을 기록합니다.
    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }

    /// 타이머 플러시 대상인지 확인합니다.
    ///
    /// 비어 있지 않고 마지막 플러시 이후 `timeout` 이상 지났으면 `true`입니다.
    pub fn is_due(&self, now: Instant, timeout: Duration) -> bool {
        !self.records.is_empty() && now.saturating_duration_since(self.last_flush) >= timeout
    }

    /// 버퍼된 레코드 수
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 버퍼가 비었는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 누적 필드 수
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// 마지막으로 성공한 플러시 시각
    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }
}
