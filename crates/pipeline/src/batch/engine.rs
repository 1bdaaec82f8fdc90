//! 배치 엔진 -- 규칙별 누적과 트랜잭션 플러시
//!
//! 엔진 태스크 하나가 모든 누적 버퍼를 소유하고 모든 트랜잭션을 순차적으로
//! 발행합니다. 루프는 세 가지 이벤트를 다중화합니다.
//!
//! - 종료 토큰: 루프 종료 (남은 버퍼는 적재하지 않음)
//! - 주기 타이머: 오래된 비어 있지 않은 버퍼를 `TimerElapsed` 플러시 대상으로 등록
//! - ingest 채널: 레코드 누적, 배치 크기 도달 시 `SizeFilled` 플러시 대상으로 등록
//!
//! 플러시 대상은 크기 제한 없는 작업 목록에 쌓이고, 매 반복의 시작에서 모두
//! 처리된 뒤 다시 대기합니다.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use natlog_core::config::ExecFailurePolicy;
use natlog_core::metrics as m;

use super::accumulator::Accumulator;
use crate::config::PipelineConfig;
use crate::error::NatlogPipelineError;
use crate::model::CompiledModel;
use crate::rule::StructuredRecord;
use crate::storage::{StorageConnection, Transaction};

/// 플러시 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// 누적 필드 수가 배치 크기에 도달
    SizeFilled,
    /// 마지막 플러시 이후 타임아웃 경과
    TimerElapsed,
}

impl FlushReason {
    /// 메트릭 레이블 값
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SizeFilled => "size",
            Self::TimerElapsed => "timeout",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 플러시 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 버퍼가 비어 있어 아무것도 하지 않음
    Empty,
    /// 커밋 성공
    Committed {
        /// 커밋된 행 수
        rows: u64,
        /// 변환 실패 또는 exec 실패로 건너뛴 레코드 수
        skipped: usize,
    },
    /// 배치 유실 (begin/prepare/exec/commit 실패)
    Failed,
}

/// 배치 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 배치 크기 (누적 필드 수)
    pub batch_size: usize,
    /// 배치 타임아웃이자 타이머 주기
    pub batch_timeout: Duration,
    /// exec 실패 정책
    pub exec_failure_policy: ExecFailurePolicy,
}

impl EngineSettings {
    /// 파이프라인 설정에서 엔진 설정을 만듭니다.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout(),
            exec_failure_policy: config.exec_failure_policy,
        }
    }
}

/// 배치 엔진
///
/// # 사용 예시
/// ```ignore
/// let (ingest_tx, ingest_rx) = mpsc::channel(settings.batch_size);
/// let engine = BatchEngine::new(storage, models, settings);
/// tokio::spawn(engine.run(ingest_rx, cancel.clone()));
/// ```
pub struct BatchEngine<S: StorageConnection> {
    storage: Arc<S>,
    models: HashMap<String, CompiledModel>,
    accumulators: HashMap<String, Accumulator>,
    pending: VecDeque<(String, FlushReason)>,
    settings: EngineSettings,
}

impl<S: StorageConnection> BatchEngine<S> {
    /// 모델 레지스트리의 규칙마다 빈 누적 버퍼를 만들어 엔진을 생성합니다.
    pub fn new(
        storage: Arc<S>,
        models: HashMap<String, CompiledModel>,
        settings: EngineSettings,
    ) -> Self {
        let now = Instant::now();
        let accumulators = models
            .keys()
            .map(|rule| (rule.clone(), Accumulator::new(now)))
            .collect();

        Self {
            storage,
            models,
            accumulators,
            pending: VecDeque::new(),
            settings,
        }
    }

    /// 엔진 설정
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 규칙의 누적 버퍼 (등록되지 않은 규칙이면 `None`)
    pub fn accumulator(&self, rule: &str) -> Option<&Accumulator> {
        self.accumulators.get(rule)
    }

    /// 모든 규칙에 버퍼된 레코드 수
    pub fn buffered_records(&self) -> usize {
        self.accumulators.values().map(Accumulator::len).sum()
    }

    /// 처리 대기 중인 플러시 작업 목록
    pub fn pending_flushes(&self) -> impl Iterator<Item = (&str, FlushReason)> {
        self.pending.iter().map(|(rule, reason)| (rule.as_str(), *reason))
    }

    /// 레코드 도착을 처리합니다.
    ///
    /// 등록되지 않은 규칙의 레코드는 기록 후 버립니다. 누적 필드 수가 배치
    /// 크기에 도달하면 `SizeFilled` 플러시를 작업 목록에 등록합니다.
    pub fn on_record(&mut self, record: StructuredRecord) {
        let Some(acc) = self.accumulators.get_mut(&record.rule) else {
            warn!(rule = %record.rule, "record for unknown rule, dropped");
            counter!(m::BATCH_UNKNOWN_RULE_TOTAL).increment(1);
            return;
        };

        let rule = record.rule.clone();
        let count = acc.push(record);
        gauge!(m::BATCH_BUFFERED_RECORDS, m::LABEL_RULE => rule.clone()).set(acc.len() as f64);

        if count >= self.settings.batch_size {
            self.enqueue(rule, FlushReason::SizeFilled);
        }
    }

    /// 타이머 틱을 처리합니다.
    ///
    /// 비어 있지 않고 마지막 플러시 이후 타임아웃 이상 지난 버퍼를
    /// `TimerElapsed` 플러시 대상으로 등록합니다.
    pub fn on_tick(&mut self, now: Instant) {
        let timeout = self.settings.batch_timeout;
        let mut due: Vec<String> = self
            .accumulators
            .iter()
            .filter(|(_, acc)| acc.is_due(now, timeout))
            .map(|(rule, _)| rule.clone())
            .collect();
        // HashMap 순회 순서와 무관하게 결정적으로
        due.sort_unstable();

        for rule in due {
            self.enqueue(rule, FlushReason::TimerElapsed);
        }
    }

    /// 작업 목록의 플러시를 모두 처리하고 처리한 수를 반환합니다.
    pub async fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Some((rule, reason)) = self.pending.pop_front() {
            self.flush(&rule, reason).await;
            processed += 1;
        }
        processed
    }

    /// 규칙 하나를 플러시합니다.
    ///
    /// 버퍼는 트랜잭션 시작 전에 비워지므로 실패한 배치는 유실됩니다.
    /// 성공한 경우에만 마지막 플러시 시각을 플러시 시작 시각으로 갱신하므로
    /// 커밋 지연이 다음 타이머 플러시를 늦추지 않습니다.
    pub async fn flush(&mut self, rule: &str, reason: FlushReason) -> FlushOutcome {
        let (Some(acc), Some(model)) = (self.accumulators.get_mut(rule), self.models.get(rule))
        else {
            return FlushOutcome::Empty;
        };
        if acc.is_empty() {
            return FlushOutcome::Empty;
        }

        let flush_started = Instant::now();
        let records = acc.take();
        gauge!(m::BATCH_BUFFERED_RECORDS, m::LABEL_RULE => rule.to_owned()).set(0.0);

        let batch_len = records.len();
        let result = write_batch(
            self.storage.as_ref(),
            model,
            &records,
            self.settings.exec_failure_policy,
        )
        .await;
        histogram!(m::BATCH_FLUSH_DURATION_SECONDS).record(flush_started.elapsed().as_secs_f64());

        match result {
            Ok(summary) => {
                acc.mark_flushed(flush_started);
                counter!(
                    m::BATCH_FLUSHES_TOTAL,
                    m::LABEL_REASON => reason.as_str(),
                    m::LABEL_RESULT => "success"
                )
                .increment(1);
                counter!(m::STORAGE_ROWS_INSERTED_TOTAL, m::LABEL_RULE => rule.to_owned())
                    .increment(summary.rows);
                debug!(
                    rule,
                    reason = %reason,
                    records = batch_len,
                    rows = summary.rows,
                    skipped = summary.skipped,
                    "batch committed"
                );
                FlushOutcome::Committed {
                    rows: summary.rows,
                    skipped: summary.skipped,
                }
            }
            Err(e) => {
                counter!(
                    m::BATCH_FLUSHES_TOTAL,
                    m::LABEL_REASON => reason.as_str(),
                    m::LABEL_RESULT => "failure"
                )
                .increment(1);
                error!(
                    rule,
                    reason = %reason,
                    records = batch_len,
                    error = %e,
                    "batch flush failed, batch discarded"
                );
                FlushOutcome::Failed
            }
        }
    }

    /// 엔진 루프를 실행합니다.
    ///
    /// 종료 토큰이 발동하거나 ingest 채널의 송신 측이 모두 닫히면 종료합니다.
    /// 진행 중이던 플러시는 끝까지 수행하며, 남은 버퍼는 적재하지 않습니다.
    pub async fn run(mut self, mut ingest: mpsc::Receiver<StructuredRecord>, cancel: CancellationToken) {
        let period = self.settings.batch_timeout;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            rules = self.models.len(),
            batch_size = self.settings.batch_size,
            batch_timeout = ?period,
            policy = ?self.settings.exec_failure_policy,
            "batch engine started"
        );

        loop {
            self.process_pending().await;

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("batch engine received shutdown signal");
                    break;
                }
                _ = ticker.tick() => self.on_tick(Instant::now()),
                received = ingest.recv() => match received {
                    Some(record) => self.on_record(record),
                    None => {
                        debug!("ingest channel closed, stopping batch engine");
                        break;
                    }
                },
            }
        }

        let residual = self.buffered_records();
        if residual > 0 {
            warn!(records = residual, "batch engine stopped with unflushed records, discarded");
        }
        info!("batch engine stopped");
    }

    fn enqueue(&mut self, rule: String, reason: FlushReason) {
        // 플러시는 버퍼 전체를 꺼내므로 같은 규칙을 두 번 등록할 필요가 없음
        if self.pending.iter().any(|(r, _)| *r == rule) {
            return;
        }
        self.pending.push_back((rule, reason));
    }
}

/// 한 배치의 적재 결과
struct WriteSummary {
    rows: u64,
    skipped: usize,
}

/// `begin -> prepare -> exec* -> commit` 순서로 한 배치를 적재합니다.
async fn write_batch<S: StorageConnection>(
    storage: &S,
    model: &CompiledModel,
    records: &[StructuredRecord],
    policy: ExecFailurePolicy,
) -> Result<WriteSummary, NatlogPipelineError> {
    let mut tx = storage.begin().await?;

    if let Err(e) = tx.prepare(model.insert_statement()).await {
        rollback_quietly(tx, model.rule()).await;
        return Err(e.into());
    }

    let mut skipped = 0usize;
    for record in records {
        let values = match model.convert_record(&record.fields) {
            Ok(values) => values,
            Err(e) => {
                warn!(rule = model.rule(), error = %e, "record conversion failed, skipped");
                counter!(m::BATCH_CONVERSION_DROPS_TOTAL, m::LABEL_RULE => model.rule().to_owned())
                    .increment(1);
                skipped += 1;
                continue;
            }
        };

        if let Err(e) = tx.exec(&values).await {
            counter!(m::STORAGE_ROW_FAILURES_TOTAL, m::LABEL_RULE => model.rule().to_owned())
                .increment(1);
            match policy {
                ExecFailurePolicy::DiscardBatch => {
                    tx.close_statement();
                    rollback_quietly(tx, model.rule()).await;
                    return Err(e.into());
                }
                ExecFailurePolicy::SkipRow => {
                    warn!(rule = model.rule(), error = %e, "row insert failed, skipped");
                    skipped += 1;
                }
            }
        }
    }

    tx.close_statement();
    let rows = tx.commit().await?;
    Ok(WriteSummary { rows, skipped })
}

async fn rollback_quietly<T: Transaction>(tx: T, rule: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(rule, error = %e, "rollback failed");
    }
}
