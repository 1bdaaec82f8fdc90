//! syslog 리스너 -- 원시 라인을 구조화 레코드로 바꿔 배치 엔진에 넘깁니다.
//!
//! ```text
//! RawLog -> SyslogParser -> content -> RuleTable::dispatch -> ingest(mpsc) -> BatchEngine
//! ```
//!
//! 엔진으로 가는 ingest 채널은 배치 크기로 제한됩니다. 채널이 가득 차면
//! 리스너가 대기하며(backpressure), 레코드를 버리지 않습니다.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use natlog_core::metrics as m;

use crate::collector::RawLog;
use crate::error::NatlogPipelineError;
use crate::parser::SyslogParser;
use crate::rule::{RuleTable, StructuredRecord};

/// 에러 메시지에 포함할 원본 라인 최대 길이
const MAX_ERROR_EXCERPT: usize = 256;

/// syslog 리스너
///
/// # 사용 예시
/// ```ignore
/// let listener = SyslogListener::new(Arc::new(table), raw_rx, ingest_tx, cancel.clone());
/// tokio::spawn(listener.run());
/// ```
pub struct SyslogListener {
    parser: SyslogParser,
    rules: Arc<RuleTable>,
    rx: mpsc::Receiver<RawLog>,
    ingest: mpsc::Sender<StructuredRecord>,
    cancel: CancellationToken,
    processed: u64,
}

impl SyslogListener {
    /// 새 리스너를 생성합니다.
    pub fn new(
        rules: Arc<RuleTable>,
        rx: mpsc::Receiver<RawLog>,
        ingest: mpsc::Sender<StructuredRecord>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            parser: SyslogParser::new(),
            rules,
            rx,
            ingest,
            cancel,
            processed: 0,
        }
    }

    /// syslog 디코더를 교체합니다.
    pub fn with_parser(mut self, parser: SyslogParser) -> Self {
        self.parser = parser;
        self
    }

    /// 처리한 라인 수
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// 한 라인을 디코딩하고 모든 규칙에 대해 평가합니다.
    ///
    /// # Errors
    /// 디코딩된 메시지에 content 페이로드가 없으면
    /// [`NatlogPipelineError::MissingContent`]를 반환합니다. 리스너에게는
    /// 치명적 에러입니다.
    pub fn extract(&self, raw: &RawLog) -> Result<Vec<StructuredRecord>, NatlogPipelineError> {
        let message = self.parser.parse(&raw.data);

        let Some(content) = message.content.as_deref() else {
            let excerpt = String::from_utf8_lossy(&raw.data);
            let excerpt: String = excerpt.chars().take(MAX_ERROR_EXCERPT).collect();
            return Err(NatlogPipelineError::MissingContent(excerpt));
        };

        let records = self.rules.dispatch(content);
        for record in &records {
            counter!(m::LISTENER_RECORDS_MATCHED_TOTAL, m::LABEL_RULE => record.rule.clone())
                .increment(1);
        }

        trace!(
            format = ?message.format,
            records = records.len(),
            "line dispatched"
        );
        Ok(records)
    }

    /// 리스너 루프를 실행합니다.
    ///
    /// 취소 토큰이 발동하거나 수집기 채널이 모두 닫히면 정상 종료합니다.
    ///
    /// # Errors
    /// - content 페이로드가 없는 메시지 ([`NatlogPipelineError::MissingContent`])
    /// - 배치 엔진의 ingest 채널이 닫힘 ([`NatlogPipelineError::Channel`])
    pub async fn run(mut self) -> Result<(), NatlogPipelineError> {
        info!(rules = self.rules.len(), "syslog listener started");

        loop {
            let raw = tokio::select! {
                received = self.rx.recv() => match received {
                    Some(raw) => raw,
                    None => {
                        debug!("all collectors closed, stopping listener");
                        break;
                    }
                },
                () = self.cancel.cancelled() => {
                    debug!("syslog listener received shutdown signal");
                    break;
                }
            };

            self.processed += 1;
            let records = self.extract(&raw).inspect_err(|e| {
                error!(error = %e, peer = ?raw.peer, "listener stopped");
            })?;

            for record in records {
                tokio::select! {
                    result = self.ingest.send(record) => {
                        if result.is_err() {
                            return Err(NatlogPipelineError::Channel(
                                "batch engine ingest channel closed".to_owned(),
                            ));
                        }
                    }
                    () = self.cancel.cancelled() => {
                        info!(processed = self.processed, "syslog listener stopped during hand-off");
                        return Ok(());
                    }
                }
            }
        }

        info!(processed = self.processed, "syslog listener stopped");
        Ok(())
    }
}
