//! 파이프라인 오케스트레이션 -- 수집/매칭/배치 적재의 전체 흐름을 관리합니다.
//!
//! [`NatlogPipeline`]은 core의 [`Pipeline`](natlog_core::pipeline::Pipeline) trait을
//! 구현하여 `natlog-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! UDP/TCP collectors -> mpsc(listener_queue_capacity) -> SyslogListener
//!     -> mpsc(batch_size) -> BatchEngine -> StorageConnection
//! ```
//!
//! 규칙 로딩, 컴파일, 스토리지 ping, 소켓 바인드는 모두 태스크를 스폰하기 전에
//! 수행되며 어느 하나라도 실패하면 시작이 실패합니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use natlog_core::config::RuleConfig;
use natlog_core::error::{NatlogError, PipelineError};
use natlog_core::pipeline::{HealthStatus, Pipeline};

use crate::batch::{BatchEngine, EngineSettings};
use crate::collector::{SyslogTcpCollector, SyslogTcpConfig, SyslogUdpCollector, SyslogUdpConfig};
use crate::config::PipelineConfig;
use crate::error::NatlogPipelineError;
use crate::listener::SyslogListener;
use crate::parser::SyslogParser;
use crate::rule::{RuleLoader, RuleTable};
use crate::storage::StorageConnection;

/// 치명적 에러 채널 용량 (태스크 수보다 크면 충분)
const FATAL_CHANNEL_CAPACITY: usize = 8;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// natlog 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use natlog_pipeline::{NatlogPipelineBuilder, ClickHouseConnection};
///
/// let mut pipeline = NatlogPipelineBuilder::new()
///     .config(PipelineConfig::from_core(&config))
///     .storage(Arc::new(ClickHouseConnection::new(ch_config)?))
///     .build()?;
///
/// let mut fatal_rx = pipeline.take_fatal_receiver().unwrap();
/// pipeline.start().await?;
/// ```
pub struct NatlogPipeline<S: StorageConnection> {
    /// 파이프라인 설정
    config: PipelineConfig,
    /// 스토리지 연결
    storage: Arc<S>,
    /// 현재 상태
    state: PipelineState,
    /// 실행 중인 태스크의 종료 토큰
    cancel: CancellationToken,
    /// 백그라운드 태스크 핸들
    tasks: Vec<JoinHandle<()>>,
    /// 태스크의 치명적 에러 보고 채널
    fatal_tx: mpsc::Sender<NatlogPipelineError>,
    fatal_rx: Option<mpsc::Receiver<NatlogPipelineError>>,
    /// 컴파일된 규칙 수
    rule_count: usize,
    /// 실제 바인드된 주소
    udp_addr: Option<SocketAddr>,
    tcp_addr: Option<SocketAddr>,
}

impl<S: StorageConnection> NatlogPipeline<S> {
    /// 현재 상태 이름을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 컴파일된 규칙 수 (시작 전에는 0)
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 스토리지 연결 핸들
    pub fn storage(&self) -> Arc<S> {
        Arc::clone(&self.storage)
    }

    /// UDP 수집기가 실제로 바인드된 주소
    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    /// TCP 수집기가 실제로 바인드된 주소
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// 치명적 에러 수신 채널을 가져갑니다 (한 번만 가능).
    ///
    /// 리스너가 content 없는 메시지를 만나는 등 파이프라인이 더 진행할 수
    /// 없을 때 에러가 전달됩니다. 데몬은 이를 받으면 종료해야 합니다.
    pub fn take_fatal_receiver(&mut self) -> Option<mpsc::Receiver<NatlogPipelineError>> {
        self.fatal_rx.take()
    }

    /// 인라인 규칙과 규칙 디렉토리의 규칙을 합칩니다.
    async fn load_rules(&self) -> Result<Vec<RuleConfig>, NatlogPipelineError> {
        let mut rules = self.config.rules.clone();
        if !self.config.rule_dir.is_empty() {
            rules.extend(RuleLoader::load_directory(&self.config.rule_dir).await?);
        }
        Ok(rules)
    }

    /// 규칙 컴파일부터 태스크 스폰까지 수행합니다.
    async fn launch(&mut self) -> Result<(), NatlogPipelineError> {
        // 1. 규칙 로드 및 컴파일
        let rules = self.load_rules().await?;
        let (table, models) = RuleTable::compile(&rules)?;
        if table.is_empty() {
            tracing::warn!("no extraction rules configured, nothing will be stored");
        }
        self.rule_count = table.len();
        tracing::info!(rules = table.len(), "compiled extraction rules");

        // 2. 스토리지 연결 확인
        self.storage.ping().await?;
        tracing::info!("storage connection verified");

        // 3. 채널과 수집기 소켓
        let cancel = CancellationToken::new();
        let (raw_tx, raw_rx) = mpsc::channel(self.config.listener_queue_capacity);
        let (ingest_tx, ingest_rx) = mpsc::channel(self.config.batch_size);

        let udp = if self.config.udp_bind.is_empty() {
            None
        } else {
            let config = SyslogUdpConfig {
                bind_addr: self.config.udp_bind.clone(),
                max_message_size: self.config.max_message_size,
            };
            Some(SyslogUdpCollector::bind(config, raw_tx.clone(), cancel.clone()).await?)
        };
        let tcp = if self.config.tcp_bind.is_empty() {
            None
        } else {
            let config = SyslogTcpConfig {
                bind_addr: self.config.tcp_bind.clone(),
                max_connections: self.config.tcp_max_connections,
                max_message_size: self.config.max_message_size,
                idle_timeout_secs: self.config.tcp_idle_timeout_secs,
            };
            Some(SyslogTcpCollector::bind(config, raw_tx.clone(), cancel.clone()).await?)
        };
        drop(raw_tx);

        self.udp_addr = udp.as_ref().map(SyslogUdpCollector::local_addr).transpose()?;
        self.tcp_addr = tcp.as_ref().map(SyslogTcpCollector::local_addr).transpose()?;

        // 4. 태스크 스폰 (소비자 먼저)
        let engine = BatchEngine::new(
            Arc::clone(&self.storage),
            models,
            EngineSettings::from_config(&self.config),
        );
        self.tasks
            .push(tokio::spawn(engine.run(ingest_rx, cancel.clone())));

        let listener = SyslogListener::new(Arc::new(table), raw_rx, ingest_tx, cancel.clone())
            .with_parser(SyslogParser::new().with_max_input_size(self.config.max_message_size));
        let fatal = self.fatal_tx.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                report_fatal(&fatal, e).await;
            }
        }));

        if let Some(mut collector) = udp {
            let fatal = self.fatal_tx.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = collector.run().await {
                    report_fatal(&fatal, e).await;
                }
            }));
        }
        if let Some(mut collector) = tcp {
            let fatal = self.fatal_tx.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = collector.run().await {
                    report_fatal(&fatal, e).await;
                }
            }));
        }

        self.cancel = cancel;
        Ok(())
    }
}

async fn report_fatal(fatal: &mpsc::Sender<NatlogPipelineError>, error: NatlogPipelineError) {
    tracing::error!(error = %error, "pipeline task failed");
    if fatal.send(error).await.is_err() {
        tracing::debug!("fatal error receiver dropped");
    }
}

impl<S: StorageConnection> Pipeline for NatlogPipeline<S> {
    async fn start(&mut self) -> Result<(), NatlogError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!("starting natlog pipeline");
        self.launch().await.map_err(NatlogError::from)?;

        self.state = PipelineState::Running;
        tracing::info!(
            udp = ?self.udp_addr,
            tcp = ?self.tcp_addr,
            rules = self.rule_count,
            "natlog pipeline started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), NatlogError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping natlog pipeline");
        self.cancel.cancel();

        let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                tracing::warn!(
                    timeout_secs = grace.as_secs(),
                    "task did not stop in time, aborting"
                );
                task.abort();
            }
        }

        self.state = PipelineState::Stopped;
        tracing::info!("natlog pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => match self.storage.ping().await {
                Ok(()) => HealthStatus::Healthy,
                Err(e) => HealthStatus::Degraded(format!("storage ping failed: {e}")),
            },
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// natlog 파이프라인 빌더
pub struct NatlogPipelineBuilder<S: StorageConnection> {
    config: PipelineConfig,
    storage: Option<Arc<S>>,
}

impl<S: StorageConnection> NatlogPipelineBuilder<S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            storage: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 스토리지 연결을 지정합니다 (필수).
    pub fn storage(mut self, storage: Arc<S>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Errors
    /// 설정 검증 실패 또는 스토리지 미지정
    pub fn build(self) -> Result<NatlogPipeline<S>, NatlogPipelineError> {
        self.config.validate()?;
        let storage = self.storage.ok_or_else(|| NatlogPipelineError::Config {
            field: "storage".to_owned(),
            reason: "storage connection is required".to_owned(),
        })?;

        let (fatal_tx, fatal_rx) = mpsc::channel(FATAL_CHANNEL_CAPACITY);

        Ok(NatlogPipeline {
            config: self.config,
            storage,
            state: PipelineState::Initialized,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            fatal_tx,
            fatal_rx: Some(fatal_rx),
            rule_count: 0,
            udp_addr: None,
            tcp_addr: None,
        })
    }
}

impl<S: StorageConnection> Default for NatlogPipelineBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
