//! ClickHouse 스토리지 구현 (`clickhouse` 크레이트 HTTP 클라이언트)
//!
//! 트랜잭션은 클라이언트 측 행 버퍼입니다. `prepare`가 INSERT 문의
//! `VALUES (?, ...)` 튜플을 찾아 두고, `exec`가 변환된 한 행을 쌓습니다.
//! `commit`은 문마다 튜플을 행 수만큼 이어 붙인 쿼리에 모든 값을 순서대로
//! [`bind`](clickhouse::query::Query::bind)하여 한 번에 실행하고,
//! `rollback`은 버퍼를 버립니다.

use std::time::Duration;

use clickhouse::Client;
use clickhouse::query::Query;
use tokio::time::timeout;
use tracing::debug;

use natlog_core::config::StorageConfig;
use natlog_core::error::StorageError;

use super::{StorageConnection, Transaction};
use crate::model::FieldValue;

/// ClickHouse 연결 설정
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// 서버 주소 (`host:port` 또는 `http(s)://host:port`)
    pub address: String,
    /// 사용자 이름
    pub username: String,
    /// 비밀번호
    pub password: String,
    /// 기본 데이터베이스
    pub database: String,
    /// ping 응답 대기 타임아웃
    pub read_timeout: Duration,
    /// INSERT 전송 타임아웃
    pub write_timeout: Duration,
    /// 전송하는 문을 debug 레벨로 기록
    pub debug: bool,
}

impl ClickHouseConfig {
    /// core 설정에서 ClickHouse 설정을 생성합니다.
    pub fn from_core(core: &StorageConfig) -> Self {
        Self {
            address: core.address.clone(),
            username: core.username.clone(),
            password: core.password.clone(),
            database: core.database.clone(),
            read_timeout: Duration::from_secs(core.read_timeout_secs),
            write_timeout: Duration::from_secs(core.write_timeout_secs),
            debug: core.debug,
        }
    }

    /// HTTP 기본 URL (후행 `/` 제외)
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_owned()
        } else {
            format!("http://{address}")
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self::from_core(&StorageConfig::default())
    }
}

/// ClickHouse 연결
///
/// [`Client`]는 내부적으로 HTTP 커넥션 풀을 공유하므로 복제 비용이 작습니다.
///
/// # 사용 예시
/// ```ignore
/// let conn = ClickHouseConnection::new(ClickHouseConfig::from_core(&config.storage))?;
/// conn.ping().await?;
/// ```
#[derive(Clone)]
pub struct ClickHouseConnection {
    client: Client,
    base_url: String,
    read_timeout: Duration,
    write_timeout: Duration,
    debug: bool,
}

impl ClickHouseConnection {
    /// 클라이언트를 구성하여 연결 객체를 생성합니다.
    ///
    /// 실제 네트워크 연결은 [`ping`](StorageConnection::ping) 또는 첫 커밋 시점에
    /// 이루어집니다.
    ///
    /// # Errors
    /// 주소가 비어 있으면 [`StorageError::Connection`]을 반환합니다.
    pub fn new(config: ClickHouseConfig) -> Result<Self, StorageError> {
        if config.address.trim().is_empty() {
            return Err(StorageError::Connection(
                "clickhouse address is empty".to_owned(),
            ));
        }

        let base_url = config.base_url();
        let client = Client::default()
            .with_url(&base_url)
            .with_user(&config.username)
            .with_password(&config.password)
            .with_database(&config.database);

        Ok(Self {
            client,
            base_url,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            debug: config.debug,
        })
    }

    /// 요청 대상 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for ClickHouseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConnection")
            .field("base_url", &self.base_url)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl StorageConnection for ClickHouseConnection {
    type Tx = ClickHouseTransaction;

    async fn ping(&self) -> Result<(), StorageError> {
        let ping = self.client.query("SELECT 1").execute();
        match timeout(self.read_timeout, ping).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StorageError::Connection(format!(
                "ping {} failed: {e}",
                self.base_url
            ))),
            Err(_) => Err(StorageError::Connection(format!(
                "ping {} timed out after {:?}",
                self.base_url, self.read_timeout
            ))),
        }
    }

    async fn begin(&self) -> Result<ClickHouseTransaction, StorageError> {
        Ok(ClickHouseTransaction {
            connection: self.clone(),
            groups: Vec::new(),
            active: None,
        })
    }
}

/// 문 하나에 대해 쌓인 행
#[derive(Debug)]
struct RowGroup {
    /// 준비된 INSERT 문 (`... VALUES (?, ?)`)
    statement: String,
    /// `statement` 안에서 VALUES 튜플이 시작하는 위치
    tuple_at: usize,
    /// 행당 값 수
    placeholders: usize,
    rows: Vec<Vec<FieldValue>>,
}

impl RowGroup {
    fn new(statement: &str) -> Result<Self, StorageError> {
        let statement = statement.trim();
        let tuple_at = statement
            .rfind('(')
            .filter(|_| statement.ends_with(')'))
            .ok_or_else(|| {
                StorageError::Query(format!("statement has no VALUES tuple: {statement}"))
            })?;
        let placeholders = statement[tuple_at..].matches('?').count();
        if placeholders == 0 {
            return Err(StorageError::Query(format!(
                "statement has no placeholders: {statement}"
            )));
        }

        Ok(Self {
            statement: statement.to_owned(),
            tuple_at,
            placeholders,
            rows: Vec::new(),
        })
    }

    /// 행 수만큼 튜플을 반복한 다중 행 INSERT 템플릿
    fn sql(&self) -> String {
        let tuple = &self.statement[self.tuple_at..];
        let mut sql = String::with_capacity(self.statement.len() + tuple.len() * self.rows.len());
        sql.push_str(&self.statement);
        for _ in 1..self.rows.len() {
            sql.push(',');
            sql.push_str(tuple);
        }
        sql
    }

    /// 모든 값을 순서대로 바인딩한 쿼리
    fn query(&self, client: &Client) -> Query {
        self.rows
            .iter()
            .flatten()
            .fold(client.query(&self.sql()), |query, value| query.bind(value))
    }
}

/// ClickHouse 트랜잭션 (클라이언트 측 버퍼)
pub struct ClickHouseTransaction {
    connection: ClickHouseConnection,
    groups: Vec<RowGroup>,
    /// 현재 열린 문의 `groups` 인덱스
    active: Option<usize>,
}

impl ClickHouseTransaction {
    /// 커밋 대기 중인 행 수
    pub fn pending_rows(&self) -> usize {
        self.groups.iter().map(|g| g.rows.len()).sum()
    }
}

impl Transaction for ClickHouseTransaction {
    async fn prepare(&mut self, statement: &str) -> Result<(), StorageError> {
        if self.active.is_some() {
            return Err(StorageError::Transaction(
                "a statement is already prepared".to_owned(),
            ));
        }
        self.groups.push(RowGroup::new(statement)?);
        self.active = Some(self.groups.len() - 1);
        Ok(())
    }

    async fn exec(&mut self, row: &[FieldValue]) -> Result<(), StorageError> {
        let Some(group) = self.active.and_then(|i| self.groups.get_mut(i)) else {
            return Err(StorageError::Transaction(
                "exec without a prepared statement".to_owned(),
            ));
        };

        if row.len() != group.placeholders {
            return Err(StorageError::Query(format!(
                "expected {} values, got {}",
                group.placeholders,
                row.len()
            )));
        }

        group.rows.push(row.to_vec());
        Ok(())
    }

    fn close_statement(&mut self) {
        self.active = None;
    }

    async fn commit(self) -> Result<u64, StorageError> {
        let connection = &self.connection;
        let mut committed = 0u64;

        for group in self.groups.iter().filter(|g| !g.rows.is_empty()) {
            let rows = group.rows.len();
            if connection.debug {
                debug!(statement = %group.statement, rows, "sending insert");
            }

            let insert = group.query(&connection.client).execute();
            match timeout(connection.write_timeout, insert).await {
                Ok(Ok(())) => committed += rows as u64,
                Ok(Err(e)) => return Err(insert_error(e)),
                Err(_) => {
                    return Err(StorageError::Connection(format!(
                        "insert timed out after {:?}",
                        connection.write_timeout
                    )));
                }
            }
        }

        Ok(committed)
    }

    async fn rollback(self) -> Result<(), StorageError> {
        debug!(rows = self.pending_rows(), "discarding buffered rows");
        Ok(())
    }
}

/// 네트워크 실패는 연결 에러, 서버가 거부한 요청은 쿼리 에러로 분류합니다.
fn insert_error(error: clickhouse::error::Error) -> StorageError {
    match error {
        clickhouse::error::Error::Network(e) => {
            StorageError::Connection(format!("insert request failed: {e}"))
        }
        other => StorageError::Query(format!("insert rejected: {other}")),
    }
}
