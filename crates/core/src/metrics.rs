//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `natlog_`
//! - 단계: `syslog_`, `listener_`, `batch_`, `storage_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(natlog_core::metrics::LISTENER_RECORDS_MATCHED_TOTAL, "rule" => "nat").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 규칙 이름 레이블 키
pub const LABEL_RULE: &str = "rule";

/// 수집 프로토콜 레이블 키 (udp, tcp)
pub const LABEL_TRANSPORT: &str = "transport";

/// 플러시 사유 레이블 키 (size, timeout)
pub const LABEL_REASON: &str = "reason";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Syslog 수집 메트릭 ─────────────────────────────────────────────

/// Syslog: 수신된 전체 라인 수 (counter, label: transport)
pub const SYSLOG_LINES_RECEIVED_TOTAL: &str = "natlog_syslog_lines_received_total";

/// Syslog: 채널 포화로 드롭된 라인 수 (counter)
pub const SYSLOG_LINES_DROPPED_TOTAL: &str = "natlog_syslog_lines_dropped_total";

// ─── Listener 메트릭 ────────────────────────────────────────────────

/// Listener: 규칙에 매칭된 레코드 수 (counter, label: rule)
pub const LISTENER_RECORDS_MATCHED_TOTAL: &str = "natlog_listener_records_matched_total";

/// Listener: 캡처 그룹 수가 필드 수와 달라 버려진 매치 수 (counter, label: rule)
pub const LISTENER_MISMATCHES_TOTAL: &str = "natlog_listener_mismatches_total";

// ─── Batch 메트릭 ───────────────────────────────────────────────────

/// Batch: 등록되지 않은 규칙으로 라우팅되어 드롭된 레코드 수 (counter)
pub const BATCH_UNKNOWN_RULE_TOTAL: &str = "natlog_batch_unknown_rule_total";

/// Batch: 필드 변환 실패로 드롭된 레코드 수 (counter, label: rule)
pub const BATCH_CONVERSION_DROPS_TOTAL: &str = "natlog_batch_conversion_drops_total";

/// Batch: 플러시 수 (counter, labels: reason, result)
pub const BATCH_FLUSHES_TOTAL: &str = "natlog_batch_flushes_total";

/// Batch: 플러시 소요 시간 (histogram, 초)
pub const BATCH_FLUSH_DURATION_SECONDS: &str = "natlog_batch_flush_duration_seconds";

/// Batch: 버퍼에 대기 중인 레코드 수 (gauge, label: rule)
pub const BATCH_BUFFERED_RECORDS: &str = "natlog_batch_buffered_records";

// ─── Storage 메트릭 ─────────────────────────────────────────────────

/// Storage: 커밋된 행 수 (counter, label: rule)
pub const STORAGE_ROWS_INSERTED_TOTAL: &str = "natlog_storage_rows_inserted_total";

/// Storage: exec 실패 행 수 (counter, label: rule)
pub const STORAGE_ROW_FAILURES_TOTAL: &str = "natlog_storage_row_failures_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "natlog_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "natlog_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 플러시 소요 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 30s 범위 (네트워크 왕복 포함)
pub const FLUSH_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `natlog-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Syslog
    describe_counter!(
        SYSLOG_LINES_RECEIVED_TOTAL,
        "Total number of syslog lines received per transport"
    );
    describe_counter!(
        SYSLOG_LINES_DROPPED_TOTAL,
        "Total number of syslog lines dropped before reaching the listener"
    );

    // Listener
    describe_counter!(
        LISTENER_RECORDS_MATCHED_TOTAL,
        "Total number of records extracted per rule"
    );
    describe_counter!(
        LISTENER_MISMATCHES_TOTAL,
        "Total number of rule matches dropped due to capture count mismatch"
    );

    // Batch
    describe_counter!(
        BATCH_UNKNOWN_RULE_TOTAL,
        "Total number of records addressed to an unregistered rule"
    );
    describe_counter!(
        BATCH_CONVERSION_DROPS_TOTAL,
        "Total number of records dropped due to field conversion failure"
    );
    describe_counter!(
        BATCH_FLUSHES_TOTAL,
        "Total number of batch flushes by reason and result"
    );
    describe_histogram!(
        BATCH_FLUSH_DURATION_SECONDS,
        "Time to write a single batch to storage in seconds"
    );
    describe_gauge!(
        BATCH_BUFFERED_RECORDS,
        "Current number of records buffered per rule"
    );

    // Storage
    describe_counter!(
        STORAGE_ROWS_INSERTED_TOTAL,
        "Total number of rows committed to storage"
    );
    describe_counter!(
        STORAGE_ROW_FAILURES_TOTAL,
        "Total number of rows whose insert statement failed"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "natlog daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
