//! 필드 변환기 -- 원본 문자열을 타입이 있는 값으로 변환
//!
//! [`FieldConverter`]는 필드 종류마다 하나의 variant를 가지는 닫힌 열거형입니다.
//! 종류별 설정(타임스탬프 레이아웃, list 매핑)은 variant가 직접 보관하며,
//! 변환은 `match`로 분기합니다. 모든 변환은 호출 이력과 무관한 순수 함수입니다.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::num::ParseIntError;

use chrono::format::ParseErrorKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// 타임스탬프 필드의 기본 레이아웃 (`YYYY-MM-DD HH:MM:SS`)
pub const DEFAULT_TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// 변환된 필드 값
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 문자열 (string)
    String(String),
    /// 부호 있는 64비트 정수 (timestamp 초, list 코드)
    Int64(i64),
    /// 부호 없는 32비트 정수 (ip2int)
    UInt32(u32),
    /// 부호 있는 16비트 정수 (int16)
    Int16(i16),
    /// 부호 없는 16비트 정수 (uint16)
    UInt16(u16),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
        }
    }
}

/// 단일 값 변환 실패 사유
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// 타임스탬프 레이아웃 불일치
    #[error("timestamp does not match layout '{layout}': {source}")]
    Timestamp {
        /// 설정된 레이아웃
        layout: String,
        /// chrono 파싱 에러
        source: chrono::ParseError,
    },

    /// list 매핑에 키가 없고 기본값도 없음
    #[error("no mapping for key and no default value given")]
    NoMapping,

    /// IP 주소 파싱 실패
    #[error("invalid ip address: {0}")]
    InvalidIp(#[from] std::net::AddrParseError),

    /// 정수 파싱 실패 (범위 초과 포함)
    #[error("invalid integer: {0}")]
    Integer(#[from] ParseIntError),
}

/// 필드 종류별 변환기
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldConverter {
    /// 항등 변환
    String,
    /// 레이아웃으로 파싱한 뒤 UTC Unix 초로 변환
    Timestamp {
        /// strftime 형식 레이아웃
        layout: String,
    },
    /// 문자열 키 -> 정수 코드 매핑
    List {
        /// 키 -> 코드
        values: HashMap<String, i64>,
        /// 매핑에 없을 때 사용할 코드
        default: Option<i64>,
    },
    /// IP 주소의 (마지막) 4바이트를 big-endian u32로 변환
    Ip2Int,
    /// 10진수 i16
    Int16,
    /// 10진수 u16
    UInt16,
}

impl FieldConverter {
    /// 설정 파일에서 사용하는 타입 태그를 반환합니다.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Timestamp { .. } => "timestamp",
            Self::List { .. } => "list",
            Self::Ip2Int => "ip2int",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
        }
    }

    /// 원본 문자열을 변환합니다.
    pub fn convert(&self, raw: &str) -> Result<FieldValue, ConvertError> {
        match self {
            Self::String => Ok(FieldValue::String(raw.to_owned())),
            Self::Timestamp { layout } => parse_timestamp(raw, layout).map(FieldValue::Int64),
            Self::List { values, default } => values
                .get(raw)
                .copied()
                .or(*default)
                .map(FieldValue::Int64)
                .ok_or(ConvertError::NoMapping),
            Self::Ip2Int => Ok(FieldValue::UInt32(ip_to_int(raw.parse()?))),
            Self::Int16 => Ok(FieldValue::Int16(raw.parse()?)),
            Self::UInt16 => Ok(FieldValue::UInt16(raw.parse()?)),
        }
    }
}

/// 레이아웃이 UTC 오프셋을 포함하는지 확인합니다.
fn layout_has_offset(layout: &str) -> bool {
    ["%z", "%:z", "%::z", "%#z", "%+"]
        .iter()
        .any(|spec| layout.contains(spec))
}

/// 타임스탬프를 UTC Unix 초로 파싱합니다.
///
/// 오프셋이 없는 레이아웃은 UTC로 해석합니다. 시각이 없는 날짜 전용
/// 레이아웃은 자정으로 간주합니다.
fn parse_timestamp(raw: &str, layout: &str) -> Result<i64, ConvertError> {
    let err = |source| ConvertError::Timestamp {
        layout: layout.to_owned(),
        source,
    };

    if layout_has_offset(layout) {
        return DateTime::parse_from_str(raw, layout)
            .map(|dt| dt.timestamp())
            .map_err(err);
    }

    match NaiveDateTime::parse_from_str(raw, layout) {
        Ok(naive) => Ok(naive.and_utc().timestamp()),
        Err(e) if e.kind() == ParseErrorKind::NotEnough => NaiveDate::parse_from_str(raw, layout)
            .map(|date| date.and_time(NaiveTime::default()).and_utc().timestamp())
            .map_err(|_| err(e)),
        Err(e) => Err(err(e)),
    }
}

/// IPv4는 그대로, IPv6는 16바이트 중 마지막 4바이트를 big-endian으로 해석합니다.
///
/// IPv4-mapped 주소(`::ffff:a.b.c.d`)는 내장된 IPv4 주소와 같은 값이 됩니다.
fn ip_to_int(addr: IpAddr) -> u32 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4),
        IpAddr::V6(v6) => {
            let o = v6.octets();
            u32::from_be_bytes([o[12], o[13], o[14], o[15]])
        }
    }
}
