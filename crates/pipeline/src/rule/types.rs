//! 규칙 데이터 타입
//!
//! 컴파일된 규칙([`Rule`])과 규칙 매칭 결과인 구조화 레코드([`StructuredRecord`])를
//! 정의합니다.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

/// 컴파일된 추출 규칙
///
/// 정규식과 선언 순서대로의 필드 이름을 보관합니다. 시작 시 한 번 만들어지며
/// 이후 변경되지 않습니다.
#[derive(Debug, Clone)]
pub struct Rule {
    /// 규칙 이름 (배치 라우팅 키)
    pub name: String,
    /// 적재 대상 테이블
    pub table: String,
    /// 캡처 그룹을 가진 정규식
    pub pattern: Regex,
    /// 필드 이름 (캡처 그룹 순서)
    pub field_names: Vec<String>,
}

impl Rule {
    /// 정규식의 캡처 그룹 수 (전체 매치 제외)
    pub fn capture_count(&self) -> usize {
        self.pattern.captures_len().saturating_sub(1)
    }
}

/// 구조화 레코드 -- 매칭되어 필드가 추출되었지만 아직 변환되지 않은 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredRecord {
    /// 규칙 이름
    pub rule: String,
    /// 필드 이름 -> 원본 문자열
    pub fields: HashMap<String, String>,
}

impl StructuredRecord {
    /// 새 레코드를 생성합니다.
    pub fn new(rule: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            rule: rule.into(),
            fields,
        }
    }

    /// 레코드의 필드 수 (배치 크기 계산에 사용)
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}
