//! 모델 컴파일러 -- 필드 선언을 변환기 목록과 INSERT 문으로 컴파일
//!
//! 규칙마다 시작 시 한 번 [`compile`]을 호출하여 [`CompiledModel`]을 만듭니다.
//! 컴파일된 모델은 이후 변경되지 않으며, 필드 순서와 INSERT 문의 플레이스홀더
//! 순서가 항상 일치합니다.

use std::collections::{HashMap, HashSet};

use natlog_core::config::{FieldSpec, RuleConfig};
use serde_json::Value;
use tracing::debug;

use crate::error::NatlogPipelineError;
use crate::model::converter::{DEFAULT_TIMESTAMP_LAYOUT, FieldConverter, FieldValue};

/// 컴파일된 필드 (이름 + 변환기)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelField {
    /// 컬럼 이름
    pub name: String,
    /// 변환기
    pub converter: FieldConverter,
}

/// 규칙 하나에 대한 컴파일 결과
#[derive(Debug, Clone)]
pub struct CompiledModel {
    rule: String,
    table: String,
    fields: Vec<ModelField>,
    insert_statement: String,
}

impl CompiledModel {
    /// 규칙 이름
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// 적재 대상 테이블
    pub fn table(&self) -> &str {
        &self.table
    }

    /// 선언 순서대로의 필드 목록
    pub fn fields(&self) -> &[ModelField] {
        &self.fields
    }

    /// 필드 수
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// 생성된 파라미터화 INSERT 문
    pub fn insert_statement(&self) -> &str {
        &self.insert_statement
    }

    /// 레코드의 원본 필드를 선언 순서대로 변환합니다.
    ///
    /// 레코드의 필드 이름 집합이 선언과 다르거나, 하나라도 변환에 실패하면
    /// 에러를 반환합니다 (레코드 전체를 건너뜁니다).
    pub fn convert_record(
        &self,
        raw: &HashMap<String, String>,
    ) -> Result<Vec<FieldValue>, NatlogPipelineError> {
        if raw.len() != self.fields.len() {
            return Err(NatlogPipelineError::RuleValidation {
                rule: self.rule.clone(),
                reason: format!(
                    "record has {} fields, model declares {}",
                    raw.len(),
                    self.fields.len()
                ),
            });
        }

        self.fields
            .iter()
            .map(|field| {
                let value = raw.get(&field.name).ok_or_else(|| {
                    NatlogPipelineError::RuleValidation {
                        rule: self.rule.clone(),
                        reason: format!("record is missing field '{}'", field.name),
                    }
                })?;
                field
                    .converter
                    .convert(value)
                    .map_err(|e| NatlogPipelineError::Convert {
                        field: field.name.clone(),
                        value: value.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }
}

/// 규칙의 필드 선언을 컴파일합니다.
///
/// 알 수 없는 타입 태그, 잘못된 list 매핑, 식별자 규칙 위반은 모두
/// 치명적 설정 에러입니다.
pub fn compile(rule: &RuleConfig) -> Result<CompiledModel, NatlogPipelineError> {
    if !is_identifier(&rule.table, true) {
        return Err(NatlogPipelineError::RuleValidation {
            rule: rule.name.clone(),
            reason: format!("table name '{}' is not a plain identifier", rule.table),
        });
    }

    if rule.fields.is_empty() {
        return Err(NatlogPipelineError::RuleValidation {
            rule: rule.name.clone(),
            reason: "at least one field must be declared".to_owned(),
        });
    }

    let mut seen = HashSet::with_capacity(rule.fields.len());
    let mut fields = Vec::with_capacity(rule.fields.len());
    for spec in &rule.fields {
        if !is_identifier(&spec.name, false) {
            return Err(NatlogPipelineError::RuleValidation {
                rule: rule.name.clone(),
                reason: format!("field name '{}' is not a plain identifier", spec.name),
            });
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(NatlogPipelineError::RuleValidation {
                rule: rule.name.clone(),
                reason: format!("duplicate field name '{}'", spec.name),
            });
        }

        fields.push(ModelField {
            name: spec.name.clone(),
            converter: build_converter(&rule.name, spec)?,
        });
    }

    let insert_statement = insert_statement(&rule.table, &fields);
    debug!(rule = %rule.name, statement = %insert_statement, "model compiled");

    Ok(CompiledModel {
        rule: rule.name.clone(),
        table: rule.table.clone(),
        fields,
        insert_statement,
    })
}

/// 타입 태그와 옵션으로 변환기를 만듭니다.
fn build_converter(rule: &str, spec: &FieldSpec) -> Result<FieldConverter, NatlogPipelineError> {
    let option_err = |reason: &str| NatlogPipelineError::InvalidFieldOption {
        rule: rule.to_owned(),
        field: spec.name.clone(),
        reason: reason.to_owned(),
    };

    match spec.kind.as_str() {
        "string" => Ok(FieldConverter::String),
        "timestamp" => {
            let layout = match &spec.default {
                None => {
                    debug!(rule, field = %spec.name, "no timestamp layout, using default");
                    DEFAULT_TIMESTAMP_LAYOUT.to_owned()
                }
                Some(Value::String(layout)) if !layout.is_empty() => layout.clone(),
                Some(_) => return Err(option_err("timestamp 'default' must be a layout string")),
            };
            Ok(FieldConverter::Timestamp { layout })
        }
        "list" => {
            let values = list_values(rule, spec)?;
            let default = match &spec.default {
                None => None,
                Some(v) => Some(
                    v.as_i64()
                        .ok_or_else(|| option_err("list 'default' must be an integer"))?,
                ),
            };
            Ok(FieldConverter::List { values, default })
        }
        "ip2int" => Ok(FieldConverter::Ip2Int),
        "int16" => Ok(FieldConverter::Int16),
        "uint16" => Ok(FieldConverter::UInt16),
        other => Err(NatlogPipelineError::UnknownFieldType {
            rule: rule.to_owned(),
            field: spec.name.clone(),
            kind: other.to_owned(),
        }),
    }
}

/// list 필드의 `values`를 문자열 -> 정수 매핑으로 읽습니다.
fn list_values(rule: &str, spec: &FieldSpec) -> Result<HashMap<String, i64>, NatlogPipelineError> {
    let mapping_err = |reason: String| NatlogPipelineError::InvalidListMapping {
        rule: rule.to_owned(),
        field: spec.name.clone(),
        reason,
    };

    let Some(Value::Object(map)) = &spec.values else {
        return Err(mapping_err(
            "'values' must be a mapping of string keys to integer codes".to_owned(),
        ));
    };

    map.iter()
        .map(|(key, value)| {
            value
                .as_i64()
                .map(|code| (key.clone(), code))
                .ok_or_else(|| mapping_err(format!("value for key '{key}' is not an integer")))
        })
        .collect()
}

/// 컬럼 이름과 같은 수의 위치 플레이스홀더로 INSERT 문을 만듭니다.
fn insert_statement(table: &str, fields: &[ModelField]) -> String {
    let columns = fields
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; fields.len()].join(", ");
    format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})")
}

/// `[A-Za-z_][A-Za-z0-9_]*` 형식인지 확인합니다. `allow_dots`이면
/// `database.table`처럼 점으로 구분된 각 부분을 검사합니다.
fn is_identifier(name: &str, allow_dots: bool) -> bool {
    let plain = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    if allow_dots {
        name.split('.').all(plain)
    } else {
        plain(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(table: &str, fields: Vec<FieldSpec>) -> RuleConfig {
        RuleConfig {
            name: "nat".to_owned(),
            table: table.to_owned(),
            pattern: r"(\S+)".to_owned(),
            fields,
        }
    }

    #[test]
    fn compiles_every_kind_in_order() {
        let model = compile(&rule(
            "natlog.sessions",
            vec![
                FieldSpec::new("msg", "string"),
                FieldSpec::new("ts", "timestamp"),
                FieldSpec::new("proto", "list").with_values(json!({"tcp": 6, "udp": 17})),
                FieldSpec::new("src_ip", "ip2int"),
                FieldSpec::new("delta", "int16"),
                FieldSpec::new("src_port", "uint16"),
            ],
        ))
        .unwrap();

        let kinds: Vec<&str> = model.fields().iter().map(|f| f.converter.kind()).collect();
        assert_eq!(
            kinds,
            vec!["string", "timestamp", "list", "ip2int", "int16", "uint16"]
        );
        assert_eq!(model.table(), "natlog.sessions");
        assert_eq!(model.field_count(), 6);
    }

    #[test]
    fn insert_statement_lists_columns_and_placeholders() {
        let model = compile(&rule(
            "sessions",
            vec![
                FieldSpec::new("src_ip", "ip2int"),
                FieldSpec::new("src_port", "uint16"),
            ],
        ))
        .unwrap();
        assert_eq!(
            model.insert_statement(),
            "INSERT INTO sessions (src_ip, src_port) VALUES (?, ?)"
        );
    }

    #[test]
    fn timestamp_without_layout_uses_default() {
        let model = compile(&rule("t", vec![FieldSpec::new("ts", "timestamp")])).unwrap();
        assert_eq!(
            model.fields()[0].converter,
            FieldConverter::Timestamp {
                layout: DEFAULT_TIMESTAMP_LAYOUT.to_owned()
            }
        );
    }

    #[test]
    fn timestamp_with_non_string_layout_is_fatal() {
        let err = compile(&rule(
            "t",
            vec![FieldSpec::new("ts", "timestamp").with_default(json!(5))],
        ))
        .unwrap_err();
        assert!(matches!(err, NatlogPipelineError::InvalidFieldOption { .. }));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let err = compile(&rule("t", vec![FieldSpec::new("x", "float")])).unwrap_err();
        assert!(matches!(
            err,
            NatlogPipelineError::UnknownFieldType { ref kind, .. } if kind == "float"
        ));
    }

    #[test]
    fn list_without_values_is_fatal() {
        let err = compile(&rule("t", vec![FieldSpec::new("p", "list")])).unwrap_err();
        assert!(matches!(err, NatlogPipelineError::InvalidListMapping { .. }));
    }

    #[test]
    fn list_with_non_integer_value_is_fatal() {
        let err = compile(&rule(
            "t",
            vec![FieldSpec::new("p", "list").with_values(json!({"tcp": "six"}))],
        ))
        .unwrap_err();
        assert!(matches!(err, NatlogPipelineError::InvalidListMapping { .. }));

        let err = compile(&rule(
            "t",
            vec![FieldSpec::new("p", "list").with_values(json!(["tcp", "udp"]))],
        ))
        .unwrap_err();
        assert!(matches!(err, NatlogPipelineError::InvalidListMapping { .. }));
    }

    #[test]
    fn list_with_non_integer_default_is_fatal() {
        let err = compile(&rule(
            "t",
            vec![
                FieldSpec::new("p", "list")
                    .with_values(json!({"tcp": 1}))
                    .with_default(json!("zero")),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, NatlogPipelineError::InvalidFieldOption { .. }));
    }

    #[test]
    fn rejects_bad_identifiers_and_duplicates() {
        assert!(compile(&rule("t; DROP TABLE x", vec![FieldSpec::new("a", "string")])).is_err());
        assert!(compile(&rule("t", vec![FieldSpec::new("a b", "string")])).is_err());
        assert!(compile(&rule("t", vec![FieldSpec::new("1a", "string")])).is_err());
        assert!(compile(&rule(
            "t",
            vec![FieldSpec::new("a", "string"), FieldSpec::new("a", "uint16")]
        ))
        .is_err());
        assert!(compile(&rule("t", vec![])).is_err());
    }

    #[test]
    fn convert_record_in_declared_order() {
        let model = compile(&rule(
            "t",
            vec![
                FieldSpec::new("port", "uint16"),
                FieldSpec::new("ip", "ip2int"),
            ],
        ))
        .unwrap();
        let raw = HashMap::from([
            ("ip".to_owned(), "10.0.0.1".to_owned()),
            ("port".to_owned(), "443".to_owned()),
        ]);
        let values = model.convert_record(&raw).unwrap();
        assert_eq!(
            values,
            vec![FieldValue::UInt16(443), FieldValue::UInt32(0x0a00_0001)]
        );
    }

    #[test]
    fn convert_record_rejects_field_set_mismatch() {
        let model = compile(&rule("t", vec![FieldSpec::new("port", "uint16")])).unwrap();

        let extra = HashMap::from([
            ("port".to_owned(), "1".to_owned()),
            ("other".to_owned(), "2".to_owned()),
        ]);
        assert!(model.convert_record(&extra).is_err());

        let renamed = HashMap::from([("dport".to_owned(), "1".to_owned())]);
        assert!(model.convert_record(&renamed).is_err());
    }

    #[test]
    fn convert_record_reports_failing_field() {
        let model = compile(&rule("t", vec![FieldSpec::new("port", "uint16")])).unwrap();
        let raw = HashMap::from([("port".to_owned(), "99999".to_owned())]);
        let err = model.convert_record(&raw).unwrap_err();
        assert!(matches!(
            err,
            NatlogPipelineError::Convert { ref field, ref value, .. }
                if field == "port" && value == "99999"
        ));
    }
}
