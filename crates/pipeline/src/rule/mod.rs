//! 규칙 테이블 -- 정규식 기반 필드 추출 및 디스패치
//!
//! 설정된 규칙을 시작 시 한 번 컴파일하고, 수신된 메시지 본문을 **모든**
//! 규칙에 대해 평가합니다. 한 줄이 여러 규칙에 매칭되면 규칙마다 독립적인
//! [`StructuredRecord`]가 만들어집니다.
//!
//! # 규칙 형식
//! ```yaml
//! name: srx_nat_session
//! table: natlog.sessions
//! pattern: 'session created (\S+)/(\d+)->'
//! fields:
//!   - { name: src_ip, type: ip2int }
//!   - { name: src_port, type: uint16 }
//! ```
//!
//! # 아키텍처
//! - [`RuleTable`]: 컴파일된 규칙 집합과 디스패치
//! - [`loader`]: YAML 규칙 파일 로딩
//! - [`types`]: 규칙/레코드 데이터 구조 정의

pub mod loader;
pub mod types;

pub use loader::RuleLoader;
pub use types::{Rule, StructuredRecord};

use std::collections::{HashMap, HashSet};

use metrics::counter;
use natlog_core::config::RuleConfig;
use natlog_core::metrics as m;
use regex::RegexBuilder;
use tracing::{debug, warn};

use crate::error::NatlogPipelineError;
use crate::model::{CompiledModel, compile};

/// 정규식 컴파일 크기 제한 (병적인 패턴 방지)
const MAX_REGEX_SIZE: usize = 10 * 1024 * 1024;

/// 규칙 테이블 -- 컴파일된 규칙 집합
///
/// # 사용 예시
/// ```ignore
/// let (table, models) = RuleTable::compile(&config.rules)?;
/// for record in table.dispatch("RT_FLOW_SESSION_CREATE: ...") {
///     ingest.send(record).await?;
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// 규칙 선언을 컴파일합니다.
    ///
    /// 규칙 테이블과 규칙 이름 -> [`CompiledModel`] 레지스트리를 함께 반환합니다.
    /// 레지스트리는 배치 엔진이 소유합니다.
    ///
    /// # Errors
    /// 규칙 이름 중복, 모델 컴파일 실패, 정규식 컴파일 실패는 모두 치명적입니다.
    pub fn compile(
        configs: &[RuleConfig],
    ) -> Result<(Self, HashMap<String, CompiledModel>), NatlogPipelineError> {
        let mut seen = HashSet::with_capacity(configs.len());
        let mut rules = Vec::with_capacity(configs.len());
        let mut models = HashMap::with_capacity(configs.len());

        for config in configs {
            if config.name.is_empty() {
                return Err(NatlogPipelineError::RuleValidation {
                    rule: "(empty)".to_owned(),
                    reason: "rule name must not be empty".to_owned(),
                });
            }
            if !seen.insert(config.name.as_str()) {
                return Err(NatlogPipelineError::RuleValidation {
                    rule: config.name.clone(),
                    reason: "duplicate rule name".to_owned(),
                });
            }

            let model = compile(config)?;
            let pattern = RegexBuilder::new(&config.pattern)
                .size_limit(MAX_REGEX_SIZE)
                .build()
                .map_err(|source| NatlogPipelineError::Pattern {
                    rule: config.name.clone(),
                    source,
                })?;

            let rule = Rule {
                name: config.name.clone(),
                table: config.table.clone(),
                pattern,
                field_names: model.fields().iter().map(|f| f.name.clone()).collect(),
            };

            if rule.capture_count() != rule.field_names.len() {
                warn!(
                    rule = %rule.name,
                    rule_fields_num = rule.field_names.len(),
                    regexp_groups = rule.capture_count(),
                    "capture group count differs from declared fields, matches will be dropped"
                );
            }

            debug!(rule = %rule.name, table = %rule.table, "rule compiled");
            models.insert(rule.name.clone(), model);
            rules.push(rule);
        }

        Ok((Self { rules }, models))
    }

    /// 로드된 규칙 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 규칙이 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 선언 순서대로의 규칙 목록
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// 메시지 본문을 모든 규칙에 대해 평가합니다.
    ///
    /// 규칙 정규식의 겹치지 않는 모든 매치가 각각 레코드 후보가 됩니다.
    /// 캡처 그룹 수가 선언된 필드 수와 다르면 해당 매치만 버립니다.
    /// 참여하지 않은 선택적 그룹은 빈 문자열이 됩니다.
    pub fn dispatch(&self, content: &str) -> Vec<StructuredRecord> {
        let mut records = Vec::new();

        for rule in &self.rules {
            let cols = rule.field_names.len();

            for caps in rule.pattern.captures_iter(content) {
                let groups = caps.len() - 1;
                if groups != cols {
                    warn!(
                        rule = %rule.name,
                        rule_fields_num = cols,
                        regexp_results = groups,
                        "fields count mismatch in regexp and in fields definition"
                    );
                    counter!(m::LISTENER_MISMATCHES_TOTAL, m::LABEL_RULE => rule.name.clone())
                        .increment(1);
                    continue;
                }

                let fields = rule
                    .field_names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let value = caps.get(i + 1).map_or("", |g| g.as_str());
                        (name.clone(), value.to_owned())
                    })
                    .collect();

                records.push(StructuredRecord::new(rule.name.clone(), fields));
            }
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natlog_core::config::FieldSpec;

    fn rule(name: &str, pattern: &str, fields: &[(&str, &str)]) -> RuleConfig {
        RuleConfig {
            name: name.to_owned(),
            table: format!("{name}_table"),
            pattern: pattern.to_owned(),
            fields: fields
                .iter()
                .map(|(n, k)| FieldSpec::new(*n, *k))
                .collect(),
        }
    }

    #[test]
    fn compile_builds_rules_and_models() {
        let (table, models) = RuleTable::compile(&[
            rule("a", r"src=(\S+)", &[("src", "string")]),
            rule("b", r"port=(\d+)", &[("port", "uint16")]),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(models.len(), 2);
        assert_eq!(models["b"].table(), "b_table");
        assert_eq!(table.rules()[0].name, "a");
    }

    #[test]
    fn compile_rejects_invalid_pattern() {
        let err = RuleTable::compile(&[rule("a", r"(unclosed", &[("x", "string")])]).unwrap_err();
        assert!(matches!(err, NatlogPipelineError::Pattern { .. }));
    }

    #[test]
    fn compile_rejects_duplicate_names() {
        let err = RuleTable::compile(&[
            rule("a", r"(\d)", &[("x", "string")]),
            rule("a", r"(\w)", &[("y", "string")]),
        ])
        .unwrap_err();
        assert!(matches!(err, NatlogPipelineError::RuleValidation { .. }));
    }

    #[test]
    fn compile_propagates_model_errors() {
        let err = RuleTable::compile(&[rule("a", r"(\d)", &[("x", "double")])]).unwrap_err();
        assert!(matches!(err, NatlogPipelineError::UnknownFieldType { .. }));
    }

    #[test]
    fn dispatch_maps_groups_by_declared_order() {
        let (table, _) = RuleTable::compile(&[rule(
            "nat",
            r"(\S+)/(\d+)->(\S+)/(\d+)",
            &[
                ("src_ip", "ip2int"),
                ("src_port", "uint16"),
                ("dst_ip", "ip2int"),
                ("dst_port", "uint16"),
            ],
        )])
        .unwrap();

        let records = table.dispatch("session created 10.0.0.1/5000->8.8.8.8/53 junos-dns");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.rule, "nat");
        assert_eq!(r.fields["src_ip"], "10.0.0.1");
        assert_eq!(r.fields["src_port"], "5000");
        assert_eq!(r.fields["dst_ip"], "8.8.8.8");
        assert_eq!(r.fields["dst_port"], "53");
    }

    #[test]
    fn dispatch_line_matching_two_rules_yields_two_records() {
        let (table, _) = RuleTable::compile(&[
            rule("src", r"src=(\S+)", &[("ip", "ip2int")]),
            rule("dst", r"dst=(\S+)", &[("ip", "ip2int")]),
        ])
        .unwrap();

        let records = table.dispatch("src=10.0.0.1 dst=10.0.0.2");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rule, "src");
        assert_eq!(records[0].fields["ip"], "10.0.0.1");
        assert_eq!(records[1].rule, "dst");
        assert_eq!(records[1].fields["ip"], "10.0.0.2");
    }

    #[test]
    fn dispatch_every_match_yields_a_record() {
        let (table, _) =
            RuleTable::compile(&[rule("port", r"port=(\d+)", &[("port", "uint16")])]).unwrap();
        let records = table.dispatch("port=1 port=2 port=3");
        let ports: Vec<&str> = records.iter().map(|r| r.fields["port"].as_str()).collect();
        assert_eq!(ports, vec!["1", "2", "3"]);
    }

    #[test]
    fn dispatch_capture_count_mismatch_produces_no_record() {
        // 그룹 2개, 필드 1개
        let (table, _) =
            RuleTable::compile(&[rule("bad", r"(\w+)=(\w+)", &[("key", "string")])]).unwrap();
        assert!(table.dispatch("a=b").is_empty());
    }

    #[test]
    fn dispatch_non_participating_group_is_empty_string() {
        let (table, _) = RuleTable::compile(&[rule(
            "opt",
            r"user=(\w+)(?: uid=(\d+))?",
            &[("user", "string"), ("uid", "string")],
        )])
        .unwrap();
        let records = table.dispatch("user=root");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["uid"], "");
    }

    #[test]
    fn dispatch_no_match_is_empty() {
        let (table, _) =
            RuleTable::compile(&[rule("a", r"port=(\d+)", &[("port", "uint16")])]).unwrap();
        assert!(table.dispatch("nothing to see").is_empty());
    }
}
