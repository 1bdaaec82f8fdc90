#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use natlog_core::config::{FieldSpec, RuleConfig};
use natlog_pipeline::RuleTable;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 규칙 정규식 (최대 4개)
    patterns: Vec<String>,
    /// 선언할 필드 수 (캡처 수와 다를 수 있음)
    field_counts: Vec<u8>,
    content: String,
}

fuzz_target!(|input: FuzzInput| {
    let rules: Vec<RuleConfig> = input
        .patterns
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, pattern)| {
            let count = input.field_counts.get(i).copied().unwrap_or(1) % 8 + 1;
            RuleConfig {
                name: format!("r{i}"),
                table: format!("natlog.t{i}"),
                pattern: pattern.clone(),
                fields: (0..count)
                    .map(|f| FieldSpec::new(format!("f{f}"), "string"))
                    .collect(),
            }
        })
        .collect();

    let Ok((table, models)) = RuleTable::compile(&rules) else {
        return;
    };

    for record in table.dispatch(&input.content) {
        // 디스패치된 레코드는 항상 자기 규칙의 모델과 필드 수가 일치
        let model = &models[&record.rule];
        assert_eq!(record.field_count(), model.field_count());
        assert!(model.convert_record(&record.fields).is_ok());
    }
});
