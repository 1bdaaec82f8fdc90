#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use natlog_core::config::{FieldSpec, RuleConfig};
use natlog_pipeline::model::compile;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    kind: FuzzKind,
    /// timestamp 레이아웃 또는 list 기본 코드
    option: String,
    list_keys: Vec<String>,
    raw: String,
}

#[derive(Arbitrary, Debug)]
enum FuzzKind {
    String,
    Timestamp,
    List,
    Ip2Int,
    Int16,
    UInt16,
}

fuzz_target!(|input: FuzzInput| {
    let field = match input.kind {
        FuzzKind::String => FieldSpec::new("f", "string"),
        FuzzKind::Timestamp => {
            FieldSpec::new("f", "timestamp").with_default(serde_json::json!(input.option))
        }
        FuzzKind::List => {
            let values: serde_json::Map<String, serde_json::Value> = input
                .list_keys
                .iter()
                .take(16)
                .enumerate()
                .map(|(i, k)| (k.clone(), serde_json::json!(i)))
                .collect();
            FieldSpec::new("f", "list").with_values(serde_json::Value::Object(values))
        }
        FuzzKind::Ip2Int => FieldSpec::new("f", "ip2int"),
        FuzzKind::Int16 => FieldSpec::new("f", "int16"),
        FuzzKind::UInt16 => FieldSpec::new("f", "uint16"),
    };

    let rule = RuleConfig {
        name: "fuzz".to_owned(),
        table: "natlog.fuzz".to_owned(),
        pattern: "(.*)".to_owned(),
        fields: vec![field],
    };

    // 컴파일 실패는 설정 에러일 뿐 크래시가 아님
    let Ok(model) = compile(&rule) else {
        return;
    };

    let converter = &model.fields()[0].converter;
    let first = converter.convert(&input.raw);
    let second = converter.convert(&input.raw);

    // 변환은 결정적이어야 함
    match (first, second) {
        (Ok(a), Ok(b)) => assert_eq!(a, b),
        (Err(_), Err(_)) => {}
        _ => panic!("converter is not deterministic"),
    }
});
