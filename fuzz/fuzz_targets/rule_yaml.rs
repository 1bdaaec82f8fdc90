#![no_main]

use libfuzzer_sys::fuzz_target;
use natlog_pipeline::{RuleLoader, RuleTable};

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        if let Ok(rules) = RuleLoader::parse_yaml(content, "fuzz.yml") {
            let _ = RuleTable::compile(&rules);
        }
    }
});
