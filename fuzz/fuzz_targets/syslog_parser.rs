#![no_main]

use libfuzzer_sys::fuzz_target;
use natlog_pipeline::SyslogParser;

fuzz_target!(|data: &[u8]| {
    let parser = SyslogParser::new();
    let message = parser.parse(data);
    if let Some(content) = &message.content {
        // content는 입력을 넘어설 수 없음
        assert!(content.len() <= data.len() * 3);
    }
});
