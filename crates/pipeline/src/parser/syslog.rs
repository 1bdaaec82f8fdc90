//! Syslog 헤더 디코더 (RFC 5424 / RFC 3164)
//!
//! 수신된 한 줄에서 syslog 헤더를 벗겨내고 규칙 매칭에 사용할 본문(`content`)을
//! 꺼냅니다. 형식은 자동 판별합니다.
//!
//! # 판별 규칙
//! - `<PRI>1 ...` -> RFC 5424
//! - `<PRI>...` -> RFC 3164 (BSD)
//! - PRI가 없거나 잘못된 줄 -> 헤더 없는 본문으로 간주
//!
//! RFC 5424 메시지의 MSG 부분이 비어 있으면(`-` 구조화 데이터로 끝나는 경우 등)
//! `content`는 `None`이 되며, 리스너는 이를 치명적 에러로 취급합니다.
//!
//! # 사용 예시
//! ```ignore
//! use natlog_pipeline::parser::SyslogParser;
//!
//! let parser = SyslogParser::new();
//! let msg = parser.parse(b"<134>Jan 15 12:00:00 srx RT_FLOW: session created ...");
//! assert_eq!(msg.content.as_deref(), Some("session created ..."));
//! ```

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Utc};

/// RFC 5424에서 유효한 최대 PRI 값
/// facility 최댓값 23 * 8 + severity 최댓값 7 = 191
const MAX_SYSLOG_PRI: u8 = 191;

/// RFC 3164 TAG 최대 길이 (`[pid]` 포함 여유분)
const MAX_TAG_LEN: usize = 64;

/// 디코딩된 syslog 메시지 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFormat {
    /// RFC 5424
    Rfc5424,
    /// RFC 3164 (BSD)
    Rfc3164,
    /// syslog 헤더 없음
    Bare,
}

/// 디코딩된 syslog 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    /// 판별된 형식
    pub format: SyslogFormat,
    /// facility (PRI / 8)
    pub facility: Option<u8>,
    /// severity (PRI % 8)
    pub severity: Option<u8>,
    /// 헤더 타임스탬프
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// 호스트 이름
    pub hostname: String,
    /// APP-NAME (5424) 또는 TAG (3164)
    pub app_name: String,
    /// PROCID
    pub proc_id: String,
    /// MSGID
    pub msg_id: String,
    /// 구조화 데이터 (`sd_{id}_{param}` -> value)
    pub structured_data: Vec<(String, String)>,
    /// 규칙 매칭 대상 본문
    pub content: Option<String>,
}

impl SyslogMessage {
    fn bare(content: &str) -> Self {
        Self {
            format: SyslogFormat::Bare,
            facility: None,
            severity: None,
            timestamp: None,
            hostname: String::new(),
            app_name: String::new(),
            proc_id: String::new(),
            msg_id: String::new(),
            structured_data: Vec::new(),
            content: Some(content.to_owned()),
        }
    }
}

/// Syslog 헤더 디코더
///
/// ## 지원 기능
/// - PRI 필드에서 facility/severity 디코딩
/// - RFC 3339 / BSD 타임스탬프 파싱 (실패 시 `None`)
/// - Structured Data (SD) 추출
/// - NILVALUE (`-`) 처리
pub struct SyslogParser {
    /// 최대 디코딩 입력 크기 (바이트), 초과분은 잘라냅니다
    max_input_size: usize,
}

impl SyslogParser {
    /// 기본 설정으로 새 파서를 생성합니다.
    pub fn new() -> Self {
        Self {
            max_input_size: 64 * 1024, // 64KB
        }
    }

    /// 최대 입력 크기를 설정합니다.
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    /// PRI 값에서 facility와 severity를 분리합니다.
    ///
    /// PRI = facility * 8 + severity
    fn decode_pri(pri: u8) -> (u8, u8) {
        (pri / 8, pri % 8)
    }

    /// 원시 syslog 줄을 디코딩합니다. 실패하지 않습니다.
    pub fn parse(&self, raw: &[u8]) -> SyslogMessage {
        let raw = &raw[..raw.len().min(self.max_input_size)];
        let input = String::from_utf8_lossy(raw);
        let input = input.trim_end_matches(['\r', '\n', '\0']);

        let Some((pri, remainder)) = Self::split_pri(input) else {
            return SyslogMessage::bare(input);
        };
        let (facility, severity) = Self::decode_pri(pri);

        let mut msg = match remainder.strip_prefix("1 ") {
            Some(body) => match Self::parse_rfc5424_body(body) {
                Some(msg) => msg,
                None => Self::parse_rfc3164_body(remainder),
            },
            None => Self::parse_rfc3164_body(remainder),
        };
        msg.facility = Some(facility);
        msg.severity = Some(severity);
        msg
    }

    /// `<NNN>` PRI를 분리합니다. 유효하지 않으면 `None`을 반환합니다.
    fn split_pri(input: &str) -> Option<(u8, &str)> {
        let rest = input.strip_prefix('<')?;
        let end = rest.find('>')?;
        let pri_str = &rest[..end];
        if pri_str.is_empty() || pri_str.len() > 3 || !pri_str.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let pri: u8 = pri_str.parse().ok()?;
        if pri > MAX_SYSLOG_PRI {
            return None;
        }
        Some((pri, &rest[end + 1..]))
    }

    /// RFC 5424 메시지 본문을 파싱합니다.
    ///
    /// 형식: `TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA [MSG]`
    /// 헤더 토큰이 부족하면 `None`을 반환합니다.
    fn parse_rfc5424_body(body: &str) -> Option<SyslogMessage> {
        let parts: Vec<&str> = body.splitn(6, ' ').collect();
        if parts.len() < 6 {
            return None;
        }

        let timestamp_str = Self::nilvalue_to_empty(parts[0]);
        let timestamp = if timestamp_str.is_empty() {
            None
        } else {
            DateTime::parse_from_rfc3339(timestamp_str).ok()
        };

        let sd_and_msg = parts[5];
        let (structured_data, content) = if sd_and_msg.starts_with('[') {
            let (sd_part, msg_part) = Self::split_sd_and_message(sd_and_msg);
            let sd = Self::parse_structured_data(sd_part).unwrap_or_default();
            (sd, msg_part.map(str::to_owned))
        } else if let Some(msg) = sd_and_msg.strip_prefix("- ") {
            (Vec::new(), Some(msg.to_owned()))
        } else if sd_and_msg == "-" {
            // NILVALUE SD, MSG 없음
            (Vec::new(), None)
        } else {
            (Vec::new(), Some(sd_and_msg.to_owned()))
        };

        Some(SyslogMessage {
            format: SyslogFormat::Rfc5424,
            facility: None,
            severity: None,
            timestamp,
            hostname: Self::nilvalue_to_empty(parts[1]).to_owned(),
            app_name: Self::nilvalue_to_empty(parts[2]).to_owned(),
            proc_id: Self::nilvalue_to_empty(parts[3]).to_owned(),
            msg_id: Self::nilvalue_to_empty(parts[4]).to_owned(),
            structured_data,
            content: content.map(|c| c.trim_start_matches('\u{feff}').to_owned()),
        })
    }

    /// RFC 3164 (BSD syslog) 메시지 본문을 최선 노력으로 파싱합니다.
    ///
    /// 형식: `MMM DD HH:MM:SS hostname tag: message`
    /// 타임스탬프를 인식하지 못하면 PRI 이후 전체를 본문으로 간주합니다.
    fn parse_rfc3164_body(body: &str) -> SyslogMessage {
        let mut msg = SyslogMessage::bare(body);
        msg.format = SyslogFormat::Rfc3164;

        // "Jan  5" 처럼 일(day)이 공백으로 패딩된 경우를 허용합니다.
        if body.len() < 16 || !body.is_char_boundary(15) {
            return msg;
        }
        let Some(timestamp) = Self::parse_bsd_timestamp(&body[..15]) else {
            return msg;
        };
        msg.timestamp = Some(timestamp);

        let remainder = body[15..].trim_start();
        let Some((hostname, tag_and_msg)) = remainder.split_once(' ') else {
            msg.content = Some(remainder.to_owned());
            return msg;
        };
        msg.hostname = hostname.to_owned();

        // tag는 공백 없는 ':' 앞 토큰
        match tag_and_msg.split_once(':') {
            Some((tag, rest)) if !tag.is_empty() && tag.len() <= MAX_TAG_LEN && !tag.contains(' ') => {
                let (app, pid) = match tag.split_once('[') {
                    Some((app, pid)) => (app, pid.trim_end_matches(']')),
                    None => (tag, ""),
                };
                msg.app_name = app.to_owned();
                msg.proc_id = pid.to_owned();
                msg.content = Some(rest.trim_start().to_owned());
            }
            _ => msg.content = Some(tag_and_msg.to_owned()),
        }
        msg
    }

    /// NILVALUE (`-`)를 빈 문자열로 변환합니다.
    fn nilvalue_to_empty(value: &str) -> &str {
        if value == "-" { "" } else { value }
    }

    /// BSD syslog 타임스탬프를 파싱합니다.
    ///
    /// 형식: `MMM DD HH:MM:SS` (예: `Jan 15 12:00:00`)
    /// 연도 정보가 없으므로 현재 연도를 가정하고 UTC로 해석합니다.
    fn parse_bsd_timestamp(timestamp: &str) -> Option<DateTime<FixedOffset>> {
        let current_year = Utc::now().year();
        let timestamp_with_year = format!("{} {}", current_year, timestamp);

        NaiveDateTime::parse_from_str(&timestamp_with_year, "%Y %b %e %H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc().fixed_offset())
    }

    /// Structured Data 부분과 메시지 부분을 분리합니다.
    ///
    /// SD는 하나 이상의 `[...]` 블록으로 구성되며, 그 이후가 메시지입니다.
    /// 메시지가 없으면 두 번째 값은 `None`입니다.
    fn split_sd_and_message(input: &str) -> (&str, Option<&str>) {
        let mut depth = 0usize;
        let mut in_quote = false;
        let mut escaped = false;
        let mut sd_end = None;

        for (idx, ch) in input.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }

            match ch {
                '\\' if in_quote => escaped = true,
                '"' => in_quote = !in_quote,
                '[' if !in_quote => depth += 1,
                ']' if !in_quote => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        sd_end = Some(idx + 1);
                        // 연속된 SD 요소는 계속 SD에 포함
                        if !input[idx + 1..].starts_with('[') {
                            break;
                        }
                    }
                }
                _ => {}
            }
        }

        // 닫히지 않은 SD가 있으면 전체를 SD로 간주
        let Some(end) = sd_end.filter(|_| depth == 0) else {
            return (input, None);
        };

        let rest = &input[end..];
        match rest.strip_prefix(' ') {
            Some(msg) => (&input[..end], Some(msg)),
            None => (&input[..end], None),
        }
    }

    /// RFC 5424 Structured Data를 파싱합니다.
    ///
    /// 형식: `[sd-id param1="value1" param2="value2"][sd-id2 ...]`
    /// 추출된 파라미터는 `sd_{id}_{param}` 형식의 키로 반환됩니다.
    fn parse_structured_data(sd: &str) -> Option<Vec<(String, String)>> {
        let mut fields = Vec::new();
        let mut chars = sd.chars().peekable();

        while chars.peek().is_some() {
            if chars.next() != Some('[') {
                break;
            }

            // SD-ID 추출 (']' 또는 ' ' 전까지)
            let mut sd_id = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == ']' || ch == ' ' {
                    break;
                }
                sd_id.push(ch);
                chars.next();
            }

            if sd_id.is_empty() {
                return None;
            }

            while let Some(&ch) = chars.peek() {
                if ch == ']' {
                    chars.next();
                    break;
                }

                if ch == ' ' {
                    chars.next();
                    continue;
                }

                let mut param_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '=' {
                        break;
                    }
                    param_name.push(ch);
                    chars.next();
                }

                if chars.next() != Some('=') || chars.next() != Some('"') {
                    return None;
                }

                // value 추출 (closing quote 전까지, escape 처리)
                let mut param_value = String::new();
                let mut escaped = false;
                for ch in chars.by_ref() {
                    if escaped {
                        param_value.push(ch);
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == '"' {
                        break;
                    } else {
                        param_value.push(ch);
                    }
                }

                fields.push((format!("sd_{}_{}", sd_id, param_name), param_value));
            }
        }

        Some(fields)
    }
}

impl Default for SyslogParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> SyslogMessage {
        SyslogParser::new().parse(raw.as_bytes())
    }

    #[test]
    fn decode_pri() {
        assert_eq!(SyslogParser::decode_pri(134), (16, 6));
        assert_eq!(SyslogParser::decode_pri(0), (0, 0));
        assert_eq!(SyslogParser::decode_pri(191), (23, 7));
    }

    #[test]
    fn parse_rfc3164_with_tag() {
        let msg = parse(
            "<134>Jan 15 12:00:00 srx-edge RT_FLOW: RT_FLOW_SESSION_CREATE: session created 10.0.0.1/5000->8.8.8.8/53",
        );
        assert_eq!(msg.format, SyslogFormat::Rfc3164);
        assert_eq!(msg.facility, Some(16));
        assert_eq!(msg.severity, Some(6));
        assert_eq!(msg.hostname, "srx-edge");
        assert_eq!(msg.app_name, "RT_FLOW");
        assert_eq!(
            msg.content.as_deref(),
            Some("RT_FLOW_SESSION_CREATE: session created 10.0.0.1/5000->8.8.8.8/53")
        );
        assert!(msg.timestamp.is_some());
    }

    #[test]
    fn parse_rfc3164_with_pid() {
        let msg = parse("<13>Feb  5 09:01:02 host natd[4242]: PBA ALLOC 10.0.0.1");
        assert_eq!(msg.app_name, "natd");
        assert_eq!(msg.proc_id, "4242");
        assert_eq!(msg.content.as_deref(), Some("PBA ALLOC 10.0.0.1"));
    }

    #[test]
    fn parse_rfc3164_without_tag_keeps_colons_in_content() {
        let msg = parse("<13>Jan 15 12:00:00 host session 2001:db8::1/80 closed");
        assert_eq!(msg.hostname, "host");
        assert_eq!(msg.content.as_deref(), Some("session 2001:db8::1/80 closed"));
    }

    #[test]
    fn parse_rfc3164_without_timestamp_uses_whole_body() {
        let msg = parse("<13>just a message");
        assert_eq!(msg.format, SyslogFormat::Rfc3164);
        assert!(msg.timestamp.is_none());
        assert_eq!(msg.content.as_deref(), Some("just a message"));
    }

    #[test]
    fn parse_rfc5424_basic() {
        let msg = parse("<34>1 2024-01-15T12:00:00Z host sshd 1234 ID47 - Failed password");
        assert_eq!(msg.format, SyslogFormat::Rfc5424);
        assert_eq!(msg.hostname, "host");
        assert_eq!(msg.app_name, "sshd");
        assert_eq!(msg.proc_id, "1234");
        assert_eq!(msg.msg_id, "ID47");
        assert_eq!(msg.content.as_deref(), Some("Failed password"));
        assert_eq!(
            msg.timestamp.map(|t| t.timestamp()),
            Some(1_705_320_000)
        );
    }

    #[test]
    fn parse_rfc5424_with_structured_data() {
        let msg = parse(
            r#"<165>1 2024-01-15T12:00:00.123+09:00 host app - - [exampleSDID@32473 iut="3" eventSource="App"][meta seq="1"] body text"#,
        );
        assert_eq!(msg.content.as_deref(), Some("body text"));
        assert!(
            msg.structured_data
                .contains(&("sd_exampleSDID@32473_iut".to_owned(), "3".to_owned()))
        );
        assert!(
            msg.structured_data
                .contains(&("sd_meta_seq".to_owned(), "1".to_owned()))
        );
    }

    #[test]
    fn parse_rfc5424_without_msg_has_no_content() {
        let msg = parse("<14>1 2024-01-15T12:00:00Z host app - - -");
        assert_eq!(msg.format, SyslogFormat::Rfc5424);
        assert!(msg.content.is_none());

        let msg = parse(r#"<14>1 2024-01-15T12:00:00Z host app - - [a b="c"]"#);
        assert!(msg.content.is_none());
    }

    #[test]
    fn parse_rfc5424_nilvalue_fields() {
        let msg = parse("<14>1 - - - - - - msg");
        assert!(msg.timestamp.is_none());
        assert!(msg.hostname.is_empty());
        assert!(msg.app_name.is_empty());
        assert_eq!(msg.content.as_deref(), Some("msg"));
    }

    #[test]
    fn parse_rfc5424_strips_bom() {
        let msg = parse("<14>1 - host app - - - \u{feff}hello");
        assert_eq!(msg.content.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_truncated_rfc5424_falls_back_to_bsd() {
        let msg = parse("<14>1 2024-01-15T12:00:00Z host");
        assert_eq!(msg.format, SyslogFormat::Rfc3164);
        assert_eq!(msg.content.as_deref(), Some("1 2024-01-15T12:00:00Z host"));
    }

    #[test]
    fn line_without_pri_is_bare_content() {
        let msg = parse("RT_FLOW_SESSION_CREATE: session created\r\n");
        assert_eq!(msg.format, SyslogFormat::Bare);
        assert!(msg.facility.is_none());
        assert_eq!(msg.content.as_deref(), Some("RT_FLOW_SESSION_CREATE: session created"));
    }

    #[test]
    fn invalid_pri_is_bare_content() {
        for raw in ["<192>x", "<>x", "<-1>x", "<abc>x", "<1234>x", "<13"] {
            let msg = parse(raw);
            assert_eq!(msg.format, SyslogFormat::Bare, "{raw}");
            assert_eq!(msg.content.as_deref(), Some(raw));
        }
    }

    #[test]
    fn pri_boundary_191() {
        let msg = parse("<191>Jan 15 12:00:00 host app: x");
        assert_eq!(msg.facility, Some(23));
        assert_eq!(msg.severity, Some(7));
    }

    #[test]
    fn input_is_truncated_to_max_size() {
        let parser = SyslogParser::new().with_max_input_size(8);
        let msg = parser.parse(b"0123456789");
        assert_eq!(msg.content.as_deref(), Some("01234567"));
    }

    #[test]
    fn non_utf8_input_is_lossy() {
        let msg = SyslogParser::new().parse(b"<13>\xff\xfe body");
        assert!(msg.content.is_some());
    }

    #[test]
    fn unicode_before_structured_data_end() {
        let msg = parse(r#"<14>1 - h a - - [x k="é]"] ü"#);
        assert_eq!(msg.content.as_deref(), Some("ü"));
    }

    #[test]
    fn unclosed_structured_data_has_no_content() {
        let msg = parse(r#"<14>1 - h a - - [x k="v" tail"#);
        assert!(msg.content.is_none());
    }

    // Property-based tests using proptest
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_bytes_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..1000)) {
                let _ = SyslogParser::new().parse(&bytes);
            }

            #[test]
            fn bsd_message_content_survives(body in "[a-zA-Z0-9 ./>-]{1,200}") {
                let raw = format!("<134>Jan 15 12:00:00 host app: {}", body);
                let msg = SyslogParser::new().parse(raw.as_bytes());
                let expected = body.trim_start().to_owned();
                prop_assert_eq!(msg.content, Some(expected));
            }

            #[test]
            fn valid_priority_range_decodes(pri in 0u8..=191) {
                let raw = format!("<{}>1 2024-01-15T12:00:00Z host app - - - msg", pri);
                let msg = SyslogParser::new().parse(raw.as_bytes());
                prop_assert_eq!(msg.facility, Some(pri / 8));
                prop_assert_eq!(msg.content.as_deref(), Some("msg"));
            }
        }
    }
}
