//! 수신 메시지 디코딩 -- syslog 헤더에서 규칙 매칭 대상 본문 추출
//!
//! 전송 계층(UDP/TCP)이 넘겨준 한 줄을 [`SyslogParser`]로 디코딩하여
//! [`SyslogMessage::content`]를 얻습니다.

pub mod syslog;

pub use syslog::{SyslogFormat, SyslogMessage, SyslogParser};
