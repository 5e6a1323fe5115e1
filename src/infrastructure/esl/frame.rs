//! Wire framing for the event socket
//!
//! A frame is a block of `Key: value` header lines terminated by a blank
//! line, optionally followed by a body of exactly `Content-Length` bytes.
//! Events arrive as `text/event-plain` frames whose body is itself a
//! key/value block with URL-encoded values.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;

use crate::domain::event::{EventKind, ProtocolEvent};
use crate::domain::transfer::HangupCause;

use super::error::EslError;

/// One parsed wire frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl Frame {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.header("Reply-Text")
    }

    pub fn is_event(&self) -> bool {
        self.content_type() == Some("text/event-plain")
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.content_type(), Some("command/reply") | Some("api/response"))
    }

    pub fn is_disconnect_notice(&self) -> bool {
        self.content_type() == Some("text/disconnect-notice")
    }

    /// Command result: api responses carry it in the body, command replies
    /// in Reply-Text.
    pub fn result_text(&self) -> String {
        if let Some(body) = &self.body {
            if self.content_type() == Some("api/response") {
                return body.clone();
            }
        }
        self.reply_text().unwrap_or_default().to_string()
    }
}

/// Read a single frame off the wire.
pub async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<Frame, EslError> {
    let mut headers = HashMap::new();
    let mut saw_any = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(EslError::Disconnected);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_any {
                break;
            }
            // Leading blank lines between frames are tolerated
            continue;
        }
        saw_any = true;
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let body = match headers
        .get("Content-Length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        Some(len) if len > 0 => {
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        _ => None,
    };

    Ok(Frame { headers, body })
}

/// Parse an event frame body into a typed event.
///
/// The body is a key/value block; a blank line separates it from an
/// optional payload (background-job events carry the job result there).
pub fn parse_event(frame: &Frame) -> Option<ProtocolEvent> {
    let body = frame.body.as_deref()?;
    let (header_block, payload) = match body.split_once("\n\n") {
        Some((h, p)) if !p.trim().is_empty() => (h, Some(p.trim_end().to_string())),
        _ => (body, None),
    };

    let mut headers = HashMap::new();
    for line in header_block.lines() {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), percent_decode(value.trim()));
        }
    }

    let name = headers.get("Event-Name")?.clone();
    let leg = headers.get("Unique-ID").cloned();

    Some(ProtocolEvent {
        kind: EventKind::from_name(&name),
        leg,
        headers,
        body: payload,
    })
}

/// Minimal percent-decoding for event header values.
///
/// Works on raw bytes: a malformed escape passes through untouched and can
/// never panic the reader on a multi-byte character.
pub fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = char::from(bytes[i + 1]).to_digit(16);
            let lo = char::from(bytes[i + 2]).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Extract the hangup cause from an `-ERR` command result.
///
/// Known shapes: `-ERR USER_BUSY`, `-ERR [CAUSE] detail`, with optional
/// trailing newlines.
pub fn extract_error_cause(result: &str) -> Option<HangupCause> {
    let clean = result.replace("-ERR", "");
    let clean = clean.trim().trim_start_matches('[');
    let token = clean
        .split([' ', ']', '\n'])
        .find(|t| !t.is_empty())?
        .trim();
    if token.len() < 3 {
        return None;
    }
    let token: String = token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if token.is_empty() {
        return None;
    }
    Some(token.parse().expect("hangup cause parsing is infallible"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("hello%20world"), "hello world");
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        // Malformed escapes pass through
        assert_eq!(percent_decode("50%"), "50%");
        // Including when followed by a multi-byte character
        assert_eq!(percent_decode("%a\u{e9}x"), "%a\u{e9}x");
        assert_eq!(percent_decode("\u{e9}%20\u{e9}"), "\u{e9} \u{e9}");
    }

    #[test]
    fn test_parse_event_body() {
        let frame = Frame {
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "text/event-plain".to_string(),
            )]),
            body: Some(
                "Event-Name: CHANNEL_HANGUP\nUnique-ID: abc-123\nHangup-Cause: USER_BUSY\n"
                    .to_string(),
            ),
        };

        let event = parse_event(&frame).unwrap();
        assert_eq!(event.kind, EventKind::ChannelHangup);
        assert_eq!(event.leg.as_deref(), Some("abc-123"));
        assert_eq!(event.hangup_cause(), Some(HangupCause::UserBusy));
    }

    #[test]
    fn test_parse_event_with_job_payload() {
        let frame = Frame {
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "text/event-plain".to_string(),
            )]),
            body: Some(
                "Event-Name: BACKGROUND_JOB\nJob-UUID: job-9\n\n-ERR USER_BUSY\n".to_string(),
            ),
        };

        let event = parse_event(&frame).unwrap();
        assert_eq!(event.kind, EventKind::BackgroundJob);
        assert_eq!(event.job_id(), Some("job-9"));
        assert_eq!(event.body.as_deref(), Some("-ERR USER_BUSY"));
    }

    #[test]
    fn test_parse_event_requires_name() {
        let frame = Frame {
            headers: HashMap::new(),
            body: Some("Unique-ID: abc\n".to_string()),
        };
        assert!(parse_event(&frame).is_none());
    }

    #[test]
    fn test_result_text_prefers_api_body() {
        let frame = Frame {
            headers: HashMap::from([
                ("Content-Type".to_string(), "api/response".to_string()),
                ("Content-Length".to_string(), "3".to_string()),
            ]),
            body: Some("+OK".to_string()),
        };
        assert_eq!(frame.result_text(), "+OK");

        let reply = Frame {
            headers: HashMap::from([
                ("Content-Type".to_string(), "command/reply".to_string()),
                ("Reply-Text".to_string(), "+OK accepted".to_string()),
            ]),
            body: None,
        };
        assert_eq!(reply.result_text(), "+OK accepted");
    }

    #[test]
    fn test_extract_error_cause() {
        assert_eq!(
            extract_error_cause("-ERR USER_NOT_REGISTERED\n"),
            Some(HangupCause::UserNotRegistered)
        );
        assert_eq!(
            extract_error_cause("-ERR USER_BUSY"),
            Some(HangupCause::UserBusy)
        );
        assert_eq!(
            extract_error_cause("-ERR [CALL_REJECTED] destination declined"),
            Some(HangupCause::CallRejected)
        );
        assert_eq!(extract_error_cause(""), None);
        // Unknown token still yields a cause so the mapping stays total
        assert_eq!(
            extract_error_cause("-ERR STRANGE_NEW_CAUSE"),
            Some(HangupCause::Other("STRANGE_NEW_CAUSE".to_string()))
        );
    }
}
