//! Server-sent event framing.

use proto::LlmError;

/// Upper bound on buffered, not-yet-framed bytes.
const MAX_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Incremental SSE decoder: feed raw bytes, pull `data:` payloads.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Appends raw bytes from the response body.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<(), LlmError> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_BUFFER_BYTES {
            return Err(LlmError::InvalidResponse(
                "SSE buffer exceeded maximum size (4 MiB)".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the data payload of the next complete event, if any.
    ///
    /// Events without `data:` lines (comments, keep-alives) are skipped.
    pub(crate) fn next_payload(&mut self) -> Result<Option<String>, LlmError> {
        while let Some(raw) = drain_next_event(&mut self.buffer) {
            if raw.is_empty() {
                continue;
            }
            let event = std::str::from_utf8(&raw).map_err(|_| {
                LlmError::InvalidResponse("Received invalid UTF-8 from SSE stream".to_string())
            })?;
            if let Some(data) = event_data(event) {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    /// Returns the payload of a trailing event that lacked its blank-line terminator.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let event = String::from_utf8(rest).ok()?;
        event_data(event.trim_end())
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Joins the `data:` lines of one event.
fn event_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(buf) => {
                buf.push('\n');
                buf.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_pushes() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"data: {\"a\":").expect("push");
        assert_eq!(decoder.next_payload().expect("payload"), None);

        decoder.push(b"1}\n\ndata: second\n\n").expect("push");
        assert_eq!(
            decoder.next_payload().expect("payload").as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            decoder.next_payload().expect("payload").as_deref(),
            Some("second")
        );
        assert_eq!(decoder.next_payload().expect("payload"), None);
    }

    #[test]
    fn handles_crlf_delimiters_and_comments() {
        let mut decoder = SseDecoder::default();
        decoder
            .push(b": keep-alive\r\n\r\ndata: x\r\n\r\n")
            .expect("push");
        assert_eq!(decoder.next_payload().expect("payload").as_deref(), Some("x"));
    }

    #[test]
    fn joins_multiple_data_lines() {
        assert_eq!(
            event_data("event: message\ndata: one\ndata:two").as_deref(),
            Some("one\ntwo")
        );
        assert_eq!(event_data("event: ping"), None);
    }

    #[test]
    fn finish_returns_unterminated_trailing_event() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"data: tail\n").expect("push");
        assert_eq!(decoder.next_payload().expect("payload"), None);
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"data: \xff\xfe\n\n").expect("push");
        assert!(matches!(
            decoder.next_payload(),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn rejects_oversized_buffer() {
        let mut decoder = SseDecoder::default();
        let big = vec![b'a'; MAX_BUFFER_BYTES + 1];
        assert!(decoder.push(&big).is_err());
    }
}
