//! Server-Sent Events framing for upstream responses.

use futures::{Stream, StreamExt};

/// One `event:`/`data:` frame of an SSE response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    /// `data:` lines joined by `\n`.
    pub data: String,
}

/// Split an HTTP response body into SSE frames.
///
/// Frames without data (comments, keep-alives) are skipped. A trailing frame
/// without the closing blank line is still emitted at end of body.
pub(crate) fn frames(resp: reqwest::Response) -> impl Stream<Item = anyhow::Result<SseFrame>> + Send {
    let byte_stream = resp.bytes_stream();

    async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();

        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            buf.extend(chunk.iter().filter(|b| **b != b'\r'));

            while let Some(pos) = find_double_newline(&buf) {
                let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                if let Some(frame) = parse_frame(&String::from_utf8_lossy(&frame)) {
                    yield frame;
                }
            }
        }

        if let Some(frame) = parse_frame(&String::from_utf8_lossy(&buf)) {
            yield frame;
        }
    }
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines = Vec::new();

    for line in text.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            frame.event = Some(event.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_with_event() {
        let frame = parse_frame("event: message_start\ndata: {\"a\":1}\n").unwrap();
        assert_eq!(frame.event.as_deref(), Some("message_start"));
        assert_eq!(frame.data, "{\"a\":1}");
    }

    #[test]
    fn test_parse_frame_joins_data_lines() {
        let frame = parse_frame("data: one\ndata: two\n").unwrap();
        assert_eq!(frame.event, None);
        assert_eq!(frame.data, "one\ntwo");
    }

    #[test]
    fn test_comment_frame_is_skipped() {
        assert!(parse_frame(": keep-alive\n").is_none());
    }

    #[test]
    fn test_find_double_newline() {
        assert_eq!(find_double_newline(b"data: x\n\ndata: y"), Some(7));
        assert_eq!(find_double_newline(b"data: x\n"), None);
    }
}
