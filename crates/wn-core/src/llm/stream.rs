//! Shared line chunker for streaming HTTP providers.
//!
//! Converts a `reqwest::Response` body into a stream of complete lines,
//! carrying partial lines across network chunks. The SSE-speaking adapters
//! keep only `data:` payloads; the NDJSON-speaking adapter parses every
//! non-empty line as a JSON value.

use futures::{Stream, StreamExt as _};

use crate::errors::AgentError;

struct LineState {
    byte_stream: std::pin::Pin<
        Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buffer: String,
    done: bool,
}

/// Split a response body into trimmed lines (CR/LF tolerant).
pub fn response_lines(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, AgentError>> + Send {
    let byte_stream = response.bytes_stream();

    futures::stream::unfold(
        LineState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if state.done {
                    return None;
                }

                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos]
                        .trim_end_matches('\r')
                        .to_string();
                    state.buffer = state.buffer[newline_pos + 1..].to_string();
                    return Some((Ok(line), state));
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(AgentError::Provider(format!("stream error: {}", e))),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                        // Flush a trailing line without a terminator.
                        if !state.buffer.is_empty() {
                            let line = std::mem::take(&mut state.buffer)
                                .trim_end_matches('\r')
                                .to_string();
                            return Some((Ok(line), state));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Extract the payload of an SSE `data:` line, if it is one.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|v| v.trim_start())
}

/// Parse one NDJSON line into a JSON value. Empty lines yield `None`.
pub fn ndjson_value(line: &str) -> Option<Result<serde_json::Value, AgentError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed)
            .map_err(|e| AgentError::Parsing(format!("invalid NDJSON line: {}", e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_data_extraction() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: message_start"), None);
        assert_eq!(sse_data(": comment"), None);
    }

    #[test]
    fn test_ndjson_value_skips_blank_lines() {
        assert!(ndjson_value("").is_none());
        assert!(ndjson_value("   ").is_none());
        let v = ndjson_value(r#"{"done":true}"#).unwrap().unwrap();
        assert_eq!(v["done"], true);
    }

    #[test]
    fn test_ndjson_value_reports_parse_errors() {
        let err = ndjson_value("{broken").unwrap().unwrap_err();
        assert!(matches!(err, AgentError::Parsing(_)));
    }
}
