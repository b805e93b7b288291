//! Listener wire codec
//!
//! The listen endpoint streams server-sent event frames:
//! ```text
//! event: mutation
//! data: {"documentId":"movie","transactionId":"tx", ...}
//!
//! ```
//! Comment lines (starting with `:`) are keep-alives and ignored.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{MutationEvent, ServerEvent};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// Maximum size of buffered, not yet decoded input (1MB)
const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WelcomeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    listener_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Incremental decoder for the listener event stream
pub struct SseDecoder {
    buffer: BytesMut,
    event_type: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            event_type: None,
            data: Vec::new(),
        }
    }

    /// Add data to the decoder buffer
    pub fn feed(&mut self, data: &[u8]) -> ProtocolResult<()> {
        if self.buffer.len() + data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: self.buffer.len() + data.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Try to decode the next complete event from the buffer
    pub fn decode(&mut self) -> ProtocolResult<Option<ServerEvent>> {
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_len = if line_end > 0 && self.buffer[line_end - 1] == b'\r' {
                line_end - 1
            } else {
                line_end
            };
            let line = String::from_utf8_lossy(&self.buffer[..line_len]).to_string();
            self.buffer.advance(line_end + 1);

            if line.is_empty() {
                if let Some(event) = self.dispatch()? {
                    return Ok(Some(event));
                }
                continue;
            }
            self.field(&line);
        }
        Ok(None)
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id` and `retry` carry no meaning for a pair listener
            _ => {}
        }
    }

    /// Turn the accumulated fields into an event; blank frames yield nothing
    fn dispatch(&mut self) -> ProtocolResult<Option<ServerEvent>> {
        let event_type = self.event_type.take();
        let data = std::mem::take(&mut self.data).join("\n");

        let Some(event_type) = event_type else {
            if data.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::InvalidEvent("data without event type".into()));
        };

        match event_type.as_str() {
            "welcome" => {
                let welcome: WelcomeData = parse_data(&data)?.unwrap_or_default();
                Ok(Some(ServerEvent::Welcome {
                    listener_name: welcome.listener_name,
                }))
            }
            "reconnect" => Ok(Some(ServerEvent::Reconnect)),
            "mutation" => {
                let mutation: MutationEvent = parse_data(&data)?
                    .ok_or_else(|| ProtocolError::InvalidEvent("mutation without data".into()))?;
                Ok(Some(ServerEvent::Mutation(mutation)))
            }
            "channelError" | "disconnect" => {
                let info: ErrorData = parse_data(&data)?.unwrap_or_default();
                let message = info
                    .message
                    .or(info.reason)
                    .unwrap_or_else(|| event_type.clone());
                Err(ProtocolError::ChannelError(message))
            }
            other => Err(ProtocolError::UnknownEventType(other.to_string())),
        }
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_data<T: for<'de> Deserialize<'de>>(data: &str) -> ProtocolResult<Option<T>> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(data)
        .map(Some)
        .map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

/// Encode a server event as one wire frame
pub fn encode_event(event: &ServerEvent) -> ProtocolResult<String> {
    let data = match event {
        ServerEvent::Welcome { listener_name } => serde_json::to_string(&WelcomeData {
            listener_name: listener_name.clone(),
        }),
        ServerEvent::Reconnect => Ok("{}".to_string()),
        ServerEvent::Mutation(mutation) => serde_json::to_string(mutation),
    }
    .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    Ok(format!("event: {}\ndata: {}\n\n", event.kind(), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::mutation_event;

    #[test]
    fn test_decode_welcome() {
        let mut decoder = SseDecoder::new();
        decoder
            .feed(b"event: welcome\ndata: {\"listenerName\":\"abc\"}\n\n")
            .unwrap();

        let event = decoder.decode().unwrap().unwrap();
        assert_eq!(
            event,
            ServerEvent::Welcome {
                listener_name: Some("abc".into())
            }
        );
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_frames() {
        let frame = encode_event(&ServerEvent::Mutation(mutation_event("movie", "tx", Some((1, 2)))))
            .unwrap();
        let (head, tail) = frame.as_bytes().split_at(frame.len() / 2);

        let mut decoder = SseDecoder::new();
        decoder.feed(head).unwrap();
        assert!(decoder.decode().unwrap().is_none());

        decoder.feed(tail).unwrap();
        match decoder.decode().unwrap() {
            Some(ServerEvent::Mutation(m)) => {
                assert_eq!(m.document_id, "movie");
                assert_eq!(m.transaction_total_events, Some(2));
            }
            other => panic!("expected mutation, got {other:?}"),
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_comments_and_crlf() {
        let mut decoder = SseDecoder::new();
        decoder
            .feed(b": keep-alive\r\n\r\nid: 7\r\nevent: reconnect\r\ndata: {}\r\n\r\n")
            .unwrap();
        assert_eq!(decoder.decode().unwrap(), Some(ServerEvent::Reconnect));
    }

    #[test]
    fn test_channel_error_and_unknown_type() {
        let mut decoder = SseDecoder::new();
        decoder
            .feed(b"event: channelError\ndata: {\"message\":\"query too large\"}\n\n")
            .unwrap();
        let err = decoder.decode().unwrap_err();
        assert_eq!(err, ProtocolError::ChannelError("query too large".into()));
        assert!(err.is_fatal());

        decoder.feed(b"event: party\ndata: {}\n\n").unwrap();
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::UnknownEventType(t)) if t == "party"
        ));
    }

    #[test]
    fn test_message_too_large() {
        let mut decoder = SseDecoder::new();
        let big = vec![b'x'; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            decoder.feed(&big),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }
}
