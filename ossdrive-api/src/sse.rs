//! Server-Sent Events decoding for the upload progress stream

use crate::error::ApiResult;
use crate::models::upload::UploadProgress;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// Boxed byte stream feeding a subscription
pub type ByteStream = Pin<Box<dyn Stream<Item = ApiResult<Bytes>> + Send>>;

/// Name of the event type carrying `{uploaded, total}`
pub const PROGRESS_EVENT: &str = "progress";

/// One dispatched SSE message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseMessage {
    /// `event:` field; `None` for default (untyped) messages
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental decoder, tolerant of arbitrary chunk boundaries
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every message completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        let mut out = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                if let Some(message) = self.process_line(&line) {
                    out.push(message);
                }
            } else {
                self.line.push(byte);
            }
        }
        out
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage {
            event,
            data,
            id: self.id.clone(),
        })
    }
}

/// Decoded event from the upload progress stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressStreamEvent {
    /// A well-formed `progress` event
    Progress(UploadProgress),
    /// Default or unknown event type; carried verbatim
    Message(String),
    /// `progress` event whose payload did not decode
    Malformed(String),
}

impl From<SseMessage> for ProgressStreamEvent {
    fn from(message: SseMessage) -> Self {
        match message.event.as_deref() {
            Some(PROGRESS_EVENT) => match serde_json::from_str::<UploadProgress>(&message.data) {
                Ok(progress) => ProgressStreamEvent::Progress(progress),
                Err(_) => ProgressStreamEvent::Malformed(message.data),
            },
            _ => ProgressStreamEvent::Message(message.data),
        }
    }
}

/// Open subscription to a task's progress stream
pub struct ProgressSubscription {
    stream: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<SseMessage>,
}

impl ProgressSubscription {
    /// Wrap any byte stream, e.g. an HTTP response body
    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = ApiResult<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// Next decoded event; `Ok(None)` once the server closes the stream
    pub async fn next_event(&mut self) -> ApiResult<Option<ProgressStreamEvent>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message.into()));
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.feed(&chunk)),
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: prog").is_empty());
        assert!(decoder.feed(b"ress\r\ndata: {\"uploaded\":10,").is_empty());
        let messages = decoder.feed(b"\"total\":100}\r\n\r\n");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event.as_deref(), Some("progress"));
        assert_eq!(messages[0].data, r#"{"uploaded":10,"total":100}"#);
    }

    #[test]
    fn test_decoder_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let messages = decoder.feed(b": keep-alive\n\ndata: first\ndata: second\nid: 7\n\n");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, None);
        assert_eq!(messages[0].data, "first\nsecond");
        assert_eq!(messages[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_event_classification() {
        let progress = SseMessage {
            event: Some("progress".into()),
            data: r#"{"uploaded":5,"total":9}"#.into(),
            id: None,
        };
        assert_eq!(
            ProgressStreamEvent::from(progress),
            ProgressStreamEvent::Progress(UploadProgress {
                uploaded: 5,
                total: 9
            })
        );

        let broken = SseMessage {
            event: Some("progress".into()),
            data: "not json".into(),
            id: None,
        };
        assert_eq!(
            ProgressStreamEvent::from(broken),
            ProgressStreamEvent::Malformed("not json".into())
        );

        let untyped = SseMessage {
            event: None,
            data: r#"{"hello":"world"}"#.into(),
            id: None,
        };
        assert!(matches!(
            ProgressStreamEvent::from(untyped),
            ProgressStreamEvent::Message(_)
        ));
    }

    #[tokio::test]
    async fn test_subscription_yields_events_then_end() {
        let chunks: Vec<ApiResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"event: progress\ndata: {\"uploaded\":1,\"total\":4}\n\n")),
            Ok(Bytes::from_static(b"data: hello\n\nevent: progress\n")),
            Ok(Bytes::from_static(b"data: {\"uploaded\":4,\"total\":4}\n\n")),
        ];
        let mut sub = ProgressSubscription::from_byte_stream(futures::stream::iter(chunks));

        let first = assert_ok!(sub.next_event().await);
        assert_eq!(
            first,
            Some(ProgressStreamEvent::Progress(UploadProgress {
                uploaded: 1,
                total: 4
            }))
        );
        let second = assert_ok!(sub.next_event().await);
        assert_eq!(second, Some(ProgressStreamEvent::Message("hello".into())));
        let third = assert_ok!(sub.next_event().await);
        assert!(matches!(third, Some(ProgressStreamEvent::Progress(_))));
        assert_eq!(assert_ok!(sub.next_event().await), None);
    }

    #[tokio::test]
    async fn test_subscription_surfaces_stream_errors() {
        let chunks: Vec<ApiResult<Bytes>> = vec![Err(ApiError::Network("reset".into()))];
        let mut sub = ProgressSubscription::from_byte_stream(futures::stream::iter(chunks));
        assert_err!(sub.next_event().await);
    }
}
