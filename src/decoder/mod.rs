//! Incremental decoder for the council event stream.
//!
//! The body is UTF-8 text, one event per line, each significant line starting
//! with `data:` followed by a JSON object. Chunk boundaries are arbitrary: a
//! line (or a multi-byte character) may be split across any number of chunks,
//! so bytes are buffered until a newline arrives.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::models::{Event, Role, Vote};

const DATA_PREFIX: &str = "data:";

/// Stream of decoded events for one turn.
pub type EventStream = BoxStream<'static, Result<Event, ClientError>>;

/// Every field optional: the discriminator decides which ones matter.
#[derive(Debug, Default, Deserialize)]
struct RawEventLine {
    #[serde(rename = "type", alias = "kind")]
    kind: Option<String>,
    role: Option<String>,
    content: Option<String>,
    #[serde(rename = "agentName", alias = "agent_name")]
    agent_name: Option<String>,
    confidence: Option<serde_json::Value>,
    #[serde(alias = "conversationId")]
    conversation_id: Option<String>,
    votes: Option<Vec<Vote>>,
    phase: Option<String>,
    error: Option<serde_json::Value>,
    agent: Option<String>,
    reason: Option<String>,
}

impl RawEventLine {
    fn into_event(self) -> Option<Event> {
        let kind = match self.kind.as_deref() {
            Some(kind) => kind.trim().to_ascii_lowercase(),
            // Bare `{"error": "..."}` objects carry no discriminator.
            None if self.error.is_some() => "error".to_string(),
            None => {
                debug!("Ignoring event line without a type");
                return None;
            }
        };

        match kind.as_str() {
            "message" => {
                let Some(role) = self.role else {
                    debug!("Ignoring message event without a role");
                    return None;
                };
                Some(Event::Message {
                    role: Role::from(role),
                    content: self.content.unwrap_or_default(),
                    agent_name: self.agent_name,
                    confidence: self.confidence.as_ref().and_then(clamp_confidence),
                })
            }
            "meta" => Some(Event::Meta { conversation_id: self.conversation_id }),
            "typing" => Some(Event::Typing { agent: self.agent }),
            "vote_results" => Some(Event::VoteResults { votes: self.votes.unwrap_or_default() }),
            "phase" => match self.phase {
                Some(phase) => Some(Event::Phase { phase }),
                None => {
                    debug!("Ignoring phase event without a label");
                    None
                }
            },
            "error" => {
                let error = match self.error {
                    Some(serde_json::Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => self.content.unwrap_or_else(|| "Unknown error".to_string()),
                };
                Some(Event::Error { error })
            }
            "end" => Some(Event::End { reason: self.reason }),
            other => {
                debug!("Ignoring unknown event kind '{other}'");
                None
            }
        }
    }
}

fn clamp_confidence(value: &serde_json::Value) -> Option<u8> {
    let raw = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))?;
    if raw.is_nan() {
        return None;
    }
    Some(raw.clamp(0.0, 100.0).round() as u8)
}

/// Maps an already-parsed JSON object onto an [`Event`]. `Ok(None)` means the
/// object is well formed but not a recognized event.
pub fn parse_event_value(value: serde_json::Value) -> Result<Option<Event>, ClientError> {
    let raw: RawEventLine = serde_json::from_value(value)
        .map_err(|e| ClientError::invalid_payload("event object does not match any event shape", e))?;
    Ok(raw.into_event())
}

/// Decodes one framed line. Blank lines and lines without the `data:` prefix
/// yield `Ok(None)`; only a prefixed line with a broken payload is an error.
pub fn parse_event_line(line: &str) -> Result<Option<Event>, ClientError> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    let raw: RawEventLine = serde_json::from_str(payload)
        .map_err(|e| ClientError::invalid_payload(format!("malformed event line: {payload}"), e))?;
    Ok(raw.into_event())
}

/// Push-based framing state machine. Holds the incomplete trailing fragment
/// between chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|byte| *byte == b'\n') {
            let line_end = self.scanned + offset + 1;
            Self::decode_line(&self.buffer[line_start..line_end], &mut self.discarded, &mut events);
            line_start = line_end;
            self.scanned = line_end;
        }
        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();
        events
    }

    /// Flushes the trailing fragment once the source has ended. A final line
    /// without a newline is still decoded.
    pub fn finish(&mut self) -> Vec<Event> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let mut events = Vec::new();
        if !rest.is_empty() {
            Self::decode_line(&rest, &mut self.discarded, &mut events);
        }
        events
    }

    /// Number of lines dropped because they could not be decoded.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn decode_line(raw: &[u8], discarded: &mut usize, out: &mut Vec<Event>) {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                warn!("Discarding event line with invalid UTF-8: {e}");
                *discarded += 1;
                return;
            }
        };
        let line = text.trim_end_matches(&['\r', '\n'][..]);
        match parse_event_line(line) {
            Ok(Some(event)) => out.push(event),
            Ok(None) => {}
            Err(e) => {
                warn!("Discarding undecodable event line: {e}");
                *discarded += 1;
            }
        }
    }
}

struct DecodeState<S> {
    source: Pin<Box<S>>,
    decoder: FrameDecoder,
    ready: VecDeque<Event>,
    done: bool,
}

/// Turns a chunk source into a lazy event stream. The stream ends when the
/// source ends; a source error is yielded once and then the stream ends.
pub fn decode_stream<S, B>(source: S) -> impl Stream<Item = Result<Event, ClientError>> + Send
where
    S: Stream<Item = Result<B, ClientError>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    let events = state.decoder.finish();
                    state.ready.extend(events);
                    if state.decoder.discarded() > 0 {
                        debug!("Stream ended; {} line(s) discarded", state.decoder.discarded());
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "data: {\"type\": \"meta\", \"conversation_id\": \"c-1\"}\n\n",
        "data: {\"type\": \"phase\", \"phase\": \"AŞAMA 1\"}\n\n",
        "data: {\"type\": \"typing\", \"agent\": \"Sistem\"}\n\n",
        "data: {\"type\": \"message\", \"role\": \"CEO\", \"content\": \"Büyüme şart.\", \"is_agent\": true, \"confidence\": 82}\n\n",
        "data: {\"type\": \"vote_results\", \"votes\": [{\"agent\": \"CEO\", \"persona\": \"Lider\", \"decision\": \"KABUL\", \"reason\": \"ok\"}]}\n\n",
        "data: {\"type\": \"end\", \"reason\": \"max_turns\"}\n\n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<Event> {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn decodes_every_event_kind() {
        let events = decode_all(&[STREAM.as_bytes()]);
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["meta", "phase", "typing", "message", "vote_results", "end"]);

        match &events[3] {
            Event::Message { role, content, confidence, .. } => {
                assert_eq!(role, &Role::Speaker("CEO".to_string()));
                assert_eq!(content, "Büyüme şart.");
                assert_eq!(*confidence, Some(82));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn any_two_way_split_matches_unsplit_decode() {
        let bytes = STREAM.as_bytes();
        let expected = decode_all(&[bytes]);
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), expected, "split at byte {split}");
        }
    }

    #[test]
    fn one_byte_at_a_time_matches_unsplit_decode() {
        let bytes = STREAM.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&chunks), decode_all(&[bytes]));
    }

    #[test]
    fn malformed_line_is_dropped_without_aborting() {
        let input = concat!(
            "data: {\"type\": \"message\", \"role\": \"assistant\", \"content\": \"one\"}\n",
            "data: {\"type\": \"message\", \"role\": \n",
            "data: {\"type\": \"message\", \"role\": \"assistant\", \"content\": \"two\"}\n",
        );
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(input.as_bytes());

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Message { content, .. } if content == "one"));
        assert!(matches!(&events[1], Event::Message { content, .. } if content == "two"));
        assert_eq!(decoder.discarded(), 1);
    }

    #[test]
    fn noise_and_unknown_kinds_are_ignored() {
        let input = concat!(
            "\n",
            ": keep-alive\n",
            "event: ping\n",
            "data: {\"type\": \"sparkle\", \"content\": \"future\"}\n",
            "data: {\"type\": \"end\"}\r\n",
        );
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(input.as_bytes());
        assert_eq!(events, vec![Event::End { reason: None }]);
        assert_eq!(decoder.discarded(), 0);
    }

    #[test]
    fn bare_error_object_decodes_as_error_event() {
        let event = parse_event_line("data: {\"error\": \"quota exceeded\"}").unwrap();
        assert_eq!(event, Some(Event::Error { error: "quota exceeded".to_string() }));
    }

    #[test]
    fn kind_alias_and_camel_case_id_are_accepted() {
        let event = parse_event_line("data: {\"kind\": \"meta\", \"conversationId\": \"abc\"}").unwrap();
        assert_eq!(event, Some(Event::Meta { conversation_id: Some("abc".to_string()) }));
    }

    #[test]
    fn confidence_is_clamped() {
        let high = parse_event_line(
            "data: {\"type\":\"message\",\"role\":\"assistant\",\"content\":\"x\",\"confidence\":140.2}",
        )
        .unwrap();
        assert!(matches!(high, Some(Event::Message { confidence: Some(100), .. })));

        let low = parse_event_line(
            "data: {\"type\":\"message\",\"role\":\"assistant\",\"content\":\"x\",\"confidence\":-3}",
        )
        .unwrap();
        assert!(matches!(low, Some(Event::Message { confidence: Some(0), .. })));
    }

    #[test]
    fn vote_with_null_fields_keeps_the_ballot() {
        let line = "data: {\"type\": \"vote_results\", \"votes\": [{\"agent\": \"CEO\", \"persona\": \"Lider\", \"decision\": \"RED\", \"reason\": null}]}\n";
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(line.as_bytes());

        assert_eq!(decoder.discarded(), 0);
        match &events[..] {
            [Event::VoteResults { votes }] => {
                assert_eq!(votes[0].decision, "RED");
                assert_eq!(votes[0].reason, "");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn long_line_in_small_chunks_resumes_the_newline_scan() {
        let content = "ş".repeat(4096);
        let line = format!("data: {{\"type\": \"message\", \"role\": \"assistant\", \"content\": \"{content}\"}}\n");
        let mut decoder = FrameDecoder::new();

        let mut events = Vec::new();
        for chunk in line.as_bytes().chunks(3) {
            events.extend(decoder.push(chunk));
            assert_eq!(decoder.scanned, decoder.buffer.len());
        }

        assert!(decoder.buffer.is_empty());
        assert!(matches!(&events[..], [Event::Message { content: c, .. }] if *c == content));
    }

    #[test]
    fn trailing_fragment_is_held_until_finish() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\": \"end\"}").is_empty());
        assert_eq!(decoder.finish(), vec![Event::End { reason: None }]);
    }

    #[tokio::test]
    async fn decode_stream_yields_events_then_source_error() {
        let full = "data: {\"type\": \"phase\", \"phase\": \"AŞAMA 2\"}\ndata: {\"type\":".as_bytes();
        // Split inside the two-byte 'Ş'.
        let mid_char = "data: {\"type\": \"phase\", \"phase\": \"A".len() + 1;
        let chunks: Vec<Result<Vec<u8>, ClientError>> = vec![
            Ok(full[..mid_char].to_vec()),
            Ok(full[mid_char..].to_vec()),
            Err(ClientError::StreamAborted { message: "connection reset".to_string() }),
        ];
        let results: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;

        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], Ok(Event::Phase { phase }) if phase == "AŞAMA 2"));
        assert!(matches!(&results[1], Err(ClientError::StreamAborted { .. })));
    }
}
