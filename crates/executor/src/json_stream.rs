use serde_json::{Deserializer, Value};
use tracing::warn;

/// Carry-over cap. A stream that never completes a value gets its buffer
/// dropped instead of growing without bound.
const BUFFER_CAP: usize = 1024;

/// How much of a discarded buffer makes it into the warning log.
const DISCARD_PREVIEW_CHARS: usize = 200;

/// Pulls complete JSON values out of an arbitrarily-chunked text stream.
///
/// Scanner CLIs in JSON mode emit one object per line, but chunks arrive
/// split at arbitrary byte boundaries and sometimes carry several objects
/// back to back. The extractor keeps the undecodable tail between feeds and
/// never fails: malformed content is either retried on the next feed or, past
/// [`BUFFER_CAP`], dropped.
#[derive(Debug, Default)]
pub struct JsonStreamExtractor {
    buffer: String,
}

impl JsonStreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one decoded chunk, returning every value that became complete.
    pub fn feed(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);

        let mut values = Vec::new();
        let consumed = {
            let mut stream = Deserializer::from_str(&self.buffer).into_iter::<Value>();
            let mut consumed = 0;
            while let Some(Ok(value)) = stream.next() {
                // byte_offset is the end of the value just decoded, so the
                // prefix up to here is safe to discard.
                consumed = stream.byte_offset();
                values.push(value);
            }
            consumed
        };
        self.buffer.drain(..consumed);

        let leading_ws = self.buffer.len() - self.buffer.trim_start().len();
        self.buffer.drain(..leading_ws);

        if self.buffer.len() > BUFFER_CAP {
            let preview: String = self.buffer.chars().take(DISCARD_PREVIEW_CHARS).collect();
            warn!(%preview, len = self.buffer.len(), "truncating malformed JSON buffer");
            self.buffer.clear();
        }

        values
    }

    /// Length of the retained partial buffer, for introspection and tests.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn single_complete_value() {
        let mut extractor = JsonStreamExtractor::new();
        let values = extractor.feed(r#"{"host":"a","port":80}"#);
        assert_eq!(values, vec![json!({"host": "a", "port": 80})]);
        assert_eq!(extractor.pending_len(), 0);
    }

    #[test]
    fn concatenated_values_in_one_chunk() {
        let mut extractor = JsonStreamExtractor::new();
        let values = extractor.feed(r#"{"a":1}{"b":2}{"c":3}"#);
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})]);
    }

    #[test]
    fn partial_value_carried_to_next_feed() {
        let mut extractor = JsonStreamExtractor::new();
        assert!(extractor.feed(r#"{"a":"#).is_empty());
        assert_eq!(extractor.feed("1}"), vec![json!({"a": 1})]);
        assert_eq!(extractor.pending_len(), 0);
    }

    #[test]
    fn every_split_position_yields_same_values() {
        let text = r#"{"a":1}{"b":{"c":[1,2,3]}}{"d":"x y z"}"#;
        let expected = vec![json!({"a": 1}), json!({"b": {"c": [1, 2, 3]}}), json!({"d": "x y z"})];

        for split in 0..=text.len() {
            if !text.is_char_boundary(split) {
                continue;
            }
            let mut extractor = JsonStreamExtractor::new();
            let mut values = extractor.feed(&text[..split]);
            values.extend(extractor.feed(&text[split..]));
            assert_eq!(values, expected, "split at byte {split}");
        }
    }

    #[test]
    fn whitespace_and_newlines_between_values() {
        let mut extractor = JsonStreamExtractor::new();
        let values = extractor.feed("{\"a\":1}\n  {\"b\":2}\n");
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(extractor.pending_len(), 0);
    }

    #[test]
    fn empty_and_blank_chunks_produce_nothing() {
        let mut extractor = JsonStreamExtractor::new();
        assert!(extractor.feed("").is_empty());
        assert!(extractor.feed("   \n\t").is_empty());
        assert_eq!(extractor.pending_len(), 0);
    }

    #[test]
    fn oversized_garbage_is_discarded() {
        let mut extractor = JsonStreamExtractor::new();
        // No valid prefix ever completes; the buffer must stay bounded.
        for _ in 0..20 {
            let values = extractor.feed(&"not json ".repeat(20));
            assert!(values.is_empty());
            assert!(extractor.pending_len() <= BUFFER_CAP);
        }
    }

    #[test]
    fn recovers_after_discard() {
        let mut extractor = JsonStreamExtractor::new();
        extractor.feed(&"x".repeat(BUFFER_CAP + 1));
        assert_eq!(extractor.pending_len(), 0);
        assert_eq!(extractor.feed(r#"{"ok":true}"#), vec![json!({"ok": true})]);
    }
}
