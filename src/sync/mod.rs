//! Canonical ordered view of the remote terminal/chat plus in-flight streamed messages.
//!
//! Every operation is a synchronous transformation of owned state. Callers outside
//! the dispatch context only ever see copies.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::types::MessageId;

/// Upper bound on the number of lines a delta may resize the view to.
pub const MAX_LINES: usize = 100_000;

/// Sparse patch against the current ordered view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    /// Index to replacement content, applied after resizing.
    pub changed: BTreeMap<usize, String>,
    /// Length of the view after the patch.
    pub total_lines: usize,
}

impl Delta {
    pub fn new(total_lines: usize) -> Self {
        Self {
            changed: BTreeMap::new(),
            total_lines,
        }
    }

    pub fn with_line(mut self, index: usize, content: impl Into<String>) -> Self {
        self.changed.insert(index, content.into());
        self
    }
}

/// Result of applying a stream chunk or end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamState {
    pub message_id: MessageId,
    pub content: String,
}

/// Single-writer holder of the synchronized view.
#[derive(Debug, Default)]
pub struct SyncReducer {
    lines: Vec<String>,
    streams: HashMap<MessageId, String>,
}

impl SyncReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the view wholesale.
    ///
    /// An all-blank snapshot arriving over a view with visible content is treated as a
    /// transient, incomplete update and skipped. A view of only blank lines counts as
    /// empty, so a blank snapshot replaces it (possibly changing the line count).
    /// Returns whether the snapshot was applied.
    pub fn apply_snapshot(&mut self, lines: Vec<String>) -> bool {
        let has_content = self.lines.iter().any(|l| !l.trim().is_empty());
        let incoming_blank = lines.iter().all(|l| l.trim().is_empty());
        if has_content && incoming_blank {
            debug!(lines = lines.len(), "ignoring blank snapshot over existing content");
            return false;
        }
        self.lines = lines;
        true
    }

    /// Resize to `total_lines`, then overwrite each changed index that is still in bounds.
    pub fn apply_delta(&mut self, delta: &Delta) {
        let total = if delta.total_lines > MAX_LINES {
            warn!(requested = delta.total_lines, max = MAX_LINES, "clamping delta length");
            MAX_LINES
        } else {
            delta.total_lines
        };
        self.lines.resize(total, String::new());
        for (&index, content) in &delta.changed {
            match self.lines.get_mut(index) {
                Some(line) => line.clone_from(content),
                None => debug!(index, total, "ignoring out-of-range delta index"),
            }
        }
    }

    /// Append `chunk` to the accumulation for `message_id`, starting one if needed.
    pub fn apply_stream_chunk(&mut self, message_id: &str, chunk: &str) -> StreamState {
        let content = self.streams.entry(message_id.to_string()).or_default();
        content.push_str(chunk);
        StreamState {
            message_id: message_id.to_string(),
            content: content.clone(),
        }
    }

    /// Finalize and forget the accumulation for `message_id`.
    ///
    /// An end for an id with no open accumulation finalizes empty content.
    pub fn apply_stream_end(&mut self, message_id: &str) -> StreamState {
        StreamState {
            message_id: message_id.to_string(),
            content: self.streams.remove(message_id).unwrap_or_default(),
        }
    }

    /// Drop every open accumulation. Message ids do not survive a reconnect.
    pub fn reset_streams(&mut self) -> usize {
        let n = self.streams.len();
        self.streams.clear();
        n
    }

    /// Copy of the ordered view.
    pub fn lines(&self) -> Vec<String> {
        self.lines.clone()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Running content of an open stream.
    pub fn stream(&self, message_id: &str) -> Option<String> {
        self.streams.get(message_id).cloned()
    }

    pub fn open_streams(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.streams.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn reducer_with(v: &[&str]) -> SyncReducer {
        let mut r = SyncReducer::new();
        assert!(r.apply_snapshot(lines(v)));
        r
    }

    #[test]
    fn snapshot_replaces_view() {
        let mut r = reducer_with(&["a", "b"]);
        assert!(r.apply_snapshot(lines(&["x"])));
        assert_eq!(r.lines(), lines(&["x"]));
    }

    #[test]
    fn blank_snapshot_over_content_is_skipped() {
        let mut r = reducer_with(&["a", "b"]);
        assert!(!r.apply_snapshot(lines(&["", "   ", "\t"])));
        assert_eq!(r.lines(), lines(&["a", "b"]));
    }

    #[test]
    fn blank_snapshot_over_blank_view_applies() {
        let mut r = SyncReducer::new();
        assert!(r.apply_snapshot(vec!["".into(), " ".into()]));
        assert!(r.apply_snapshot(vec!["".into(), "".into(), "".into()]));
        assert_eq!(r.lines(), vec!["", "", ""]);
    }

    #[test]
    fn blank_snapshot_over_empty_view_applies() {
        let mut r = SyncReducer::new();
        assert!(r.apply_snapshot(lines(&["", ""])));
        assert_eq!(r.line_count(), 2);
        // Blank over blank is not "existing content" either.
        assert!(r.apply_snapshot(lines(&[" "])));
        assert_eq!(r.lines(), lines(&[" "]));
    }

    #[test]
    fn delta_replays_idempotently() {
        let mut r = reducer_with(&["a", "b", "c"]);
        let delta = Delta::new(3).with_line(1, "B");
        r.apply_delta(&delta);
        assert_eq!(r.lines(), lines(&["a", "B", "c"]));
        r.apply_delta(&delta);
        assert_eq!(r.lines(), lines(&["a", "B", "c"]));
    }

    #[test]
    fn delta_truncates() {
        let mut r = reducer_with(&["a", "b", "c"]);
        r.apply_delta(&Delta::new(1));
        assert_eq!(r.lines(), lines(&["a"]));
    }

    #[test]
    fn delta_extends_with_blanks() {
        let mut r = reducer_with(&["a", "b", "c"]);
        r.apply_delta(&Delta::new(5).with_line(4, "e"));
        assert_eq!(r.lines(), lines(&["a", "b", "c", "", "e"]));
    }

    #[test]
    fn delta_ignores_indices_past_new_length() {
        let mut r = reducer_with(&["a", "b", "c"]);
        r.apply_delta(&Delta::new(2).with_line(2, "gone").with_line(0, "A"));
        assert_eq!(r.lines(), lines(&["A", "b"]));
    }

    #[test]
    fn delta_length_is_clamped() {
        let mut r = SyncReducer::new();
        r.apply_delta(&Delta::new(usize::MAX).with_line(0, "top"));
        assert_eq!(r.line_count(), MAX_LINES);
        assert_eq!(r.lines()[0], "top");
    }

    #[test]
    fn stream_accumulates_then_restarts_after_end() {
        let mut r = SyncReducer::new();
        r.apply_stream_chunk("m1", "He");
        let running = r.apply_stream_chunk("m1", "llo");
        assert_eq!(running.content, "Hello");
        assert_eq!(r.stream("m1").as_deref(), Some("Hello"));

        let done = r.apply_stream_end("m1");
        assert_eq!(done.content, "Hello");
        assert!(r.stream("m1").is_none());

        let fresh = r.apply_stream_chunk("m1", "!");
        assert_eq!(fresh.content, "!");
    }

    #[test]
    fn streams_are_independent_of_each_other_and_of_lines() {
        let mut r = reducer_with(&["line"]);
        r.apply_stream_chunk("a", "1");
        r.apply_stream_chunk("b", "2");
        r.apply_stream_chunk("a", "3");
        assert_eq!(r.stream("a").as_deref(), Some("13"));
        assert_eq!(r.stream("b").as_deref(), Some("2"));
        assert_eq!(r.open_streams(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(r.lines(), lines(&["line"]));
    }

    #[test]
    fn end_without_chunks_is_empty() {
        let mut r = SyncReducer::new();
        assert_eq!(r.apply_stream_end("ghost").content, "");
    }

    #[test]
    fn reset_streams_keeps_view() {
        let mut r = reducer_with(&["keep"]);
        r.apply_stream_chunk("m", "x");
        assert_eq!(r.reset_streams(), 1);
        assert!(r.open_streams().is_empty());
        assert_eq!(r.lines(), lines(&["keep"]));
    }

    #[test]
    fn lines_is_a_copy() {
        let r = reducer_with(&["a"]);
        let mut copy = r.lines();
        copy.push("b".into());
        assert_eq!(r.line_count(), 1);
    }
}
