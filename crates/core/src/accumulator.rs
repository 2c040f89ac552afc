//! Per-turn buffering of partial model output.

use std::mem;

/// Everything the model produced during one turn, handed out by [`TurnAccumulator::flush`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushedTurn {
    /// Text fragments in arrival order.
    pub texts: Vec<String>,
    /// Concatenated raw audio bytes in arrival order.
    pub audio: Vec<u8>,
}

/// Buffers text fragments and audio bytes until the model signals turn-complete.
///
/// Owned by a single receive loop; it never outlives the turn it collects.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    texts: Vec<String>,
    audio: Vec<u8>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_text(&mut self, text: impl Into<String>) {
        self.texts.push(text.into());
    }

    pub fn append_audio(&mut self, audio: &[u8]) {
        self.audio.extend_from_slice(audio);
    }

    /// Returns both buffers and leaves the accumulator empty.
    pub fn flush(&mut self) -> FlushedTurn {
        FlushedTurn {
            texts: mem::take(&mut self.texts),
            audio: mem::take(&mut self.audio),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.audio.is_empty()
    }

    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }

    pub fn text_count(&self) -> usize {
        self.texts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accumulator_is_empty() {
        let acc = TurnAccumulator::new();
        assert!(acc.is_empty());
        assert_eq!(acc.audio_len(), 0);
        assert_eq!(acc.text_count(), 0);
    }

    #[test]
    fn test_flush_returns_appends_in_order() {
        let mut acc = TurnAccumulator::new();
        acc.append_text("Hello");
        acc.append_audio(&[1, 2]);
        acc.append_text(String::from(", world"));
        acc.append_audio(&[3]);

        let turn = acc.flush();
        assert_eq!(turn.texts, vec!["Hello".to_string(), ", world".to_string()]);
        assert_eq!(turn.audio, vec![1, 2, 3]);
    }

    #[test]
    fn test_flush_resets_state() {
        let mut acc = TurnAccumulator::new();
        acc.append_text("first turn");
        acc.append_audio(&[9; 32]);
        let _ = acc.flush();

        assert!(acc.is_empty());
        // A second flush with nothing appended yields nothing.
        assert_eq!(acc.flush(), FlushedTurn::default());
    }

    #[test]
    fn test_turns_do_not_leak_into_each_other() {
        let mut acc = TurnAccumulator::new();
        acc.append_text("one");
        acc.append_audio(&[1]);
        let first = acc.flush();

        acc.append_text("two");
        let second = acc.flush();

        assert_eq!(first.texts, vec!["one".to_string()]);
        assert_eq!(first.audio, vec![1]);
        assert_eq!(second.texts, vec!["two".to_string()]);
        assert!(second.audio.is_empty());
    }

    #[test]
    fn test_audio_len_tracks_appends() {
        let mut acc = TurnAccumulator::new();
        acc.append_audio(&[0; 480]);
        acc.append_audio(&[0; 20]);
        assert_eq!(acc.audio_len(), 500);
        assert!(!acc.is_empty());
    }
}
