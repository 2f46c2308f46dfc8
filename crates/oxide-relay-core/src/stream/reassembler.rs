//! Sentinel-driven segment state machine
//!
//! Splits a tagged text stream into alternating plain and thinking
//! segments. A trailing fragment that could still grow into a sentinel is
//! held in the processing buffer until the next chunk decides it.

use super::{Segment, SegmentKind, StreamState};

/// Opening and closing sentinel synonyms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelSet {
    /// Tags that open a thinking block
    pub start: Vec<String>,
    /// Tags that close a thinking block, whichever start tag opened it
    pub end: Vec<String>,
}

impl Default for SentinelSet {
    fn default() -> Self {
        Self {
            start: vec!["<think>".to_string(), "<reasoning>".to_string()],
            end: vec!["</think>".to_string(), "</reasoning>".to_string()],
        }
    }
}

impl SentinelSet {
    fn tags_for(&self, mode: SegmentKind) -> &[String] {
        match mode {
            SegmentKind::Plain => &self.start,
            SegmentKind::Thinking => &self.end,
        }
    }
}

/// Stateless driver of [`StreamState`] transitions
#[derive(Debug, Clone, Default)]
pub struct SegmentReassembler {
    sentinels: SentinelSet,
}

impl SegmentReassembler {
    /// Reassembler with the standard sentinels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassembler with custom sentinels.
    #[must_use]
    pub const fn with_sentinels(sentinels: SentinelSet) -> Self {
        Self { sentinels }
    }

    /// Fold a chunk into `state` and return the segments it completed.
    ///
    /// Blank plain segments are not returned. Every transition moves the
    /// active message out of `state` into the returned segment, so the next
    /// segment always starts a fresh message.
    pub fn feed(&self, state: &mut StreamState, chunk: &str) -> Vec<Segment> {
        state.processing_buffer.push_str(chunk);
        let mut completed = Vec::new();

        loop {
            let tags = self.sentinels.tags_for(state.mode);
            let Some((pos, tag_len)) = earliest_match(&state.processing_buffer, tags) else {
                let hold = partial_tag_suffix(&state.processing_buffer, tags);
                let ready = state.processing_buffer.len() - hold;
                state
                    .current_segment
                    .push_str(&state.processing_buffer[..ready]);
                state.processing_buffer.drain(..ready);
                break;
            };

            state
                .current_segment
                .push_str(&state.processing_buffer[..pos]);
            state.processing_buffer.drain(..pos + tag_len);

            let segment = Segment {
                kind: state.mode,
                text: std::mem::take(&mut state.current_segment),
                active: state.active.take(),
            };
            if segment.kind == SegmentKind::Thinking || !segment.text.trim().is_empty() {
                completed.push(segment);
            }

            state.mode = match state.mode {
                SegmentKind::Plain => SegmentKind::Thinking,
                SegmentKind::Thinking => SegmentKind::Plain,
            };
        }

        completed
    }

    /// Close the open segment at end of stream.
    ///
    /// A held-back fragment is plain text at this point. Returns `None` when
    /// there is nothing to show and no message to finalise.
    pub fn finish(&self, state: &mut StreamState) -> Option<Segment> {
        let rest = std::mem::take(&mut state.processing_buffer);
        state.current_segment.push_str(&rest);

        let segment = Segment {
            kind: state.mode,
            text: std::mem::take(&mut state.current_segment),
            active: state.active.take(),
        };
        state.mode = SegmentKind::Plain;

        if segment.text.trim().is_empty() && segment.active.is_none() {
            None
        } else {
            Some(segment)
        }
    }

    /// Answer text of a complete tagged response, thinking blocks removed.
    #[must_use]
    pub fn plain_text(&self, raw: &str) -> String {
        let mut state = StreamState::default();
        let mut out = String::new();
        for segment in self
            .feed(&mut state, raw)
            .into_iter()
            .chain(self.finish(&mut state))
        {
            if segment.kind == SegmentKind::Plain {
                out.push_str(&segment.text);
            }
        }
        out
    }
}

/// Position and length of the earliest occurring tag.
fn earliest_match(buffer: &str, tags: &[String]) -> Option<(usize, usize)> {
    tags.iter()
        .filter_map(|tag| buffer.find(tag.as_str()).map(|pos| (pos, tag.len())))
        .min_by_key(|&(pos, _)| pos)
}

/// Length of the longest suffix that is a proper prefix of some tag.
fn partial_tag_suffix(buffer: &str, tags: &[String]) -> usize {
    let longest = tags.iter().map(String::len).max().unwrap_or(0);
    (1..longest.min(buffer.len() + 1))
        .rev()
        .find(|&len| {
            let start = buffer.len() - len;
            buffer.is_char_boundary(start)
                && tags
                    .iter()
                    .any(|tag| tag.len() > len && tag.starts_with(&buffer[start..]))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds_and_texts(segments: &[Segment]) -> Vec<(SegmentKind, &str)> {
        segments.iter().map(|s| (s.kind, s.text.as_str())).collect()
    }

    #[test]
    fn test_scenario_plain_think_plain() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();

        assert!(reassembler.feed(&mut state, "Hello ").is_empty());
        assert_eq!(state.current_segment(), "Hello ");

        let segments = reassembler.feed(&mut state, "<think>reasoning here</think>");
        assert_eq!(
            kinds_and_texts(&segments),
            vec![
                (SegmentKind::Plain, "Hello "),
                (SegmentKind::Thinking, "reasoning here")
            ]
        );
        assert!(!state.in_think_block());

        assert!(reassembler.feed(&mut state, " world").is_empty());
        let last = reassembler.finish(&mut state);
        assert_eq!(
            last.map(|s| (s.kind, s.text)),
            Some((SegmentKind::Plain, " world".to_string()))
        );
    }

    #[test]
    fn test_close_tag_may_differ_from_open_tag() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();
        let segments = reassembler.feed(&mut state, "<reasoning>a</think>b");
        assert_eq!(kinds_and_texts(&segments), vec![(SegmentKind::Thinking, "a")]);
        assert_eq!(state.current_segment(), "b");
    }

    #[test]
    fn test_earliest_tag_wins() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();
        reassembler.feed(&mut state, "x<reasoning>y<think>z");
        assert!(state.in_think_block());
        assert_eq!(state.current_segment(), "y<think>z");
    }

    #[test]
    fn test_blank_plain_segments_are_skipped() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();
        let segments = reassembler.feed(&mut state, "  \n<think></think>");
        assert_eq!(kinds_and_texts(&segments), vec![(SegmentKind::Thinking, "")]);
    }

    #[test]
    fn test_split_sentinel_is_held_back() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();

        assert!(reassembler.feed(&mut state, "Hi <thi").is_empty());
        assert_eq!(state.current_segment(), "Hi ");
        assert_eq!(state.processing_buffer(), "<thi");

        let segments = reassembler.feed(&mut state, "nk>deep");
        assert_eq!(kinds_and_texts(&segments), vec![(SegmentKind::Plain, "Hi ")]);
        assert!(state.in_think_block());
        assert_eq!(state.current_segment(), "deep");
    }

    #[test]
    fn test_false_prefix_is_released() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();
        reassembler.feed(&mut state, "a <");
        assert_eq!(state.processing_buffer(), "<");
        reassembler.feed(&mut state, "b> c");
        assert_eq!(state.current_segment(), "a <b> c");
        assert_eq!(state.processing_buffer(), "");
    }

    #[test]
    fn test_unterminated_thinking_finishes_as_thinking() {
        let reassembler = SegmentReassembler::new();
        let mut state = StreamState::new();
        reassembler.feed(&mut state, "<think>still going</th");
        let last = reassembler.finish(&mut state);
        assert_eq!(
            last.map(|s| (s.kind, s.text)),
            Some((SegmentKind::Thinking, "still going</th".to_string()))
        );
        assert!(!state.in_think_block());
    }

    #[test]
    fn test_plain_text_strips_thinking() {
        let reassembler = SegmentReassembler::new();
        assert_eq!(
            reassembler.plain_text("<reasoning>plan</reasoning>Answer: 42"),
            "Answer: 42"
        );
        assert_eq!(reassembler.plain_text("no tags"), "no tags");
    }

    fn plain_piece() -> impl Strategy<Value = String> {
        "([a-z]{1,6}( [a-z0-9.,]{1,6}){0,2})?"
    }

    fn think_piece() -> impl Strategy<Value = String> {
        "[a-z .]{0,12}"
    }

    fn tagged_input() -> impl Strategy<Value = (String, String)> {
        (
            plain_piece(),
            prop::collection::vec((0usize..4, think_piece(), plain_piece()), 0..4),
        )
            .prop_map(|(head, blocks)| {
                const OPEN: [&str; 2] = ["<think>", "<reasoning>"];
                const CLOSE: [&str; 2] = ["</think>", "</reasoning>"];
                let mut raw = head.clone();
                let mut expected = head;
                for (style, thought, tail) in blocks {
                    raw.push_str(OPEN[style % 2]);
                    raw.push_str(&thought);
                    raw.push_str(CLOSE[style / 2]);
                    raw.push_str(&tail);
                    expected.push_str(&tail);
                }
                (raw, expected)
            })
    }

    fn chunked(raw: &str, cuts: &[usize]) -> Vec<String> {
        let mut bounds: Vec<usize> = cuts
            .iter()
            .map(|c| c % (raw.len() + 1))
            .filter(|&c| raw.is_char_boundary(c))
            .collect();
        bounds.push(0);
        bounds.push(raw.len());
        bounds.sort_unstable();
        bounds.dedup();
        bounds.windows(2).map(|w| raw[w[0]..w[1]].to_string()).collect()
    }

    proptest! {
        #[test]
        fn prop_plain_segments_reproduce_untagged_text(
            (raw, expected) in tagged_input(),
            cuts in prop::collection::vec(0usize..256, 0..12),
        ) {
            let reassembler = SegmentReassembler::new();
            let mut state = StreamState::new();
            let mut segments = Vec::new();
            for chunk in chunked(&raw, &cuts) {
                segments.extend(reassembler.feed(&mut state, &chunk));
            }
            segments.extend(reassembler.finish(&mut state));

            let plain: String = segments
                .iter()
                .filter(|s| s.kind == SegmentKind::Plain)
                .map(|s| s.text.as_str())
                .collect();
            prop_assert_eq!(plain, expected);
        }

        #[test]
        fn prop_chunking_does_not_change_segments(
            (raw, _expected) in tagged_input(),
            cuts in prop::collection::vec(0usize..256, 0..12),
        ) {
            let reassembler = SegmentReassembler::new();

            let mut whole_state = StreamState::new();
            let mut whole = reassembler.feed(&mut whole_state, &raw);
            whole.extend(reassembler.finish(&mut whole_state));

            let mut state = StreamState::new();
            let mut pieces = Vec::new();
            for chunk in chunked(&raw, &cuts) {
                pieces.extend(reassembler.feed(&mut state, &chunk));
            }
            pieces.extend(reassembler.finish(&mut state));

            prop_assert_eq!(kinds_and_texts(&whole), kinds_and_texts(&pieces));
        }
    }
}
