//! Reasoning normalisation
//!
//! Providers deliver reasoning either in a separate delta field or inline
//! in the content followed by a separator line. Both are rewritten into the
//! `<reasoning>` sentinel convention so the reassembler sees one format.

use super::{Delta, ProviderEntry};

/// Opening sentinel written around reasoning text.
pub const REASONING_OPEN: &str = "<reasoning>";
/// Closing sentinel written after reasoning text.
pub const REASONING_CLOSE: &str = "</reasoning>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Field { open: bool },
    Separator { separator: String, started: bool, closed: bool },
}

/// Per-attempt translator from deltas to sentinel-tagged text
#[derive(Debug, Clone)]
pub struct ReasoningTagger {
    mode: Mode,
}

impl Default for ReasoningTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningTagger {
    /// Tagger for providers that send reasoning in a dedicated field.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: Mode::Field { open: false },
        }
    }

    /// Tagger for models that stream reasoning inline and end it with `separator`.
    #[must_use]
    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            mode: Mode::Separator {
                separator: separator.into(),
                started: false,
                closed: false,
            },
        }
    }

    /// Tagger matching an entry's configured convention.
    #[must_use]
    pub fn for_entry(entry: &ProviderEntry) -> Self {
        match entry.reasoning_separator.as_deref() {
            Some(sep) if !sep.is_empty() => Self::with_separator(sep),
            _ => Self::new(),
        }
    }

    /// Translate one delta into zero or more text chunks.
    pub fn push(&mut self, delta: Delta) -> Vec<String> {
        match &mut self.mode {
            Mode::Field { open } => match delta {
                Delta::Reasoning(text) => {
                    if *open {
                        vec![text]
                    } else {
                        *open = true;
                        vec![REASONING_OPEN.to_string(), text]
                    }
                }
                Delta::Content(text) => {
                    if *open {
                        *open = false;
                        vec![REASONING_CLOSE.to_string(), text]
                    } else {
                        vec![text]
                    }
                }
                Delta::EndOfStream => {
                    if *open {
                        *open = false;
                        vec![REASONING_CLOSE.to_string()]
                    } else {
                        Vec::new()
                    }
                }
            },
            Mode::Separator {
                separator,
                started,
                closed,
            } => {
                let text = match delta {
                    // A stray field still counts as reasoning text
                    Delta::Content(text) | Delta::Reasoning(text) => text,
                    Delta::EndOfStream => return Vec::new(),
                };
                let mut out = Vec::with_capacity(3);
                if !*started {
                    *started = true;
                    out.push(format!("{REASONING_OPEN}\n"));
                }
                if !*closed && text.contains(separator.as_str()) {
                    *closed = true;
                    out.push(format!("{REASONING_CLOSE}\n\n"));
                }
                out.push(text);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tagger: &mut ReasoningTagger, deltas: Vec<Delta>) -> String {
        deltas.into_iter().flat_map(|d| tagger.push(d)).collect()
    }

    #[test]
    fn test_field_reasoning_is_wrapped() {
        let mut tagger = ReasoningTagger::new();
        let out = run(
            &mut tagger,
            vec![
                Delta::Reasoning("step 1".into()),
                Delta::Reasoning(", step 2".into()),
                Delta::Content("Answer".into()),
                Delta::Content(".".into()),
                Delta::EndOfStream,
            ],
        );
        assert_eq!(out, "<reasoning>step 1, step 2</reasoning>Answer.");
    }

    #[test]
    fn test_unterminated_reasoning_closes_at_end() {
        let mut tagger = ReasoningTagger::new();
        let out = run(
            &mut tagger,
            vec![Delta::Reasoning("hmm".into()), Delta::EndOfStream],
        );
        assert_eq!(out, "<reasoning>hmm</reasoning>");
    }

    #[test]
    fn test_plain_content_passes_through() {
        let mut tagger = ReasoningTagger::new();
        let out = run(
            &mut tagger,
            vec![
                Delta::Content("<think>inline</think>".into()),
                Delta::EndOfStream,
            ],
        );
        assert_eq!(out, "<think>inline</think>");
    }

    #[test]
    fn test_separator_mode_marks_inline_reasoning() {
        let mut tagger = ReasoningTagger::with_separator("───");
        let out = run(
            &mut tagger,
            vec![
                Delta::Content("Let me think".into()),
                Delta::Content("\n───\n".into()),
                Delta::Content("Done".into()),
                Delta::Content(" ─── again".into()),
                Delta::EndOfStream,
            ],
        );
        assert_eq!(
            out,
            "<reasoning>\nLet me think</reasoning>\n\n\n───\nDone ─── again"
        );
    }
}
