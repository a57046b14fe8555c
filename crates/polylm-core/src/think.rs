//! Inline `<think>` tag extraction for display text.
//!
//! Some providers interleave reasoning into the visible text stream
//! inside `<think>...</think>` tags instead of using a dedicated channel.
//! This parser splits each incoming delta into display and thinking
//! portions, tolerating tags split across arbitrary chunk boundaries: a
//! chunk ending in a tag prefix (`<thi`) is withheld until the next
//! chunk disambiguates it.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// The split output of one fed delta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThinkSplit {
    /// Text destined for the visible channel.
    pub display: String,
    /// Text destined for the reasoning channel.
    pub thinking: String,
}

/// Streaming `<think>` tag parser.
///
/// Feed deltas with [`feed`](Self::feed); at end of stream call
/// [`flush`](Self::flush) to release any withheld tag-prefix bytes. An
/// unterminated `<think>` block is treated as reasoning to the end of
/// the stream.
#[derive(Debug, Default)]
pub struct ThinkTagParser {
    in_think: bool,
    pending: String,
}

impl ThinkTagParser {
    /// Creates a parser positioned outside any tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one delta and returns its display/thinking split.
    pub fn feed(&mut self, delta: &str) -> ThinkSplit {
        self.pending.push_str(delta);
        let mut out = ThinkSplit::default();

        loop {
            let tag = if self.in_think { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = self.pending.find(tag) {
                let before = &self.pending[..pos];
                if self.in_think {
                    out.thinking.push_str(before);
                } else {
                    out.display.push_str(before);
                }
                self.pending.drain(..pos + tag.len());
                self.in_think = !self.in_think;
            } else {
                // No complete tag. Withhold a trailing prefix that could
                // still become one; emit the rest.
                let keep = partial_suffix_len(&self.pending, tag);
                let emit_to = self.pending.len() - keep;
                let emitted: String = self.pending.drain(..emit_to).collect();
                if self.in_think {
                    out.thinking.push_str(&emitted);
                } else {
                    out.display.push_str(&emitted);
                }
                return out;
            }
        }
    }

    /// Releases withheld bytes at end of stream.
    ///
    /// Inside an unterminated `<think>` block the remainder is
    /// reasoning; otherwise it is display text (a dangling tag prefix
    /// that never completed is plain text after all).
    pub fn flush(&mut self) -> ThinkSplit {
        let rest = std::mem::take(&mut self.pending);
        let mut out = ThinkSplit::default();
        if self.in_think {
            out.thinking = rest;
        } else {
            out.display = rest;
        }
        out
    }

    /// Whether the parser is currently inside a `<think>` block.
    pub fn in_think(&self) -> bool {
        self.in_think
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of
/// `tag`.
pub(crate) fn partial_suffix_len(text: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        if !text.is_char_boundary(text.len() - len) {
            continue;
        }
        if tag.starts_with(&text[text.len() - len..]) {
            return len;
        }
    }
    0
}
