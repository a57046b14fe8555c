//! Markdown image extraction from streaming display text.
//!
//! Inline `![alt](uri)` references are lifted out of the visible text
//! stream into dedicated image parts. The syntax can arrive split across
//! any number of chunks, so a potential image start is withheld until it
//! either completes or is ruled out.

/// Cap on withheld bytes for a single potential image reference.
///
/// Data URIs can legitimately be large, but an unclosed reference must
/// not buffer the rest of the stream; past this cap the withheld text is
/// released verbatim.
pub const MAX_PENDING_IMAGE: usize = 8 * 1024 * 1024;

/// One extracted segment of display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain visible text.
    Text(String),
    /// A completed markdown image reference.
    Image {
        /// The URI between the parentheses.
        uri: String,
    },
}

/// Streaming markdown image scanner.
#[derive(Debug, Default)]
pub struct MarkdownImageScanner {
    pending: String,
}

impl MarkdownImageScanner {
    /// Creates an empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one delta and returns the segments it resolved.
    pub fn feed(&mut self, delta: &str) -> Vec<Segment> {
        self.pending.push_str(delta);
        let mut segments = Vec::new();

        loop {
            let Some(start) = self.pending.find("![") else {
                // No image start. A trailing '!' could still begin one.
                let keep = usize::from(self.pending.ends_with('!'));
                let emit_to = self.pending.len() - keep;
                if emit_to > 0 {
                    let text: String = self.pending.drain(..emit_to).collect();
                    push_text(&mut segments, text);
                }
                return segments;
            };

            if start > 0 {
                let text: String = self.pending.drain(..start).collect();
                push_text(&mut segments, text);
            }

            // pending now begins with "![". Look for the closing ")".
            let Some(mid) = self.pending.find("](") else {
                return self.release_if_oversized(segments);
            };
            let Some(end_rel) = self.pending[mid + 2..].find(')') else {
                return self.release_if_oversized(segments);
            };
            let end = mid + 2 + end_rel;
            let uri = self.pending[mid + 2..end].to_string();
            self.pending.drain(..=end);
            segments.push(Segment::Image { uri });
        }
    }

    /// Releases everything withheld at end of stream as plain text.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    fn release_if_oversized(&mut self, mut segments: Vec<Segment>) -> Vec<Segment> {
        if self.pending.len() > MAX_PENDING_IMAGE {
            let text = std::mem::take(&mut self.pending);
            push_text(&mut segments, text);
        }
        segments
    }
}

fn push_text(segments: &mut Vec<Segment>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(existing)) = segments.last_mut() {
        existing.push_str(&text);
    } else {
        segments.push(Segment::Text(text));
    }
}
