use crate::chunk::{CHARS_PER_TOKEN, Chunk};

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target tokens per chunk
    pub chunk_size_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 2000,
            overlap_tokens: 200,
        }
    }
}

/// Splits text into ordered, overlapping chunks that prefer to end on a
/// paragraph break, then a sentence terminator, then any newline.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Window size in characters, never smaller than two so the cursor advances.
    fn window_chars(&self) -> usize {
        (self.config.chunk_size_tokens * CHARS_PER_TOKEN).max(2)
    }

    /// Overlap is capped at half a window; a cut always lands past the
    /// window's midpoint, so the next window starts after the current one.
    fn overlap_chars(&self) -> usize {
        (self.config.overlap_tokens * CHARS_PER_TOKEN).min(self.window_chars() / 2)
    }

    /// Chunk a document. Empty or whitespace-only input yields no chunks.
    pub fn chunk_text(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let window = self.window_chars();

        if chars.len() <= window {
            return vec![Chunk::new(document_id, 0, text.to_string(), (0, chars.len()))];
        }

        let overlap = self.overlap_chars();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + window).min(chars.len());
            let cut = if end == chars.len() {
                end
            } else {
                start + find_break_point(&chars[start..end]).unwrap_or(end - start)
            };

            let content: String = chars[start..cut].iter().collect();
            let content = content.trim();
            if !content.is_empty() {
                chunks.push(Chunk::new(
                    document_id,
                    chunks.len(),
                    content.to_string(),
                    (start, cut),
                ));
            }

            if cut >= chars.len() {
                break;
            }

            start = cut.saturating_sub(overlap).max(start + 1);
        }

        chunks
    }
}

/// Length of the best prefix of `window` to cut at, searching only the
/// second half of the window. `None` means cut at the raw boundary.
fn find_break_point(window: &[char]) -> Option<usize> {
    let half = window.len() / 2;

    // Paragraph break (double newline)
    if let Some(i) = (0..window.len().saturating_sub(1))
        .rev()
        .find(|&i| window[i] == '\n' && window[i + 1] == '\n')
    {
        if i > half {
            return Some(i + 2);
        }
    }

    // Sentence terminator followed by whitespace
    if let Some(i) = (0..window.len().saturating_sub(1)).rev().find(|&i| {
        matches!(window[i], '.' | '!' | '?') && window[i + 1].is_whitespace()
    }) {
        if i + 2 > half {
            return Some(i + 2);
        }
    }

    // Any newline
    if let Some(i) = window.iter().rposition(|&c| c == '\n') {
        if i > half {
            return Some(i + 1);
        }
    }

    None
}
