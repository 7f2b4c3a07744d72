//! Paragraph-first text segmentation with a sliding-window fallback.
//!
//! Lengths are counted in `char`s, never bytes, so a window never splits a code point.

use serde::Serialize;

pub const CHUNK_SIZE: usize = 8000;
pub const CHUNK_OVERLAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Max chars per chunk.
    pub size: usize,
    /// Chars shared by consecutive windows of an oversized paragraph.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: CHUNK_SIZE,
            overlap: CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Clamp to a configuration that always makes forward progress.
    pub fn normalized(self) -> Self {
        let size = self.size.max(1);
        let overlap = self.overlap.min(size - 1);
        Self { size, overlap }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Split `text` into bounded chunks, preferring paragraph boundaries.
///
/// Never returns an empty vector: if no paragraph survives trimming, the result is a single
/// chunk holding the first `size` chars of the raw input.
pub fn chunk_text(text: &str, cfg: ChunkConfig) -> Vec<Chunk> {
    let cfg = cfg.normalized();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in split_paragraphs(text) {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_chars = trimmed.chars().count();

        if para_chars > cfg.size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            chunks.extend(sliding_windows(trimmed, cfg));
            continue;
        }

        let joined_chars = if current.is_empty() {
            para_chars
        } else {
            current_chars + 2 + para_chars
        };
        if joined_chars > cfg.size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(trimmed);
            current_chars = para_chars;
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
            current_chars = joined_chars;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        chunks.push(take_chars(text, cfg.size).to_string());
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { index, text })
        .collect()
}

/// Paragraph pieces of `text`, untrimmed.
///
/// A newline starts a new paragraph when the whitespace run after it contains another
/// newline (blank line), or is at least two chars long (indented continuation).
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if ch != '\n' {
            continue;
        }
        let after = i + ch.len_utf8();
        let mut run_chars = 0usize;
        let mut last_newline_end: Option<usize> = None;
        for (j, c) in text[after..].char_indices() {
            if !c.is_whitespace() {
                break;
            }
            run_chars += 1;
            if c == '\n' {
                last_newline_end = Some(after + j + 1);
            }
        }

        let resume = match last_newline_end {
            Some(end) => Some(end),
            None if run_chars >= 2 => Some(after),
            None => None,
        };
        if let Some(resume) = resume {
            out.push(&text[start..i]);
            start = resume;
            while iter.peek().is_some_and(|(k, _)| *k < resume) {
                iter.next();
            }
        }
    }
    out.push(&text[start..]);
    out
}

fn sliding_windows(paragraph: &str, cfg: ChunkConfig) -> Vec<String> {
    let offsets: Vec<usize> = paragraph
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(paragraph.len()))
        .collect();
    let len = offsets.len() - 1;
    let step_back = cfg.overlap;

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < len {
        let end = (start + cfg.size).min(len);
        out.push(paragraph[offsets[start]..offsets[end]].to_string());
        start = end - step_back;
        if start + step_back >= len {
            break;
        }
    }
    out
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
