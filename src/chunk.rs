//! Paragraph-boundary text chunker.
//!
//! Splits extracted document text into [`Passage`]s that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph boundaries
//! (`\n\n`) to keep each passage coherent; oversized paragraphs are hard
//! split at line or word boundaries.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Passage;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into passages on paragraph boundaries, respecting `max_tokens`.
/// Blank text yields no passages. Indices are contiguous from 0.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Passage> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let normalized = text.replace("\r\n", "\n");

    let mut passages = Vec::new();
    let mut current_buf = String::new();

    for para in normalized.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            push_passage(&mut passages, &current_buf);
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                push_passage(&mut passages, remaining[..actual_split].trim());
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        push_passage(&mut passages, &current_buf);
    }

    passages
}

/// Largest char boundary `<= max` (PDF text is rarely ASCII-only).
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        // A single char wider than the budget.
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        idx
    }
}

fn push_passage(passages: &mut Vec<Passage>, text: &str) {
    if text.is_empty() {
        return;
    }
    let index = passages.len() as i64;
    passages.push(make_passage(index, text));
}

fn make_passage(index: i64, text: &str) -> Passage {
    Passage {
        id: Uuid::new_v4().to_string(),
        passage_index: index,
        text: text.to_string(),
        hash: sha256_hex(text.as_bytes()),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
