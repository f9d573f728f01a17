//! Paragraph-aware passage splitting.
//!
//! A document is split into blocks at blank lines (fenced code blocks are
//! kept whole), blocks are packed greedily into passages of at most
//! `max_chars`, headings start a new passage once the current one has
//! reached `min_chars`, and short leftovers are merged into a neighbour.
//! Only a block that alone exceeds `max_chars` is cut, preferably at a
//! sentence end. Output depends on the input text alone.

use serde::{Deserialize, Serialize};

use crate::core::config::defaults;

const PASSAGE_SEPARATOR: &str = "\n\n";
const SEPARATOR_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSettings {
    /// Passages shorter than this are merged into a neighbour when one fits.
    pub min_chars: usize,
    /// Hard upper bound on passage length, in characters.
    pub max_chars: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            min_chars: defaults::CHUNK_MIN_CHARS,
            max_chars: defaults::CHUNK_MAX_CHARS,
        }
    }
}

pub struct Chunker {
    settings: ChunkSettings,
}

impl Chunker {
    pub fn new(settings: ChunkSettings) -> Self {
        let max_chars = settings.max_chars.max(1);
        Self {
            settings: ChunkSettings {
                min_chars: settings.min_chars.min(max_chars),
                max_chars,
            },
        }
    }

    /// Split `text` into trimmed, non-empty passages in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        let max = self.settings.max_chars;

        let pieces: Vec<String> = split_blocks(text)
            .into_iter()
            .flat_map(|block| {
                if char_len(&block) > max {
                    hard_split(&block, max)
                } else {
                    vec![block]
                }
            })
            .collect();

        let packed = self.pack(pieces);
        self.merge_short(packed)
    }

    fn pack(&self, pieces: Vec<String>) -> Vec<String> {
        let mut passages = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for piece in pieces {
            let piece_len = char_len(&piece);
            let starts_section = piece.starts_with('#');
            let overflow = current_len + SEPARATOR_CHARS + piece_len > self.settings.max_chars;
            let section_break = starts_section && current_len >= self.settings.min_chars;

            if !current.is_empty() && (overflow || section_break) {
                passages.push(std::mem::take(&mut current));
                current_len = 0;
            }

            if !current.is_empty() {
                current.push_str(PASSAGE_SEPARATOR);
                current_len += SEPARATOR_CHARS;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }

        if !current.is_empty() {
            passages.push(current);
        }
        passages
    }

    fn merge_short(&self, passages: Vec<String>) -> Vec<String> {
        let min = self.settings.min_chars;
        let max = self.settings.max_chars;
        let mut merged: Vec<String> = Vec::with_capacity(passages.len());
        let mut pending = passages.into_iter().peekable();

        while let Some(passage) = pending.next() {
            let len = char_len(&passage);
            if len >= min {
                merged.push(passage);
                continue;
            }

            if let Some(previous) = merged.last_mut() {
                if char_len(previous) + SEPARATOR_CHARS + len <= max {
                    previous.push_str(PASSAGE_SEPARATOR);
                    previous.push_str(&passage);
                    continue;
                }
            }

            if let Some(next) = pending.peek_mut() {
                if len + SEPARATOR_CHARS + char_len(next) <= max {
                    *next = format!("{}{}{}", passage, PASSAGE_SEPARATOR, next);
                    continue;
                }
            }

            // Both neighbours are full; the size bound wins.
            merged.push(passage);
        }

        merged
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkSettings::default())
    }
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    char_len(text).div_ceil(4)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Blank-line separated blocks; fenced code blocks are never split.
fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if line.trim().is_empty() && !in_fence {
            push_block(&mut blocks, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_block(&mut blocks, &current);

    blocks
}

fn push_block(blocks: &mut Vec<String>, lines: &[&str]) {
    let block = lines.join("\n");
    let block = block.trim();
    if !block.is_empty() {
        blocks.push(block.to_string());
    }
}

/// Cut an oversized block into pieces of at most `max_chars` characters.
fn hard_split(block: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = block.trim();

    while char_len(rest) > max_chars {
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(offset, _)| offset)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];
        let cut = find_sentence_boundary(window)
            .or_else(|| find_whitespace_boundary(window))
            .unwrap_or(window_end);

        let (head, tail) = rest.split_at(cut);
        let head = head.trim();
        if !head.is_empty() {
            pieces.push(head.to_string());
        }
        rest = tail.trim_start();
    }

    let rest = rest.trim();
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Byte offset just past the last sentence end in the final 30% of `window`.
fn find_sentence_boundary(window: &str) -> Option<usize> {
    let target = window.len() * 70 / 100;
    let search_start = window
        .char_indices()
        .map(|(offset, _)| offset)
        .find(|offset| *offset >= target)?;
    let search_text = &window[search_start..];

    let sentence_endings = [". ", "! ", "? ", ".\n", "!\n", "?\n"];
    sentence_endings
        .iter()
        .filter_map(|ending| search_text.rfind(ending))
        .max()
        .map(|pos| search_start + pos + 1)
}

/// Byte offset of the last whitespace in the second half of `window`.
fn find_whitespace_boundary(window: &str) -> Option<usize> {
    let half = window.len() / 2;
    window
        .char_indices()
        .filter(|(offset, c)| *offset > half && c.is_whitespace())
        .map(|(offset, _)| offset)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(min: usize, max: usize) -> Chunker {
        Chunker::new(ChunkSettings {
            min_chars: min,
            max_chars: max,
        })
    }

    #[test]
    fn empty_text_has_no_passages() {
        assert!(Chunker::default().split("").is_empty());
        assert!(Chunker::default().split("  \n\n \n").is_empty());
    }

    #[test]
    fn small_paragraphs_are_packed_together() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let passages = chunker(10, 200).split(text);
        assert_eq!(passages.len(), 1);
        assert_eq!(
            passages[0],
            "First paragraph here.\n\nSecond paragraph here.\n\nThird one."
        );
    }

    #[test]
    fn paragraphs_are_never_split_when_they_fit() {
        let para_a = "a".repeat(60);
        let para_b = "b".repeat(60);
        let para_c = "c".repeat(60);
        let text = format!("{para_a}\n\n{para_b}\n\n{para_c}");
        let passages = chunker(10, 130).split(&text);

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0], format!("{para_a}\n\n{para_b}"));
        assert_eq!(passages[1], para_c);
    }

    #[test]
    fn oversized_paragraph_is_hard_split_within_bound() {
        let sentence = "Processes run in isolated work directories. ";
        let text = sentence.repeat(20);
        let passages = chunker(20, 200).split(&text);

        assert!(passages.len() > 1);
        for passage in &passages {
            assert!(passage.chars().count() <= 200, "{}", passage.len());
            assert!(!passage.trim().is_empty());
        }
        // Cuts land on sentence ends.
        assert!(passages[0].ends_with('.'));
    }

    #[test]
    fn unbroken_text_is_cut_at_exact_bound() {
        let text = "x".repeat(250);
        let passages = chunker(10, 100).split(&text);
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].len(), 100);
        assert_eq!(passages[2].len(), 50);
    }

    #[test]
    fn short_tail_is_merged_into_previous_passage() {
        let long = "l".repeat(80);
        let text = format!("{long}\n\n{long}\n\ntail");
        let passages = chunker(30, 170).split(&text);
        assert_eq!(passages.len(), 2);
        assert!(passages[1].ends_with("tail"));
    }

    #[test]
    fn short_head_is_merged_forward_when_previous_is_missing() {
        let chunker = chunker(30, 100);
        let merged = chunker.merge_short(vec!["intro".to_string(), "b".repeat(50)]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].starts_with("intro\n\n"));
    }

    #[test]
    fn short_passage_stays_when_neighbours_are_full() {
        let chunker = chunker(30, 100);
        let full = "f".repeat(99);
        let merged = chunker.merge_short(vec![full.clone(), "tiny".to_string(), full.clone()]);
        assert_eq!(merged, vec![full.clone(), "tiny".to_string(), full]);
    }

    #[test]
    fn headings_start_new_passages() {
        let body = "Body text that is long enough to count. ".repeat(2);
        let text = format!("# Intro\n\n{body}\n\n## Details\n\n{body}");
        let passages = chunker(40, 1000).split(&text);
        assert_eq!(passages.len(), 2);
        assert!(passages[0].starts_with("# Intro"));
        assert!(passages[1].starts_with("## Details"));
    }

    #[test]
    fn fenced_code_is_one_block() {
        let text = "```groovy\nprocess foo {\n\n  script:\n\n  'echo hi'\n}\n```";
        let blocks = split_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].contains("script:"));
    }

    #[test]
    fn split_is_deterministic() {
        let text = "Alpha beta. ".repeat(300);
        let chunker = chunker(100, 400);
        assert_eq!(chunker.split(&text), chunker.split(&text));
    }

    #[test]
    fn multibyte_text_respects_char_bounds() {
        let text = "é".repeat(250);
        let passages = chunker(10, 100).split(&text);
        assert!(passages.iter().all(|p| p.chars().count() <= 100));
        assert_eq!(passages.iter().map(|p| p.chars().count()).sum::<usize>(), 250);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }
}
