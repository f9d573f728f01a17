//! Context assembly.
//!
//! Turns ranked search results into the text block handed to the language
//! model plus a deduplicated citation list:
//! 1. Walk results in score order, formatting each as a numbered block
//! 2. Stop before the first block that would overflow the character budget
//! 3. Number sources by first appearance; repeated URLs reuse their number

use std::collections::HashMap;

use super::types::{CitationRef, SearchResult};
use crate::core::config::defaults;

pub const BLOCK_DELIMITER: &str = "\n\n---\n\n";

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_chars: usize,
}

impl ContextAssembler {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Build `(context, citations)` from results already sorted best first.
    ///
    /// Passages are included whole or not at all, and the context never
    /// exceeds `max_chars` characters. Citations cover exactly the passages
    /// that made it into the context. Empty input gives empty output.
    pub fn assemble(&self, results: &[SearchResult]) -> (String, Vec<CitationRef>) {
        let mut context = String::new();
        let mut context_chars = 0;
        let mut numbering = CitationNumbering::default();
        let delimiter_chars = BLOCK_DELIMITER.chars().count();

        for result in results {
            let source = result.chunk.source.trim();
            let (number, first_seen) = numbering.peek(source);
            let block = format_block(result, number, first_seen);

            let block_chars = block.chars().count();
            let added = if context.is_empty() {
                block_chars
            } else {
                delimiter_chars + block_chars
            };
            if context_chars + added > self.max_chars {
                break;
            }

            if !context.is_empty() {
                context.push_str(BLOCK_DELIMITER);
            }
            context.push_str(&block);
            context_chars += added;
            numbering.commit(source);
        }

        (context, numbering.into_citations())
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(defaults::CONTEXT_MAX_CHARS)
    }
}

#[derive(Default)]
struct CitationNumbering {
    by_url: HashMap<String, usize>,
    citations: Vec<CitationRef>,
}

impl CitationNumbering {
    /// Number `url` would get, and whether it would be new.
    fn peek(&self, url: &str) -> (Option<usize>, bool) {
        if url.is_empty() {
            return (None, false);
        }
        match self.by_url.get(url) {
            Some(index) => (Some(*index), false),
            None => (Some(self.citations.len() + 1), true),
        }
    }

    fn commit(&mut self, url: &str) {
        if url.is_empty() || self.by_url.contains_key(url) {
            return;
        }
        let index = self.citations.len() + 1;
        self.by_url.insert(url.to_string(), index);
        self.citations.push(CitationRef {
            index,
            url: url.to_string(),
        });
    }

    fn into_citations(self) -> Vec<CitationRef> {
        self.citations
    }
}

fn format_block(result: &SearchResult, number: Option<usize>, first_seen: bool) -> String {
    let chunk = &result.chunk;
    let title = chunk.title.trim();
    let mut block = match (number, title.is_empty()) {
        (Some(n), false) => format!("[{}] {}\n", n, title),
        (Some(n), true) => format!("[{}]\n", n),
        (None, false) => format!("{}\n", title),
        (None, true) => String::new(),
    };
    block.push_str(chunk.text.trim());
    if first_seen {
        block.push_str("\nSource: ");
        block.push_str(chunk.source.trim());
    }
    block
}
