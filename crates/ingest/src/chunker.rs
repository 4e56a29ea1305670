use std::iter::{FusedIterator, Peekable};
use std::str::SplitWhitespace;

use crate::chunk::Chunk;

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 80_000;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Character budget per chunk. A single word longer than this becomes
    /// its own oversize chunk.
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split `text` into word-aligned chunks, greedily filling each one up to
    /// the budget. Words are rejoined with a single space, so any other
    /// whitespace in the source is not preserved.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            words: text.split_whitespace().peekable(),
            max_chars: self.config.max_chars,
            next_index: 0,
            next_offset: 0,
        }
    }

    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        self.chunks(text).collect()
    }
}

/// Single-pass iterator over the chunks of one text.
pub struct Chunks<'a> {
    words: Peekable<SplitWhitespace<'a>>,
    max_chars: usize,
    next_index: usize,
    next_offset: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let first = self.words.next()?;
        let mut buffer = String::from(first);
        let mut buffer_len = first.chars().count();

        while let Some(word) = self.words.peek() {
            let word_len = word.chars().count();
            if buffer_len + 1 + word_len > self.max_chars {
                break;
            }
            buffer.push(' ');
            buffer.push_str(word);
            buffer_len += 1 + word_len;
            self.words.next();
        }

        let chunk = Chunk::new(self.next_index, buffer, self.next_offset);

        // the next chunk starts after this one plus the joining space
        self.next_offset = chunk.end() + 1;
        self.next_index += 1;

        Some(chunk)
    }
}

impl FusedIterator for Chunks<'_> {}
