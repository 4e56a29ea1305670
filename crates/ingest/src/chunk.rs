use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// Absolute character position of the first character, in the
    /// whitespace-normalised manuscript text.
    pub offset: usize,
    /// Length in characters (not bytes)
    pub len: usize,
}

impl Chunk {
    pub fn new(index: usize, text: String, offset: usize) -> Self {
        let len = text.chars().count();

        Self {
            index,
            text,
            offset,
            len,
        }
    }

    /// 1-based position, as shown to the model and to users
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// Character position one past the last character
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
