pub mod chunk;
pub mod chunker;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig, Chunks, DEFAULT_MAX_CHUNK_CHARS};
pub use reader::{ExtractedManuscript, FileReader, ManuscriptFormat, UploadType, classify_upload};

/// Whitespace-delimited word count, the single definition used for
/// manuscripts, chunks and POV percentages.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
