use ingest::Chunk;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Folds per-chunk partial results into one manuscript-level result.
///
/// An aggregator belongs to a single run and sees its chunks in order.
pub trait Aggregator {
    /// What the model is expected to return for one chunk.
    type Partial: DeserializeOwned;
    /// The persisted aggregate.
    type Output: Serialize;

    fn absorb(&mut self, chunk: &Chunk, total_chunks: usize, partial: Self::Partial);

    /// Called when the model answered but no usable result could be
    /// extracted. Most kinds ignore such chunks.
    fn record_unparseable(&mut self, _chunk: &Chunk, _total_chunks: usize, _raw: &str) {}

    fn finish(self) -> Self::Output;
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
pub(crate) fn chunk_at(index: usize, text: &str, offset: usize) -> Chunk {
    Chunk::new(index, text.to_string(), offset)
}
