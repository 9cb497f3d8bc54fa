//! Upstream supply of visibility rows, delivered in chunks.

use std::collections::VecDeque;

use crate::{
    error::{AveragingError, SourceError},
    types::InputRow,
};

/// A chunked, pull-based stream of [`InputRow`]s.
///
/// Within a chunk, rows must be time-ordered (non-decreasing) for any one
/// averaging key. No averaging interval ever spans two chunks.
pub trait RowSource {
    /// Advance to the next chunk. Returns `false` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Whatever the underlying reader raises.
    fn next_chunk(&mut self) -> Result<bool, AveragingError>;

    /// Whether the current chunk has rows left. Takes `&mut self` so
    /// streaming sources can read ahead.
    ///
    /// # Errors
    ///
    /// Whatever the underlying reader raises.
    fn more_rows_in_chunk(&mut self) -> Result<bool, AveragingError>;

    /// Take the next row of the current chunk.
    ///
    /// # Errors
    ///
    /// [`SourceError::NoRowAvailable`] if the chunk is exhausted, or whatever
    /// the underlying reader raises.
    fn next_row(&mut self) -> Result<InputRow, AveragingError>;
}

impl<S: RowSource + ?Sized> RowSource for Box<S> {
    fn next_chunk(&mut self) -> Result<bool, AveragingError> {
        (**self).next_chunk()
    }

    fn more_rows_in_chunk(&mut self) -> Result<bool, AveragingError> {
        (**self).more_rows_in_chunk()
    }

    fn next_row(&mut self) -> Result<InputRow, AveragingError> {
        (**self).next_row()
    }
}

/// An in-memory [`RowSource`] over pre-chunked rows.
#[derive(Clone, Debug, Default)]
pub struct ChunkedRows {
    chunks: VecDeque<Vec<InputRow>>,
    current: VecDeque<InputRow>,
}

impl ChunkedRows {
    /// A source yielding each inner `Vec` as one chunk. Empty chunks are kept.
    pub fn new(chunks: Vec<Vec<InputRow>>) -> Self {
        Self {
            chunks: chunks.into(),
            current: VecDeque::new(),
        }
    }

    /// Chunks not yet started
    pub fn chunks_remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl FromIterator<Vec<InputRow>> for ChunkedRows {
    fn from_iter<I: IntoIterator<Item = Vec<InputRow>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl RowSource for ChunkedRows {
    fn next_chunk(&mut self) -> Result<bool, AveragingError> {
        match self.chunks.pop_front() {
            Some(chunk) => {
                self.current = chunk.into();
                Ok(true)
            }
            None => {
                self.current.clear();
                Ok(false)
            }
        }
    }

    fn more_rows_in_chunk(&mut self) -> Result<bool, AveragingError> {
        Ok(!self.current.is_empty())
    }

    fn next_row(&mut self) -> Result<InputRow, AveragingError> {
        self.current
            .pop_front()
            .ok_or_else(|| SourceError::NoRowAvailable.into())
    }
}
