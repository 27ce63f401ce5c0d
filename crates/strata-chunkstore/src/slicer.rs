//! Splitting an encoded stream into chunk-sized slices

use crate::{ChunkStoreError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};

/// Supplies successive slices of an encoded stream to the chunk writer
///
/// With `again` set, the source must hand back the slice it returned last, so
/// a failed upload can be retried without consuming more input.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next slice of at most `max_len` bytes, or `None` at end of stream
    async fn next_slice(&mut self, max_len: usize, again: bool) -> Result<Option<Bytes>>;
}

/// [`ChunkSource`] over a fallible byte stream
pub struct StreamSlicer {
    input: BoxStream<'static, Result<Bytes>>,
    buffer: BytesMut,
    last: Option<Bytes>,
    exhausted: bool,
}

impl StreamSlicer {
    pub fn new(input: BoxStream<'static, Result<Bytes>>) -> Self {
        Self {
            input,
            buffer: BytesMut::new(),
            last: None,
            exhausted: false,
        }
    }
}

#[async_trait]
impl ChunkSource for StreamSlicer {
    async fn next_slice(&mut self, max_len: usize, again: bool) -> Result<Option<Bytes>> {
        if again {
            return match &self.last {
                Some(slice) => Ok(Some(slice.clone())),
                None => Err(ChunkStoreError::Integrity(
                    "slice re-requested before any was produced".to_string(),
                )),
            };
        }
        if max_len == 0 {
            return Err(ChunkStoreError::Configuration(
                "chunk size limit must be positive".to_string(),
            ));
        }

        while self.buffer.len() < max_len && !self.exhausted {
            match self.input.next().await {
                Some(item) => self.buffer.extend_from_slice(&item?),
                None => self.exhausted = true,
            }
        }

        if self.buffer.is_empty() {
            self.last = None;
            return Ok(None);
        }
        let take = self.buffer.len().min(max_len);
        let slice = self.buffer.split_to(take).freeze();
        self.last = Some(slice.clone());
        Ok(Some(slice))
    }
}

/// [`ChunkSource`] over an in-memory buffer
pub struct BytesSlicer {
    data: Bytes,
    last: Option<Bytes>,
}

impl BytesSlicer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            last: None,
        }
    }
}

#[async_trait]
impl ChunkSource for BytesSlicer {
    async fn next_slice(&mut self, max_len: usize, again: bool) -> Result<Option<Bytes>> {
        if again {
            return Ok(self.last.clone());
        }
        if self.data.is_empty() {
            self.last = None;
            return Ok(None);
        }
        let take = self.data.len().min(max_len.max(1));
        let slice = self.data.split_to(take);
        self.last = Some(slice.clone());
        Ok(Some(slice))
    }
}
