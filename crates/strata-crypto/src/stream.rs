//! Composable stream stages
//!
//! Every transformation applied to file bytes (block framing, decryption,
//! truncation, padding) is a [`Transform`]: a push-style stage that consumes
//! input slices and appends its output to a buffer. A [`Pipeline`] is an
//! ordered list of stages, so the composition order of a read or write path
//! is an explicit value that can be inspected with [`Pipeline::stage_names`].

use crate::{CryptoError, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};

/// A single push-style stream stage
pub trait Transform: Send {
    /// Short stable name, used for logging and pipeline inspection
    fn name(&self) -> &'static str;

    /// Consume `input`, appending any ready output
    fn update(&mut self, input: &[u8], output: &mut BytesMut) -> Result<()>;

    /// Flush buffered state at end of input
    fn finish(&mut self, output: &mut BytesMut) -> Result<()>;

    /// True once the stage discards all further input
    fn is_done(&self) -> bool {
        false
    }
}

/// An ordered list of stages applied first to last
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    /// Create an empty (identity) pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn then<T: Transform + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append an already boxed stage
    pub fn then_boxed(mut self, stage: Box<dyn Transform>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Names of the stages in application order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True for the identity pipeline
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// True once some stage discards all further input
    pub fn is_done(&self) -> bool {
        self.stages.iter().any(|s| s.is_done())
    }

    /// Push input through every stage
    pub fn update(&mut self, input: Bytes) -> Result<Bytes> {
        let mut carry = input;
        for stage in &mut self.stages {
            if carry.is_empty() {
                break;
            }
            let mut out = BytesMut::with_capacity(carry.len());
            stage.update(&carry, &mut out)?;
            carry = out.freeze();
        }
        Ok(carry)
    }

    /// Flush every stage in order
    ///
    /// Stages up to and including the last finished one are skipped: their
    /// remaining output would be discarded downstream anyway, and flushing a
    /// decoder holding a partial block would report it as truncated.
    pub fn finish(&mut self) -> Result<Bytes> {
        let skip = self
            .stages
            .iter()
            .rposition(|s| s.is_done())
            .map_or(0, |i| i + 1);
        let mut carry = Bytes::new();
        for stage in self.stages.iter_mut().skip(skip) {
            let mut out = BytesMut::with_capacity(carry.len());
            if !carry.is_empty() {
                stage.update(&carry, &mut out)?;
            }
            stage.finish(&mut out)?;
            carry = out.freeze();
        }
        Ok(carry)
    }

    /// Run a whole buffer through the pipeline
    pub fn apply(mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.update(Bytes::copy_from_slice(input))?.to_vec();
        out.extend_from_slice(&self.finish()?);
        Ok(out)
    }

    /// Wrap a byte stream so that every item flows through the pipeline
    ///
    /// Input stops being polled as soon as the pipeline reports
    /// [`is_done`](Self::is_done), so a capped read never pulls more source
    /// bytes than it needs.
    pub fn into_stream<E>(
        self,
        input: BoxStream<'static, std::result::Result<Bytes, E>>,
    ) -> BoxStream<'static, std::result::Result<Bytes, E>>
    where
        E: From<CryptoError> + Send + 'static,
    {
        stream::unfold(Some((input, self)), |state| async move {
            let (mut input, mut pipeline) = state?;
            loop {
                let next = if pipeline.is_done() {
                    None
                } else {
                    input.next().await
                };
                match next {
                    Some(Ok(chunk)) => match pipeline.update(chunk) {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => return Some((Ok(out), Some((input, pipeline)))),
                        Err(e) => return Some((Err(e.into()), None)),
                    },
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => {
                        return match pipeline.finish() {
                            Ok(out) if out.is_empty() => None,
                            Ok(out) => Some((Ok(out), None)),
                            Err(e) => Some((Err(e.into()), None)),
                        }
                    }
                }
            }
        })
        .boxed()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pipeline").field(&self.stage_names()).finish()
    }
}

/// Discard the first `n` bytes of the stream
#[derive(Debug)]
pub struct LeftTruncate {
    remaining: u64,
}

impl LeftTruncate {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl Transform for LeftTruncate {
    fn name(&self) -> &'static str {
        "left-truncate"
    }

    fn update(&mut self, input: &[u8], output: &mut BytesMut) -> Result<()> {
        let skip = self.remaining.min(input.len() as u64) as usize;
        self.remaining -= skip as u64;
        output.extend_from_slice(&input[skip..]);
        Ok(())
    }

    fn finish(&mut self, _output: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

/// Emit at most `n` bytes, then behave as end of stream
#[derive(Debug)]
pub struct RightTruncate {
    remaining: u64,
}

impl RightTruncate {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl Transform for RightTruncate {
    fn name(&self) -> &'static str {
        "right-truncate"
    }

    fn update(&mut self, input: &[u8], output: &mut BytesMut) -> Result<()> {
        let take = self.remaining.min(input.len() as u64) as usize;
        self.remaining -= take as u64;
        output.extend_from_slice(&input[..take]);
        Ok(())
    }

    fn finish(&mut self, _output: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

type Filler = Box<dyn FnMut(&mut [u8]) + Send>;

/// Pad the stream up to a fixed total length
///
/// Input passes through unchanged; at end of input, filler bytes are appended
/// until `target` bytes have been emitted. Zeros by default.
pub struct PadTo {
    target: u64,
    emitted: u64,
    filler: Filler,
}

impl PadTo {
    /// Pad with zero bytes
    pub fn zeros(target: u64) -> Self {
        Self::with_filler(target, |buf: &mut [u8]| buf.fill(0))
    }

    /// Pad with bytes produced by `filler`
    pub fn with_filler(target: u64, filler: impl FnMut(&mut [u8]) + Send + 'static) -> Self {
        Self {
            target,
            emitted: 0,
            filler: Box::new(filler),
        }
    }
}

const PAD_PIECE: usize = 64 * 1024;

impl Transform for PadTo {
    fn name(&self) -> &'static str {
        "pad-to"
    }

    fn update(&mut self, input: &[u8], output: &mut BytesMut) -> Result<()> {
        self.emitted += input.len() as u64;
        output.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, output: &mut BytesMut) -> Result<()> {
        let mut piece = vec![0u8; PAD_PIECE];
        while self.emitted < self.target {
            let n = (self.target - self.emitted).min(PAD_PIECE as u64) as usize;
            (self.filler)(&mut piece[..n]);
            output.extend_from_slice(&piece[..n]);
            self.emitted += n as u64;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PadTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PadTo")
            .field("target", &self.target)
            .field("emitted", &self.emitted)
            .finish()
    }
}

/// Pass-through stage that requires exactly `n` bytes of input
#[derive(Debug)]
pub struct ExpectLength {
    expected: u64,
    seen: u64,
}

impl ExpectLength {
    pub fn new(expected: u64) -> Self {
        Self { expected, seen: 0 }
    }
}

impl Transform for ExpectLength {
    fn name(&self) -> &'static str {
        "expect-length"
    }

    fn update(&mut self, input: &[u8], output: &mut BytesMut) -> Result<()> {
        self.seen += input.len() as u64;
        if self.seen > self.expected {
            return Err(CryptoError::LengthMismatch {
                expected: self.expected,
                actual: self.seen,
            });
        }
        output.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, _output: &mut BytesMut) -> Result<()> {
        if self.seen != self.expected {
            return Err(CryptoError::LengthMismatch {
                expected: self.expected,
                actual: self.seen,
            });
        }
        Ok(())
    }
}
