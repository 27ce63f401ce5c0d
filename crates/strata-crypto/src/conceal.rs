//! Size concealment
//!
//! Stored objects reveal their length, so file bodies are padded up to a
//! coarser "concealed" size before framing. The rounding quantum grows with the
//! file: 16 bytes for small files, otherwise 1/64 of the largest power of two
//! not above the size, which keeps the padding overhead at or below ~1.56%.
//! Everything is integer arithmetic on the bit length.

use crate::{keystream::CtrStage, keys::FileKey, random::RandomSource, stream::PadTo};

/// Smallest rounding quantum (and the concealed size of an empty file)
pub const MIN_QUANTUM: u64 = 16;

/// Below this size the quantum is fixed at [`MIN_QUANTUM`]
pub const QUANTUM_THRESHOLD: u64 = 1024;

const QUANTUM_SHIFT: u32 = 6;

/// Rounding quantum used to conceal a length of `n` bytes
pub fn concealment_quantum(n: u64) -> u64 {
    if n < QUANTUM_THRESHOLD {
        return MIN_QUANTUM;
    }
    let largest_pow2 = 1u64 << (63 - n.leading_zeros());
    (largest_pow2 >> QUANTUM_SHIFT).max(MIN_QUANTUM)
}

/// Padded length for a true length of `n` bytes; never less than `n`
pub fn conceal_size(n: u64) -> u64 {
    let quantum = concealment_quantum(n);
    n.max(1).div_ceil(quantum) * quantum
}

/// Keystream-backed generator of padding bytes
///
/// The key is drawn from the injected random source, so padding is
/// indistinguishable from ciphertext in production and reproducible under a
/// seeded source in tests.
pub struct PaddingSource {
    keystream: CtrStage,
}

impl PaddingSource {
    pub fn new(rng: &dyn RandomSource) -> Self {
        let key = FileKey::generate(rng);
        Self {
            keystream: CtrStage::new(&key, 0),
        }
    }

    /// Overwrite `buf` with padding bytes
    pub fn fill(&mut self, buf: &mut [u8]) {
        self.keystream.fill_keystream(buf);
    }
}

/// Stage that appends padding after exactly `size` real bytes
pub fn padding_stage(size: u64, rng: &dyn RandomSource) -> PadTo {
    let mut source = PaddingSource::new(rng);
    PadTo::with_filler(conceal_size(size), move |buf: &mut [u8]| source.fill(buf))
}
