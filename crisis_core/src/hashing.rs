use std::hash::Hasher;

/// Deterministic FNV-1a 64-bit digest of simulation state.
///
/// `DefaultHasher` is randomly keyed per process, so world hashes that must
/// match across runs go through this instead.
#[derive(Debug)]
pub struct StateDigest {
    state: u64,
}

impl StateDigest {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    /// Floats are hashed by bit pattern; `-0.0` and `0.0` digest differently.
    pub fn write_f64(&mut self, value: f64) {
        self.write(&value.to_bits().to_le_bytes());
    }

    pub fn write_str(&mut self, value: &str) {
        self.write(value.as_bytes());
        self.write(&[0xff]);
    }

    pub fn write_index(&mut self, value: usize) {
        self.write(&(value as u64).to_le_bytes());
    }
}

impl Default for StateDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StateDigest {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}
