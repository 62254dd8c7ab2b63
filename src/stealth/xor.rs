//! Keyed XOR obfuscation.
//!
//! Context-dependent masking over byte buffers. All patterns reduce to
//! byte-level XOR with a deterministically derived mask, so applying the
//! same pattern and context twice restores the original bytes. Egress
//! and ingress keep separate operation counters; paired operations land
//! in the same key epoch on both sides.

use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XorPattern {
    /// Single rotating key, repeated over the buffer.
    Simple,
    /// Several XOR layers with per-layer derived keys.
    Layered,
    /// `key[i % len] ^ (i mod 256)`.
    PositionBased,
    /// SHA-256 keystream bound to key, epoch, and context.
    CryptoSecure,
    /// Context-free positional mask, so masking commutes with XOR
    /// combining: two masked packets XOR to the XOR of the originals.
    FecOptimized,
    /// Key mixed from a hash of the header name.
    HeaderSpecific,
}

#[derive(Debug, Clone)]
pub struct XorConfig {
    pub key_size: usize,
    pub layers: usize,
    /// Operations per key epoch; epochs advance in lockstep on both
    /// directions of a session.
    pub rotation_interval: u64,
    pub enable_rotation: bool,
}

impl Default for XorConfig {
    fn default() -> Self {
        Self {
            key_size: 32,
            layers: 3,
            rotation_interval: 1000,
            enable_rotation: true,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub(crate) fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Cheap deterministic byte generator for mask expansion.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

pub struct XorObfuscator {
    config: XorConfig,
    base_key: Vec<u8>,
    ops_out: u64,
    ops_in: u64,
}

impl XorObfuscator {
    /// Fresh obfuscator with a random session key.
    pub fn new(config: XorConfig) -> Self {
        let mut base_key = vec![0u8; config.key_size.max(16)];
        rand::rngs::OsRng.fill_bytes(&mut base_key);
        Self {
            config,
            base_key,
            ops_out: 0,
            ops_in: 0,
        }
    }

    /// Obfuscator with an agreed key, for sessions where both ends must
    /// derive identical masks.
    pub fn with_key(config: XorConfig, key: &[u8]) -> Self {
        Self {
            config,
            base_key: key.to_vec(),
            ops_out: 0,
            ops_in: 0,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.base_key
    }

    fn epoch(&self, ops: u64) -> u64 {
        if self.config.enable_rotation && self.config.rotation_interval > 0 {
            ops / self.config.rotation_interval
        } else {
            0
        }
    }

    /// Masks `data` in place. Advances the egress operation counter.
    pub fn obfuscate(&mut self, data: &mut [u8], pattern: XorPattern, context: u64) {
        let epoch = self.epoch(self.ops_out);
        self.ops_out += 1;
        self.apply(data, pattern, context, epoch);
    }

    /// Unmasks `data` in place. XOR is involutive, so this is the same
    /// masking keyed off the ingress counter.
    pub fn deobfuscate(&mut self, data: &mut [u8], pattern: XorPattern, context: u64) {
        let epoch = self.epoch(self.ops_in);
        self.ops_in += 1;
        self.apply(data, pattern, context, epoch);
    }

    /// Hands out the epoch for the next egress operation and advances
    /// the counter. Callers that can lose datagrams carry this value on
    /// the wire instead of counting operations in lockstep.
    pub fn egress_epoch(&mut self) -> u64 {
        let epoch = self.epoch(self.ops_out);
        self.ops_out += 1;
        epoch
    }

    /// Masks with an explicit epoch. Involutive for a fixed epoch, no
    /// counter movement.
    pub fn mask_at_epoch(&self, data: &mut [u8], pattern: XorPattern, context: u64, epoch: u64) {
        self.apply(data, pattern, context, epoch);
    }

    /// Obfuscates a header value with a key bound to the header name.
    pub fn obfuscate_header(&mut self, value: &mut [u8], name: &str) {
        self.obfuscate(value, XorPattern::HeaderSpecific, fnv1a(name.as_bytes()));
    }

    pub fn deobfuscate_header(&mut self, value: &mut [u8], name: &str) {
        self.deobfuscate(value, XorPattern::HeaderSpecific, fnv1a(name.as_bytes()));
    }

    fn apply(&self, data: &mut [u8], pattern: XorPattern, context: u64, epoch: u64) {
        if data.is_empty() {
            return;
        }
        match pattern {
            XorPattern::Simple => {
                let key = self.derive_key(context, epoch);
                xor_with_repeating_key(data, &key);
            }
            XorPattern::Layered => {
                for layer in 0..self.config.layers.max(1) as u64 {
                    let key = self.derive_key(context ^ (layer + 1).wrapping_mul(FNV_PRIME), epoch);
                    xor_with_repeating_key(data, &key);
                }
            }
            XorPattern::PositionBased => {
                let key = self.derive_key(context, epoch);
                for (i, b) in data.iter_mut().enumerate() {
                    *b ^= key[i % key.len()] ^ (i & 0xFF) as u8;
                }
            }
            XorPattern::CryptoSecure => {
                let mut counter = 0u64;
                let mut offset = 0;
                while offset < data.len() {
                    let mut hasher = Sha256::new();
                    hasher.update(&self.base_key);
                    hasher.update(context.to_le_bytes());
                    hasher.update(epoch.to_le_bytes());
                    hasher.update(counter.to_le_bytes());
                    let block = hasher.finalize();
                    let take = block.len().min(data.len() - offset);
                    for i in 0..take {
                        data[offset + i] ^= block[i];
                    }
                    offset += take;
                    counter += 1;
                }
            }
            XorPattern::FecOptimized => {
                // No context, no epoch: every packet of the session gets
                // the identical positional mask, which cancels under
                // pairwise XOR and therefore preserves FEC linearity.
                let mut state = fnv1a(&self.base_key);
                let mut i = 0;
                while i < data.len() {
                    let word = splitmix64(&mut state).to_le_bytes();
                    let take = word.len().min(data.len() - i);
                    for j in 0..take {
                        data[i + j] ^= word[j];
                    }
                    i += take;
                }
            }
            XorPattern::HeaderSpecific => {
                // Context already carries the header-name hash; fold it
                // into the key without epoch so values decode regardless
                // of arrival order.
                let key = self.derive_key(context ^ fnv1a(b"header"), 0);
                xor_with_repeating_key(data, &key);
            }
        }
    }

    fn derive_key(&self, context: u64, epoch: u64) -> Vec<u8> {
        let mut state = fnv1a(&self.base_key) ^ context ^ epoch.wrapping_mul(FNV_PRIME);
        let mut key = vec![0u8; self.config.key_size.max(8)];
        let mut i = 0;
        while i < key.len() {
            let word = splitmix64(&mut state).to_le_bytes();
            let take = word.len().min(key.len() - i);
            key[i..i + take].copy_from_slice(&word[..take]);
            i += take;
        }
        key
    }
}

fn xor_with_repeating_key(data: &mut [u8], key: &[u8]) {
    let klen = key.len();
    let mut i = 0;
    // Whole-key strides go through the dispatched kernel.
    while i + klen <= data.len() {
        crate::simd::xor_into(&mut data[i..i + klen], key);
        i += klen;
    }
    for (j, b) in data[i..].iter_mut().enumerate() {
        *b ^= key[j];
    }
}
