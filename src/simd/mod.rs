// Copyright (c) 2026, The QuicVeil Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # SIMD Dispatcher
//!
//! Runtime CPU feature detection and dispatch of a small set of
//! vectorizable primitives (byte-wise XOR, GF(2^8) arithmetic,
//! AES-128-GCM) to the best implementation the host supports. Detection
//! runs once per process behind a write-once guard; the chosen backend
//! for each primitive is cached so hot loops never consult the detector.

use std::sync::OnceLock;

pub mod aead;
pub mod gf256;
pub mod xor;

pub use aead::{aes128_gcm_decrypt, aes128_gcm_encrypt};
pub use gf256::{gf256_add_vec, gf256_mul_scalar_vec, gf256_mul_vec};
pub use xor::xor_into;

/// CPU features relevant for the dispatched primitives, one bit each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum CpuFeature {
    // x86 / x86_64
    Sse2 = 1 << 0,
    Ssse3 = 1 << 1,
    Sse41 = 1 << 2,
    Sse42 = 1 << 3,
    Avx = 1 << 4,
    Avx2 = 1 << 5,
    Avx512f = 1 << 6,
    Avx512bw = 1 << 7,
    Avx512dq = 1 << 8,
    Avx512vl = 1 << 9,
    Avx512vbmi = 1 << 10,
    AesNi = 1 << 11,
    Pclmulqdq = 1 << 12,
    // aarch64
    Neon = 1 << 16,
    Asimd = 1 << 17,
    Sve = 1 << 18,
    Sve2 = 1 << 19,
    ArmAes = 1 << 20,
    Pmull = 1 << 21,
    Crc = 1 << 22,
    DotProd = 1 << 23,
    Fp16 = 1 << 24,
}

/// Immutable snapshot of the host's capabilities, computed once per
/// process. The raw bitmask is augmented with the derived capabilities
/// the rest of the crate actually branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFeatures {
    bits: u64,
    pub hw_aes: bool,
    pub hw_clmul: bool,
    pub hw_crc32: bool,
    pub wide_vectors: bool,
    pub fp16: bool,
}

impl CpuFeatures {
    pub fn has(&self, feature: CpuFeature) -> bool {
        self.bits & feature as u64 != 0
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Builds a feature set from a raw bitmask, enforcing prerequisite
    /// chains: a feature survives only if every feature it depends on is
    /// present as well. Used by detection and by tests that model hosts
    /// with reduced capabilities.
    pub fn from_bits(raw: u64) -> Self {
        use CpuFeature::*;
        const CHAINS: &[(CpuFeature, CpuFeature)] = &[
            (Ssse3, Sse2),
            (Sse41, Ssse3),
            (Sse42, Sse41),
            (Avx, Sse42),
            (Avx2, Avx),
            (Avx512f, Avx2),
            (Avx512bw, Avx512f),
            (Avx512dq, Avx512f),
            (Avx512vl, Avx512f),
            (Avx512vbmi, Avx512bw),
            (AesNi, Sse2),
            (Pclmulqdq, Sse2),
            (Asimd, Neon),
            (Sve, Neon),
            (Sve2, Sve),
            (ArmAes, Neon),
            (Pmull, Neon),
            (DotProd, Neon),
            (Fp16, Neon),
        ];
        let mut bits = raw;
        // One sweep per chain depth; the longest chain is five deep.
        for _ in 0..5 {
            for &(feat, dep) in CHAINS {
                if bits & feat as u64 != 0 && bits & dep as u64 == 0 {
                    bits &= !(feat as u64);
                }
            }
        }
        Self {
            bits,
            hw_aes: bits & AesNi as u64 != 0 || bits & ArmAes as u64 != 0,
            hw_clmul: bits & Pclmulqdq as u64 != 0 || bits & Pmull as u64 != 0,
            hw_crc32: bits & Sse42 as u64 != 0 || bits & Crc as u64 != 0,
            wide_vectors: bits & Avx2 as u64 != 0
                || bits & Avx512f as u64 != 0
                || bits & Sve as u64 != 0,
            fp16: bits & Fp16 as u64 != 0,
        }
    }
}

/// The dispatched primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    XorInto,
    Gf256MulVec,
    Gf256MulScalarVec,
    Gf256AddVec,
    Aes128GcmEncrypt,
    Aes128GcmDecrypt,
}

/// Implementation backends, ordered roughly by preference. One of these
/// is selected per primitive when the feature set is first read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Avx512,
    Avx2,
    Ssse3,
    Sse2,
    Neon,
    AesNi,
    ArmCrypto,
    Scalar,
}

impl Backend {
    /// Picks the highest-priority backend for `primitive` whose required
    /// feature set is fully available in `features`. Pure so tests can
    /// model arbitrary hosts.
    pub fn select(primitive: Primitive, features: &CpuFeatures) -> Backend {
        use CpuFeature::*;
        match primitive {
            Primitive::XorInto | Primitive::Gf256AddVec => {
                if features.has(Avx512f) {
                    Backend::Avx512
                } else if features.has(Avx2) {
                    Backend::Avx2
                } else if features.has(Sse2) {
                    Backend::Sse2
                } else if features.has(Neon) {
                    Backend::Neon
                } else {
                    Backend::Scalar
                }
            }
            Primitive::Gf256MulScalarVec => {
                if features.has(Avx2) {
                    Backend::Avx2
                } else if features.has(Ssse3) {
                    Backend::Ssse3
                } else if features.has(Neon) {
                    Backend::Neon
                } else {
                    Backend::Scalar
                }
            }
            Primitive::Gf256MulVec => Backend::Scalar,
            Primitive::Aes128GcmEncrypt | Primitive::Aes128GcmDecrypt => {
                if features.has(AesNi) && features.has(Pclmulqdq) {
                    Backend::AesNi
                } else if features.has(ArmAes) && features.has(Pmull) {
                    Backend::ArmCrypto
                } else {
                    Backend::Scalar
                }
            }
        }
    }
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

/// Returns the process-wide feature snapshot, probing the CPU on first
/// use. Thread-safe and idempotent; the standard-library detection
/// macros already gate AVX/AVX-512 on OS XSAVE/XCR0 enablement, so a
/// feature the OS will not save registers for never shows up here.
///
/// Setting `FORCE_SOFTWARE` in the environment reports an empty feature
/// set, pinning every primitive to its scalar reference.
pub fn detect() -> &'static CpuFeatures {
    FEATURES.get_or_init(|| {
        if std::env::var_os("FORCE_SOFTWARE").is_some() {
            log::info!("FORCE_SOFTWARE set, all primitives pinned to scalar");
            return CpuFeatures::from_bits(0);
        }
        let features = CpuFeatures::from_bits(probe());
        crate::telemetry::CPU_FEATURE_MASK.set(features.bits() as i64);
        log::info!(
            "cpu features: {:#x} (hw_aes={} hw_clmul={} wide_vectors={})",
            features.bits(),
            features.hw_aes,
            features.hw_clmul,
            features.wide_vectors
        );
        features
    })
}

#[cfg(target_arch = "x86_64")]
fn probe() -> u64 {
    use CpuFeature::*;
    let mut bits = 0u64;
    let mut set = |cond: bool, f: CpuFeature| {
        if cond {
            bits |= f as u64;
        }
    };
    set(true, Sse2); // baseline on x86_64
    set(std::is_x86_feature_detected!("ssse3"), Ssse3);
    set(std::is_x86_feature_detected!("sse4.1"), Sse41);
    set(std::is_x86_feature_detected!("sse4.2"), Sse42);
    set(std::is_x86_feature_detected!("avx"), Avx);
    set(std::is_x86_feature_detected!("avx2"), Avx2);
    set(std::is_x86_feature_detected!("avx512f"), Avx512f);
    set(std::is_x86_feature_detected!("avx512bw"), Avx512bw);
    set(std::is_x86_feature_detected!("avx512dq"), Avx512dq);
    set(std::is_x86_feature_detected!("avx512vl"), Avx512vl);
    set(std::is_x86_feature_detected!("avx512vbmi"), Avx512vbmi);
    set(std::is_x86_feature_detected!("aes"), AesNi);
    set(std::is_x86_feature_detected!("pclmulqdq"), Pclmulqdq);
    bits
}

#[cfg(target_arch = "aarch64")]
fn probe() -> u64 {
    use CpuFeature::*;
    let mut bits = 0u64;
    let mut set = |cond: bool, f: CpuFeature| {
        if cond {
            bits |= f as u64;
        }
    };
    // AdvSIMD is what the kernel calls ASIMD and Rust calls neon; the
    // two bits travel together.
    set(std::arch::is_aarch64_feature_detected!("neon"), Neon);
    set(std::arch::is_aarch64_feature_detected!("neon"), Asimd);
    set(std::arch::is_aarch64_feature_detected!("sve"), Sve);
    set(std::arch::is_aarch64_feature_detected!("sve2"), Sve2);
    set(std::arch::is_aarch64_feature_detected!("aes"), ArmAes);
    set(std::arch::is_aarch64_feature_detected!("pmull"), Pmull);
    set(std::arch::is_aarch64_feature_detected!("crc"), Crc);
    set(std::arch::is_aarch64_feature_detected!("dotprod"), DotProd);
    set(std::arch::is_aarch64_feature_detected!("fp16"), Fp16);
    bits
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn probe() -> u64 {
    0
}

/// Selected backend per primitive, resolved once from the feature set.
pub struct BackendTable {
    pub xor_into: Backend,
    pub gf256_mul_vec: Backend,
    pub gf256_mul_scalar_vec: Backend,
    pub gf256_add_vec: Backend,
    pub aes128_gcm: Backend,
}

static BACKENDS: OnceLock<BackendTable> = OnceLock::new();

pub fn backends() -> &'static BackendTable {
    BACKENDS.get_or_init(|| {
        let f = detect();
        BackendTable {
            xor_into: Backend::select(Primitive::XorInto, f),
            gf256_mul_vec: Backend::select(Primitive::Gf256MulVec, f),
            gf256_mul_scalar_vec: Backend::select(Primitive::Gf256MulScalarVec, f),
            gf256_add_vec: Backend::select(Primitive::Gf256AddVec, f),
            aes128_gcm: Backend::select(Primitive::Aes128GcmEncrypt, f),
        }
    })
}

/// Reports which backend a primitive resolved to on this host.
pub fn best_backend_for(primitive: Primitive) -> Backend {
    let table = backends();
    match primitive {
        Primitive::XorInto => table.xor_into,
        Primitive::Gf256MulVec => table.gf256_mul_vec,
        Primitive::Gf256MulScalarVec => table.gf256_mul_scalar_vec,
        Primitive::Gf256AddVec => table.gf256_add_vec,
        Primitive::Aes128GcmEncrypt | Primitive::Aes128GcmDecrypt => table.aes128_gcm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_idempotent() {
        let a = detect();
        let b = detect();
        assert_eq!(a, b);
    }

    #[test]
    fn dependency_chain_masks_orphans() {
        // AVX2 without AVX must not survive.
        let f = CpuFeatures::from_bits(CpuFeature::Avx2 as u64);
        assert!(!f.has(CpuFeature::Avx2));
    }

    #[test]
    fn full_chain_survives() {
        let raw = CpuFeature::Sse2 as u64
            | CpuFeature::Ssse3 as u64
            | CpuFeature::Sse41 as u64
            | CpuFeature::Sse42 as u64
            | CpuFeature::Avx as u64
            | CpuFeature::Avx2 as u64;
        let f = CpuFeatures::from_bits(raw);
        assert!(f.has(CpuFeature::Avx2));
        assert!(f.wide_vectors);
    }

    #[test]
    fn aead_falls_back_to_scalar_without_hw_aes() {
        let f = CpuFeatures::from_bits(CpuFeature::Sse2 as u64);
        assert_eq!(
            Backend::select(Primitive::Aes128GcmEncrypt, &f),
            Backend::Scalar
        );
    }

    #[test]
    fn aesni_requires_clmul_companion() {
        let f = CpuFeatures::from_bits(CpuFeature::Sse2 as u64 | CpuFeature::AesNi as u64);
        assert_eq!(
            Backend::select(Primitive::Aes128GcmEncrypt, &f),
            Backend::Scalar
        );
        let f = CpuFeatures::from_bits(
            CpuFeature::Sse2 as u64 | CpuFeature::AesNi as u64 | CpuFeature::Pclmulqdq as u64,
        );
        assert_eq!(
            Backend::select(Primitive::Aes128GcmEncrypt, &f),
            Backend::AesNi
        );
    }

    #[test]
    fn derived_capabilities() {
        let f = CpuFeatures::from_bits(CpuFeature::Neon as u64 | CpuFeature::ArmAes as u64);
        assert!(f.hw_aes);
        assert!(!f.hw_clmul);
    }
}
