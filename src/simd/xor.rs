//! Byte-wise XOR kernels.
//!
//! `xor_into` is the workhorse of both the FEC combiner and the payload
//! masking paths. Every vector backend produces bit-identical results to
//! the scalar reference; the stride is the only difference.

use super::Backend;

/// `dst[i] ^= src[i]` over the common prefix of the two slices.
///
/// The backend is resolved once per process; no allocation, no bounds
/// beyond the slice lengths.
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    let len = dst.len().min(src.len());
    if len == 0 {
        return;
    }
    match super::backends().xor_into {
        #[cfg(target_arch = "x86_64")]
        Backend::Avx512 => unsafe { xor_into_avx512(dst, src, len) },
        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 => unsafe { xor_into_avx2(dst, src, len) },
        #[cfg(target_arch = "x86_64")]
        Backend::Sse2 => unsafe { xor_into_sse2(dst, src, len) },
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => unsafe { xor_into_neon(dst, src, len) },
        _ => xor_into_scalar(dst, src, len),
    }
}

/// Scalar reference: 8-byte unroll over unaligned u64 loads, byte tail.
pub(crate) fn xor_into_scalar(dst: &mut [u8], src: &[u8], len: usize) {
    let mut i = 0;
    while i + 8 <= len {
        let mut d = u64::from_ne_bytes(dst[i..i + 8].try_into().unwrap());
        let s = u64::from_ne_bytes(src[i..i + 8].try_into().unwrap());
        d ^= s;
        dst[i..i + 8].copy_from_slice(&d.to_ne_bytes());
        i += 8;
    }
    while i < len {
        dst[i] ^= src[i];
        i += 1;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn xor_into_avx512(dst: &mut [u8], src: &[u8], len: usize) {
    use std::arch::x86_64::*;
    let mut i = 0;
    let d = dst.as_mut_ptr();
    let s = src.as_ptr();
    while i + 64 <= len {
        let a = _mm512_loadu_si512(d.add(i) as *const _);
        let b = _mm512_loadu_si512(s.add(i) as *const _);
        _mm512_storeu_si512(d.add(i) as *mut _, _mm512_xor_si512(a, b));
        i += 64;
    }
    xor_into_scalar(&mut dst[i..], &src[i..], len - i);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn xor_into_avx2(dst: &mut [u8], src: &[u8], len: usize) {
    use std::arch::x86_64::*;
    let mut i = 0;
    let d = dst.as_mut_ptr();
    let s = src.as_ptr();
    while i + 32 <= len {
        let a = _mm256_loadu_si256(d.add(i) as *const __m256i);
        let b = _mm256_loadu_si256(s.add(i) as *const __m256i);
        _mm256_storeu_si256(d.add(i) as *mut __m256i, _mm256_xor_si256(a, b));
        i += 32;
    }
    xor_into_scalar(&mut dst[i..], &src[i..], len - i);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn xor_into_sse2(dst: &mut [u8], src: &[u8], len: usize) {
    use std::arch::x86_64::*;
    let mut i = 0;
    let d = dst.as_mut_ptr();
    let s = src.as_ptr();
    while i + 16 <= len {
        let a = _mm_loadu_si128(d.add(i) as *const __m128i);
        let b = _mm_loadu_si128(s.add(i) as *const __m128i);
        _mm_storeu_si128(d.add(i) as *mut __m128i, _mm_xor_si128(a, b));
        i += 16;
    }
    xor_into_scalar(&mut dst[i..], &src[i..], len - i);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn xor_into_neon(dst: &mut [u8], src: &[u8], len: usize) {
    use std::arch::aarch64::*;
    let mut i = 0;
    let d = dst.as_mut_ptr();
    let s = src.as_ptr();
    while i + 16 <= len {
        let a = vld1q_u8(d.add(i));
        let b = vld1q_u8(s.add(i));
        vst1q_u8(d.add(i), veorq_u8(a, b));
        i += 16;
    }
    xor_into_scalar(&mut dst[i..], &src[i..], len - i);
}
