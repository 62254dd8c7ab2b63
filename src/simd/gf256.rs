//! GF(2^8) arithmetic over the Rijndael polynomial x^8+x^4+x^3+x^2+1
//! (0x11D in its full form).
//!
//! Scalar paths go through shared log/exp and full product tables,
//! computed once per process. The vector paths split each operand into
//! nibbles and resolve products with two 16-entry shuffles, the tables
//! for which are sliced out of the product table per multiplier.

use super::Backend;
use std::sync::OnceLock;

const GF_ORDER: usize = 256;
const IRREDUCIBLE_POLY: u16 = 0x11D;

pub struct GfTables {
    pub exp: [u8; GF_ORDER * 2],
    pub log: [u8; GF_ORDER],
    pub mul: Box<[[u8; GF_ORDER]; GF_ORDER]>,
}

static TABLES: OnceLock<GfTables> = OnceLock::new();

/// Shared read-only tables, built on first use.
pub fn tables() -> &'static GfTables {
    TABLES.get_or_init(|| {
        let mut exp = [0u8; GF_ORDER * 2];
        let mut log = [0u8; GF_ORDER];
        let mut x: u16 = 1;
        for i in 0..255 {
            exp[i] = x as u8;
            exp[i + 255] = x as u8; // wrap-around so lookups never reduce mod 255
            log[x as usize] = i as u8;
            x <<= 1;
            if x >= 256 {
                x ^= IRREDUCIBLE_POLY;
            }
        }
        let mut mul = Box::new([[0u8; GF_ORDER]; GF_ORDER]);
        for a in 1..GF_ORDER {
            for b in 1..GF_ORDER {
                let sum = log[a] as usize + log[b] as usize;
                mul[a][b] = exp[sum];
            }
        }
        GfTables { exp, log, mul }
    })
}

/// Product of two field elements.
#[inline(always)]
pub fn gf_mul(a: u8, b: u8) -> u8 {
    tables().mul[a as usize][b as usize]
}

/// Multiplicative inverse; 0 has none and maps to 0, matching the
/// table-driven convention of the erasure-code literature.
#[inline(always)]
pub fn gf_inv(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let t = tables();
    t.exp[255 - t.log[a as usize] as usize]
}

/// `a * b + c` in the field.
#[inline(always)]
pub fn gf_mul_add(a: u8, b: u8, c: u8) -> u8 {
    gf_mul(a, b) ^ c
}

/// Elementwise product: `out[i] = a[i] * b[i]` over the common length.
pub fn gf256_mul_vec(a: &[u8], b: &[u8], out: &mut [u8]) {
    let len = a.len().min(b.len()).min(out.len());
    let mul = &tables().mul;
    for i in 0..len {
        out[i] = mul[a[i] as usize][b[i] as usize];
    }
}

/// Elementwise sum: `out[i] = a[i] ^ b[i]`. Same kernel family as
/// `xor_into`, with a separate output buffer.
pub fn gf256_add_vec(a: &[u8], b: &[u8], out: &mut [u8]) {
    let len = a.len().min(b.len()).min(out.len());
    out[..len].copy_from_slice(&a[..len]);
    super::xor::xor_into(&mut out[..len], &b[..len]);
}

/// Scalar product: `out[i] = a[i] * k`.
///
/// Multiplying by zero collapses to a zero fill, by one to a copy; other
/// multipliers dispatch to the nibble-shuffle kernels where available.
pub fn gf256_mul_scalar_vec(a: &[u8], k: u8, out: &mut [u8]) {
    let len = a.len().min(out.len());
    if len == 0 {
        return;
    }
    if k == 0 {
        out[..len].fill(0);
        return;
    }
    if k == 1 {
        out[..len].copy_from_slice(&a[..len]);
        return;
    }
    let row = &tables().mul[k as usize];
    let mut lo = [0u8; 16];
    let mut hi = [0u8; 16];
    for j in 0..16 {
        lo[j] = row[j];
        hi[j] = row[j << 4];
    }
    match super::backends().gf256_mul_scalar_vec {
        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 => unsafe { mul_scalar_avx2(a, out, &lo, &hi, len) },
        #[cfg(target_arch = "x86_64")]
        Backend::Ssse3 => unsafe { mul_scalar_ssse3(a, out, &lo, &hi, len) },
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => unsafe { mul_scalar_neon(a, out, &lo, &hi, len) },
        _ => mul_scalar_scalar(a, out, row, len),
    }
}

pub(crate) fn mul_scalar_scalar(a: &[u8], out: &mut [u8], row: &[u8; 256], len: usize) {
    for i in 0..len {
        out[i] = row[a[i] as usize];
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn mul_scalar_ssse3(a: &[u8], out: &mut [u8], lo: &[u8; 16], hi: &[u8; 16], len: usize) {
    use std::arch::x86_64::*;
    let lo_v = _mm_loadu_si128(lo.as_ptr() as *const __m128i);
    let hi_v = _mm_loadu_si128(hi.as_ptr() as *const __m128i);
    let mask = _mm_set1_epi8(0x0f);
    let mut i = 0;
    while i + 16 <= len {
        let v = _mm_loadu_si128(a.as_ptr().add(i) as *const __m128i);
        let lo_n = _mm_and_si128(v, mask);
        let hi_n = _mm_and_si128(_mm_srli_epi64(v, 4), mask);
        let prod = _mm_xor_si128(_mm_shuffle_epi8(lo_v, lo_n), _mm_shuffle_epi8(hi_v, hi_n));
        _mm_storeu_si128(out.as_mut_ptr().add(i) as *mut __m128i, prod);
        i += 16;
    }
    tail_scalar(a, out, lo, hi, i, len);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn mul_scalar_avx2(a: &[u8], out: &mut [u8], lo: &[u8; 16], hi: &[u8; 16], len: usize) {
    use std::arch::x86_64::*;
    let lo_v = _mm256_broadcastsi128_si256(_mm_loadu_si128(lo.as_ptr() as *const __m128i));
    let hi_v = _mm256_broadcastsi128_si256(_mm_loadu_si128(hi.as_ptr() as *const __m128i));
    let mask = _mm256_set1_epi8(0x0f);
    let mut i = 0;
    while i + 32 <= len {
        let v = _mm256_loadu_si256(a.as_ptr().add(i) as *const __m256i);
        let lo_n = _mm256_and_si256(v, mask);
        let hi_n = _mm256_and_si256(_mm256_srli_epi64(v, 4), mask);
        let prod = _mm256_xor_si256(
            _mm256_shuffle_epi8(lo_v, lo_n),
            _mm256_shuffle_epi8(hi_v, hi_n),
        );
        _mm256_storeu_si256(out.as_mut_ptr().add(i) as *mut __m256i, prod);
        i += 32;
    }
    tail_scalar(a, out, lo, hi, i, len);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn mul_scalar_neon(a: &[u8], out: &mut [u8], lo: &[u8; 16], hi: &[u8; 16], len: usize) {
    use std::arch::aarch64::*;
    let lo_v = vld1q_u8(lo.as_ptr());
    let hi_v = vld1q_u8(hi.as_ptr());
    let mask = vdupq_n_u8(0x0f);
    let mut i = 0;
    while i + 16 <= len {
        let v = vld1q_u8(a.as_ptr().add(i));
        let lo_n = vandq_u8(v, mask);
        let hi_n = vandq_u8(vshrq_n_u8(v, 4), mask);
        let prod = veorq_u8(vqtbl1q_u8(lo_v, lo_n), vqtbl1q_u8(hi_v, hi_n));
        vst1q_u8(out.as_mut_ptr().add(i), prod);
        i += 16;
    }
    tail_scalar(a, out, lo, hi, i, len);
}

/// Finishes the ragged tail with the same nibble decomposition the
/// vector lanes use, keeping outputs bit-identical across backends.
#[allow(dead_code)]
fn tail_scalar(a: &[u8], out: &mut [u8], lo: &[u8; 16], hi: &[u8; 16], from: usize, len: usize) {
    for i in from..len {
        let x = a[i];
        out[i] = lo[(x & 0x0f) as usize] ^ hi[(x >> 4) as usize];
    }
}
