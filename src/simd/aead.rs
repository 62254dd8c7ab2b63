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

//! # AES-128-GCM
//!
//! Authenticated encryption with three block-cipher backends: a pure
//! software reference, AES-NI, and ARMv8 Crypto. The key schedule and the
//! GHASH authenticator are shared; every backend produces bit-identical
//! output. The 96-bit IV form of GCM is the only one supported; other
//! IV lengths are a caller error, not a derivation path.

use crate::error::CoreError;
use super::Backend;

const BLOCK: usize = 16;
pub const TAG_LEN: usize = 16;

#[rustfmt::skip]
const SBOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

const RCON: [u8; 10] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1B, 0x36];

/// AES-128 with runtime-selected block backend. The key schedule is
/// computed in software once; the hardware paths consume the same round
/// keys, so all three backends agree byte for byte.
struct Aes128 {
    round_keys: [[u8; BLOCK]; 11],
    backend: Backend,
}

impl Aes128 {
    fn new(key: &[u8; 16]) -> Self {
        Self {
            round_keys: expand_key(key),
            backend: super::backends().aes128_gcm,
        }
    }

    #[inline]
    fn encrypt_block(&self, block: &mut [u8; BLOCK]) {
        match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::AesNi => unsafe { encrypt_block_aesni(&self.round_keys, block) },
            #[cfg(target_arch = "aarch64")]
            Backend::ArmCrypto => unsafe { encrypt_block_armv8(&self.round_keys, block) },
            _ => encrypt_block_soft(&self.round_keys, block),
        }
    }
}

fn expand_key(key: &[u8; 16]) -> [[u8; BLOCK]; 11] {
    let mut w = [[0u8; 4]; 44];
    for i in 0..4 {
        w[i].copy_from_slice(&key[i * 4..i * 4 + 4]);
    }
    for i in 4..44 {
        let mut t = w[i - 1];
        if i % 4 == 0 {
            t = [
                SBOX[t[1] as usize] ^ RCON[i / 4 - 1],
                SBOX[t[2] as usize],
                SBOX[t[3] as usize],
                SBOX[t[0] as usize],
            ];
        }
        for j in 0..4 {
            w[i][j] = w[i - 4][j] ^ t[j];
        }
    }
    let mut rk = [[0u8; BLOCK]; 11];
    for r in 0..11 {
        for c in 0..4 {
            rk[r][c * 4..c * 4 + 4].copy_from_slice(&w[r * 4 + c]);
        }
    }
    rk
}

#[inline(always)]
fn xtime(a: u8) -> u8 {
    (a << 1) ^ (((a >> 7) & 1) * 0x1B)
}

fn encrypt_block_soft(rk: &[[u8; BLOCK]; 11], block: &mut [u8; BLOCK]) {
    let mut s = *block;
    for i in 0..BLOCK {
        s[i] ^= rk[0][i];
    }
    for round in 1..10 {
        sub_shift(&mut s);
        mix_columns(&mut s);
        for i in 0..BLOCK {
            s[i] ^= rk[round][i];
        }
    }
    sub_shift(&mut s);
    for i in 0..BLOCK {
        s[i] ^= rk[10][i];
    }
    *block = s;
}

/// SubBytes and ShiftRows fused. State bytes live in column order:
/// s[r + 4c] is row r, column c.
fn sub_shift(s: &mut [u8; BLOCK]) {
    let t = *s;
    for c in 0..4 {
        for r in 0..4 {
            s[r + 4 * c] = SBOX[t[r + 4 * ((c + r) % 4)] as usize];
        }
    }
}

fn mix_columns(s: &mut [u8; BLOCK]) {
    for c in 0..4 {
        let a0 = s[4 * c];
        let a1 = s[4 * c + 1];
        let a2 = s[4 * c + 2];
        let a3 = s[4 * c + 3];
        s[4 * c] = xtime(a0) ^ xtime(a1) ^ a1 ^ a2 ^ a3;
        s[4 * c + 1] = a0 ^ xtime(a1) ^ xtime(a2) ^ a2 ^ a3;
        s[4 * c + 2] = a0 ^ a1 ^ xtime(a2) ^ xtime(a3) ^ a3;
        s[4 * c + 3] = xtime(a0) ^ a0 ^ a1 ^ a2 ^ xtime(a3);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "aes", enable = "sse2")]
unsafe fn encrypt_block_aesni(rk: &[[u8; BLOCK]; 11], block: &mut [u8; BLOCK]) {
    use std::arch::x86_64::*;
    let mut b = _mm_loadu_si128(block.as_ptr() as *const __m128i);
    b = _mm_xor_si128(b, _mm_loadu_si128(rk[0].as_ptr() as *const __m128i));
    for key in rk.iter().take(10).skip(1) {
        b = _mm_aesenc_si128(b, _mm_loadu_si128(key.as_ptr() as *const __m128i));
    }
    b = _mm_aesenclast_si128(b, _mm_loadu_si128(rk[10].as_ptr() as *const __m128i));
    _mm_storeu_si128(block.as_mut_ptr() as *mut __m128i, b);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "aes")]
unsafe fn encrypt_block_armv8(rk: &[[u8; BLOCK]; 11], block: &mut [u8; BLOCK]) {
    use std::arch::aarch64::*;
    let mut b = vld1q_u8(block.as_ptr());
    for key in rk.iter().take(9) {
        b = vaesmcq_u8(vaeseq_u8(b, vld1q_u8(key.as_ptr())));
    }
    b = vaeseq_u8(b, vld1q_u8(rk[9].as_ptr()));
    b = veorq_u8(b, vld1q_u8(rk[10].as_ptr()));
    vst1q_u8(block.as_mut_ptr(), b);
}

/// GF(2^128) product in GCM's reflected bit order, as laid out in the
/// NIST SP 800-38D reference algorithm.
fn gf128_mul(x: &[u8; BLOCK], y: &[u8; BLOCK]) -> [u8; BLOCK] {
    let mut z = [0u8; BLOCK];
    let mut v = *y;
    for i in 0..BLOCK {
        for bit in (0..8).rev() {
            if (x[i] >> bit) & 1 == 1 {
                for j in 0..BLOCK {
                    z[j] ^= v[j];
                }
            }
            let lsb = v[15] & 1;
            for j in (1..BLOCK).rev() {
                v[j] = (v[j] >> 1) | (v[j - 1] << 7);
            }
            v[0] >>= 1;
            if lsb == 1 {
                v[0] ^= 0xE1;
            }
        }
    }
    z
}

struct Ghash {
    h: [u8; BLOCK],
    y: [u8; BLOCK],
}

impl Ghash {
    fn new(h: [u8; BLOCK]) -> Self {
        Self { h, y: [0u8; BLOCK] }
    }

    /// Absorbs `data`, zero-padding the final partial block.
    fn update_padded(&mut self, data: &[u8]) {
        for chunk in data.chunks(BLOCK) {
            let mut block = [0u8; BLOCK];
            block[..chunk.len()].copy_from_slice(chunk);
            for j in 0..BLOCK {
                self.y[j] ^= block[j];
            }
            self.y = gf128_mul(&self.y, &self.h);
        }
    }

    fn finalize(mut self, aad_len: usize, ct_len: usize) -> [u8; BLOCK] {
        let mut lens = [0u8; BLOCK];
        lens[..8].copy_from_slice(&((aad_len as u64) * 8).to_be_bytes());
        lens[8..].copy_from_slice(&((ct_len as u64) * 8).to_be_bytes());
        for j in 0..BLOCK {
            self.y[j] ^= lens[j];
        }
        gf128_mul(&self.y, &self.h)
    }
}

#[inline]
fn inc32(block: &mut [u8; BLOCK]) {
    let ctr = u32::from_be_bytes(block[12..].try_into().unwrap()).wrapping_add(1);
    block[12..].copy_from_slice(&ctr.to_be_bytes());
}

fn check_params(key: &[u8], iv: &[u8], tag_len: usize) -> Result<[u8; 16], CoreError> {
    if key.len() != 16 {
        return Err(CoreError::InvalidInput(format!(
            "aes128-gcm key must be 16 bytes, got {}",
            key.len()
        )));
    }
    if iv.len() != 12 {
        return Err(CoreError::InvalidInput(format!(
            "aes128-gcm iv must be 12 bytes, got {}",
            iv.len()
        )));
    }
    if tag_len < 12 || tag_len > TAG_LEN {
        return Err(CoreError::InvalidInput(format!(
            "tag length {} outside 12..=16",
            tag_len
        )));
    }
    Ok(key.try_into().unwrap())
}

/// Keystream application shared by both directions: CTR mode starting at
/// inc32(J0).
fn ctr_apply(aes: &Aes128, j0: &[u8; BLOCK], input: &[u8], out: &mut Vec<u8>) {
    let mut ctr = *j0;
    for chunk in input.chunks(BLOCK) {
        inc32(&mut ctr);
        let mut ks = ctr;
        aes.encrypt_block(&mut ks);
        let at = out.len();
        out.extend_from_slice(chunk);
        super::xor::xor_into(&mut out[at..], &ks[..chunk.len()]);
    }
}

/// Encrypts `plaintext` and returns `ciphertext || tag`.
pub fn aes128_gcm_encrypt(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag_len: usize,
) -> Result<Vec<u8>, CoreError> {
    let key = check_params(key, iv, tag_len)?;
    let aes = Aes128::new(&key);

    let mut h = [0u8; BLOCK];
    aes.encrypt_block(&mut h);

    let mut j0 = [0u8; BLOCK];
    j0[..12].copy_from_slice(iv);
    j0[15] = 1;

    let mut out = Vec::with_capacity(plaintext.len() + tag_len);
    ctr_apply(&aes, &j0, plaintext, &mut out);

    let mut ghash = Ghash::new(h);
    ghash.update_padded(aad);
    ghash.update_padded(&out);
    let s = ghash.finalize(aad.len(), out.len());

    let mut tag = j0;
    aes.encrypt_block(&mut tag);
    for j in 0..BLOCK {
        tag[j] ^= s[j];
    }
    out.extend_from_slice(&tag[..tag_len]);
    Ok(out)
}

/// Decrypts `ciphertext || tag`. The tag is verified before any
/// plaintext leaves this function; a mismatch yields `AuthFailure` and
/// nothing else.
pub fn aes128_gcm_decrypt(
    data: &[u8],
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag_len: usize,
) -> Result<Vec<u8>, CoreError> {
    let key = check_params(key, iv, tag_len)?;
    if data.len() < tag_len {
        return Err(CoreError::InvalidInput(
            "ciphertext shorter than tag".to_string(),
        ));
    }
    let (ciphertext, tag) = data.split_at(data.len() - tag_len);
    let aes = Aes128::new(&key);

    let mut h = [0u8; BLOCK];
    aes.encrypt_block(&mut h);

    let mut j0 = [0u8; BLOCK];
    j0[..12].copy_from_slice(iv);
    j0[15] = 1;

    let mut ghash = Ghash::new(h);
    ghash.update_padded(aad);
    ghash.update_padded(ciphertext);
    let s = ghash.finalize(aad.len(), ciphertext.len());

    let mut expected = j0;
    aes.encrypt_block(&mut expected);
    for j in 0..BLOCK {
        expected[j] ^= s[j];
    }

    // Constant-time comparison over the truncated tag.
    let mut diff = 0u8;
    for j in 0..tag_len {
        diff |= expected[j] ^ tag[j];
    }
    if diff != 0 {
        return Err(CoreError::AuthFailure);
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    ctr_apply(&aes, &j0, ciphertext, &mut out);
    Ok(out)
}
