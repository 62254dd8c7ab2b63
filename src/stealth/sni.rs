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

//! # SNI / ClientHello rewriting
//!
//! Parses TLS handshake records of type ClientHello and rewrites the
//! server_name extension: domain fronting, random subdomain padding,
//! omission, midpoint split, and ECH injection. Every rewrite keeps the
//! three nested length fields (record, handshake, extensions) mutually
//! consistent; any record that fails to re-parse afterwards is a bug,
//! not an output.

use crate::error::CoreError;
use crate::stealth::browser::Fingerprint;
use rand::Rng;
use sha2::{Digest, Sha256};

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_ECH: u16 = 0xfe0d;

const RECORD_HEADER: usize = 5;
const HANDSHAKE_HEADER: usize = 4;

/// Offsets of the variable-length fields inside a parsed ClientHello.
#[derive(Debug, Clone, Copy)]
pub struct ClientHelloView {
    pub record_len: usize,
    pub handshake_len: usize,
    pub session_id_len: usize,
    pub cipher_len: usize,
    pub compression_len: usize,
    /// Offset of the two-byte extensions length field.
    pub ext_len_offset: usize,
    pub extensions_len: usize,
}

fn read_u16(buf: &[u8], at: usize) -> usize {
    ((buf[at] as usize) << 8) | buf[at + 1] as usize
}

fn write_u16(buf: &mut [u8], at: usize, v: usize) {
    buf[at] = ((v >> 8) & 0xFF) as u8;
    buf[at + 1] = (v & 0xFF) as u8;
}

fn write_u24(buf: &mut [u8], at: usize, v: usize) {
    buf[at] = ((v >> 16) & 0xFF) as u8;
    buf[at + 1] = ((v >> 8) & 0xFF) as u8;
    buf[at + 2] = (v & 0xFF) as u8;
}

/// Parses and validates the framing of a ClientHello record.
pub fn parse_client_hello(buf: &[u8]) -> Result<ClientHelloView, CoreError> {
    if buf.len() < 43 {
        return Err(CoreError::InvalidInput("record too short".to_string()));
    }
    if buf[0] != 0x16 {
        return Err(CoreError::InvalidInput(
            "not a TLS handshake record".to_string(),
        ));
    }
    if buf[5] != 0x01 {
        return Err(CoreError::InvalidInput("not a ClientHello".to_string()));
    }
    let record_len = read_u16(buf, 3);
    let handshake_len =
        ((buf[6] as usize) << 16) | ((buf[7] as usize) << 8) | buf[8] as usize;
    if record_len != handshake_len + HANDSHAKE_HEADER {
        return Err(CoreError::InvalidInput(
            "record and handshake lengths disagree".to_string(),
        ));
    }
    if buf.len() != RECORD_HEADER + record_len {
        return Err(CoreError::InvalidInput(
            "record length does not match buffer".to_string(),
        ));
    }

    // client version (2) + random (32)
    let mut offset = RECORD_HEADER + HANDSHAKE_HEADER + 34;
    if offset >= buf.len() {
        return Err(CoreError::InvalidInput("truncated ClientHello".to_string()));
    }
    let session_id_len = buf[offset] as usize;
    offset += 1 + session_id_len;
    if offset + 2 > buf.len() {
        return Err(CoreError::InvalidInput("truncated session id".to_string()));
    }
    let cipher_len = read_u16(buf, offset);
    offset += 2 + cipher_len;
    if offset + 1 > buf.len() {
        return Err(CoreError::InvalidInput("truncated cipher suites".to_string()));
    }
    let compression_len = buf[offset] as usize;
    offset += 1 + compression_len;
    if offset + 2 > buf.len() {
        return Err(CoreError::InvalidInput(
            "truncated compression methods".to_string(),
        ));
    }
    let ext_len_offset = offset;
    let extensions_len = read_u16(buf, ext_len_offset);
    offset += 2;
    if offset + extensions_len != buf.len() {
        return Err(CoreError::InvalidInput(
            "extensions length does not reach end of record".to_string(),
        ));
    }
    let body = 2 + 32 + 1 + session_id_len + 2 + cipher_len + 1 + compression_len + 2
        + extensions_len;
    if body != handshake_len {
        return Err(CoreError::InvalidInput(
            "handshake body length inconsistent".to_string(),
        ));
    }

    Ok(ClientHelloView {
        record_len,
        handshake_len,
        session_id_len,
        cipher_len,
        compression_len,
        ext_len_offset,
        extensions_len,
    })
}

/// Locates an extension. Returns the offset of its type field and its
/// data length.
pub fn find_extension(buf: &[u8], view: &ClientHelloView, ext_type: u16) -> Option<(usize, usize)> {
    let mut offset = view.ext_len_offset + 2;
    let end = offset + view.extensions_len;
    while offset + 4 <= end {
        let t = read_u16(buf, offset) as u16;
        let len = read_u16(buf, offset + 2);
        if t == ext_type {
            return Some((offset, len));
        }
        offset += 4 + len;
    }
    None
}

/// Restates the record and handshake lengths from the buffer length.
fn fix_outer_lengths(buf: &mut [u8]) {
    let record_len = buf.len() - RECORD_HEADER;
    write_u16(buf, 3, record_len);
    write_u24(buf, 6, record_len - HANDSHAKE_HEADER);
}

/// Reads the SNI host bytes. The extension data is a server-name list
/// with a single host_name entry.
pub fn sni_host(buf: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
    let view = parse_client_hello(buf)?;
    let Some((ext, _)) = find_extension(buf, &view, EXT_SERVER_NAME) else {
        return Ok(None);
    };
    let name_len = read_u16(buf, ext + 7);
    let host_at = ext + 9;
    if host_at + name_len > buf.len() {
        return Err(CoreError::InvalidInput("SNI host truncated".to_string()));
    }
    Ok(Some(buf[host_at..host_at + name_len].to_vec()))
}

/// Replaces the SNI host with `new_host`, adjusting every enclosing
/// length field. Records without an SNI extension pass through intact.
pub fn replace_sni(hello: &[u8], new_host: &[u8]) -> Result<Vec<u8>, CoreError> {
    let view = parse_client_hello(hello)?;
    let Some((ext, ext_data_len)) = find_extension(hello, &view, EXT_SERVER_NAME) else {
        return Ok(hello.to_vec());
    };
    let old_len = read_u16(hello, ext + 7);
    let host_at = ext + 9;
    if host_at + old_len > hello.len() {
        return Err(CoreError::InvalidInput("SNI host truncated".to_string()));
    }

    let mut out = Vec::with_capacity(hello.len() + new_host.len());
    out.extend_from_slice(&hello[..host_at]);
    out.extend_from_slice(new_host);
    out.extend_from_slice(&hello[host_at + old_len..]);

    let delta = new_host.len() as isize - old_len as isize;
    write_u16(&mut out, ext + 7, (old_len as isize + delta) as usize);
    let list_len = read_u16(hello, ext + 4);
    write_u16(&mut out, ext + 4, (list_len as isize + delta) as usize);
    write_u16(&mut out, ext + 2, (ext_data_len as isize + delta) as usize);
    write_u16(
        &mut out,
        view.ext_len_offset,
        (view.extensions_len as isize + delta) as usize,
    );
    fix_outer_lengths(&mut out);
    Ok(out)
}

/// Prepends a random lowercase-alphanumeric subdomain of 5 to 10
/// characters to the SNI host.
pub fn pad_sni(hello: &[u8]) -> Result<Vec<u8>, CoreError> {
    let Some(host) = sni_host(hello)? else {
        return Ok(hello.to_vec());
    };
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let prefix_len = rng.gen_range(5..=10);
    let mut padded = Vec::with_capacity(prefix_len + 1 + host.len());
    for _ in 0..prefix_len {
        padded.push(CHARSET[rng.gen_range(0..CHARSET.len())]);
    }
    padded.push(b'.');
    padded.extend_from_slice(&host);
    replace_sni(hello, &padded)
}

/// Drops the server_name extension entirely.
pub fn omit_sni(hello: &[u8]) -> Result<Vec<u8>, CoreError> {
    let view = parse_client_hello(hello)?;
    let Some((ext, ext_data_len)) = find_extension(hello, &view, EXT_SERVER_NAME) else {
        return Ok(hello.to_vec());
    };
    let total = 4 + ext_data_len;
    let mut out = Vec::with_capacity(hello.len() - total);
    out.extend_from_slice(&hello[..ext]);
    out.extend_from_slice(&hello[ext + total..]);
    write_u16(&mut out, view.ext_len_offset, view.extensions_len - total);
    fix_outer_lengths(&mut out);
    Ok(out)
}

/// Inserts a single NUL byte at the midpoint of the SNI host label, a
/// stand-in for transport-level fragmentation of the name.
pub fn split_sni(hello: &[u8]) -> Result<Vec<u8>, CoreError> {
    let Some(host) = sni_host(hello)? else {
        return Ok(hello.to_vec());
    };
    let mut split = Vec::with_capacity(host.len() + 1);
    let mid = host.len() / 2;
    split.extend_from_slice(&host[..mid]);
    split.push(0x00);
    split.extend_from_slice(&host[mid..]);
    replace_sni(hello, &split)
}

/// Appends an Encrypted-Client-Hello extension (type 0xfe0d) sealing
/// `real_host` against the configured ECH config. The seal keystream is
/// derived from the config and a fresh encapsulation nonce; without a
/// config the record passes through untouched.
pub fn apply_ech(hello: &[u8], ech_config: &[u8], real_host: &[u8]) -> Result<Vec<u8>, CoreError> {
    if ech_config.is_empty() {
        return Ok(hello.to_vec());
    }
    let view = parse_client_hello(hello)?;

    let mut enc = [0u8; 32];
    rand::thread_rng().fill(&mut enc[..]);

    let mut sealed = real_host.to_vec();
    seal_keystream(ech_config, &enc, &mut sealed);

    let mut payload = Vec::with_capacity(7 + enc.len() + 2 + sealed.len());
    payload.push(config_id(ech_config));
    payload.extend_from_slice(&0x0001u16.to_be_bytes()); // HKDF-SHA256
    payload.extend_from_slice(&0x0001u16.to_be_bytes()); // AES-128-GCM
    payload.extend_from_slice(&(enc.len() as u16).to_be_bytes());
    payload.extend_from_slice(&enc);
    payload.extend_from_slice(&(sealed.len() as u16).to_be_bytes());
    payload.extend_from_slice(&sealed);

    let mut out = hello.to_vec();
    out.extend_from_slice(&EXT_ECH.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(&payload);
    write_u16(
        &mut out,
        view.ext_len_offset,
        view.extensions_len + 4 + payload.len(),
    );
    fix_outer_lengths(&mut out);
    Ok(out)
}

/// One-byte identifier a server uses to pick the config that was sealed
/// against.
pub fn config_id(ech_config: &[u8]) -> u8 {
    let digest = Sha256::digest(ech_config);
    digest[0]
}

/// XOR keystream bound to the config's key material and the
/// encapsulation nonce. Involutive, so the holder of the config can
/// unseal with the same call.
pub fn seal_keystream(ech_config: &[u8], enc: &[u8], data: &mut [u8]) {
    let mut counter = 0u64;
    let mut offset = 0;
    while offset < data.len() {
        let mut hasher = Sha256::new();
        hasher.update(ech_config);
        hasher.update(enc);
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

/// Builds a ClientHello record shaped by a browser fingerprint: its
/// cipher ordering, its extension ordering, and the given SNI host.
/// Extensions the fingerprint lists but this builder has no payload for
/// are emitted empty, which keeps the on-wire ordering intact.
pub fn synthesize_client_hello(fp: &Fingerprint, host: &str) -> Vec<u8> {
    let mut rng = rand::thread_rng();

    let mut body = Vec::with_capacity(256 + host.len());
    body.extend_from_slice(&[0x03, 0x03]); // legacy client version
    let mut random = [0u8; 32];
    rng.fill(&mut random[..]);
    body.extend_from_slice(&random);

    let mut session_id = [0u8; 32];
    rng.fill(&mut session_id[..]);
    body.push(32);
    body.extend_from_slice(&session_id);

    body.extend_from_slice(&((fp.cipher_suites.len() * 2) as u16).to_be_bytes());
    for suite in &fp.cipher_suites {
        body.extend_from_slice(&suite.to_be_bytes());
    }
    body.push(1); // one compression method: null
    body.push(0);

    let mut extensions = Vec::new();
    for &ext_type in &fp.extension_order {
        let data = match ext_type {
            EXT_SERVER_NAME => {
                let mut d = Vec::with_capacity(host.len() + 5);
                d.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
                d.push(0); // host_name
                d.extend_from_slice(&(host.len() as u16).to_be_bytes());
                d.extend_from_slice(host.as_bytes());
                d
            }
            10 => {
                let mut d = Vec::new();
                d.extend_from_slice(&((fp.supported_groups.len() * 2) as u16).to_be_bytes());
                for g in &fp.supported_groups {
                    d.extend_from_slice(&g.to_be_bytes());
                }
                d
            }
            13 => {
                let mut d = Vec::new();
                d.extend_from_slice(&((fp.signature_algs.len() * 2) as u16).to_be_bytes());
                for s in &fp.signature_algs {
                    d.extend_from_slice(&s.to_be_bytes());
                }
                d
            }
            16 => {
                let mut names = Vec::new();
                for proto in &fp.alpn {
                    names.push(proto.len() as u8);
                    names.extend_from_slice(proto.as_bytes());
                }
                let mut d = Vec::with_capacity(names.len() + 2);
                d.extend_from_slice(&(names.len() as u16).to_be_bytes());
                d.extend_from_slice(&names);
                d
            }
            43 => vec![0x02, 0x03, 0x04], // supported_versions: TLS 1.3
            45 => vec![0x01, 0x01],       // psk_ke_modes: psk_dhe_ke
            _ => Vec::new(),
        };
        extensions.extend_from_slice(&(ext_type).to_be_bytes());
        extensions.extend_from_slice(&(data.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&data);
    }
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut out = Vec::with_capacity(body.len() + 9);
    out.push(0x16);
    out.extend_from_slice(&[0x03, 0x01]);
    out.extend_from_slice(&((body.len() + HANDSHAKE_HEADER) as u16).to_be_bytes());
    out.push(0x01);
    let mut len24 = [0u8; 3];
    len24[0] = ((body.len() >> 16) & 0xFF) as u8;
    len24[1] = ((body.len() >> 8) & 0xFF) as u8;
    len24[2] = (body.len() & 0xFF) as u8;
    out.extend_from_slice(&len24);
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::browser::BrowserProfile;

    fn hello(host: &str) -> Vec<u8> {
        let fp = Fingerprint::for_profile(BrowserProfile::ChromeWin);
        synthesize_client_hello(&fp, host)
    }

    #[test]
    fn synthesized_hello_parses() {
        let h = hello("example.com");
        let view = parse_client_hello(&h).unwrap();
        assert_eq!(view.record_len, view.handshake_len + 4);
        assert_eq!(sni_host(&h).unwrap().unwrap(), b"example.com");
    }

    #[test]
    fn replace_adjusts_all_three_lengths() {
        let h = hello("example.com");
        let before = parse_client_hello(&h).unwrap();
        let out = replace_sni(&h, b"www.cloudflare.com").unwrap();
        let after = parse_client_hello(&out).unwrap();
        // |www.cloudflare.com| - |example.com| = 7
        assert_eq!(after.record_len, before.record_len + 7);
        assert_eq!(after.handshake_len, before.handshake_len + 7);
        assert_eq!(after.extensions_len, before.extensions_len + 7);
        assert_eq!(sni_host(&out).unwrap().unwrap(), b"www.cloudflare.com");
    }

    #[test]
    fn replace_same_length_is_in_place() {
        let h = hello("example.com");
        let out = replace_sni(&h, b"example.org").unwrap();
        assert_eq!(out.len(), h.len());
        assert_eq!(sni_host(&out).unwrap().unwrap(), b"example.org");
    }

    #[test]
    fn padding_prefixes_subdomain() {
        let h = hello("example.com");
        let out = pad_sni(&h).unwrap();
        parse_client_hello(&out).unwrap();
        let host = sni_host(&out).unwrap().unwrap();
        assert!(host.ends_with(b".example.com"));
        let prefix_len = host.len() - ".example.com".len();
        assert!((5..=10).contains(&prefix_len), "prefix {}", prefix_len);
    }

    #[test]
    fn omission_removes_extension() {
        let h = hello("example.com");
        let out = omit_sni(&h).unwrap();
        let view = parse_client_hello(&out).unwrap();
        assert!(find_extension(&out, &view, EXT_SERVER_NAME).is_none());
    }

    #[test]
    fn split_inserts_single_nul() {
        let h = hello("example.com");
        let out = split_sni(&h).unwrap();
        parse_client_hello(&out).unwrap();
        let host = sni_host(&out).unwrap().unwrap();
        assert_eq!(host.len(), "example.com".len() + 1);
        assert_eq!(host.iter().filter(|&&b| b == 0).count(), 1);
    }

    #[test]
    fn ech_appends_and_keeps_framing() {
        let h = hello("example.com");
        let config = b"dummy-ech-config-with-key-material".to_vec();
        let out = apply_ech(&h, &config, b"secret.example.com").unwrap();
        let view = parse_client_hello(&out).unwrap();
        let (off, len) = find_extension(&out, &view, EXT_ECH).unwrap();
        assert!(len > 7);
        // The sealed payload must not leak the real host in the clear.
        let data = &out[off + 4..off + 4 + len];
        assert!(!data
            .windows(b"secret.example.com".len())
            .any(|w| w == b"secret.example.com"));
    }

    #[test]
    fn ech_without_config_is_identity() {
        let h = hello("example.com");
        assert_eq!(apply_ech(&h, &[], b"x").unwrap(), h);
    }

    #[test]
    fn seal_is_involutive() {
        let config = b"cfg";
        let enc = [7u8; 32];
        let mut data = b"secret.example.com".to_vec();
        seal_keystream(config, &enc, &mut data);
        assert_ne!(&data, b"secret.example.com");
        seal_keystream(config, &enc, &mut data);
        assert_eq!(&data, b"secret.example.com");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_client_hello(&[0u8; 10]).is_err());
        let mut h = hello("example.com");
        h[3] ^= 0x40; // corrupt record length
        assert!(parse_client_hello(&h).is_err());
    }
}
