//! HTTP/3 masquerade.
//!
//! Prepends a small, legitimate-looking request header block to outgoing
//! datagrams when the stealth level asks for it. Headers come from the
//! active browser fingerprint and are QPACK-encoded (literal field lines
//! with literal names, no dynamic table), so the block is valid HTTP/3
//! header framing to a DPI box while the receiving governor strips it
//! byte-exactly. Real pseudo-headers of the tunneled protocol are never
//! rewritten; the block is pure decoy.

use crate::error::CoreError;
use crate::stealth::browser::Fingerprint;
use rand::seq::SliceRandom;
use rand::Rng;

const PATHS: &[&str] = &[
    "/",
    "/index.html",
    "/assets/app.js",
    "/api/v1/status",
    "/static/css/main.css",
    "/favicon.ico",
];

const CACHE_CONTROL: &[&str] = &["no-cache", "max-age=0", "no-store"];

/// Encodes an integer with an N-bit prefix (RFC 7541 §5.1).
fn encode_prefixed_int(out: &mut Vec<u8>, prefix_bits: u8, first_byte: u8, mut value: usize) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(first_byte | value as u8);
        return;
    }
    out.push(first_byte | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.push((value % 128 + 128) as u8);
        value /= 128;
    }
    out.push(value as u8);
}

fn decode_prefixed_int(
    buf: &[u8],
    at: &mut usize,
    prefix_bits: u8,
) -> Result<usize, CoreError> {
    if *at >= buf.len() {
        return Err(CoreError::InvalidInput("qpack integer truncated".to_string()));
    }
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (buf[*at] & max_prefix as u8) as usize;
    *at += 1;
    if value < max_prefix {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        if *at >= buf.len() {
            return Err(CoreError::InvalidInput("qpack integer truncated".to_string()));
        }
        let b = buf[*at];
        *at += 1;
        value += ((b & 0x7F) as usize) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 28 {
            return Err(CoreError::InvalidInput("qpack integer overflow".to_string()));
        }
    }
}

/// Literal field line with literal name, no huffman: 001N=0 pattern
/// with a 3-bit name length prefix, then the value with a 7-bit prefix.
fn encode_field(out: &mut Vec<u8>, name: &str, value: &str) {
    encode_prefixed_int(out, 3, 0x20, name.len());
    out.extend_from_slice(name.as_bytes());
    encode_prefixed_int(out, 7, 0x00, value.len());
    out.extend_from_slice(value.as_bytes());
}

/// Encodes a full decoy header block: field section prefix (required
/// insert count 0, base 0) followed by literal field lines.
pub fn encode_block(headers: &[(String, String)]) -> Vec<u8> {
    let mut out = vec![0x00, 0x00];
    for (name, value) in headers {
        encode_field(&mut out, name, value);
    }
    out
}

/// Decodes a block produced by `encode_block`.
pub fn decode_block(buf: &[u8]) -> Result<Vec<(String, String)>, CoreError> {
    if buf.len() < 2 || buf[0] != 0x00 || buf[1] != 0x00 {
        return Err(CoreError::InvalidInput(
            "missing qpack field section prefix".to_string(),
        ));
    }
    let mut at = 2;
    let mut headers = Vec::new();
    while at < buf.len() {
        if buf[at] & 0xE0 != 0x20 {
            return Err(CoreError::InvalidInput(
                "unsupported qpack field line".to_string(),
            ));
        }
        let name_len = decode_prefixed_int(buf, &mut at, 3)?;
        if at + name_len > buf.len() {
            return Err(CoreError::InvalidInput("qpack name truncated".to_string()));
        }
        let name = String::from_utf8_lossy(&buf[at..at + name_len]).into_owned();
        at += name_len;
        let value_len = decode_prefixed_int(buf, &mut at, 7)?;
        if at + value_len > buf.len() {
            return Err(CoreError::InvalidInput("qpack value truncated".to_string()));
        }
        let value = String::from_utf8_lossy(&buf[at..at + value_len]).into_owned();
        at += value_len;
        headers.push((name, value));
    }
    Ok(headers)
}

pub struct Masquerade {
    fingerprint: Fingerprint,
}

impl Masquerade {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self { fingerprint }
    }

    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = fingerprint;
    }

    /// A decoy request header set for `authority`. Pseudo-headers come
    /// first in their required order; the remaining headers are shuffled
    /// per call so consecutive packets do not share an exact shape.
    pub fn decoy_headers(&self, authority: &str) -> Vec<(String, String)> {
        let mut rng = rand::thread_rng();
        let fp = &self.fingerprint;
        let path = PATHS[rng.gen_range(0..PATHS.len())];
        let cache = CACHE_CONTROL[rng.gen_range(0..CACHE_CONTROL.len())];

        let mut headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":authority".to_string(), authority.to_string()),
            (":path".to_string(), path.to_string()),
        ];
        let mut rest = vec![
            (
                "accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                    .to_string(),
            ),
            ("user-agent".to_string(), fp.user_agent.to_string()),
            (
                "accept-language".to_string(),
                fp.accept_language.to_string(),
            ),
            (
                "accept-encoding".to_string(),
                "gzip, deflate, br".to_string(),
            ),
            ("cache-control".to_string(), cache.to_string()),
        ];
        rest.shuffle(&mut rng);
        headers.extend(rest);
        headers
    }

    /// QPACK-encoded decoy block.
    pub fn header_block(&self, authority: &str) -> Vec<u8> {
        encode_block(&self.decoy_headers(authority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::browser::BrowserProfile;

    fn masq() -> Masquerade {
        Masquerade::new(Fingerprint::for_profile(BrowserProfile::FirefoxWin))
    }

    #[test]
    fn block_roundtrip() {
        let m = masq();
        let headers = m.decoy_headers("example.com");
        let block = encode_block(&headers);
        let back = decode_block(&block).unwrap();
        assert_eq!(back, headers);
    }

    #[test]
    fn pseudo_headers_lead() {
        let m = masq();
        let headers = m.decoy_headers("example.com");
        assert!(headers[..4].iter().all(|(n, _)| n.starts_with(':')));
        assert!(headers[4..].iter().all(|(n, _)| !n.starts_with(':')));
    }

    #[test]
    fn profile_user_agent_carried() {
        let m = masq();
        let headers = m.decoy_headers("example.com");
        let ua = headers
            .iter()
            .find(|(n, _)| n == "user-agent")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(ua.contains("Firefox"));
    }

    #[test]
    fn long_values_use_continuation_bytes() {
        let name = "x";
        let value = "v".repeat(300);
        let block = encode_block(&[(name.to_string(), value.clone())]);
        let back = decode_block(&block).unwrap();
        assert_eq!(back[0].1, value);
    }

    #[test]
    fn truncated_block_rejected() {
        let m = masq();
        let block = m.header_block("example.com");
        assert!(decode_block(&block[..block.len() - 2]).is_err());
        assert!(decode_block(&[0x01, 0x02, 0x03]).is_err());
    }
}
