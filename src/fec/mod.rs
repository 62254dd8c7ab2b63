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

//! # Adaptive Sliding-Window FEC (Tetrys family)
//!
//! Streaming erasure protection over a sliding window. The encoder
//! accumulates every source payload into a running XOR combination and
//! periodically flushes it as a repair packet carrying the set of
//! sequence numbers it covers; the receiver recovers any single missing
//! member of a repair from the repair and the remaining members.
//! Redundancy adapts to the loss rate the transport reports back.

use serde::Deserialize;
use std::collections::BTreeSet;

pub mod adaptive;
pub mod decoder;
pub mod encoder;

pub use adaptive::{LossEstimator, NetworkMetrics};
pub use decoder::Decoder;
pub use encoder::Encoder;

use crate::error::CoreError;

/// Fixed header bytes preceding the payload on the wire.
const WIRE_HEADER: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Source,
    Repair,
}

/// One FEC packet, source or repair. `seen` is the set of source
/// sequence numbers a repair covers; for a source it is implicitly the
/// packet's own sequence number. A repair's `seq_no` is advisory (it
/// shows up in logs), recovery is keyed purely on `seen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecPacket {
    pub kind: PacketKind,
    pub seq_no: u32,
    pub generation_id: u32,
    pub block_id: u32,
    pub original_size: u32,
    pub payload: Vec<u8>,
    pub seen: BTreeSet<u32>,
}

impl FecPacket {
    pub fn is_repair(&self) -> bool {
        self.kind == PacketKind::Repair
    }

    /// Serializes into the little-endian wire layout:
    /// kind, seq_no, generation_id, block_id, repair flag, original_size,
    /// data_length, payload, coefficient count (0 in pure-XOR mode),
    /// source-id count, source ids.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WIRE_HEADER + self.payload.len() + 2 + 4 * self.seen.len());
        out.push(if self.is_repair() { 1 } else { 0 });
        out.extend_from_slice(&self.seq_no.to_le_bytes());
        out.extend_from_slice(&self.generation_id.to_le_bytes());
        out.extend_from_slice(&self.block_id.to_le_bytes());
        out.push(if self.is_repair() { 1 } else { 0 });
        out.extend_from_slice(&self.original_size.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out.push(0); // coefficient count: pure-XOR mode carries none
        if self.is_repair() {
            out.push(self.seen.len() as u8);
            for id in &self.seen {
                out.extend_from_slice(&id.to_le_bytes());
            }
        } else {
            out.push(0);
        }
        out
    }

    /// Parses a wire packet, rejecting any declared length that runs past
    /// the containing datagram.
    pub fn from_wire(buf: &[u8]) -> Result<FecPacket, CoreError> {
        if buf.len() < WIRE_HEADER {
            return Err(CoreError::InvalidInput("fec packet truncated".to_string()));
        }
        let kind = match buf[0] {
            0 => PacketKind::Source,
            1 => PacketKind::Repair,
            other => {
                return Err(CoreError::InvalidInput(format!(
                    "unknown fec packet kind {}",
                    other
                )))
            }
        };
        let seq_no = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        let generation_id = u32::from_le_bytes(buf[5..9].try_into().unwrap());
        let block_id = u32::from_le_bytes(buf[9..13].try_into().unwrap());
        let repair_flag = buf[13] == 1;
        if repair_flag != (kind == PacketKind::Repair) {
            return Err(CoreError::InvalidInput(
                "repair flag disagrees with packet kind".to_string(),
            ));
        }
        let original_size = u32::from_le_bytes(buf[14..18].try_into().unwrap());
        let data_length = u16::from_le_bytes(buf[18..20].try_into().unwrap()) as usize;

        let mut offset = WIRE_HEADER;
        if buf.len() < offset + data_length + 2 {
            return Err(CoreError::InvalidInput(
                "declared payload length exceeds datagram".to_string(),
            ));
        }
        let payload = buf[offset..offset + data_length].to_vec();
        offset += data_length;

        let coeff_count = buf[offset] as usize;
        offset += 1;
        if coeff_count != 0 {
            return Err(CoreError::InvalidInput(
                "coefficient vectors are not carried in pure-XOR mode".to_string(),
            ));
        }

        let id_count = buf[offset] as usize;
        offset += 1;
        if buf.len() < offset + 4 * id_count {
            return Err(CoreError::InvalidInput(
                "declared source-id count exceeds datagram".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for _ in 0..id_count {
            seen.insert(u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()));
            offset += 4;
        }

        match kind {
            PacketKind::Source => {
                // A source covers exactly itself.
                seen.clear();
                seen.insert(seq_no);
            }
            PacketKind::Repair => {
                if seen.is_empty() {
                    return Err(CoreError::InvalidInput(
                        "repair packet with empty seen set".to_string(),
                    ));
                }
            }
        }

        Ok(FecPacket {
            kind,
            seq_no,
            generation_id,
            block_id,
            original_size,
            payload,
            seen,
        })
    }
}

/// Configuration of one FEC session (encoder or decoder side).
#[derive(Debug, Clone)]
pub struct FecConfig {
    /// Source payload size; inputs are zero-padded up to this.
    pub block_size: usize,
    /// Maximum number of source packets retained by the encoder window.
    pub window_size: usize,
    pub initial_redundancy: f64,
    pub min_redundancy: f64,
    pub max_redundancy: f64,
    /// When set, the repair schedule tracks `current_redundancy` and
    /// `update_network_metrics` moves it; otherwise the initial ratio is
    /// applied as a fixed 1-in-⌈1/r⌉ cadence.
    pub adaptive: bool,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            window_size: 64,
            initial_redundancy: 0.3,
            min_redundancy: 0.1,
            max_redundancy: 0.8,
            adaptive: true,
        }
    }
}

impl FecConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size == 0 || self.block_size > u16::MAX as usize {
            return Err(format!(
                "block_size {} outside 1..={}",
                self.block_size,
                u16::MAX
            ));
        }
        if self.window_size == 0 {
            return Err("window_size must be at least 1".to_string());
        }
        for (name, v) in [
            ("initial_redundancy", self.initial_redundancy),
            ("min_redundancy", self.min_redundancy),
            ("max_redundancy", self.max_redundancy),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(format!("{} {} outside [0, 1]", name, v));
            }
        }
        if self.min_redundancy > self.initial_redundancy
            || self.initial_redundancy > self.max_redundancy
        {
            return Err("redundancy bounds must satisfy min <= initial <= max".to_string());
        }
        if self.initial_redundancy == 0.0 {
            return Err("initial_redundancy must be positive".to_string());
        }
        Ok(())
    }

    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        #[derive(Deserialize)]
        struct Root {
            fec: Option<Section>,
        }

        #[derive(Deserialize)]
        struct Section {
            block_size: Option<usize>,
            window_size: Option<usize>,
            initial_redundancy: Option<f64>,
            min_redundancy: Option<f64>,
            max_redundancy: Option<f64>,
            adaptive: Option<bool>,
        }

        let root: Root = toml::from_str(s)?;
        let mut cfg = FecConfig::default();
        if let Some(sec) = root.fec {
            if let Some(v) = sec.block_size {
                cfg.block_size = v;
            }
            if let Some(v) = sec.window_size {
                cfg.window_size = v;
            }
            if let Some(v) = sec.initial_redundancy {
                cfg.initial_redundancy = v;
            }
            if let Some(v) = sec.min_redundancy {
                cfg.min_redundancy = v;
            }
            if let Some(v) = sec.max_redundancy {
                cfg.max_redundancy = v;
            }
            if let Some(v) = sec.adaptive {
                cfg.adaptive = v;
            }
        }
        Ok(cfg)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_repair() -> FecPacket {
        FecPacket {
            kind: PacketKind::Repair,
            seq_no: 9,
            generation_id: 1,
            block_id: 2,
            original_size: 8,
            payload: vec![0xAB; 8],
            seen: [3u32, 4, 5].into_iter().collect(),
        }
    }

    #[test]
    fn wire_roundtrip_source() {
        let pkt = FecPacket {
            kind: PacketKind::Source,
            seq_no: 7,
            generation_id: 0,
            block_id: 0,
            original_size: 5,
            payload: vec![1, 2, 3, 4, 5, 0, 0, 0],
            seen: [7u32].into_iter().collect(),
        };
        let wire = pkt.to_wire();
        let back = FecPacket::from_wire(&wire).unwrap();
        assert_eq!(back, pkt);
    }

    #[test]
    fn wire_roundtrip_repair() {
        let pkt = sample_repair();
        let back = FecPacket::from_wire(&pkt.to_wire()).unwrap();
        assert_eq!(back, pkt);
    }

    #[test]
    fn rejects_overlong_payload_declaration() {
        let mut wire = sample_repair().to_wire();
        // Inflate data_length past the end of the buffer.
        wire[18] = 0xFF;
        wire[19] = 0xFF;
        assert!(matches!(
            FecPacket::from_wire(&wire),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_kind_flag_mismatch() {
        let mut wire = sample_repair().to_wire();
        wire[13] = 0;
        assert!(matches!(
            FecPacket::from_wire(&wire),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_truncated_source_ids() {
        let wire = sample_repair().to_wire();
        assert!(matches!(
            FecPacket::from_wire(&wire[..wire.len() - 3]),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn config_validation() {
        assert!(FecConfig::default().validate().is_ok());
        let mut bad = FecConfig::default();
        bad.min_redundancy = 0.9;
        assert!(bad.validate().is_err());
        let mut bad = FecConfig::default();
        bad.window_size = 0;
        assert!(bad.validate().is_err());
        let mut bad = FecConfig::default();
        bad.block_size = 70_000;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_from_toml() {
        let cfg = FecConfig::from_toml(
            r#"
            [fec]
            block_size = 512
            window_size = 32
            initial_redundancy = 0.25
            adaptive = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.block_size, 512);
        assert_eq!(cfg.window_size, 32);
        assert!((cfg.initial_redundancy - 0.25).abs() < 1e-9);
        assert!(!cfg.adaptive);
    }
}
