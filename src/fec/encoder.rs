//! Sliding-window FEC encoder.

use super::adaptive::{update_redundancy, NetworkMetrics};
use super::{FecConfig, FecPacket, PacketKind};
use crate::error::CoreError;
use crate::pool::MemoryPool;
use crate::simd::xor_into;
use aligned_box::AlignedBox;
use log::debug;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// The wire format counts covered sources in one byte; flush the
/// accumulator before it can overflow that.
const MAX_SEEN: usize = 255;

/// Retained copy of a source payload inside the encoder window, backed
/// by the shared block pool.
struct WindowEntry {
    seq_no: u32,
    block: AlignedBox<[u8]>,
}

pub struct Encoder {
    config: FecConfig,
    pool: Arc<MemoryPool>,
    next_seq: u32,
    generation_id: u32,
    window: VecDeque<WindowEntry>,
    /// Running XOR of every source since the last repair flush.
    repair_payload: Vec<u8>,
    repair_seen: BTreeSet<u32>,
    current_redundancy: f64,
    repair_count: u64,
    packets_encoded: u64,
}

impl Encoder {
    pub fn new(config: FecConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidInput)?;
        let pool = Arc::new(MemoryPool::new(config.window_size + 4, config.block_size));
        Ok(Self {
            current_redundancy: config.initial_redundancy,
            pool,
            config,
            next_seq: 0,
            generation_id: 0,
            window: VecDeque::new(),
            repair_payload: Vec::new(),
            repair_seen: BTreeSet::new(),
            repair_count: 0,
            packets_encoded: 0,
        })
    }

    pub fn current_redundancy(&self) -> f64 {
        self.current_redundancy
    }

    pub fn packets_encoded(&self) -> u64 {
        self.packets_encoded
    }

    /// Encodes one application buffer into exactly one source packet,
    /// possibly followed by one repair packet, in that order. The input
    /// must fit the configured block size; it is zero-padded at the tail.
    pub fn encode_packet(&mut self, data: &[u8]) -> Result<Vec<FecPacket>, CoreError> {
        if data.len() > self.config.block_size {
            return Err(CoreError::InvalidInput(format!(
                "payload of {} bytes exceeds block size {}",
                data.len(),
                self.config.block_size
            )));
        }

        let mut payload = vec![0u8; self.config.block_size];
        payload[..data.len()].copy_from_slice(data);

        let source = FecPacket {
            kind: PacketKind::Source,
            seq_no: self.next_seq,
            generation_id: self.generation_id,
            block_id: self.next_seq / self.config.window_size as u32,
            original_size: data.len() as u32,
            payload: payload.clone(),
            seen: [self.next_seq].into_iter().collect(),
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        self.packets_encoded += 1;
        crate::telemetry::ENCODED_PACKETS.inc();

        let mut block = self.pool.alloc();
        block[..payload.len()].copy_from_slice(&payload);
        self.window.push_back(WindowEntry {
            seq_no: source.seq_no,
            block,
        });
        while self.window.len() > self.config.window_size {
            if let Some(evicted) = self.window.pop_front() {
                self.pool.free(evicted.block);
            }
        }

        // Fold the new source into the running repair combination.
        if self.repair_payload.len() < payload.len() {
            self.repair_payload.resize(payload.len(), 0);
        }
        xor_into(&mut self.repair_payload, &payload);
        self.repair_seen.insert(source.seq_no);

        let mut out = vec![source];
        if self.repair_due() || self.repair_seen.len() >= MAX_SEEN {
            let repair = self.flush_repair();
            debug!(
                "repair {} covers {} sources",
                repair.seq_no,
                repair.seen.len()
            );
            out.push(repair);
        }
        Ok(out)
    }

    /// Whether the schedule calls for a repair after the source just
    /// emitted. Adaptive mode keeps the repair/source ratio tracking the
    /// current redundancy; fixed mode fires every ⌈1/r⌉ sources.
    fn repair_due(&self) -> bool {
        if self.config.adaptive {
            (self.repair_count as f64) / (self.packets_encoded as f64) < self.current_redundancy
        } else {
            let interval = (1.0 / self.config.initial_redundancy).ceil() as u64;
            self.packets_encoded % interval == 0
        }
    }

    fn flush_repair(&mut self) -> FecPacket {
        // The accumulator can only be empty if a repair was just flushed
        // and no source followed; `repair_due` is only consulted right
        // after a source lands, so fall back to the whole window for the
        // degenerate case.
        if self.repair_seen.is_empty() {
            for entry in self.window.iter().rev().take(MAX_SEEN) {
                if self.repair_payload.len() < entry.block.len() {
                    self.repair_payload.resize(entry.block.len(), 0);
                }
                xor_into(&mut self.repair_payload, &entry.block);
                self.repair_seen.insert(entry.seq_no);
            }
        }

        // Source sequence numbers stay gap-free for the decoder's
        // contiguity tracking; a repair's seq_no is advisory and counts
        // in its own space.
        let repair = FecPacket {
            kind: PacketKind::Repair,
            seq_no: self.repair_count as u32,
            generation_id: self.generation_id,
            block_id: 0,
            original_size: self.repair_payload.len() as u32,
            payload: std::mem::take(&mut self.repair_payload),
            seen: std::mem::take(&mut self.repair_seen),
        };
        self.repair_count += 1;
        crate::telemetry::REPAIR_PACKETS.inc();
        repair
    }

    /// Feeds transport feedback into the redundancy controller. A no-op
    /// unless the session is adaptive.
    pub fn update_network_metrics(&mut self, metrics: &NetworkMetrics) {
        if !self.config.adaptive {
            return;
        }
        self.current_redundancy = update_redundancy(
            self.current_redundancy,
            &self.config,
            metrics.packet_loss_rate,
        );
        crate::telemetry::LOSS_RATE.set((metrics.packet_loss_rate * 100.0) as i64);
        crate::telemetry::REDUNDANCY.set((self.current_redundancy * 100.0) as i64);
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        while let Some(entry) = self.window.pop_front() {
            self.pool.free(entry.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(redundancy: f64, adaptive: bool) -> FecConfig {
        FecConfig {
            block_size: 64,
            window_size: 8,
            initial_redundancy: redundancy,
            min_redundancy: redundancy / 2.0,
            max_redundancy: (redundancy * 2.0).min(1.0),
            adaptive,
        }
    }

    #[test]
    fn source_then_repair_order() {
        let mut enc = Encoder::new(config(0.5, false)).unwrap();
        let out = enc.encode_packet(b"one").unwrap();
        assert_eq!(out[0].kind, PacketKind::Source);
        let out = enc.encode_packet(b"two").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, PacketKind::Source);
        assert_eq!(out[1].kind, PacketKind::Repair);
    }

    #[test]
    fn fixed_schedule_every_ceil_inverse() {
        // r = 0.3 -> one repair every ceil(1/0.3) = 4 sources.
        let mut enc = Encoder::new(config(0.3, false)).unwrap();
        let mut repairs = 0;
        for i in 0..12 {
            let out = enc.encode_packet(&[i as u8]).unwrap();
            repairs += out.iter().filter(|p| p.is_repair()).count();
        }
        assert_eq!(repairs, 3);
    }

    #[test]
    fn adaptive_ratio_tracks_redundancy() {
        let mut enc = Encoder::new(config(0.5, true)).unwrap();
        let mut sources = 0u64;
        let mut repairs = 0u64;
        for i in 0..100 {
            let out = enc.encode_packet(&[i as u8]).unwrap();
            sources += 1;
            repairs += out.iter().filter(|p| p.is_repair()).count() as u64;
        }
        let ratio = repairs as f64 / sources as f64;
        assert!((ratio - 0.5).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn repair_payload_is_xor_of_members() {
        let mut enc = Encoder::new(config(0.5, false)).unwrap();
        let a = enc.encode_packet(&[0xAA; 4]).unwrap();
        let b = enc.encode_packet(&[0x55; 4]).unwrap();
        let repair = &b[1];
        assert_eq!(repair.seen.len(), 2);
        let mut expect = a[0].payload.clone();
        xor_into(&mut expect, &b[0].payload);
        assert_eq!(repair.payload, expect);
    }

    #[test]
    fn seen_set_clears_after_flush() {
        let mut enc = Encoder::new(config(0.5, false)).unwrap();
        enc.encode_packet(&[1]).unwrap();
        let out = enc.encode_packet(&[2]).unwrap();
        assert!(out[1].is_repair());
        enc.encode_packet(&[3]).unwrap();
        let out = enc.encode_packet(&[4]).unwrap();
        // The second repair covers only the sources after the first flush.
        assert_eq!(
            out[1].seen.iter().copied().collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn oversized_input_rejected() {
        let mut enc = Encoder::new(config(0.5, false)).unwrap();
        assert!(enc.encode_packet(&[0u8; 65]).is_err());
    }

    #[test]
    fn window_stays_bounded() {
        let mut enc = Encoder::new(config(0.5, false)).unwrap();
        for i in 0..100 {
            enc.encode_packet(&[i as u8]).unwrap();
        }
        assert!(enc.window.len() <= 8);
    }

    #[test]
    fn seen_set_never_exceeds_wire_count() {
        // Adaptive with a floor of zero repairs would let the set grow
        // unbounded; the hard cap flushes first.
        let cfg = FecConfig {
            block_size: 8,
            window_size: 8,
            initial_redundancy: 0.003,
            min_redundancy: 0.001,
            max_redundancy: 0.01,
            adaptive: false,
        };
        let mut enc = Encoder::new(cfg).unwrap();
        for i in 0..600usize {
            let out = enc.encode_packet(&[i as u8]).unwrap();
            for pkt in out.iter().filter(|p| p.is_repair()) {
                assert!(pkt.seen.len() <= MAX_SEEN);
            }
        }
    }
}
