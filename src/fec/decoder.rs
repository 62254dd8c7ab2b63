//! Sliding-window FEC decoder.
//!
//! Arena-style state keyed by sequence number: `received` and
//! `recovered` hold pending source payloads, `history` retains the
//! payloads of recently emitted sources so late repairs can still be
//! eliminated against them, and `missing` tracks the holes. Every
//! sequence number walks unknown -> missing -> received or recovered ->
//! emitted; history is pruned one window behind the emit cursor, which
//! is also the staleness horizon for repairs.

use super::{FecConfig, FecPacket, PacketKind};
use crate::error::CoreError;
use crate::simd::xor_into;
use log::debug;
use std::collections::{BTreeSet, HashMap};

struct RepairEntry {
    seq_no: u32,
    payload: Vec<u8>,
    seen: BTreeSet<u32>,
}

pub struct Decoder {
    config: FecConfig,
    received: HashMap<u32, Vec<u8>>,
    recovered: HashMap<u32, Vec<u8>>,
    /// Payloads of already-emitted sources, kept one window deep.
    history: HashMap<u32, Vec<u8>>,
    original_sizes: HashMap<u32, u32>,
    repairs: Vec<RepairEntry>,
    missing: BTreeSet<u32>,
    /// One past the highest source sequence number observed.
    next_expected: u32,
    /// Next sequence number owed to the application.
    emit_cursor: u32,
    finished: bool,
    stale_drops: u64,
    packets_recovered: u64,
}

impl Decoder {
    pub fn new(config: FecConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidInput)?;
        Ok(Self {
            config,
            received: HashMap::new(),
            recovered: HashMap::new(),
            history: HashMap::new(),
            original_sizes: HashMap::new(),
            repairs: Vec::new(),
            missing: BTreeSet::new(),
            next_expected: 0,
            emit_cursor: 0,
            finished: false,
            stale_drops: 0,
            packets_recovered: 0,
        })
    }

    pub fn missing(&self) -> &BTreeSet<u32> {
        &self.missing
    }

    pub fn stale_drops(&self) -> u64 {
        self.stale_drops
    }

    pub fn packets_recovered(&self) -> u64 {
        self.packets_recovered
    }

    /// Marks end-of-stream: the block that terminates the stream is
    /// trimmed to its original size when emitted.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Oldest sequence number whose payload is still retained.
    fn window_front(&self) -> u32 {
        self.emit_cursor
            .saturating_sub(self.config.window_size as u32)
    }

    fn payload_of(&self, seq: u32) -> Option<&Vec<u8>> {
        self.received
            .get(&seq)
            .or_else(|| self.recovered.get(&seq))
            .or_else(|| self.history.get(&seq))
    }

    /// Ingests one packet and returns whatever new contiguous payload
    /// blocks it unlocked, in stream order. Duplicates are no-ops;
    /// out-of-window repairs are dropped quietly.
    pub fn add_packet(&mut self, pkt: FecPacket) -> Result<Vec<Vec<u8>>, CoreError> {
        match pkt.kind {
            PacketKind::Source => self.ingest_source(pkt)?,
            PacketKind::Repair => {
                if !self.ingest_repair(pkt)? {
                    return Ok(Vec::new());
                }
            }
        }
        self.recover();
        Ok(self.drain_ready())
    }

    fn ingest_source(&mut self, pkt: FecPacket) -> Result<(), CoreError> {
        if pkt.payload.len() != self.config.block_size {
            return Err(CoreError::InvalidInput(format!(
                "source payload {} bytes, block size is {}",
                pkt.payload.len(),
                self.config.block_size
            )));
        }
        if pkt.seq_no < self.emit_cursor
            || self.received.contains_key(&pkt.seq_no)
            || self.recovered.contains_key(&pkt.seq_no)
        {
            return Ok(()); // duplicate or already emitted
        }
        // A sequence jump this large cannot come from a live peer; a
        // forged number must not inflate the missing set.
        if pkt.seq_no.wrapping_sub(self.emit_cursor) > (1 << 16) {
            return Err(CoreError::InvalidInput(format!(
                "sequence number {} implausibly far ahead of {}",
                pkt.seq_no, self.emit_cursor
            )));
        }
        // Every gap between the read cursor and this packet is now a
        // known hole.
        for seq in self.emit_cursor..pkt.seq_no {
            if self.payload_of(seq).is_none() {
                self.missing.insert(seq);
            }
        }
        self.missing.remove(&pkt.seq_no);
        self.next_expected = self.next_expected.max(pkt.seq_no + 1);
        self.original_sizes.insert(pkt.seq_no, pkt.original_size);
        self.received.insert(pkt.seq_no, pkt.payload);
        Ok(())
    }

    /// Returns whether the repair was retained.
    fn ingest_repair(&mut self, pkt: FecPacket) -> Result<bool, CoreError> {
        if pkt.seen.is_empty() {
            return Err(CoreError::InvalidInput(
                "repair packet with empty seen set".to_string(),
            ));
        }
        if pkt.payload.len() < self.config.block_size {
            return Err(CoreError::InvalidInput(format!(
                "repair payload {} bytes shorter than block size {}",
                pkt.payload.len(),
                self.config.block_size
            )));
        }
        if pkt.seen.iter().all(|&s| s < self.emit_cursor) {
            // Everything it covers was already delivered.
            debug!("stale repair {} dropped", pkt.seq_no);
            self.stale_drops += 1;
            crate::telemetry::STALE_PACKETS.inc();
            return Ok(false);
        }
        // A member that was emitted and has since left the history
        // window can never be XORed out again; the repair is unusable.
        if pkt
            .seen
            .iter()
            .any(|&s| s < self.emit_cursor && self.payload_of(s).is_none())
        {
            debug!("repair {} reaches behind the window, dropped", pkt.seq_no);
            self.stale_drops += 1;
            crate::telemetry::STALE_PACKETS.inc();
            return Ok(false);
        }
        if self.repairs.iter().any(|r| r.seen == pkt.seen) {
            return Ok(false); // duplicate
        }
        for &seq in &pkt.seen {
            if seq >= self.emit_cursor && self.payload_of(seq).is_none() {
                self.missing.insert(seq);
            }
        }
        if pkt.seen.iter().all(|&s| self.payload_of(s).is_some()) {
            // Fully known already; nothing left to learn from it.
            return Ok(false);
        }
        self.repairs.push(RepairEntry {
            seq_no: pkt.seq_no,
            payload: pkt.payload,
            seen: pkt.seen,
        });
        Ok(true)
    }

    /// Unknown members of a repair: no payload anywhere and not yet
    /// emitted. Members that were emitted and pruned make the repair
    /// dead.
    fn classify(&self, repair: &RepairEntry) -> (usize, Option<u32>, bool) {
        let mut unknowns = 0;
        let mut first_unknown = None;
        let mut dead = false;
        for &seq in &repair.seen {
            if self.payload_of(seq).is_some() {
                continue;
            }
            if seq < self.emit_cursor {
                dead = true;
            } else {
                unknowns += 1;
                if first_unknown.is_none() {
                    first_unknown = Some(seq);
                }
            }
        }
        (unknowns, first_unknown, dead)
    }

    /// Recovery: repeatedly scan repairs and eliminate any repair down
    /// to exactly one unknown member by XORing out the known members.
    /// Stops when a full scan makes no progress. Single-unknown
    /// elimination is bit-exact; multi-unknown guessing is deliberately
    /// not attempted.
    fn recover(&mut self) {
        loop {
            let mut candidate = None;
            for (idx, repair) in self.repairs.iter().enumerate() {
                let (unknowns, first, dead) = self.classify(repair);
                if !dead && unknowns == 1 {
                    candidate = Some((idx, first.unwrap()));
                    break;
                }
            }
            let Some((idx, seq)) = candidate else {
                break;
            };

            let repair = &self.repairs[idx];
            let mut data = repair.payload.clone();
            for &member in repair.seen.iter() {
                if member == seq {
                    continue;
                }
                let payload = self
                    .payload_of(member)
                    .expect("member classified as known during elimination");
                xor_into(&mut data, payload);
            }
            data.truncate(self.config.block_size);
            debug!("recovered source {} via repair {}", seq, repair.seq_no);
            self.recovered.insert(seq, data);
            self.missing.remove(&seq);
            self.next_expected = self.next_expected.max(seq + 1);
            self.packets_recovered += 1;
            crate::telemetry::RECOVERED_PACKETS.inc();
            self.sweep_repairs();
        }
    }

    /// Drops repairs that can teach us nothing more: fully resolved, or
    /// reaching behind the retained history.
    fn sweep_repairs(&mut self) {
        let mut keep = Vec::with_capacity(self.repairs.len());
        for repair in self.repairs.drain(..) {
            let mut unknowns = 0;
            let mut dead = false;
            for &seq in &repair.seen {
                let available = self.received.contains_key(&seq)
                    || self.recovered.contains_key(&seq)
                    || self.history.contains_key(&seq);
                if available {
                    continue;
                }
                if seq < self.emit_cursor {
                    dead = true;
                    break;
                }
                unknowns += 1;
            }
            if !dead && unknowns > 0 {
                keep.push(repair);
            }
        }
        self.repairs = keep;
    }

    /// Advances the emit cursor over every contiguous block now present
    /// and returns the payloads in order. Emitted payloads move into the
    /// history window so late repairs can still use them.
    fn drain_ready(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let seq = self.emit_cursor;
            let Some(mut payload) = self
                .received
                .remove(&seq)
                .or_else(|| self.recovered.remove(&seq))
            else {
                break;
            };
            self.history.insert(seq, payload.clone());
            if self.finished && seq + 1 == self.next_expected {
                if let Some(&size) = self.original_sizes.get(&seq) {
                    payload.truncate(size as usize);
                }
            }
            self.original_sizes.remove(&seq);
            self.emit_cursor += 1;
            crate::telemetry::DECODED_PACKETS.inc();
            out.push(payload);
        }
        if !out.is_empty() {
            let front = self.window_front();
            self.history.retain(|&seq, _| seq >= front);
            self.sweep_repairs();
        }
        out
    }

    /// The longest contiguous prefix currently available at the emit
    /// cursor. Equivalent to what the last `add_packet` returned plus
    /// anything unlocked by `finish`.
    pub fn get_recovered_data(&mut self) -> Vec<Vec<u8>> {
        self.recover();
        self.drain_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::Encoder;

    fn pair(block_size: usize, redundancy: f64) -> (Encoder, Decoder) {
        let cfg = FecConfig {
            block_size,
            window_size: 16,
            initial_redundancy: redundancy,
            min_redundancy: redundancy / 2.0,
            max_redundancy: 1.0_f64.min(redundancy * 2.0),
            adaptive: false,
        };
        (
            Encoder::new(cfg.clone()).unwrap(),
            Decoder::new(cfg).unwrap(),
        )
    }

    #[test]
    fn lossless_passthrough() {
        let (mut enc, mut dec) = pair(32, 0.5);
        let mut delivered = Vec::new();
        for i in 0u8..6 {
            for pkt in enc.encode_packet(&[i; 32]).unwrap() {
                delivered.extend(dec.add_packet(pkt).unwrap());
            }
        }
        assert_eq!(delivered.len(), 6);
        for (i, block) in delivered.iter().enumerate() {
            assert!(block.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn single_loss_recovered_from_repair() {
        let (mut enc, mut dec) = pair(32, 0.5);
        let mut delivered = Vec::new();
        for i in 0u8..4 {
            for pkt in enc.encode_packet(&[i; 32]).unwrap() {
                // Drop source seq 2.
                if pkt.kind == PacketKind::Source && pkt.seq_no == 2 {
                    continue;
                }
                delivered.extend(dec.add_packet(pkt).unwrap());
            }
        }
        assert_eq!(delivered.len(), 4);
        assert!(delivered[2].iter().all(|&b| b == 2));
        assert_eq!(dec.packets_recovered(), 1);
    }

    #[test]
    fn repair_after_emission_recovers_trailing_hole() {
        // Source 0 arrives and is emitted; source 1 is lost; the repair
        // covering {0, 1} must still recover 1 against the history.
        let (mut enc, mut dec) = pair(32, 0.5);
        let mut delivered = Vec::new();
        for i in 0u8..2 {
            for pkt in enc.encode_packet(&[i; 32]).unwrap() {
                if pkt.kind == PacketKind::Source && pkt.seq_no == 1 {
                    continue;
                }
                delivered.extend(dec.add_packet(pkt).unwrap());
            }
        }
        assert_eq!(delivered.len(), 2);
        assert!(delivered[1].iter().all(|&b| b == 1));
    }

    #[test]
    fn duplicate_packets_are_noops() {
        let (mut enc, mut dec) = pair(16, 0.5);
        let pkts = enc.encode_packet(&[9u8; 16]).unwrap();
        let first = dec.add_packet(pkts[0].clone()).unwrap();
        assert_eq!(first.len(), 1);
        let again = dec.add_packet(pkts[0].clone()).unwrap();
        assert!(again.is_empty());
        assert!(dec.missing().is_empty());
    }

    #[test]
    fn repair_announces_missing_sources() {
        let (mut enc, mut dec) = pair(16, 0.5);
        enc.encode_packet(&[1u8; 16]).unwrap();
        let out = enc.encode_packet(&[2u8; 16]).unwrap();
        let repair = out[1].clone();
        assert!(repair.is_repair());
        dec.add_packet(repair).unwrap();
        assert_eq!(dec.missing().len(), 2);
    }

    #[test]
    fn ancient_repair_dropped_as_stale() {
        let cfg = FecConfig {
            block_size: 16,
            window_size: 2,
            initial_redundancy: 0.5,
            min_redundancy: 0.25,
            max_redundancy: 1.0,
            adaptive: false,
        };
        let mut enc = Encoder::new(cfg.clone()).unwrap();
        let mut dec = Decoder::new(cfg).unwrap();
        let mut early_repair = None;
        for i in 0u8..8 {
            for pkt in enc.encode_packet(&[i; 16]).unwrap() {
                if pkt.is_repair() {
                    if early_repair.is_none() {
                        early_repair = Some(pkt);
                    }
                    continue;
                }
                dec.add_packet(pkt).unwrap();
            }
        }
        // The first repair covers sources 0 and 1, both far behind the
        // two-packet history window by now.
        let out = dec.add_packet(early_repair.unwrap()).unwrap();
        assert!(out.is_empty());
        assert_eq!(dec.stale_drops(), 1);
    }

    #[test]
    fn no_contiguous_prefix_until_gap_fills() {
        let (mut enc, mut dec) = pair(16, 0.25);
        let mut held = Vec::new();
        let mut delivered = Vec::new();
        for i in 0u8..3 {
            for pkt in enc.encode_packet(&[i; 16]).unwrap() {
                if pkt.kind == PacketKind::Source && pkt.seq_no == 0 {
                    held.push(pkt);
                    continue;
                }
                delivered.extend(dec.add_packet(pkt).unwrap());
            }
        }
        assert!(delivered.is_empty());
        for pkt in held {
            delivered.extend(dec.add_packet(pkt).unwrap());
        }
        assert_eq!(delivered.len(), 3);
    }

    #[test]
    fn finish_trims_final_block_padding() {
        let (mut enc, mut dec) = pair(32, 0.5);
        let mut blocks = Vec::new();
        let pkts = enc.encode_packet(b"tail").unwrap();
        dec.finish();
        for pkt in pkts {
            blocks.extend(dec.add_packet(pkt).unwrap());
        }
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], b"tail");
    }
}
