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

//! # Session
//!
//! The transport boundary. One session owns one FEC encoder, one FEC
//! decoder, and one stealth governor; the enclosing transport serializes
//! all calls per connection, so there is no locking here. On send,
//! application bytes flow FEC -> governor -> UDP; on receive, the
//! inverse.

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::fec::{Decoder, Encoder, FecPacket, LossEstimator, NetworkMetrics};
use crate::stealth::StealthGovernor;
use std::time::Duration;

pub struct Session {
    encoder: Encoder,
    decoder: Decoder,
    governor: StealthGovernor,
    loss: LossEstimator,
}

impl Session {
    pub fn new(config: AppConfig) -> Result<Self, CoreError> {
        // Feature detection happens up front so a host the dispatcher
        // cannot classify fails session setup, not a hot path.
        let _ = crate::simd::detect();
        Ok(Self {
            encoder: Encoder::new(config.fec.clone())?,
            decoder: Decoder::new(config.fec.clone())?,
            governor: StealthGovernor::new(config.stealth)?,
            loss: LossEstimator::new(0.1, 50),
        })
    }

    pub fn governor(&mut self) -> &mut StealthGovernor {
        &mut self.governor
    }

    pub fn current_redundancy(&self) -> f64 {
        self.encoder.current_redundancy()
    }

    /// FEC-encodes one application buffer and shields every resulting
    /// FEC packet. Returns UDP-ready datagrams in send order.
    pub fn encode_and_shield(
        &mut self,
        bytes: &[u8],
        stream_id: u64,
    ) -> Result<Vec<Vec<u8>>, CoreError> {
        let packets = self.encoder.encode_packet(bytes)?;
        let mut datagrams = Vec::with_capacity(packets.len());
        for packet in packets {
            let wire = packet.to_wire();
            datagrams.extend(self.governor.process_outgoing(&wire, stream_id)?);
        }
        Ok(datagrams)
    }

    /// Unshields one inbound datagram and feeds whatever it carried to
    /// the FEC decoder. Returns zero or more contiguous payload chunks
    /// in delivery order.
    pub fn unshield_and_decode(
        &mut self,
        datagram: &[u8],
        stream_id: u64,
    ) -> Result<Vec<Vec<u8>>, CoreError> {
        let Some(wire) = self.governor.process_incoming(datagram, stream_id)? else {
            return Ok(Vec::new());
        };
        let packet = FecPacket::from_wire(&wire)?;
        self.decoder.add_packet(packet)
    }

    /// Transport feedback: drives FEC redundancy and path quality.
    pub fn update_metrics(&mut self, metrics: &NetworkMetrics) {
        self.loss.report_loss(
            (metrics.packet_loss_rate * 100.0).round() as usize,
            100,
        );
        let smoothed = NetworkMetrics {
            packet_loss_rate: self.loss.estimated_loss(),
            ..metrics.clone()
        };
        self.encoder.update_network_metrics(&smoothed);
    }

    /// Signals end-of-stream to the decoder and drains anything still
    /// contiguous, with trailing padding trimmed.
    pub fn finish(&mut self) -> Vec<Vec<u8>> {
        self.decoder.finish();
        self.decoder.get_recovered_data()
    }

    /// The delay the transport should honor before the next send, if
    /// timing randomization asks for one.
    pub fn next_send_delay(&self) -> Option<Duration> {
        self.governor.calculate_next_delay()
    }
}
