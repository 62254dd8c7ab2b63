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

//! # Stealth Governor
//!
//! Coordinates every traffic-shape countermeasure: ClientHello
//! rewriting, HTTP/3 masquerade headers, DPI evasion, XOR masking,
//! spin-bit noise, and path migration. Outgoing datagrams carry a
//! one-byte shield prefix recording which transforms were applied, so
//! the receiving governor inverts exactly what the sender did and
//! nothing else.

use crate::error::CoreError;
use base64::Engine;
use clap::ValueEnum;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub mod browser;
pub mod dpi;
pub mod masquerade;
pub mod paths;
pub mod sni;
pub mod spinbit;
pub mod xor;

pub use browser::{BrowserProfile, Fingerprint};
pub use dpi::{DpiConfig, DpiEvasion};
pub use masquerade::Masquerade;
pub use paths::{MigrationStrategy, PathConfig, PathEvent, PathManager, QuicPath};
pub use spinbit::{SpinBitRandomizer, SpinStrategy};
pub use xor::{XorConfig, XorObfuscator, XorPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StealthLevel {
    Minimal,
    Standard,
    Enhanced,
    Maximum,
}

impl std::str::FromStr for StealthLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minimal" | "0" => Ok(StealthLevel::Minimal),
            "standard" | "1" => Ok(StealthLevel::Standard),
            "enhanced" | "2" => Ok(StealthLevel::Enhanced),
            "maximum" | "3" => Ok(StealthLevel::Maximum),
            _ => Err(()),
        }
    }
}

/// Effective per-technique switches, derived from the level's policy
/// row and any explicit overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechniqueFlags {
    pub packet_fragmentation: bool,
    pub timing_randomization: bool,
    pub payload_randomization: bool,
    pub http_mimicry: bool,
    pub tls_features: bool,
    pub padding_variation: bool,
    pub protocol_obfuscation: bool,
    pub domain_fronting: bool,
    pub sni_padding: bool,
    pub sni_omission: bool,
    pub sni_split: bool,
    pub ech: bool,
    pub fake_headers: bool,
    pub spin_bit: SpinStrategy,
}

impl TechniqueFlags {
    /// The fixed policy table. SNI omission breaks too many middle
    /// boxes, so no level turns it on; it is override-only.
    pub fn for_level(level: StealthLevel) -> Self {
        use SpinStrategy::*;
        use StealthLevel::*;
        match level {
            Minimal => Self {
                packet_fragmentation: false,
                timing_randomization: false,
                payload_randomization: false,
                http_mimicry: false,
                tls_features: false,
                padding_variation: false,
                protocol_obfuscation: false,
                domain_fronting: false,
                sni_padding: false,
                sni_omission: false,
                sni_split: false,
                ech: false,
                fake_headers: false,
                spin_bit: Passthrough,
            },
            Standard => Self {
                packet_fragmentation: false,
                timing_randomization: false,
                payload_randomization: true,
                http_mimicry: false,
                tls_features: true,
                padding_variation: true,
                protocol_obfuscation: false,
                domain_fronting: false,
                sni_padding: true,
                sni_omission: false,
                sni_split: false,
                ech: false,
                fake_headers: false,
                spin_bit: Random,
            },
            Enhanced => Self {
                packet_fragmentation: true,
                timing_randomization: true,
                payload_randomization: true,
                http_mimicry: false,
                tls_features: true,
                padding_variation: true,
                protocol_obfuscation: true,
                domain_fronting: true,
                sni_padding: true,
                sni_omission: false,
                sni_split: false,
                ech: true,
                fake_headers: true,
                spin_bit: TimingBased,
            },
            Maximum => Self {
                packet_fragmentation: true,
                timing_randomization: true,
                payload_randomization: true,
                http_mimicry: true,
                tls_features: true,
                padding_variation: true,
                protocol_obfuscation: true,
                domain_fronting: true,
                sni_padding: true,
                sni_omission: false,
                sni_split: true,
                ech: true,
                fake_headers: true,
                spin_bit: Random,
            },
        }
    }
}

/// Explicit per-technique overrides; `None` defers to the level policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TechniqueOverrides {
    pub packet_fragmentation: Option<bool>,
    pub timing_randomization: Option<bool>,
    pub payload_randomization: Option<bool>,
    pub http_mimicry: Option<bool>,
    pub protocol_obfuscation: Option<bool>,
    pub domain_fronting: Option<bool>,
    pub sni_padding: Option<bool>,
    pub sni_omission: Option<bool>,
    pub sni_split: Option<bool>,
    pub ech: Option<bool>,
    pub fake_headers: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct StealthConfig {
    pub level: StealthLevel,
    pub browser_profile: BrowserProfile,
    pub front_domain: String,
    pub real_domain: String,
    pub ech_config: Option<Vec<u8>>,
    /// Agreed masking key; `None` draws a random session key (only
    /// loopback-consistent).
    pub xor_key: Option<Vec<u8>>,
    pub xor: XorConfig,
    pub dpi: DpiConfig,
    pub path: PathConfig,
    pub overrides: TechniqueOverrides,
    /// Profiles to cycle through; empty disables rotation.
    pub profile_rotation: Vec<BrowserProfile>,
    pub profile_rotation_interval: Duration,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            level: StealthLevel::Standard,
            browser_profile: BrowserProfile::ChromeWin,
            front_domain: "www.cloudflare.com".to_string(),
            real_domain: String::new(),
            ech_config: None,
            xor_key: None,
            xor: XorConfig::default(),
            dpi: DpiConfig::default(),
            path: PathConfig::default(),
            overrides: TechniqueOverrides::default(),
            profile_rotation: Vec::new(),
            profile_rotation_interval: Duration::from_secs(300),
        }
    }
}

impl StealthConfig {
    /// The level's policy row with overrides applied on top.
    pub fn effective_flags(&self) -> TechniqueFlags {
        let mut flags = TechniqueFlags::for_level(self.level);
        let o = &self.overrides;
        macro_rules! apply {
            ($field:ident) => {
                if let Some(v) = o.$field {
                    flags.$field = v;
                }
            };
        }
        apply!(packet_fragmentation);
        apply!(timing_randomization);
        apply!(payload_randomization);
        apply!(http_mimicry);
        apply!(protocol_obfuscation);
        apply!(domain_fronting);
        apply!(sni_padding);
        apply!(sni_omission);
        apply!(sni_split);
        apply!(ech);
        apply!(fake_headers);
        flags
    }

    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        #[derive(Deserialize)]
        struct Root {
            stealth: Option<Section>,
        }

        #[derive(Deserialize)]
        struct Section {
            level: Option<StealthLevel>,
            browser_profile: Option<String>,
            front_domain: Option<String>,
            real_domain: Option<String>,
            ech_config_base64: Option<String>,
            profile_rotation: Option<Vec<String>>,
            profile_rotation_interval_secs: Option<u64>,
            overrides: Option<TechniqueOverrides>,
        }

        let root: Root = toml::from_str(s)?;
        let mut cfg = StealthConfig::default();
        if let Some(sec) = root.stealth {
            if let Some(v) = sec.level {
                cfg.level = v;
            }
            if let Some(v) = sec.browser_profile {
                cfg.browser_profile = v
                    .parse()
                    .map_err(|_| format!("unknown browser profile '{}'", v))?;
            }
            if let Some(v) = sec.front_domain {
                cfg.front_domain = v;
            }
            if let Some(v) = sec.real_domain {
                cfg.real_domain = v;
            }
            if let Some(v) = sec.ech_config_base64 {
                cfg.ech_config =
                    Some(base64::engine::general_purpose::STANDARD.decode(v.trim())?);
            }
            if let Some(v) = sec.profile_rotation {
                let mut rotation = Vec::with_capacity(v.len());
                for name in v {
                    rotation.push(
                        name.parse()
                            .map_err(|_| format!("unknown browser profile '{}'", name))?,
                    );
                }
                cfg.profile_rotation = rotation;
            }
            if let Some(v) = sec.profile_rotation_interval_secs {
                cfg.profile_rotation_interval = Duration::from_secs(v);
            }
            if let Some(v) = sec.overrides {
                cfg.overrides = v;
            }
        }
        Ok(cfg)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Applies the `STEALTH_*` environment variables on top of `self`.
    pub fn apply_env(&mut self) -> Result<(), CoreError> {
        if let Ok(v) = std::env::var("STEALTH_LEVEL") {
            self.level = v
                .parse()
                .map_err(|_| CoreError::InvalidInput(format!("bad STEALTH_LEVEL '{}'", v)))?;
        }
        if let Ok(v) = std::env::var("STEALTH_FRONT_DOMAIN") {
            self.front_domain = v;
        }
        if let Ok(v) = std::env::var("STEALTH_REAL_DOMAIN") {
            self.real_domain = v;
        }
        if let Ok(v) = std::env::var("STEALTH_BROWSER_PROFILE") {
            self.browser_profile = v.parse().map_err(|_| {
                CoreError::InvalidInput(format!("bad STEALTH_BROWSER_PROFILE '{}'", v))
            })?;
        }
        if let Ok(v) = std::env::var("STEALTH_ECH_CONFIG_BASE64") {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(v.trim())
                .map_err(|e| {
                    CoreError::InvalidInput(format!("bad STEALTH_ECH_CONFIG_BASE64: {}", e))
                })?;
            self.ech_config = Some(decoded);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        let flags = self.effective_flags();
        if flags.domain_fronting && self.front_domain.is_empty() {
            return Err("front_domain required when domain fronting is enabled".to_string());
        }
        if self.dpi.min_fragment_size > self.dpi.max_fragment_size {
            return Err("fragment size bounds inverted".to_string());
        }
        if self.dpi.min_delay > self.dpi.max_delay {
            return Err("delay bounds inverted".to_string());
        }
        if self.dpi.min_padding_size > self.dpi.max_padding_size {
            return Err("padding bounds inverted".to_string());
        }
        Ok(())
    }
}

// Shield frame flag bits.
const FLAG_XOR: u8 = 0x01;
const FLAG_PAD: u8 = 0x02;
const FLAG_HDRS: u8 = 0x04;
const FLAG_FRAG: u8 = 0x08;
const FLAG_DECOY: u8 = 0x10;
const FRAG_HEADER: usize = 7; // flags + frag id + index + count

struct Reassembly {
    pieces: [Option<Vec<u8>>; 2],
    started: Instant,
}

/// The central coordinator for all stealth techniques.
pub struct StealthGovernor {
    config: StealthConfig,
    flags: TechniqueFlags,
    masquerade: Masquerade,
    dpi: DpiEvasion,
    xor: XorObfuscator,
    spin: SpinBitRandomizer,
    paths: PathManager,
    frag_seq: u32,
    reassembly: HashMap<u32, Reassembly>,
    rotation_cursor: usize,
    last_rotation: Instant,
}

impl StealthGovernor {
    pub fn new(config: StealthConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidInput)?;
        let flags = config.effective_flags();
        let fingerprint = Fingerprint::for_profile(config.browser_profile);
        let xor = match &config.xor_key {
            Some(key) => XorObfuscator::with_key(config.xor.clone(), key),
            None => XorObfuscator::new(config.xor.clone()),
        };
        crate::telemetry::STEALTH_LEVEL.set(config.level as i64);
        Ok(Self {
            masquerade: Masquerade::new(fingerprint),
            dpi: DpiEvasion::new(config.dpi.clone()),
            xor,
            spin: SpinBitRandomizer::new(flags.spin_bit),
            paths: PathManager::new(config.path.clone()),
            flags,
            config,
            frag_seq: 0,
            reassembly: HashMap::new(),
            rotation_cursor: 0,
            last_rotation: Instant::now(),
        })
    }

    pub fn level(&self) -> StealthLevel {
        self.config.level
    }

    pub fn flags(&self) -> &TechniqueFlags {
        &self.flags
    }

    /// Re-derives every technique switch; explicit overrides survive the
    /// level change.
    pub fn set_level(&mut self, level: StealthLevel) {
        self.config.level = level;
        self.flags = self.config.effective_flags();
        self.spin.set_strategy(self.flags.spin_bit);
        crate::telemetry::STEALTH_LEVEL.set(level as i64);
    }

    pub fn set_browser_profile(&mut self, profile: BrowserProfile) {
        self.config.browser_profile = profile;
        self.masquerade
            .set_fingerprint(Fingerprint::for_profile(profile));
    }

    /// Rotates to the next configured fingerprint when the rotation
    /// interval has elapsed. Returns the newly active profile, if any
    /// change happened.
    pub fn maybe_rotate_profile(&mut self, now: Instant) -> Option<BrowserProfile> {
        if self.config.profile_rotation.is_empty()
            || self.config.profile_rotation_interval.is_zero()
            || now.duration_since(self.last_rotation) < self.config.profile_rotation_interval
        {
            return None;
        }
        self.last_rotation = now;
        let profile = self.config.profile_rotation[self.rotation_cursor];
        self.rotation_cursor = (self.rotation_cursor + 1) % self.config.profile_rotation.len();
        self.set_browser_profile(profile);
        log::info!("rotated browser fingerprint to {:?}", profile);
        Some(profile)
    }

    pub fn paths(&mut self) -> &mut PathManager {
        &mut self.paths
    }

    pub fn xor_key(&self) -> &[u8] {
        self.xor.key()
    }

    /// Transforms one outgoing datagram into one or more UDP-ready
    /// datagrams. An empty input produces an HTTP-shaped decoy when
    /// mimicry is on, nothing otherwise.
    pub fn process_outgoing(
        &mut self,
        packet: &[u8],
        stream_id: u64,
    ) -> Result<Vec<Vec<u8>>, CoreError> {
        crate::telemetry::OBFUSCATED_DATAGRAMS.inc();
        if packet.is_empty() {
            if self.flags.http_mimicry {
                let mut frame = vec![FLAG_DECOY];
                frame.extend_from_slice(&self.dpi.mimicry_decoy());
                return Ok(vec![frame]);
            }
            return Ok(Vec::new());
        }

        let mut payload = packet.to_vec();
        self.spin.randomize(&mut payload);

        let mut flags = 0u8;
        let mut body = Vec::with_capacity(payload.len() + 64);

        if self.flags.fake_headers {
            let authority = if self.config.front_domain.is_empty() {
                "www.example.com"
            } else {
                self.config.front_domain.as_str()
            };
            let block = self.masquerade.header_block(authority);
            flags |= FLAG_HDRS;
            body.extend_from_slice(&(block.len() as u16).to_le_bytes());
            body.extend_from_slice(&block);
        }

        body.extend_from_slice(&payload);

        if self.flags.payload_randomization || self.flags.padding_variation {
            let pad_len = self.dpi.padding_len();
            if pad_len > 0 {
                flags |= FLAG_PAD;
                let at = body.len();
                body.resize(at + pad_len, 0);
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut body[at..]);
                body.extend_from_slice(&(pad_len as u16).to_le_bytes());
            }
        }

        // The key epoch travels on the wire: lost datagrams must not
        // desynchronize the mask schedule between the endpoints.
        let mut epoch_byte = None;
        if self.flags.protocol_obfuscation {
            flags |= FLAG_XOR;
            let epoch = self.xor.egress_epoch() & 0xFF;
            self.xor
                .mask_at_epoch(&mut body, XorPattern::Simple, stream_id, epoch);
            epoch_byte = Some(epoch as u8);
        }

        let mut frame = Vec::with_capacity(body.len() + 2);
        frame.push(flags);
        if let Some(epoch) = epoch_byte {
            frame.push(epoch);
        }
        frame.extend_from_slice(&body);

        if self.flags.packet_fragmentation {
            if let Some(split_at) = self.dpi.fragmentation_point(frame.len()) {
                let id = self.frag_seq;
                self.frag_seq = self.frag_seq.wrapping_add(1);
                let mut first = Vec::with_capacity(FRAG_HEADER + split_at);
                first.push(FLAG_FRAG);
                first.extend_from_slice(&id.to_le_bytes());
                first.push(0);
                first.push(2);
                first.extend_from_slice(&frame[..split_at]);
                let mut second = Vec::with_capacity(FRAG_HEADER + frame.len() - split_at);
                second.push(FLAG_FRAG);
                second.extend_from_slice(&id.to_le_bytes());
                second.push(1);
                second.push(2);
                second.extend_from_slice(&frame[split_at..]);
                debug!("fragmented {} byte frame at {}", frame.len(), split_at);
                return Ok(vec![first, second]);
            }
        }

        Ok(vec![frame])
    }

    /// Inverts the shield transforms of one inbound datagram. Returns
    /// `None` for decoys and for fragments whose sibling has not arrived
    /// yet.
    pub fn process_incoming(
        &mut self,
        datagram: &[u8],
        stream_id: u64,
    ) -> Result<Option<Vec<u8>>, CoreError> {
        if datagram.is_empty() {
            return Ok(None);
        }
        let flags = datagram[0];

        if flags & FLAG_FRAG != 0 {
            return self.ingest_fragment(datagram, stream_id);
        }
        if flags & FLAG_DECOY != 0 {
            return Ok(None);
        }
        if flags & !(FLAG_XOR | FLAG_PAD | FLAG_HDRS) != 0 {
            return Err(CoreError::InvalidInput(format!(
                "unknown shield flags {:#04x}",
                flags
            )));
        }

        let mut at = 1;
        let mut epoch = 0u64;
        if flags & FLAG_XOR != 0 {
            if datagram.len() < 2 {
                return Err(CoreError::InvalidInput("epoch byte missing".to_string()));
            }
            epoch = datagram[1] as u64;
            at = 2;
        }
        let mut body = datagram[at..].to_vec();
        if flags & FLAG_XOR != 0 {
            self.xor
                .mask_at_epoch(&mut body, XorPattern::Simple, stream_id, epoch);
        }

        if flags & FLAG_PAD != 0 {
            if body.len() < 2 {
                return Err(CoreError::InvalidInput("padding trailer missing".to_string()));
            }
            let pad_len =
                u16::from_le_bytes(body[body.len() - 2..].try_into().unwrap()) as usize;
            if body.len() < pad_len + 2 {
                return Err(CoreError::InvalidInput(
                    "padding length exceeds datagram".to_string(),
                ));
            }
            body.truncate(body.len() - pad_len - 2);
        }

        let payload = if flags & FLAG_HDRS != 0 {
            if body.len() < 2 {
                return Err(CoreError::InvalidInput("header block missing".to_string()));
            }
            let block_len = u16::from_le_bytes(body[..2].try_into().unwrap()) as usize;
            if body.len() < 2 + block_len {
                return Err(CoreError::InvalidInput(
                    "header block length exceeds datagram".to_string(),
                ));
            }
            // Validate the decoy block so corruption is caught here and
            // not misread as payload.
            masquerade::decode_block(&body[2..2 + block_len])?;
            body.split_off(2 + block_len)
        } else {
            body
        };

        Ok(Some(payload))
    }

    fn ingest_fragment(
        &mut self,
        datagram: &[u8],
        stream_id: u64,
    ) -> Result<Option<Vec<u8>>, CoreError> {
        if datagram.len() < FRAG_HEADER + 1 {
            return Err(CoreError::InvalidInput("fragment truncated".to_string()));
        }
        let id = u32::from_le_bytes(datagram[1..5].try_into().unwrap());
        let index = datagram[5] as usize;
        let count = datagram[6] as usize;
        if count != 2 || index >= count {
            return Err(CoreError::InvalidInput(format!(
                "bad fragment geometry {}/{}",
                index, count
            )));
        }

        // Keep the reassembly table bounded; whole lost datagrams are
        // the FEC layer's problem, not ours.
        if self.reassembly.len() > 64 {
            let oldest = self
                .reassembly
                .iter()
                .min_by_key(|(_, r)| r.started)
                .map(|(&k, _)| k);
            if let Some(k) = oldest {
                self.reassembly.remove(&k);
            }
        }

        let slot = self.reassembly.entry(id).or_insert_with(|| Reassembly {
            pieces: [None, None],
            started: Instant::now(),
        });
        slot.pieces[index] = Some(datagram[FRAG_HEADER..].to_vec());

        if slot.pieces.iter().all(Option::is_some) {
            let slot = self.reassembly.remove(&id).unwrap();
            let mut frame = slot.pieces[0].clone().unwrap();
            frame.extend_from_slice(slot.pieces[1].as_ref().unwrap());
            return self.process_incoming(&frame, stream_id);
        }
        Ok(None)
    }

    /// Rewrites a ClientHello per the active SNI techniques, in fixed
    /// order: fronting, padding, omission, split, ECH.
    pub fn process_client_hello(&mut self, hello: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut out = hello.to_vec();
        if self.flags.domain_fronting && !self.config.front_domain.is_empty() {
            out = sni::replace_sni(&out, self.config.front_domain.as_bytes())?;
        }
        if self.flags.sni_padding {
            out = sni::pad_sni(&out)?;
        }
        if self.flags.sni_omission {
            out = sni::omit_sni(&out)?;
        }
        if self.flags.sni_split {
            out = sni::split_sni(&out)?;
        }
        if self.flags.ech {
            if let Some(config) = self.config.ech_config.clone() {
                let real = if self.config.real_domain.is_empty() {
                    sni::sni_host(&out)?.unwrap_or_default()
                } else {
                    self.config.real_domain.clone().into_bytes()
                };
                out = sni::apply_ech(&out, &config, &real)?;
            }
        }
        Ok(out)
    }

    /// Rewrites the Host header of a fronted HTTP request to the real
    /// destination. The SNI carries the front; the Host carries the
    /// truth.
    pub fn process_http_headers(&self, headers: &str) -> String {
        if !self.flags.domain_fronting || self.config.real_domain.is_empty() {
            return headers.to_string();
        }
        let mut out = String::with_capacity(headers.len());
        for (i, line) in headers.split_inclusive("\r\n").enumerate() {
            if i > 0 && line.to_ascii_lowercase().starts_with("host:") {
                out.push_str(&format!("Host: {}\r\n", self.config.real_domain));
            } else {
                out.push_str(line);
            }
        }
        out
    }

    /// The delay the transport should apply before the next send, when
    /// timing randomization decides this packet gets one.
    pub fn calculate_next_delay(&self) -> Option<Duration> {
        if self.flags.timing_randomization && self.dpi.delay_due() {
            Some(self.dpi.calculate_next_delay())
        } else {
            None
        }
    }
}
