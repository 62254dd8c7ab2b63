//! DPI evasion over already-encrypted packets: fragmentation, timing
//! jitter, padding, and HTTP request-line mimicry. The governor owns the
//! framing that makes each of these reversible on ingress; this module
//! only decides sizes, delays, and decoy bytes.

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DpiConfig {
    pub min_fragment_size: usize,
    pub max_fragment_size: usize,
    pub fragmentation_probability: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub timing_probability: f64,
    pub min_padding_size: usize,
    pub max_padding_size: usize,
    pub padding_probability: f64,
    pub mimicry_hosts: Vec<String>,
}

impl Default for DpiConfig {
    fn default() -> Self {
        Self {
            min_fragment_size: 64,
            max_fragment_size: 1200,
            fragmentation_probability: 0.3,
            min_delay: Duration::from_micros(100),
            max_delay: Duration::from_micros(5000),
            timing_probability: 0.5,
            min_padding_size: 0,
            max_padding_size: 64,
            padding_probability: 0.4,
            mimicry_hosts: vec![
                "www.bing.com".to_string(),
                "cdn.jsdelivr.net".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
        }
    }
}

pub struct DpiEvasion {
    config: DpiConfig,
    /// Threshold above which the current packet is a fragmentation
    /// candidate; re-sampled per decision so sizes do not cluster.
    last_threshold: usize,
}

impl DpiEvasion {
    pub fn new(config: DpiConfig) -> Self {
        Self {
            last_threshold: config.max_fragment_size,
            config,
        }
    }

    pub fn config(&self) -> &DpiConfig {
        &self.config
    }

    /// Whether this packet should be split, and at which byte. The
    /// split point lands inside [min_fragment_size, max_fragment_size]
    /// and always leaves two non-empty pieces.
    pub fn fragmentation_point(&mut self, len: usize) -> Option<usize> {
        let mut rng = rand::thread_rng();
        self.last_threshold = rng.gen_range(self.config.min_fragment_size..=self.config.max_fragment_size);
        if len <= self.last_threshold
            || len < 2
            || !rng.gen_bool(self.config.fragmentation_probability)
        {
            return None;
        }
        let hi = self.config.max_fragment_size.min(len - 1);
        if hi == 0 {
            return None;
        }
        let lo = self.config.min_fragment_size.min(hi);
        Some(rng.gen_range(lo.max(1)..=hi))
    }

    /// Uniform random emission delay in the configured band.
    pub fn calculate_next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let lo = self.config.min_delay.as_micros() as u64;
        let hi = self.config.max_delay.as_micros() as u64;
        if hi <= lo {
            return self.config.min_delay;
        }
        Duration::from_micros(rng.gen_range(lo..=hi))
    }

    pub fn delay_due(&self) -> bool {
        rand::thread_rng().gen_bool(self.config.timing_probability)
    }

    /// Number of random padding bytes to append, zero when the dice say
    /// this packet goes out bare.
    pub fn padding_len(&self) -> usize {
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.config.padding_probability) {
            return 0;
        }
        rng.gen_range(self.config.min_padding_size..=self.config.max_padding_size)
    }

    /// A decoy packet that opens like a plain HTTP request. Used in
    /// place of empty probe packets.
    pub fn mimicry_decoy(&self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let host = self
            .config
            .mimicry_hosts
            .choose(&mut rng)
            .map(String::as_str)
            .unwrap_or("www.example.com");
        let mut out = format!(
            "GET / HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\nAccept: */*\r\n\r\n",
            host
        )
        .into_bytes();
        let trailer = rng.gen_range(16..64);
        let at = out.len();
        out.resize(at + trailer, 0);
        rng.fill(&mut out[at..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmentation_point_respects_bounds() {
        let mut dpi = DpiEvasion::new(DpiConfig {
            fragmentation_probability: 1.0,
            min_fragment_size: 10,
            max_fragment_size: 50,
            ..DpiConfig::default()
        });
        for _ in 0..100 {
            if let Some(p) = dpi.fragmentation_point(200) {
                assert!(p >= 1 && p <= 50);
                assert!(p < 200);
            }
        }
    }

    #[test]
    fn small_packets_never_fragment() {
        let mut dpi = DpiEvasion::new(DpiConfig {
            fragmentation_probability: 1.0,
            ..DpiConfig::default()
        });
        for _ in 0..50 {
            assert!(dpi.fragmentation_point(32).is_none());
        }
    }

    #[test]
    fn delay_stays_in_band() {
        let dpi = DpiEvasion::new(DpiConfig::default());
        for _ in 0..100 {
            let d = dpi.calculate_next_delay();
            assert!(d >= Duration::from_micros(100));
            assert!(d <= Duration::from_micros(5000));
        }
    }

    #[test]
    fn padding_stays_in_band() {
        let dpi = DpiEvasion::new(DpiConfig {
            padding_probability: 1.0,
            min_padding_size: 4,
            max_padding_size: 16,
            ..DpiConfig::default()
        });
        for _ in 0..100 {
            let p = dpi.padding_len();
            assert!((4..=16).contains(&p));
        }
    }

    #[test]
    fn decoy_opens_with_request_line() {
        let dpi = DpiEvasion::new(DpiConfig::default());
        let decoy = dpi.mimicry_decoy();
        assert!(decoy.starts_with(b"GET / HTTP/1.1\r\n"));
    }
}
