//! QUIC path-migration governor.
//!
//! Owns the set of candidate paths and decides when to move and where.
//! The transport performs the actual PATH_CHALLENGE/PATH_RESPONSE round
//! trip; this module issues challenge tokens, matches responses, and
//! enforces validation timeouts. Exactly one path is active at a time.

use crate::error::CoreError;
use log::{debug, info};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStrategy {
    None,
    Random,
    LatencyOptimized,
    LoadBalanced,
}

#[derive(Debug, Clone)]
pub struct QuicPath {
    pub path_id: u32,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub validated: bool,
    pub rtt_ms: f64,
    pub loss_rate: f64,
    pub bandwidth_kbps: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_used: Instant,
}

impl QuicPath {
    pub fn new(path_id: u32, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            path_id,
            local_addr,
            remote_addr,
            validated: false,
            rtt_ms: 0.0,
            loss_rate: 0.0,
            bandwidth_kbps: 0,
            bytes_sent: 0,
            bytes_received: 0,
            last_used: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathConfig {
    pub strategy: MigrationStrategy,
    pub min_migration_delay: Duration,
    pub max_migration_delay: Duration,
    pub path_validation_timeout: Duration,
    pub max_validation_attempts: u32,
    /// Active path counts as degraded when its RTT exceeds the best
    /// alternative by this factor.
    pub rtt_degradation_factor: f64,
    /// Consecutive degraded probes before a latency migration fires.
    pub sustained_probes: u32,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            strategy: MigrationStrategy::None,
            min_migration_delay: Duration::from_millis(100),
            max_migration_delay: Duration::from_millis(2000),
            path_validation_timeout: Duration::from_secs(5),
            max_validation_attempts: 3,
            rtt_degradation_factor: 1.3,
            sustained_probes: 3,
        }
    }
}

struct Validation {
    token: [u8; 8],
    deadline: Instant,
    attempts: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PathEvent {
    /// Challenge timed out; a new one was issued.
    ChallengeReissued(u32),
    /// Validation attempts exhausted; the path was removed.
    Unusable(u32),
}

pub struct PathManager {
    config: PathConfig,
    paths: HashMap<u32, QuicPath>,
    active: Option<u32>,
    validations: HashMap<u32, Validation>,
    degraded_probes: u32,
    next_random_migration: Option<Instant>,
}

impl PathManager {
    pub fn new(config: PathConfig) -> Self {
        Self {
            config,
            paths: HashMap::new(),
            active: None,
            validations: HashMap::new(),
            degraded_probes: 0,
            next_random_migration: None,
        }
    }

    pub fn strategy(&self) -> MigrationStrategy {
        self.config.strategy
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn active_path(&self) -> Option<&QuicPath> {
        self.active.and_then(|id| self.paths.get(&id))
    }

    /// Registers a path. The first registered path becomes active and is
    /// considered validated (it carried the handshake).
    pub fn add_path(&mut self, mut path: QuicPath, now: Instant) -> bool {
        if self.paths.contains_key(&path.path_id) {
            return false;
        }
        if self.active.is_none() {
            path.validated = true;
            self.active = Some(path.path_id);
            self.schedule_random_migration(now);
        }
        self.paths.insert(path.path_id, path);
        true
    }

    pub fn remove_path(&mut self, path_id: u32) -> bool {
        if self.paths.remove(&path_id).is_none() {
            return false;
        }
        self.validations.remove(&path_id);
        if self.active == Some(path_id) {
            self.active = self
                .paths
                .values()
                .filter(|p| p.validated)
                .map(|p| p.path_id)
                .next();
        }
        true
    }

    /// Issues a challenge token for the path; the transport must echo it
    /// back via `on_path_response` before the validation timeout.
    pub fn begin_validation(&mut self, path_id: u32, now: Instant) -> Option<[u8; 8]> {
        if !self.paths.contains_key(&path_id) {
            return None;
        }
        let mut token = [0u8; 8];
        rand::thread_rng().fill(&mut token[..]);
        let attempts = self
            .validations
            .get(&path_id)
            .map(|v| v.attempts)
            .unwrap_or(0)
            + 1;
        self.validations.insert(
            path_id,
            Validation {
                token,
                deadline: now + self.config.path_validation_timeout,
                attempts,
            },
        );
        Some(token)
    }

    /// Matches a PATH_RESPONSE. A correct token validates the path.
    pub fn on_path_response(&mut self, path_id: u32, token: [u8; 8]) -> bool {
        let Some(validation) = self.validations.get(&path_id) else {
            return false;
        };
        if validation.token != token {
            return false;
        }
        self.validations.remove(&path_id);
        if let Some(path) = self.paths.get_mut(&path_id) {
            path.validated = true;
            debug!("path {} validated", path_id);
            return true;
        }
        false
    }

    /// Drives validation timers. Expired challenges are reissued until
    /// the attempt limit is exhausted, after which the path is removed.
    pub fn tick(&mut self, now: Instant) -> Vec<PathEvent> {
        let mut events = Vec::new();
        let expired: Vec<u32> = self
            .validations
            .iter()
            .filter(|(_, v)| now >= v.deadline)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            let attempts = self.validations[&id].attempts;
            if attempts >= self.config.max_validation_attempts {
                self.validations.remove(&id);
                self.remove_path(id);
                info!("path {} unusable after {} validation attempts", id, attempts);
                events.push(PathEvent::Unusable(id));
            } else {
                self.begin_validation(id, now);
                events.push(PathEvent::ChallengeReissued(id));
            }
        }
        events
    }

    pub fn update_metrics(&mut self, path_id: u32, rtt_ms: f64, loss_rate: f64, bandwidth_kbps: u64) {
        let active = self.active;
        if let Some(path) = self.paths.get_mut(&path_id) {
            path.rtt_ms = rtt_ms;
            path.loss_rate = loss_rate;
            path.bandwidth_kbps = bandwidth_kbps;
        }
        if self.config.strategy == MigrationStrategy::LatencyOptimized && active == Some(path_id) {
            match self.best_alternative_rtt() {
                Some(best) if rtt_ms > best * self.config.rtt_degradation_factor => {
                    self.degraded_probes += 1;
                }
                _ => self.degraded_probes = 0,
            }
        }
    }

    fn best_alternative_rtt(&self) -> Option<f64> {
        self.paths
            .values()
            .filter(|p| p.validated && Some(p.path_id) != self.active && p.rtt_ms > 0.0)
            .map(|p| p.rtt_ms)
            .fold(None, |acc, rtt| match acc {
                Some(best) if best <= rtt => Some(best),
                _ => Some(rtt),
            })
    }

    pub fn should_migrate(&self, now: Instant) -> bool {
        let alternatives = self
            .paths
            .values()
            .any(|p| p.validated && Some(p.path_id) != self.active);
        if !alternatives {
            return false;
        }
        match self.config.strategy {
            MigrationStrategy::None => false,
            MigrationStrategy::Random => self
                .next_random_migration
                .map_or(false, |at| now >= at),
            MigrationStrategy::LatencyOptimized => {
                self.degraded_probes >= self.config.sustained_probes
            }
            MigrationStrategy::LoadBalanced => true,
        }
    }

    /// Picks the migration target for the configured strategy.
    pub fn select_best_path(&self) -> Option<u32> {
        let candidates: Vec<&QuicPath> = self
            .paths
            .values()
            .filter(|p| p.validated && Some(p.path_id) != self.active)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        match self.config.strategy {
            MigrationStrategy::None => None,
            MigrationStrategy::Random => {
                Some(candidates[rng.gen_range(0..candidates.len())].path_id)
            }
            MigrationStrategy::LatencyOptimized => candidates
                .iter()
                .min_by(|a, b| a.rtt_ms.total_cmp(&b.rtt_ms))
                .map(|p| p.path_id),
            MigrationStrategy::LoadBalanced => {
                // Inverse-RTT weighted pick; unmeasured paths weigh as
                // 1ms so they still rotate in.
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|p| 1.0 / p.rtt_ms.max(1.0))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut target = rng.gen_range(0.0..total);
                for (path, w) in candidates.iter().zip(&weights) {
                    if target < *w {
                        return Some(path.path_id);
                    }
                    target -= w;
                }
                candidates.last().map(|p| p.path_id)
            }
        }
    }

    pub fn migrate_to(&mut self, path_id: u32, now: Instant) -> Result<(), CoreError> {
        let Some(path) = self.paths.get_mut(&path_id) else {
            return Err(CoreError::InvalidInput(format!("unknown path {}", path_id)));
        };
        if !path.validated {
            return Err(CoreError::PathUnusable(path_id));
        }
        path.last_used = now;
        self.active = Some(path_id);
        self.degraded_probes = 0;
        self.schedule_random_migration(now);
        crate::telemetry::PATH_MIGRATIONS.inc();
        info!("migrated to path {}", path_id);
        Ok(())
    }

    fn schedule_random_migration(&mut self, now: Instant) {
        if self.config.strategy != MigrationStrategy::Random {
            return;
        }
        let lo = self.config.min_migration_delay.as_millis() as u64;
        let hi = self.config.max_migration_delay.as_millis() as u64;
        let wait = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        self.next_random_migration = Some(now + Duration::from_millis(wait));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn manager(strategy: MigrationStrategy) -> PathManager {
        PathManager::new(PathConfig {
            strategy,
            ..PathConfig::default()
        })
    }

    fn two_validated(strategy: MigrationStrategy) -> (PathManager, Instant) {
        let now = Instant::now();
        let mut mgr = manager(strategy);
        mgr.add_path(QuicPath::new(1, addr(1000), addr(2000)), now);
        mgr.add_path(QuicPath::new(2, addr(1001), addr(2000)), now);
        let token = mgr.begin_validation(2, now).unwrap();
        assert!(mgr.on_path_response(2, token));
        (mgr, now)
    }

    #[test]
    fn first_path_becomes_active() {
        let now = Instant::now();
        let mut mgr = manager(MigrationStrategy::None);
        assert!(mgr.add_path(QuicPath::new(1, addr(1000), addr(2000)), now));
        assert_eq!(mgr.active_path().unwrap().path_id, 1);
        assert!(mgr.active_path().unwrap().validated);
    }

    #[test]
    fn duplicate_path_rejected() {
        let now = Instant::now();
        let mut mgr = manager(MigrationStrategy::None);
        mgr.add_path(QuicPath::new(1, addr(1000), addr(2000)), now);
        assert!(!mgr.add_path(QuicPath::new(1, addr(1001), addr(2000)), now));
    }

    #[test]
    fn wrong_token_does_not_validate() {
        let now = Instant::now();
        let mut mgr = manager(MigrationStrategy::None);
        mgr.add_path(QuicPath::new(1, addr(1000), addr(2000)), now);
        mgr.add_path(QuicPath::new(2, addr(1001), addr(2000)), now);
        let token = mgr.begin_validation(2, now).unwrap();
        let mut bad = token;
        bad[0] ^= 0xFF;
        assert!(!mgr.on_path_response(2, bad));
        assert!(!mgr.paths[&2].validated);
    }

    #[test]
    fn validation_timeout_exhausts_into_unusable() {
        let mut mgr = PathManager::new(PathConfig {
            strategy: MigrationStrategy::None,
            path_validation_timeout: Duration::from_millis(10),
            max_validation_attempts: 2,
            ..PathConfig::default()
        });
        let now = Instant::now();
        mgr.add_path(QuicPath::new(1, addr(1000), addr(2000)), now);
        mgr.add_path(QuicPath::new(2, addr(1001), addr(2000)), now);
        mgr.begin_validation(2, now);

        let later = now + Duration::from_millis(20);
        let events = mgr.tick(later);
        assert_eq!(events, vec![PathEvent::ChallengeReissued(2)]);

        let even_later = later + Duration::from_millis(20);
        let events = mgr.tick(even_later);
        assert_eq!(events, vec![PathEvent::Unusable(2)]);
        assert_eq!(mgr.path_count(), 1);
    }

    #[test]
    fn latency_strategy_needs_sustained_degradation() {
        let (mut mgr, now) = two_validated(MigrationStrategy::LatencyOptimized);
        mgr.update_metrics(2, 20.0, 0.0, 1000);
        for _ in 0..2 {
            mgr.update_metrics(1, 100.0, 0.0, 1000);
            assert!(!mgr.should_migrate(now));
        }
        mgr.update_metrics(1, 100.0, 0.0, 1000);
        assert!(mgr.should_migrate(now));
        assert_eq!(mgr.select_best_path(), Some(2));
    }

    #[test]
    fn recovery_resets_degradation_counter() {
        let (mut mgr, now) = two_validated(MigrationStrategy::LatencyOptimized);
        mgr.update_metrics(2, 20.0, 0.0, 1000);
        mgr.update_metrics(1, 100.0, 0.0, 1000);
        mgr.update_metrics(1, 100.0, 0.0, 1000);
        mgr.update_metrics(1, 21.0, 0.0, 1000); // recovered
        mgr.update_metrics(1, 100.0, 0.0, 1000);
        assert!(!mgr.should_migrate(now));
    }

    #[test]
    fn migrate_to_unvalidated_is_unusable() {
        let now = Instant::now();
        let mut mgr = manager(MigrationStrategy::Random);
        mgr.add_path(QuicPath::new(1, addr(1000), addr(2000)), now);
        mgr.add_path(QuicPath::new(2, addr(1001), addr(2000)), now);
        assert_eq!(
            mgr.migrate_to(2, now),
            Err(CoreError::PathUnusable(2))
        );
    }

    #[test]
    fn random_strategy_waits_for_schedule() {
        let (mut mgr, now) = two_validated(MigrationStrategy::Random);
        // Re-arm the timer from a known instant.
        mgr.schedule_random_migration(now);
        assert!(!mgr.should_migrate(now));
        let later = now + Duration::from_secs(10);
        assert!(mgr.should_migrate(later));
        let target = mgr.select_best_path().unwrap();
        assert_eq!(target, 2);
        mgr.migrate_to(target, later).unwrap();
        assert_eq!(mgr.active_path().unwrap().path_id, 2);
    }

    #[test]
    fn load_balanced_rotates_across_validated() {
        let (mut mgr, now) = two_validated(MigrationStrategy::LoadBalanced);
        mgr.update_metrics(2, 10.0, 0.0, 1000);
        assert!(mgr.should_migrate(now));
        assert_eq!(mgr.select_best_path(), Some(2));
    }

    #[test]
    fn removing_active_path_fails_over() {
        let (mut mgr, _now) = two_validated(MigrationStrategy::None);
        assert!(mgr.remove_path(1));
        assert_eq!(mgr.active_path().unwrap().path_id, 2);
    }
}
