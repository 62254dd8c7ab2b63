//! Telemetry metrics used throughout QuicVeil.
//!
//! Currently exported metrics:
//! - `encoded_packets_total`: Source packets pushed through the FEC encoder.
//! - `repair_packets_total`: Repair packets emitted by the FEC encoder.
//! - `decoded_packets_total`: Source packets delivered by the FEC decoder.
//! - `recovered_packets_total`: Source packets reconstructed from repairs.
//! - `stale_packets_total`: Repair packets dropped as out-of-window.
//! - `loss_rate_percent`: Last reported loss rate multiplied by 100.
//! - `redundancy_percent`: Current FEC redundancy ratio multiplied by 100.
//! - `cpu_feature_mask`: Bitmask of detected CPU features.
//! - `stealth_level`: Active stealth level as numeric value.
//! - `obfuscated_datagrams_total`: Datagrams processed by the governor.
//! - `path_migrations_total`: Successful path migrations.
//! - `pool_overflow_total`: Memory pool misses that forced a fresh allocation.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref ENCODED_PACKETS: IntCounter =
        register_int_counter!("encoded_packets_total", "Total encoded source packets").unwrap();
    pub static ref REPAIR_PACKETS: IntCounter =
        register_int_counter!("repair_packets_total", "Total emitted repair packets").unwrap();
    pub static ref DECODED_PACKETS: IntCounter =
        register_int_counter!("decoded_packets_total", "Total delivered source packets").unwrap();
    pub static ref RECOVERED_PACKETS: IntCounter =
        register_int_counter!("recovered_packets_total", "Total recovered source packets")
            .unwrap();
    pub static ref STALE_PACKETS: IntCounter =
        register_int_counter!("stale_packets_total", "Out-of-window repair packets dropped")
            .unwrap();
    pub static ref LOSS_RATE: IntGauge =
        register_int_gauge!("loss_rate_percent", "Last reported loss rate * 100").unwrap();
    pub static ref REDUNDANCY: IntGauge =
        register_int_gauge!("redundancy_percent", "Current FEC redundancy * 100").unwrap();
    pub static ref CPU_FEATURE_MASK: IntGauge =
        register_int_gauge!("cpu_feature_mask", "Detected CPU features bitmask").unwrap();
    pub static ref STEALTH_LEVEL: IntGauge =
        register_int_gauge!("stealth_level", "Active stealth level").unwrap();
    pub static ref OBFUSCATED_DATAGRAMS: IntCounter = register_int_counter!(
        "obfuscated_datagrams_total",
        "Datagrams processed by the stealth governor"
    )
    .unwrap();
    pub static ref PATH_MIGRATIONS: IntCounter =
        register_int_counter!("path_migrations_total", "Successful path migrations").unwrap();
    pub static ref POOL_OVERFLOWS: IntCounter = register_int_counter!(
        "pool_overflow_total",
        "Memory pool misses that forced a fresh allocation"
    )
    .unwrap();
}

/// Serves the metrics registry as Prometheus text on a blocking TCP
/// listener in a background thread.
pub fn serve(addr: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::net::TcpListener;
    let listener = TcpListener::bind(addr)?;
    std::thread::spawn(move || {
        let encoder = TextEncoder::new();
        for stream in listener.incoming().flatten() {
            let mut stream = stream;
            let metrics = prometheus::gather();
            let mut buf = Vec::new();
            if encoder.encode(&metrics, &mut buf).is_ok() {
                let _ = stream.write_all(&buf);
            }
        }
    });
    Ok(())
}

/// Dumps the current registry to the log at info level.
pub fn flush() {
    let encoder = TextEncoder::new();
    let metrics = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&metrics, &mut buf).is_ok() {
        log::info!("\n{}", String::from_utf8_lossy(&buf));
    }
}
