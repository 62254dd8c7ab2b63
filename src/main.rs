use clap::{Parser, Subcommand};
use log::{error, info};
use quicveil::fec::NetworkMetrics;
use quicveil::simd::{self, Primitive};
use quicveil::stealth::{BrowserProfile, StealthLevel};
use quicveil::{AppConfig, Session};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_BAD_INPUT: u8 = 64;
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_INTERNAL: u8 = 70;

#[derive(Parser, Debug)]
#[clap(author, version, about = "QuicVeil stealth transport core", long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[clap(short, long, global = true)]
    verbose: bool,
    /// Serve telemetry metrics on this address
    #[clap(long, global = true, value_name = "ADDR")]
    metrics: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print detected CPU features and the backend chosen per primitive
    Detect,
    /// Read stdin lines of hex payload, emit shielded datagrams as hex
    Shield {
        #[clap(flatten)]
        common: CommonArgs,
    },
    /// Read stdin lines of hex datagrams, emit recovered payload as hex
    Unshield {
        #[clap(flatten)]
        common: CommonArgs,
    },
    /// Loopback encode/decode with synthetic loss
    Selftest {
        #[clap(flatten)]
        common: CommonArgs,

        /// Number of packets to push through the loop
        #[clap(long, default_value_t = 200)]
        packets: usize,

        /// Synthetic datagram loss rate in [0, 1]
        #[clap(long, default_value_t = 0.1)]
        loss: f64,
    },
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Stealth level
    #[clap(long, value_enum)]
    level: Option<StealthLevel>,

    /// Browser fingerprint profile
    #[clap(long, value_enum)]
    profile: Option<BrowserProfile>,

    /// Front domain for SNI rewriting
    #[clap(long)]
    front_domain: Option<String>,

    /// Real destination carried in the Host header / ECH payload
    #[clap(long)]
    real_domain: Option<String>,

    /// Shared XOR masking key (hex)
    #[clap(long, value_name = "HEX")]
    xor_key: Option<String>,

    /// Comma separated list of profiles to cycle through
    #[clap(long, value_delimiter = ',')]
    profile_seq: Option<Vec<BrowserProfile>>,

    /// Interval in seconds for profile switching (0 disables)
    #[clap(long, default_value_t = 0)]
    profile_interval: u64,

    /// Stream id used for mask derivation
    #[clap(long, default_value_t = 0)]
    stream_id: u64,

    /// Path to a unified TOML configuration file
    #[clap(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn build_config(common: &CommonArgs) -> Result<AppConfig, String> {
    let mut config = match &common.config {
        Some(path) => AppConfig::from_file(path).map_err(|e| e.to_string())?,
        None => AppConfig::default(),
    };
    config.apply_env().map_err(|e| e.to_string())?;
    if let Some(level) = common.level {
        config.stealth.level = level;
    }
    if let Some(profile) = common.profile {
        config.stealth.browser_profile = profile;
    }
    if let Some(front) = &common.front_domain {
        config.stealth.front_domain = front.clone();
    }
    if let Some(real) = &common.real_domain {
        config.stealth.real_domain = real.clone();
    }
    if let Some(key) = &common.xor_key {
        let key = decode_hex(key)?;
        config.stealth.xor_key = Some(key);
    }
    if let Some(seq) = &common.profile_seq {
        config.stealth.profile_rotation = seq.clone();
    }
    if common.profile_interval > 0 {
        config.stealth.profile_rotation_interval =
            std::time::Duration::from_secs(common.profile_interval);
    }
    config.validate()?;
    Ok(config)
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err("hex input with odd length".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn cmd_detect() -> ExitCode {
    let features = simd::detect();
    println!("cpu feature mask: {:#x}", features.bits());
    println!("hw_aes:       {}", features.hw_aes);
    println!("hw_clmul:     {}", features.hw_clmul);
    println!("hw_crc32:     {}", features.hw_crc32);
    println!("wide_vectors: {}", features.wide_vectors);
    for primitive in [
        Primitive::XorInto,
        Primitive::Gf256MulVec,
        Primitive::Gf256MulScalarVec,
        Primitive::Gf256AddVec,
        Primitive::Aes128GcmEncrypt,
    ] {
        println!(
            "{:?} -> {:?}",
            primitive,
            simd::best_backend_for(primitive)
        );
    }
    ExitCode::SUCCESS
}

fn cmd_shield(common: &CommonArgs, decode: bool) -> ExitCode {
    let config = match build_config(common) {
        Ok(c) => c,
        Err(e) => {
            error!("bad configuration: {}", e);
            return ExitCode::from(EXIT_BAD_INPUT);
        }
    };
    let mut session = match Session::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("session setup failed: {}", e);
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            return ExitCode::from(EXIT_INTERNAL);
        };
        if line.trim().is_empty() {
            continue;
        }
        let bytes = match decode_hex(&line) {
            Ok(b) => b,
            Err(e) => {
                error!("bad hex input: {}", e);
                return ExitCode::from(EXIT_BAD_INPUT);
            }
        };
        let result = if decode {
            session.unshield_and_decode(&bytes, common.stream_id)
        } else {
            session.encode_and_shield(&bytes, common.stream_id)
        };
        match result {
            Ok(outputs) => {
                for out in outputs {
                    if writeln!(stdout, "{}", encode_hex(&out)).is_err() {
                        return ExitCode::from(EXIT_INTERNAL);
                    }
                }
            }
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(EXIT_BAD_INPUT);
            }
        }
    }
    ExitCode::SUCCESS
}

fn cmd_selftest(common: &CommonArgs, packets: usize, loss: f64) -> ExitCode {
    if !(0.0..=1.0).contains(&loss) {
        error!("loss must be in [0, 1]");
        return ExitCode::from(EXIT_BAD_INPUT);
    }
    let mut config = match build_config(common) {
        Ok(c) => c,
        Err(e) => {
            error!("bad configuration: {}", e);
            return ExitCode::from(EXIT_BAD_INPUT);
        }
    };
    // The loop shares one session, so shield and unshield must share
    // key material.
    if config.stealth.xor_key.is_none() {
        config.stealth.xor_key = Some(b"selftest-loopback-key".to_vec());
    }
    let mut session = match Session::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("session setup failed: {}", e);
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut sent = 0usize;
    let mut dropped = 0usize;
    let mut delivered = 0usize;

    for i in 0..packets {
        let payload: Vec<u8> = (0..512).map(|j| ((i + j) % 251) as u8).collect();
        let datagrams = match session.encode_and_shield(&payload, 1) {
            Ok(d) => d,
            Err(e) => {
                error!("encode failed: {}", e);
                return ExitCode::from(EXIT_INTERNAL);
            }
        };
        for datagram in datagrams {
            sent += 1;
            if rng.gen_bool(loss) {
                dropped += 1;
                continue;
            }
            match session.unshield_and_decode(&datagram, 1) {
                Ok(chunks) => delivered += chunks.len(),
                Err(e) => {
                    error!("decode failed: {}", e);
                    return ExitCode::from(EXIT_INTERNAL);
                }
            }
        }
        session.update_metrics(&NetworkMetrics {
            packet_loss_rate: loss,
            rtt_ms: 40.0,
            ..NetworkMetrics::default()
        });
    }

    info!(
        "selftest: {} datagrams sent, {} dropped, {} blocks delivered, redundancy {:.2}",
        sent,
        dropped,
        delivered,
        session.current_redundancy()
    );
    println!(
        "sent={} dropped={} delivered={} redundancy={:.2}",
        sent,
        dropped,
        delivered,
        session.current_redundancy()
    );
    if delivered == 0 && packets > 0 {
        return ExitCode::from(EXIT_UNAVAILABLE);
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    if let Some(addr) = &cli.metrics {
        if let Err(e) = quicveil::telemetry::serve(addr) {
            error!("metrics endpoint failed: {}", e);
            return ExitCode::from(EXIT_INTERNAL);
        }
    }

    match &cli.command {
        Commands::Detect => cmd_detect(),
        Commands::Shield { common } => cmd_shield(common, false),
        Commands::Unshield { common } => cmd_shield(common, true),
        Commands::Selftest {
            common,
            packets,
            loss,
        } => cmd_selftest(common, *packets, *loss),
    }
}
