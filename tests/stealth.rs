use once_cell::sync::Lazy;
use quicveil::stealth::sni::{
    apply_ech, find_extension, omit_sni, pad_sni, parse_client_hello, replace_sni, sni_host,
    split_sni, synthesize_client_hello, EXT_ECH, EXT_SERVER_NAME,
};
use quicveil::stealth::{
    BrowserProfile, Fingerprint, SpinBitRandomizer, SpinStrategy, StealthConfig,
    StealthGovernor, StealthLevel, TechniqueFlags, XorConfig, XorObfuscator, XorPattern,
};

fn chrome_hello(host: &str) -> Vec<u8> {
    synthesize_client_hello(&Fingerprint::for_profile(BrowserProfile::ChromeWin), host)
}

/// Shared baseline record for the pure-parser tests; rewrites always
/// copy, so reuse is safe.
static BASE_HELLO: Lazy<Vec<u8>> = Lazy::new(|| chrome_hello("example.com"));

fn governor_with_key(level: StealthLevel) -> StealthGovernor {
    let config = StealthConfig {
        level,
        xor_key: Some(b"integration-key".to_vec()),
        ..StealthConfig::default()
    };
    StealthGovernor::new(config).unwrap()
}

// --- SNI rewriting -------------------------------------------------------

#[test]
fn sni_substitution_grows_all_length_fields_by_seven() {
    let hello = BASE_HELLO.clone();
    let before = parse_client_hello(&hello).unwrap();
    let out = replace_sni(&hello, b"www.cloudflare.com").unwrap();
    let after = parse_client_hello(&out).unwrap();
    assert_eq!(after.record_len, before.record_len + 7);
    assert_eq!(after.handshake_len, before.handshake_len + 7);
    assert_eq!(after.extensions_len, before.extensions_len + 7);
    assert_eq!(sni_host(&out).unwrap().unwrap(), b"www.cloudflare.com");
}

#[test]
fn every_rewrite_leaves_a_parseable_record() {
    let hello = chrome_hello("secret.example.org");
    let fronted = replace_sni(&hello, b"www.cloudflare.com").unwrap();
    parse_client_hello(&fronted).unwrap();
    let padded = pad_sni(&fronted).unwrap();
    parse_client_hello(&padded).unwrap();
    let split = split_sni(&padded).unwrap();
    parse_client_hello(&split).unwrap();
    let eched = apply_ech(&split, b"some-config-bytes", b"secret.example.org").unwrap();
    parse_client_hello(&eched).unwrap();
    let omitted = omit_sni(&eched).unwrap();
    let view = parse_client_hello(&omitted).unwrap();
    assert!(find_extension(&omitted, &view, EXT_SERVER_NAME).is_none());
    assert!(find_extension(&omitted, &view, EXT_ECH).is_some());
}

#[test]
fn fingerprints_shape_the_hello() {
    let chrome = BASE_HELLO.clone();
    let firefox = synthesize_client_hello(
        &Fingerprint::for_profile(BrowserProfile::FirefoxWin),
        "example.com",
    );
    // Same host, different cipher and extension ordering.
    assert_ne!(chrome, firefox);
    parse_client_hello(&firefox).unwrap();
}

#[test]
fn governor_applies_sni_policy_in_order() {
    let mut gov = governor_with_key(StealthLevel::Enhanced);
    let hello = chrome_hello("hidden.example");
    let out = gov.process_client_hello(&hello).unwrap();
    let host = sni_host(&out).unwrap().unwrap();
    // Fronting first, then padding on top.
    assert!(host.ends_with(b".www.cloudflare.com"));
    parse_client_hello(&out).unwrap();
}

#[test]
fn maximum_level_with_config_adds_ech() {
    let mut config = StealthConfig {
        level: StealthLevel::Maximum,
        real_domain: "hidden.example".to_string(),
        ech_config: Some(b"ech-config-material".to_vec()),
        xor_key: Some(b"k".to_vec()),
        ..StealthConfig::default()
    };
    config.overrides.sni_split = Some(false); // isolate the ECH effect
    let mut gov = StealthGovernor::new(config).unwrap();
    let out = gov.process_client_hello(&chrome_hello("hidden.example")).unwrap();
    let view = parse_client_hello(&out).unwrap();
    assert!(find_extension(&out, &view, EXT_ECH).is_some());
}

// --- XOR obfuscator ------------------------------------------------------

#[test]
fn xor_involution_across_patterns_and_contexts() {
    let patterns = [
        XorPattern::Simple,
        XorPattern::Layered,
        XorPattern::PositionBased,
        XorPattern::CryptoSecure,
        XorPattern::FecOptimized,
        XorPattern::HeaderSpecific,
    ];
    for pattern in patterns {
        for context in [0u64, 7, 0xDEAD_BEEF, u64::MAX] {
            let mut obf = XorObfuscator::with_key(XorConfig::default(), b"spec-invariant");
            let original: Vec<u8> = (0..997).map(|i| (i * 13 % 256) as u8).collect();
            let mut buf = original.clone();
            obf.obfuscate(&mut buf, pattern, context);
            obf.deobfuscate(&mut buf, pattern, context);
            assert_eq!(buf, original, "{:?} ctx {}", pattern, context);
        }
    }
}

#[test]
fn fec_optimized_masking_commutes_with_xor() {
    let mut obf = XorObfuscator::with_key(XorConfig::default(), b"fec-linear");
    let a = vec![0x5Au8; 200];
    let b: Vec<u8> = (0..200).map(|i| (i % 256) as u8).collect();

    let mut expected = a.clone();
    for (x, y) in expected.iter_mut().zip(&b) {
        *x ^= y;
    }

    let mut ma = a;
    let mut mb = b;
    obf.obfuscate(&mut ma, XorPattern::FecOptimized, 11);
    obf.obfuscate(&mut mb, XorPattern::FecOptimized, 22);
    let masked_xor: Vec<u8> = ma.iter().zip(&mb).map(|(x, y)| x ^ y).collect();
    assert_eq!(masked_xor, expected);
}

// --- Spin bit ------------------------------------------------------------

#[test]
fn spin_bit_randomization_touches_exactly_one_bit() {
    let randomizer = SpinBitRandomizer::new(SpinStrategy::Random);
    for first in [0x40u8, 0x41, 0x5F, 0x7F] {
        let original = vec![first, 0xAA, 0xBB, 0xCC];
        let mut packet = original.clone();
        randomizer.randomize(&mut packet);
        let diff = packet[0] ^ original[0];
        assert!(diff == 0 || diff == 0x20, "diff {:#x}", diff);
        assert_eq!(&packet[1..], &original[1..]);
    }
}

#[test]
fn spin_bit_ignores_long_headers() {
    let randomizer = SpinBitRandomizer::new(SpinStrategy::Random);
    let mut packet = vec![0xC0u8, 1, 2];
    assert!(!randomizer.randomize(&mut packet));
}

// --- Policy table --------------------------------------------------------

#[test]
fn level_policy_matches_specification_table() {
    let m = TechniqueFlags::for_level(StealthLevel::Minimal);
    assert!(
        !m.packet_fragmentation
            && !m.timing_randomization
            && !m.payload_randomization
            && !m.http_mimicry
            && !m.tls_features
            && !m.padding_variation
            && !m.protocol_obfuscation
            && !m.domain_fronting
            && !m.sni_padding
            && !m.sni_split
            && !m.ech
    );
    assert_eq!(m.spin_bit, SpinStrategy::Passthrough);

    let s = TechniqueFlags::for_level(StealthLevel::Standard);
    assert!(s.payload_randomization && s.tls_features && s.padding_variation && s.sni_padding);
    assert!(!s.packet_fragmentation && !s.domain_fronting && !s.ech);
    assert_eq!(s.spin_bit, SpinStrategy::Random);

    let e = TechniqueFlags::for_level(StealthLevel::Enhanced);
    assert!(
        e.packet_fragmentation
            && e.timing_randomization
            && e.protocol_obfuscation
            && e.domain_fronting
            && e.ech
    );
    assert!(!e.http_mimicry && !e.sni_split);
    assert_eq!(e.spin_bit, SpinStrategy::TimingBased);

    let x = TechniqueFlags::for_level(StealthLevel::Maximum);
    assert!(x.http_mimicry && x.sni_split && x.ech && x.packet_fragmentation);
    assert_eq!(x.spin_bit, SpinStrategy::Random);
}

// --- Governor datagram pipeline ------------------------------------------

#[test]
fn shield_unshield_roundtrip_all_levels() {
    for level in [
        StealthLevel::Minimal,
        StealthLevel::Standard,
        StealthLevel::Enhanced,
        StealthLevel::Maximum,
    ] {
        let mut gov = governor_with_key(level);
        for i in 0u32..30 {
            let payload: Vec<u8> = (0..800).map(|j| ((i + j) % 251) as u8).collect();
            let datagrams = gov.process_outgoing(&payload, 3).unwrap();
            let mut back = None;
            for d in datagrams {
                if let Some(p) = gov.process_incoming(&d, 3).unwrap() {
                    back = Some(p);
                }
            }
            assert_eq!(back.unwrap(), payload, "{:?} packet {}", level, i);
        }
    }
}

#[test]
fn timing_randomization_yields_bounded_delays() {
    let gov = governor_with_key(StealthLevel::Maximum);
    let mut saw_delay = false;
    for _ in 0..200 {
        if let Some(d) = gov.calculate_next_delay() {
            saw_delay = true;
            assert!(d >= std::time::Duration::from_micros(100));
            assert!(d <= std::time::Duration::from_micros(5000));
        }
    }
    assert!(saw_delay);
}

#[test]
fn minimal_level_never_asks_for_delay() {
    let gov = governor_with_key(StealthLevel::Minimal);
    for _ in 0..100 {
        assert!(gov.calculate_next_delay().is_none());
    }
}

#[test]
fn corrupted_datagrams_fail_closed() {
    let mut gov = governor_with_key(StealthLevel::Standard);
    let datagrams = gov
        .process_outgoing(&[1, 2, 3, 4, 5, 6, 7, 8], 1)
        .unwrap();
    let mut bad = datagrams[0].clone();
    bad[0] = 0xFF;
    assert!(gov.process_incoming(&bad, 1).is_err());
}
