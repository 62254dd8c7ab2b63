//! Browser fingerprint tables.
//!
//! Process-wide read-only data describing how mainstream browsers shape
//! their TLS and HTTP/3 traffic. The governor draws decoy headers and
//! ClientHello parameters from the active profile so injected traffic
//! stays consistent with itself.

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BrowserProfile {
    ChromeWin,
    ChromeMac,
    ChromeLinux,
    ChromeMobile,
    FirefoxWin,
    FirefoxMac,
    FirefoxLinux,
    FirefoxMobile,
    SafariMac,
    SafariIos,
    EdgeWin,
}

impl std::str::FromStr for BrowserProfile {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chrome_win10" | "chrome_win" | "chrome" => Ok(BrowserProfile::ChromeWin),
            "chrome_macos" | "chrome_mac" => Ok(BrowserProfile::ChromeMac),
            "chrome_linux" => Ok(BrowserProfile::ChromeLinux),
            "chrome_mobile" | "chrome_android" => Ok(BrowserProfile::ChromeMobile),
            "firefox_win10" | "firefox_win" | "firefox" => Ok(BrowserProfile::FirefoxWin),
            "firefox_macos" | "firefox_mac" => Ok(BrowserProfile::FirefoxMac),
            "firefox_linux" => Ok(BrowserProfile::FirefoxLinux),
            "firefox_mobile" | "firefox_android" => Ok(BrowserProfile::FirefoxMobile),
            "safari_macos" | "safari_mac" | "safari" => Ok(BrowserProfile::SafariMac),
            "safari_ios" => Ok(BrowserProfile::SafariIos),
            "edge_win10" | "edge_win" | "edge" => Ok(BrowserProfile::EdgeWin),
            _ => Err(()),
        }
    }
}

/// A complete client fingerprint: TLS shape plus the HTTP surface the
/// masquerade layer mimics.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub profile: BrowserProfile,
    pub version: u16,
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub cipher_suites: Vec<u16>,
    /// TLS extension types in the order the browser emits them.
    pub extension_order: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub signature_algs: Vec<u16>,
    pub alpn: Vec<&'static str>,
    pub initial_max_data: u64,
    pub initial_max_streams_bidi: u64,
    pub max_idle_timeout_ms: u64,
}

const CHROME_CIPHERS: &[u16] = &[
    0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013, 0xc014,
];
const FIREFOX_CIPHERS: &[u16] = &[
    0x1301, 0x1302, 0x1303, 0xcca9, 0xcca8, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xc013, 0xc014,
];
const SAFARI_CIPHERS: &[u16] = &[
    0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xc009, 0xc013, 0xc00a, 0xc014,
];

// Extension type codes: server_name(0), supported_groups(10),
// signature_algorithms(13), alpn(16), supported_versions(43),
// psk_key_exchange_modes(45), key_share(51), session_ticket(35),
// status_request(5), sct(18), extended_master_secret(23),
// renegotiation_info(65281).
const CHROME_EXTENSIONS: &[u16] = &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 21];
const FIREFOX_EXTENSIONS: &[u16] = &[0, 23, 65281, 10, 11, 35, 16, 5, 51, 43, 13, 45, 28, 21];
const SAFARI_EXTENSIONS: &[u16] = &[0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 21];

const CHROME_GROUPS: &[u16] = &[0x11EC, 0x001D, 0x0017, 0x0018];
const FIREFOX_GROUPS: &[u16] = &[0x001D, 0x0017, 0x0018, 0x0019, 0x0100, 0x0101];
const SAFARI_GROUPS: &[u16] = &[0x001D, 0x0017, 0x0018, 0x0019];

const CHROME_SIGALGS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
];
const FIREFOX_SIGALGS: &[u16] = &[
    0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
];

impl Fingerprint {
    pub fn for_profile(profile: BrowserProfile) -> Self {
        use BrowserProfile::*;
        let (user_agent, accept_language) = match profile {
            ChromeWin => (
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
                "en-US,en;q=0.9",
            ),
            ChromeMac => (
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
                "en-US,en;q=0.9",
            ),
            ChromeLinux => (
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
                "en-US,en;q=0.9",
            ),
            ChromeMobile => (
                "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Mobile Safari/537.36",
                "en-US,en;q=0.9",
            ),
            FirefoxWin => (
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
                "en-US,en;q=0.5",
            ),
            FirefoxMac => (
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6; rv:127.0) Gecko/20100101 Firefox/127.0",
                "en-US,en;q=0.5",
            ),
            FirefoxLinux => (
                "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
                "en-US,en;q=0.5",
            ),
            FirefoxMobile => (
                "Mozilla/5.0 (Android 14; Mobile; rv:127.0) Gecko/127.0 Firefox/127.0",
                "en-US,en;q=0.9",
            ),
            SafariMac => (
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
                "en-US,en;q=0.9",
            ),
            SafariIos => (
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
                "en-US,en;q=0.9",
            ),
            EdgeWin => (
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0",
                "en-US,en;q=0.9",
            ),
        };

        let family_chrome = matches!(
            profile,
            ChromeWin | ChromeMac | ChromeLinux | ChromeMobile | EdgeWin
        );
        let family_firefox = matches!(
            profile,
            FirefoxWin | FirefoxMac | FirefoxLinux | FirefoxMobile
        );

        let (cipher_suites, extension_order, supported_groups, signature_algs) = if family_chrome {
            (CHROME_CIPHERS, CHROME_EXTENSIONS, CHROME_GROUPS, CHROME_SIGALGS)
        } else if family_firefox {
            (
                FIREFOX_CIPHERS,
                FIREFOX_EXTENSIONS,
                FIREFOX_GROUPS,
                FIREFOX_SIGALGS,
            )
        } else {
            (SAFARI_CIPHERS, SAFARI_EXTENSIONS, SAFARI_GROUPS, CHROME_SIGALGS)
        };

        let mobile = matches!(profile, ChromeMobile | FirefoxMobile | SafariIos);

        Self {
            profile,
            version: 126,
            user_agent,
            accept_language,
            cipher_suites: cipher_suites.to_vec(),
            extension_order: extension_order.to_vec(),
            supported_groups: supported_groups.to_vec(),
            signature_algs: signature_algs.to_vec(),
            alpn: vec!["h3", "h2", "http/1.1"],
            initial_max_data: if mobile { 5_000_000 } else { 10_000_000 },
            initial_max_streams_bidi: 100,
            max_idle_timeout_ms: if family_firefox { 60_000 } else { 30_000 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_profiles_have_nonempty_tables() {
        for profile in [
            BrowserProfile::ChromeWin,
            BrowserProfile::ChromeMac,
            BrowserProfile::ChromeLinux,
            BrowserProfile::ChromeMobile,
            BrowserProfile::FirefoxWin,
            BrowserProfile::FirefoxMac,
            BrowserProfile::FirefoxLinux,
            BrowserProfile::FirefoxMobile,
            BrowserProfile::SafariMac,
            BrowserProfile::SafariIos,
            BrowserProfile::EdgeWin,
        ] {
            let fp = Fingerprint::for_profile(profile);
            assert!(!fp.cipher_suites.is_empty());
            assert!(!fp.extension_order.is_empty());
            assert!(!fp.alpn.is_empty());
            assert!(!fp.user_agent.is_empty());
        }
    }

    #[test]
    fn env_style_names_parse() {
        assert_eq!(
            <BrowserProfile as std::str::FromStr>::from_str("chrome_win10"),
            Ok(BrowserProfile::ChromeWin)
        );
        assert_eq!(
            <BrowserProfile as std::str::FromStr>::from_str("safari_ios"),
            Ok(BrowserProfile::SafariIos)
        );
        assert!(<BrowserProfile as std::str::FromStr>::from_str("netscape").is_err());
    }

    #[test]
    fn firefox_orders_ciphers_differently_from_chrome() {
        let chrome = Fingerprint::for_profile(BrowserProfile::ChromeWin);
        let firefox = Fingerprint::for_profile(BrowserProfile::FirefoxWin);
        assert_ne!(chrome.cipher_suites, firefox.cipher_suites);
    }
}
