//! SSH algorithm profiles and polling tunables.
//!
//! The switches in this fleet run old management-plane firmware, several of
//! which only offer group1/group14 Diffie-Hellman and RSA/DSA host keys. The
//! legacy lists below keep those reachable; the secure and balanced lists are
//! for newer units. [`PollSettings`] gathers every timing and batching knob
//! the poller and the REST agent use.

use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{compression, cipher, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Key exchange algorithms for the secure profile.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

/// Ciphers for the secure profile.
pub const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

/// MAC algorithms for the secure profile.
pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

/// Host key algorithms for the secure profile.
pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

/// Key exchange algorithms for the balanced profile.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
];

/// Ciphers for the balanced profile.
pub const BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

/// MAC algorithms for the balanced profile.
pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1,
];

/// Host key algorithms for the balanced profile.
pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// Every non-null key exchange russh offers, group1 SHA-1 included.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Every encrypting cipher russh offers, CBC modes included.
pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
];

/// Every MAC algorithm russh offers except `none`.
pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
];

/// Host key algorithms for the legacy profile, DSA and SHA-1 RSA included.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
];

/// Compression methods shared by all profiles.
pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// Timing and batching knobs for polling and configuration.
///
/// Every field has a default, so a fleet file may omit the whole section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PollSettings {
    /// Devices polled concurrently per batch.
    pub batch_size: usize,
    /// Pause between the end of one fleet cycle and the start of the next.
    pub cooldown_secs: u64,
    /// Idle ceiling for a CLI read script.
    pub read_idle_timeout_secs: u64,
    /// Idle ceiling for a CLI configuration block.
    pub config_idle_timeout_secs: u64,
    /// TCP reachability probe timeout.
    pub probe_timeout_ms: u64,
    pub ssh_port: u16,
    pub api_port: u16,
    /// Per-request timeout for the management API.
    pub request_timeout_secs: u64,
    /// Delay between PoE disable and enable.
    pub poe_settle_ms: u64,
    /// Concurrent port-stat requests per batch.
    pub port_stats_batch: usize,
    /// Extra ids queried past the derived port count.
    pub port_stats_margin: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            cooldown_secs: 15,
            read_idle_timeout_secs: 60,
            config_idle_timeout_secs: 30,
            probe_timeout_ms: 2000,
            ssh_port: 22,
            api_port: 8443,
            request_timeout_secs: 10,
            poe_settle_ms: 1000,
            port_stats_batch: 8,
            port_stats_margin: 12,
        }
    }
}

impl PollSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn read_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.read_idle_timeout_secs)
    }

    pub fn config_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config_idle_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poe_settle(&self) -> Duration {
        Duration::from_millis(self.poe_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: PollSettings =
            serde_json::from_str(r#"{"batch_size": 3}"#).expect("settings should parse");
        assert_eq!(settings.batch_size, 3);
        assert_eq!(settings.cooldown(), Duration::from_secs(15));
        assert_eq!(settings.probe_timeout(), Duration::from_secs(2));
        assert_eq!(settings.api_port, 8443);
    }

    #[test]
    fn legacy_lists_offer_group1_and_dsa() {
        assert!(LEGACY_KEX_ORDER.contains(&kex::DH_G1_SHA1));
        assert!(LEGACY_KEY_TYPES.contains(&Algorithm::Dsa));
        assert!(!SECURE_KEX_ORDER.contains(&kex::DH_G1_SHA1));
    }
}
