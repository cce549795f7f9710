use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::keys::Algorithm;
use russh::{Preferred, cipher, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;

/// SSH algorithm profile.
///
/// The managed fleet runs old firmware, so the default profile is
/// [`SecurityLevel::LegacyCompatible`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only.
    Secure,
    /// Modern algorithms plus SHA-1 and CBC fallbacks.
    Balanced,
    /// Everything russh offers short of plaintext, DSA and group1 included.
    #[default]
    LegacyCompatible,
}

struct AlgorithmLists {
    kex: &'static [kex::Name],
    key: &'static [Algorithm],
    cipher: &'static [cipher::Name],
    mac: &'static [mac::Name],
}

impl SecurityLevel {
    fn lists(self) -> AlgorithmLists {
        match self {
            Self::Secure => AlgorithmLists {
                kex: config::SECURE_KEX_ORDER,
                key: config::SECURE_KEY_TYPES,
                cipher: config::SECURE_CIPHERS,
                mac: config::SECURE_MAC_ALGORITHMS,
            },
            Self::Balanced => AlgorithmLists {
                kex: config::BALANCED_KEX_ORDER,
                key: config::BALANCED_KEY_TYPES,
                cipher: config::BALANCED_CIPHERS,
                mac: config::BALANCED_MAC_ALGORITHMS,
            },
            Self::LegacyCompatible => AlgorithmLists {
                kex: config::LEGACY_KEX_ORDER,
                key: config::LEGACY_KEY_TYPES,
                cipher: config::LEGACY_CIPHERS,
                mac: config::LEGACY_MAC_ALGORITHMS,
            },
        }
    }

    /// Host key policy that goes with the level when none is given.
    ///
    /// Legacy units regenerate host keys on every firmware upgrade, so
    /// pinning them in known_hosts breaks after each upgrade.
    fn default_server_check(self) -> ServerCheckMethod {
        match self {
            Self::Secure | Self::Balanced => ServerCheckMethod::DefaultKnownHostsFile,
            Self::LegacyCompatible => ServerCheckMethod::NoCheck,
        }
    }
}

/// Algorithm profile plus host key policy for opening a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::for_level(SecurityLevel::default())
    }
}

impl ConnectionSecurityOptions {
    pub fn for_level(level: SecurityLevel) -> Self {
        Self {
            level,
            server_check: level.default_server_check(),
        }
    }

    pub fn secure_default() -> Self {
        Self::for_level(SecurityLevel::Secure)
    }

    pub fn balanced() -> Self {
        Self::for_level(SecurityLevel::Balanced)
    }

    pub fn legacy_compatible() -> Self {
        Self::for_level(SecurityLevel::LegacyCompatible)
    }

    /// Overrides the host key policy, e.g. to pin keys for a legacy unit.
    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub(super) fn preferred(&self) -> Preferred {
        let lists = self.level.lists();
        Preferred {
            kex: Cow::Borrowed(lists.kex),
            key: Cow::Borrowed(lists.key),
            cipher: Cow::Borrowed(lists.cipher),
            mac: Cow::Borrowed(lists.mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}
