use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tokiou::DEFAULT_MAX_PDU;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Server to connect to, e.g. "ldap://127.0.0.1:389".
    pub url: String,
    /// TCP connect timeout in milliseconds (default 5000).
    pub connect_timeout_ms: Option<u64>,
    /// Largest PDU the reader accepts, in bytes (default 16 MiB).
    pub max_pdu_size: Option<usize>,
    /// Per-operation defaults.
    #[serde(default)]
    pub constraints: Constraints,
}

/// Per-operation knobs. A copy travels with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// How long a caller waits for each response, in milliseconds. Unset waits forever.
    pub time_limit_ms: Option<u64>,
    pub follow_referrals: bool,
    /// How many referral hops one operation may take.
    pub referral_hop_limit: u32,
    /// Credentials used to bind on connections opened for referrals; anonymous when unset.
    pub rebind: Option<RebindCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebindCredentials {
    pub dn: String,
    pub password: String,
}

impl Constraints {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn with_hop_limit(mut self, hops: u32) -> Self {
        self.referral_hop_limit = hops;
        self
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            time_limit_ms: None,
            follow_referrals: true,
            referral_hop_limit: 5,
            rebind: None,
        }
    }
}

impl LdapConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: LdapConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(5000))
    }

    pub fn max_pdu_size(&self) -> usize {
        self.max_pdu_size.unwrap_or(DEFAULT_MAX_PDU)
    }
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            url: "ldap://127.0.0.1:389".to_string(),
            connect_timeout_ms: Some(5000),
            max_pdu_size: None,
            constraints: Constraints::default(),
        }
    }
}
