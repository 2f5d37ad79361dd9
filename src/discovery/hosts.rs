//! Host list document stored in the discovery resource

use serde::{Deserialize, Serialize};

use crate::config::PlacementConfig;

/// Placement tags attached to a host entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTags {
    #[serde(default)]
    pub az: String,

    #[serde(default)]
    pub canary: bool,

    #[serde(default)]
    pub load_balancing_weight: i64,
}

impl From<&PlacementConfig> for HostTags {
    fn from(placement: &PlacementConfig) -> Self {
        Self {
            az: placement.az.clone(),
            canary: placement.canary,
            load_balancing_weight: i64::from(placement.load_balancing_weight),
        }
    }
}

/// One endpoint advertised to the load balancer
///
/// Numeric fields are plain JSON integers: other writers share the list, and
/// an entry this instance would never emit must still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub ip_address: String,

    pub port: i64,

    // Older writers emit the capitalised key
    #[serde(default, alias = "Tags")]
    pub tags: HostTags,
}

impl HostEntry {
    pub fn new(ip_address: impl Into<String>, port: impl Into<i64>, tags: HostTags) -> Self {
        Self {
            ip_address: ip_address.into(),
            port: port.into(),
            tags,
        }
    }
}

/// The whole discovery document: `{ "hosts": [...] }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hosts: Vec<HostEntry>,
}

impl HostList {
    pub fn new(hosts: Vec<HostEntry>) -> Self {
        Self { hosts }
    }

    /// Append an entry; existing entries for the same address are kept
    pub fn push(&mut self, entry: HostEntry) {
        self.hosts.push(entry);
    }

    /// Remove every entry for `ip_address`, returning how many were removed
    ///
    /// Walks back to front so indices stay valid while removing in place.
    pub fn remove_address(&mut self, ip_address: &str) -> usize {
        let mut removed = 0;
        for i in (0..self.hosts.len()).rev() {
            if self.hosts[i].ip_address == ip_address {
                self.hosts.remove(i);
                removed += 1;
            }
        }
        removed
    }

    pub fn contains_address(&self, ip_address: &str) -> bool {
        self.hosts.iter().any(|h| h.ip_address == ip_address)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<HostEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<HostEntry>>::deserialize(deserializer)?.unwrap_or_default())
}
