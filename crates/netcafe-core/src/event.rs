//! Presence transitions emitted by the fusion step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Direction of a presence change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Online,
    Offline,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A single device going online or offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub address: Ipv4Addr,
    pub label: String,
    pub room: Option<String>,
    pub direction: Direction,
    pub at: DateTime<Utc>,
    /// Seconds since the device was last seen (offline transitions only)
    pub last_seen_secs: Option<u64>,
}

impl Transition {
    pub fn is_online(&self) -> bool {
        self.direction == Direction::Online
    }
}
