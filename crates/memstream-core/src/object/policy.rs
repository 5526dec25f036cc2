use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use strum::{Display, IntoStaticStr};

use crate::error::{Error, Result};

/// How often a cached field is re-read during refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Read on every refresh
    #[default]
    AlwaysFresh,
    /// Re-read once the duration has elapsed since the last attempt
    Ttl(Duration),
    /// Re-read until settled, then never again.
    ///
    /// Settled means a successful read containing a non-zero byte. With
    /// `allow_zero` the first attempt settles the field whatever its outcome.
    ResolveOnce { allow_zero: bool },
}

impl CachePolicy {
    pub fn ttl_ms(ms: u64) -> Self {
        Self::Ttl(Duration::from_millis(ms))
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::AlwaysFresh => write!(f, "fresh"),
            CachePolicy::Ttl(d) => write!(f, "ttl={}", d.as_millis()),
            CachePolicy::ResolveOnce { allow_zero: false } => write!(f, "once"),
            CachePolicy::ResolveOnce { allow_zero: true } => write!(f, "once-zero"),
        }
    }
}

/// Parses `fresh`, `ttl=<ms>`, `once` and `once-zero`.
impl FromStr for CachePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "fresh" => Ok(CachePolicy::AlwaysFresh),
            "once" => Ok(CachePolicy::ResolveOnce { allow_zero: false }),
            "once-zero" => Ok(CachePolicy::ResolveOnce { allow_zero: true }),
            other => {
                let ms = other
                    .strip_prefix("ttl=")
                    .and_then(|ms| ms.parse::<u64>().ok())
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("unknown cache policy '{}'", other))
                    })?;
                Ok(CachePolicy::ttl_ms(ms))
            }
        }
    }
}

/// Read progress of one cached field, tracked explicitly rather than inferred
/// from buffer content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReadState {
    /// No successful read yet
    #[default]
    Unread,
    /// At least one successful read
    Read,
    /// Settled under `ResolveOnce`; never read again
    Resolved,
}

/// Per-field policy bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct FieldCache {
    pub policy: CachePolicy,
    pub state: ReadState,
    pub last_attempt: Option<Instant>,
    /// Address staged in the flush that has not been settled yet
    pub pending: Option<u64>,
}

impl FieldCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            state: ReadState::Unread,
            last_attempt: None,
            pending: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.policy {
            CachePolicy::AlwaysFresh => true,
            CachePolicy::Ttl(ttl) => self
                .last_attempt
                .is_none_or(|last| now.saturating_duration_since(last) >= ttl),
            CachePolicy::ResolveOnce { .. } => self.state != ReadState::Resolved,
        }
    }

    /// Mark the field as staged at `address`. A TTL attempt counts whether or
    /// not the read succeeds.
    pub fn begin(&mut self, address: u64, now: Instant) {
        self.last_attempt = Some(now);
        self.pending = Some(address);
    }

    /// Record the outcome of the staged read.
    pub fn settle(&mut self, succeeded: bool, content: &[u8]) {
        if self.pending.take().is_none() {
            return;
        }
        if self.policy == (CachePolicy::ResolveOnce { allow_zero: true }) {
            self.state = ReadState::Resolved;
            return;
        }
        if !succeeded {
            return;
        }
        self.state = match self.policy {
            CachePolicy::ResolveOnce { .. } if content.iter().any(|&b| b != 0) => {
                ReadState::Resolved
            }
            _ => ReadState::Read,
        };
    }

    pub fn reset(&mut self) {
        self.state = ReadState::Unread;
        self.last_attempt = None;
        self.pending = None;
    }
}
