//! Engine configuration.
//!
//! [`EngineConfig`] controls the device flags passed to every transfer and the
//! retry-then-degrade policy used when flushing staged reads and writes.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Device transfer flags, passed through to the endpoint untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessFlags(u64);

impl AccessFlags {
    pub const NONE: Self = Self(0);
    /// Bypass the device-side data cache.
    pub const NOCACHE: Self = Self(0x0001);
    /// Zero-pad output on failed reads instead of failing them.
    pub const ZEROPAD_ON_FAIL: Self = Self(0x0002);
    /// Do not resolve paged-out memory.
    pub const NOPAGING: Self = Self(0x0010);
    /// Do not store read results in the device-side cache.
    pub const NOCACHEPUT: Self = Self(0x0100);
    /// Do not read ahead of the requested pages.
    pub const NO_PREDICTIVE_READ: Self = Self(0x0400);

    /// Flags for reads that must observe the live value of every page.
    pub const DIRECT: Self =
        Self(Self::NOCACHE.0 | Self::NOPAGING.0 | Self::NOCACHEPUT.0 | Self::NO_PREDICTIVE_READ.0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessFlags({:#x})", self.0)
    }
}

/// Configuration for a [`Process`](crate::Process)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Flags used for scatter sessions and single reads
    pub flags: AccessFlags,
    /// Number of whole-batch attempts before degrading to single reads
    pub batch_attempts: u32,
    /// Whether ops still failing after the batched attempts get one single read each
    pub single_fallback: bool,
    /// Whether buffers of failed reads are zero-filled
    pub zero_fill_failures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flags: AccessFlags::NOCACHE,
            batch_attempts: 2,
            single_fallback: true,
            zero_fill_failures: true,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    flags: Option<AccessFlags>,
    batch_attempts: Option<u32>,
    single_fallback: Option<bool>,
    zero_fill_failures: Option<bool>,
}

impl EngineConfigBuilder {
    /// Set the device flags
    pub fn flags(mut self, flags: AccessFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Set the number of batched attempts (at least one is always made)
    pub fn batch_attempts(mut self, attempts: u32) -> Self {
        self.batch_attempts = Some(attempts);
        self
    }

    /// Enable or disable the single-read fallback
    pub fn single_fallback(mut self, enabled: bool) -> Self {
        self.single_fallback = Some(enabled);
        self
    }

    /// Enable or disable zero-filling of failed reads
    pub fn zero_fill_failures(mut self, enabled: bool) -> Self {
        self.zero_fill_failures = Some(enabled);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        let default = EngineConfig::default();
        EngineConfig {
            flags: self.flags.unwrap_or(default.flags),
            batch_attempts: self.batch_attempts.unwrap_or(default.batch_attempts).max(1),
            single_fallback: self.single_fallback.unwrap_or(default.single_fallback),
            zero_fill_failures: self.zero_fill_failures.unwrap_or(default.zero_fill_failures),
        }
    }
}
