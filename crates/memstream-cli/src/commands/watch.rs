//! Watch command implementation.
//!
//! Builds an [`Object`] from `--field` arguments, refreshes it on an interval
//! and prints one JSON line per cycle until interrupted.

use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use memstream_core::{CachePolicy, Object, ObjectSnapshot, Process, RemoteEndpoint};
use serde::Serialize;
use tracing::{debug, warn};

use super::hex_utils::{format_hex_address, parse_hex_address};
use crate::shutdown::ShutdownSignal;

/// One `off:size[:policy]` field argument, e.g. `0x10:4` or `0x80:32:once`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArg {
    pub offset: u32,
    pub size: usize,
    pub policy: CachePolicy,
}

impl FromStr for FieldArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');

        let offset = parts
            .next()
            .filter(|p| !p.is_empty())
            .with_context(|| format!("Missing offset in '{}'", s))?;
        let offset = u32::try_from(parse_hex_address(offset)?)
            .with_context(|| format!("Offset in '{}' does not fit in 32 bits", s))?;

        let size = parts
            .next()
            .with_context(|| format!("Missing size in '{}'", s))?
            .parse::<usize>()
            .with_context(|| format!("Invalid size in '{}'", s))?;

        let policy = match parts.next() {
            Some(policy) => policy.parse::<CachePolicy>()?,
            None => CachePolicy::AlwaysFresh,
        };

        Ok(Self {
            offset,
            size,
            policy,
        })
    }
}

/// Value parser for clap
pub fn parse_field_arg(s: &str) -> Result<FieldArg> {
    s.parse()
}

pub struct WatchOptions {
    pub base: u64,
    pub fields: Vec<FieldArg>,
    pub interval: Duration,
    /// Stop after this many cycles
    pub count: Option<u64>,
}

#[derive(Serialize)]
struct WatchLine {
    timestamp: DateTime<Local>,
    cycle: u64,
    failed: Vec<String>,
    object: ObjectSnapshot,
}

/// Run the watch loop, writing JSON lines to `out`. Returns the number of cycles.
pub fn run<E: RemoteEndpoint, W: Write>(
    process: &mut Process<E>,
    options: &WatchOptions,
    shutdown: &ShutdownSignal,
    out: &mut W,
) -> Result<u64> {
    if options.fields.is_empty() {
        bail!("No fields to watch");
    }

    let mut object = Object::with_base(options.base);
    for field in &options.fields {
        object.push_cached(field.offset, field.size, field.policy)?;
    }

    let mut cycles = 0;
    while !shutdown.is_shutdown() {
        let failed = object.refresh(process)?;
        cycles += 1;
        if !failed.is_empty() {
            warn!("Cycle {}: {} fields unreadable", cycles, failed.len());
        }

        let line = WatchLine {
            timestamp: Local::now(),
            cycle: cycles,
            failed: failed.iter().map(|&a| format_hex_address(a)).collect(),
            object: object.snapshot(),
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
        out.flush()?;

        if options.count.is_some_and(|count| cycles >= count) {
            break;
        }
        if shutdown.wait(options.interval) {
            break;
        }
    }

    debug!("Watch stopped after {} cycles", cycles);
    Ok(cycles)
}
