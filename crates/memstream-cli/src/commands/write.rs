//! Write command implementation.

use anyhow::Result;
use memstream_core::{Process, RemoteEndpoint};
use tracing::info;

use super::hex_utils::{format_hex_address, parse_hex_bytes};

/// Write hex `bytes` at `address` with an immediate transfer.
pub fn run<E: RemoteEndpoint>(process: &Process<E>, address: u64, bytes: &str) -> Result<()> {
    let data = parse_hex_bytes(bytes)?;
    process.write(address, &data)?;
    info!("Wrote {} bytes at {}", data.len(), format_hex_address(address));
    println!("Wrote {} bytes at {}", data.len(), format_hex_address(address));
    Ok(())
}
