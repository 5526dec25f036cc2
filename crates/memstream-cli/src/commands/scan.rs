//! Pattern scan command implementation.

use anyhow::{Result, bail};
use memstream_core::{Pattern, Process, RemoteEndpoint};

use super::hex_utils::format_hex_address;

/// Scan `[start, stop)` for an IDA-style byte pattern.
pub fn run<E: RemoteEndpoint>(
    process: &Process<E>,
    start: u64,
    stop: u64,
    pattern: &str,
) -> Result<Option<u64>> {
    if stop <= start {
        bail!(
            "Scan range is empty: {}..{}",
            format_hex_address(start),
            format_hex_address(stop)
        );
    }
    let pattern = Pattern::parse(pattern)?;
    let found = process.find_pattern(start, stop, &pattern)?;

    match found {
        Some(address) => println!("{} found at {}", pattern, format_hex_address(address)),
        None => println!("{} not found", pattern),
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstream_core::endpoint::MockEndpointBuilder;

    #[test]
    fn test_scan_finds_pattern() {
        let endpoint = MockEndpointBuilder::new()
            .pid(3)
            .map_zeroed(0x8000, 0x2000)
            .build();
        endpoint.poke(0x9234, &[0x48, 0x8D, 0x0D, 0x11, 0x22, 0x33, 0x44]);
        let process = Process::new(endpoint, 3).unwrap();

        let found = run(&process, 0x8000, 0xA000, "48 8D 0D ?? ?? ?? 44").unwrap();
        assert_eq!(found, Some(0x9234));
    }

    #[test]
    fn test_scan_rejects_bad_input() {
        let endpoint = MockEndpointBuilder::new()
            .pid(3)
            .map_zeroed(0x8000, 0x1000)
            .build();
        let process = Process::new(endpoint, 3).unwrap();

        assert!(run(&process, 0x9000, 0x8000, "48").is_err());
        assert!(run(&process, 0x8000, 0x9000, "?? ??").is_err());
    }
}
