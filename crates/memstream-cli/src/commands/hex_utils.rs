//! Hex address and byte-string parsing.

use anyhow::{Result, bail};

/// Parse a hex address string (with or without 0x prefix).
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
        .replace('_', "");
    u64::from_str_radix(&digits, 16).map_err(|e| anyhow::anyhow!("Invalid hex address: {}", e))
}

/// Format an address as a hex string with 0x prefix.
pub fn format_hex_address(addr: u64) -> String {
    format!("0x{:X}", addr)
}

/// Parse bytes written as hex, e.g. `"DE AD BE EF"` or `"deadbeef"`.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() {
        bail!("No bytes given");
    }
    if digits.len() % 2 != 0 {
        bail!("Odd number of hex digits in '{}'", s);
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| anyhow::anyhow!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_address_with_prefix() {
        assert_eq!(parse_hex_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_address("0X1000").unwrap(), 0x1000);
    }

    #[test]
    fn test_parse_hex_address_without_prefix() {
        assert_eq!(parse_hex_address("1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_address("DEADBEEF").unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_parse_hex_address_large() {
        assert_eq!(parse_hex_address("0x7FF6_1431_B08A").unwrap(), 0x7FF6_1431_B08A);
    }

    #[test]
    fn test_parse_hex_address_invalid() {
        assert!(parse_hex_address("GHIJK").is_err());
        assert!(parse_hex_address("0xZZZ").is_err());
        assert!(parse_hex_address("").is_err());
    }

    #[test]
    fn test_format_hex_address() {
        assert_eq!(format_hex_address(0x1000), "0x1000");
        assert_eq!(format_hex_address(0), "0x0");
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("DE AD be ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex_bytes("0102").unwrap(), vec![1, 2]);
        assert!(parse_hex_bytes("ABC").is_err());
        assert!(parse_hex_bytes("ZZ").is_err());
        assert!(parse_hex_bytes("  ").is_err());
    }
}
