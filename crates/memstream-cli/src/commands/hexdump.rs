//! Hexdump command implementation.
//!
//! Displays remote memory in traditional hexdump format. Zero bytes are
//! dimmed when writing to a terminal.
//!
//! ```text
//! 00007FF614310000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|
//! ```

use std::io::IsTerminal;

use anyhow::Result;
use memstream_core::{Process, RemoteEndpoint};
use owo_colors::OwoColorize;

/// Run the hexdump command
pub fn run<E: RemoteEndpoint>(
    process: &Process<E>,
    address: u64,
    size: usize,
    ascii: bool,
) -> Result<()> {
    let bytes = process.read_bytes(address, size)?;
    let color = std::io::stdout().is_terminal();

    println!("Hexdump at 0x{:X} ({} bytes):", address, size);
    println!();
    for line in render(address, &bytes, ascii, color) {
        println!("{}", line);
    }
    Ok(())
}

/// Format `bytes` as hexdump lines of 16 bytes each.
pub fn render(address: u64, bytes: &[u8], ascii: bool, color: bool) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let mut line = format!("{:016X}: ", address + (i * 16) as u64);

            for j in 0..16 {
                if j == 8 {
                    line.push(' ');
                }
                match chunk.get(j) {
                    Some(0) if color => line.push_str(&format!("{} ", "00".dimmed())),
                    Some(byte) => line.push_str(&format!("{:02X} ", byte)),
                    None => line.push_str("   "),
                }
            }

            if ascii {
                line.push_str(" |");
                for &byte in chunk {
                    line.push(if (0x20..0x7F).contains(&byte) {
                        byte as char
                    } else {
                        '.'
                    });
                }
                for _ in chunk.len()..16 {
                    line.push(' ');
                }
                line.push('|');
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_full_line() {
        let lines = render(0x1000, b"Hello World\0\0\0\0\0", true, false);
        assert_eq!(
            lines,
            vec![
                "0000000000001000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|"
            ]
        );
    }

    #[test]
    fn test_render_partial_line() {
        let lines = render(0x20, &[0x41; 18], true, false);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("0000000000000030: 41 41 "));
        assert!(lines[1].ends_with("|AA              |"));
    }

    #[test]
    fn test_render_without_ascii() {
        let lines = render(0, &[1, 2], false, false);
        assert_eq!(lines[0].trim_end(), "0000000000000000: 01 02");
        assert!(!lines[0].contains('|'));
    }

    #[test]
    fn test_render_dims_zero_bytes() {
        let plain = render(0, &[0, 1], false, false);
        let colored = render(0, &[0, 1], false, true);
        assert_ne!(plain, colored);
        assert!(colored[0].contains("01 "));
    }
}
