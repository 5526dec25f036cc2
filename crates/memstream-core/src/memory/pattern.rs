//! IDA-style byte patterns (`"48 8B ?? ?? C3"`).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Byte pattern where `None` matches any byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Parse whitespace separated hex bytes; `?` or `??` is a wildcard.
    pub fn parse(pattern: &str) -> Result<Self> {
        let bytes = pattern
            .split_whitespace()
            .map(|token| match token {
                "?" | "??" => Ok(None),
                hex => u8::from_str_radix(hex, 16)
                    .map(Some)
                    .map_err(|_| Error::InvalidPattern(format!("bad byte '{}'", hex))),
            })
            .collect::<Result<Vec<_>>>()?;

        if bytes.is_empty() {
            return Err(Error::InvalidPattern("empty pattern".to_string()));
        }
        if bytes.iter().all(Option::is_none) {
            return Err(Error::InvalidPattern("pattern is only wildcards".to_string()));
        }

        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn matches_at(&self, haystack: &[u8], pos: usize) -> bool {
        haystack[pos..pos + self.bytes.len()]
            .iter()
            .zip(&self.bytes)
            .all(|(byte, expected)| expected.is_none_or(|e| e == *byte))
    }

    /// Position of the first match in `haystack`
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.bytes.len() {
            return None;
        }
        let last_start = haystack.len() - self.bytes.len();

        // Anchor on the first concrete byte so memchr does the heavy lifting
        let (anchor_index, anchor) = self
            .bytes
            .iter()
            .enumerate()
            .find_map(|(i, b)| b.map(|b| (i, b)))?;

        memchr::memchr_iter(anchor, &haystack[anchor_index..])
            .take_while(|&pos| pos <= last_start)
            .find(|&pos| self.matches_at(haystack, pos))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match byte {
                Some(b) => write!(f, "{:02X}", b)?,
                None => write!(f, "??")?,
            }
        }
        Ok(())
    }
}
