//! Hex rendering helpers used for identifiers, timestamps and log dumps.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("Odd number of hex digits: {0}")]
    OddLength(usize),
    #[error("Invalid hex digit {digit:?} at position {position}")]
    InvalidDigit { digit: char, position: usize },
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Render bytes as contiguous upper-case hex (`[0x20, 0x24]` -> `"2024"`).
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char);
        out.push(HEX_DIGITS[(b & 0x0F) as usize] as char);
    }
    out
}

/// Parse contiguous hex digits. Whitespace between byte pairs is ignored.
pub fn from_hex(text: &str) -> Result<Vec<u8>, HexError> {
    let digits: Vec<(usize, char)> = text
        .char_indices()
        .filter(|(_, c)| !c.is_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = nibble(pair[0])?;
            let lo = nibble(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn nibble((position, digit): (usize, char)) -> Result<u8, HexError> {
    digit
        .to_digit(16)
        .map(|v| v as u8)
        .ok_or(HexError::InvalidDigit { digit, position })
}
