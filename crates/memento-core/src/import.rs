//! Decoding of externally produced text
//!
//! Text arriving from outside (files, captures, clipboard tools) comes as raw
//! bytes plus an encoding label from whatever detected it. Supported labels:
//!
//! - `utf-8` / `utf8` (a leading BOM is dropped)
//! - `utf-16` (byte order from the BOM, little-endian without one),
//!   `utf-16le`, `utf-16be`
//! - `latin-1` / `latin1` / `iso-8859-1`
//! - `ascii` / `us-ascii`

use crate::error::{MementoError, MementoResult};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Utf16,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
}

impl TextEncoding {
    fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
        let encoding = match normalized.as_str() {
            "utf-8" | "utf8" => Self::Utf8,
            "utf-16" | "utf16" => Self::Utf16,
            "utf-16le" | "utf-16-le" => Self::Utf16Le,
            "utf-16be" | "utf-16-be" => Self::Utf16Be,
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Self::Latin1,
            "ascii" | "us-ascii" => Self::Ascii,
            _ => return None,
        };
        Some(encoding)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16 => "utf-16",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Latin1 => "latin-1",
            Self::Ascii => "ascii",
        }
    }
}

/// Decode `raw` as text in `encoding`
pub fn decode_text(raw: &[u8], encoding: &str) -> MementoResult<String> {
    let encoding = TextEncoding::from_label(encoding)
        .ok_or_else(|| MementoError::UnsupportedEncoding(encoding.to_string()))?;

    match encoding {
        TextEncoding::Utf8 => {
            let bytes = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
            String::from_utf8(bytes.to_vec()).map_err(|e| invalid(encoding, e.to_string()))
        }
        TextEncoding::Utf16 => {
            if let Some(rest) = raw.strip_prefix(UTF16_BE_BOM) {
                decode_utf16(rest, u16::from_be_bytes, encoding)
            } else {
                let rest = raw.strip_prefix(UTF16_LE_BOM).unwrap_or(raw);
                decode_utf16(rest, u16::from_le_bytes, encoding)
            }
        }
        TextEncoding::Utf16Le => {
            let rest = raw.strip_prefix(UTF16_LE_BOM).unwrap_or(raw);
            decode_utf16(rest, u16::from_le_bytes, encoding)
        }
        TextEncoding::Utf16Be => {
            let rest = raw.strip_prefix(UTF16_BE_BOM).unwrap_or(raw);
            decode_utf16(rest, u16::from_be_bytes, encoding)
        }
        // Every byte maps to the code point of the same value
        TextEncoding::Latin1 => Ok(raw.iter().map(|&b| char::from(b)).collect()),
        TextEncoding::Ascii => match raw.iter().position(|b| !b.is_ascii()) {
            Some(offset) => Err(invalid(
                encoding,
                format!("non-ASCII byte 0x{:02x} at offset {}", raw[offset], offset),
            )),
            None => Ok(raw.iter().map(|&b| char::from(b)).collect()),
        },
    }
}

fn decode_utf16(
    bytes: &[u8],
    to_unit: fn([u8; 2]) -> u16,
    encoding: TextEncoding,
) -> MementoResult<String> {
    if bytes.len() % 2 != 0 {
        return Err(invalid(
            encoding,
            format!("odd byte length {}", bytes.len()),
        ));
    }

    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| invalid(encoding, e.to_string()))
}

fn invalid(encoding: TextEncoding, details: String) -> MementoError {
    MementoError::InvalidText {
        encoding: encoding.label().to_string(),
        details,
    }
}
