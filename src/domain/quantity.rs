//! Kubernetes resource quantity handling
//!
//! PVC sizes cross the API boundary as quantity strings (`10Gi`, `100G`,
//! plain bytes). Parsing accepts both decimal and binary suffixes; sizes the
//! controller writes back are always rendered as exact decimal byte counts,
//! which every apiserver accepts and which round-trip without precision loss.

use crate::error::{Error, Result};

/// Parse a Kubernetes quantity string into bytes.
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::QuantityParse {
            value: s.to_string(),
            reason: "empty string".to_string(),
        });
    }

    // Find where the number ends and the suffix begins
    let (num_str, suffix) = if let Some(pos) = s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        (&s[..pos], &s[pos..])
    } else {
        (s, "")
    };

    let num: f64 = num_str.parse().map_err(|_| Error::QuantityParse {
        value: s.to_string(),
        reason: "invalid number".to_string(),
    })?;

    if num < 0.0 {
        return Err(Error::QuantityParse {
            value: s.to_string(),
            reason: "negative quantity".to_string(),
        });
    }

    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1_024,
        "Mi" => 1_048_576,
        "Gi" => 1_073_741_824,
        "Ti" => 1_099_511_627_776,
        "Pi" => 1_125_899_906_842_624,
        _ => {
            return Err(Error::QuantityParse {
                value: s.to_string(),
                reason: format!("unknown suffix {:?}", suffix),
            })
        }
    };

    Ok((num * multiplier as f64) as u64)
}

/// Render a byte count as a quantity string for a patch body.
pub fn format_quantity(bytes: u64) -> String {
    bytes.to_string()
}
