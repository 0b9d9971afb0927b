//! Kubernetes memory quantity parsing
//!
//! Handles the suffixes the cluster reports for memory: binary (`Ki`, `Mi`,
//! `Gi`, `Ti`, `Pi`, `Ei`) and decimal (`k`/`K`, `M`, `G`, `T`, `P`, `E`).
//! Anything that cannot be parsed counts as zero.

const BINARY_SUFFIXES: &[(&str, u64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

const DECIMAL_SUFFIXES: &[(&str, u64)] = &[
    ("k", 1_000),
    ("K", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

const MEBIBYTE: u64 = 1 << 20;

/// Parse a memory quantity such as `512Mi`, `1Gi` or `2G` into bytes.
///
/// Returns 0 for empty, negative or malformed input.
pub fn parse_memory(quantity: &str) -> u64 {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return 0;
    }

    let (number, multiplier) = split_suffix(quantity);
    match number.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => (value * multiplier as f64) as u64,
        _ => 0,
    }
}

/// Convert bytes to whole mebibytes, truncating
pub fn to_mebibytes(bytes: u64) -> u64 {
    bytes / MEBIBYTE
}

fn split_suffix(quantity: &str) -> (&str, u64) {
    // Binary suffixes are two characters and must win over their decimal prefix.
    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return (number, *multiplier);
        }
    }
    for (suffix, multiplier) in DECIMAL_SUFFIXES {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return (number, *multiplier);
        }
    }
    (quantity, 1)
}
