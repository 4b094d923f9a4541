//! Environment variable utilities
//!
//! Strict parsers used by the configuration resolver. Unlike a lenient
//! "parse or default" helper, a variable that is set but malformed is an
//! error: a typo in a thread count must not silently fall back.
//!
//! All readers take a lookup function instead of touching the process
//! environment directly, so resolution stays a pure function of its inputs.
//!
//! # Usage
//!
//! ```ignore
//! use gcfiber_core::env::{env_lookup, parse_count};
//!
//! let gc_threads: Option<usize> = parse_count(&env_lookup, "GCF_NUM_GC_THREADS")?;
//! ```

use crate::error::{ConfigError, ConfigResult};
use std::str::FromStr;

/// Lookup against the real process environment
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse a variable as a non-negative integer
///
/// Returns `Ok(None)` when unset (or set to the empty string).
pub fn parse_count<T, F>(lookup: &F, var: &'static str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
        }
    }
}

/// Parse a comma separated list of non-negative integers ("4" or "4,1")
pub fn parse_count_list<F>(lookup: &F, var: &'static str) -> ConfigResult<Option<Vec<usize>>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(var) {
        None => return Ok(None),
        Some(raw) if raw.trim().is_empty() => return Ok(None),
        Some(raw) => raw,
    };

    let mut counts = Vec::new();
    for part in raw.split(',') {
        let n = part
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw.clone() })?;
        counts.push(n);
    }
    Ok(Some(counts))
}

/// Parse a byte size with an optional binary suffix (k, m, g, t; any case)
pub fn parse_byte_size<F>(lookup: &F, var: &'static str) -> ConfigResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(var) {
        None => return Ok(None),
        Some(raw) if raw.trim().is_empty() => return Ok(None),
        Some(raw) => raw,
    };
    let invalid = || ConfigError::InvalidEnv { var, value: raw.clone() };

    let text = raw.trim();
    let (digits, shift) = match text.chars().last() {
        Some('k' | 'K') => (&text[..text.len() - 1], 10),
        Some('m' | 'M') => (&text[..text.len() - 1], 20),
        Some('g' | 'G') => (&text[..text.len() - 1], 30),
        Some('t' | 'T') => (&text[..text.len() - 1], 40),
        _ => (text, 0),
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value.checked_mul(1u64 << shift).map(Some).ok_or_else(invalid)
}

/// Interpret a variable as an on/off flag expressed as a number
///
/// Zero is off, any other non-negative integer is on.
pub fn parse_flag<F>(lookup: &F, var: &'static str) -> ConfigResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_count::<u64, F>(lookup, var)?.map(|v| v != 0))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_count_unset_and_empty() {
        let lookup = vars(&[("EMPTY", "  ")]);
        assert_eq!(parse_count::<usize, _>(&lookup, "UNSET").unwrap(), None);
        assert_eq!(parse_count::<usize, _>(&lookup, "EMPTY").unwrap(), None);
    }

    #[test]
    fn test_count_rejects_garbage() {
        let lookup = vars(&[("N", "-3"), ("M", "four")]);
        assert!(matches!(
            parse_count::<usize, _>(&lookup, "N"),
            Err(ConfigError::InvalidEnv { var: "N", .. })
        ));
        assert!(parse_count::<u64, _>(&lookup, "M").is_err());
    }

    #[test]
    fn test_count_list() {
        let lookup = vars(&[("A", "4"), ("B", "4, 1"), ("C", "4,x")]);
        assert_eq!(parse_count_list(&lookup, "A").unwrap(), Some(vec![4]));
        assert_eq!(parse_count_list(&lookup, "B").unwrap(), Some(vec![4, 1]));
        assert!(parse_count_list(&lookup, "C").is_err());
    }

    #[test]
    fn test_byte_size_suffixes() {
        let lookup = vars(&[
            ("PLAIN", "4096"),
            ("KB", "8k"),
            ("MB", "500M"),
            ("GB", "2g"),
            ("BAD", "12q"),
            ("HUGE", "99999999999T"),
        ]);
        assert_eq!(parse_byte_size(&lookup, "PLAIN").unwrap(), Some(4096));
        assert_eq!(parse_byte_size(&lookup, "KB").unwrap(), Some(8 * 1024));
        assert_eq!(parse_byte_size(&lookup, "MB").unwrap(), Some(500 << 20));
        assert_eq!(parse_byte_size(&lookup, "GB").unwrap(), Some(2 << 30));
        assert!(parse_byte_size(&lookup, "BAD").is_err());
        assert!(parse_byte_size(&lookup, "HUGE").is_err());
    }

    #[test]
    fn test_flag() {
        let lookup = vars(&[("ON", "2"), ("OFF", "0"), ("BAD", "yes")]);
        assert_eq!(parse_flag(&lookup, "ON").unwrap(), Some(true));
        assert_eq!(parse_flag(&lookup, "OFF").unwrap(), Some(false));
        assert!(parse_flag(&lookup, "BAD").is_err());
    }

    #[test]
    fn test_env_lookup_real_environment() {
        assert!(env_lookup("__GCF_TEST_UNSET_VAR_12345__").is_none());
        assert!(env_lookup("PATH").is_some());
    }
}
