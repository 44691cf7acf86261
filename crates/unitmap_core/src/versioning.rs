//! Output dataset naming across digitising iterations.
//!
//! # Invariants
//! - Only the trailing run of decimal digits changes.
//! - Zero padding to the left of the numeral's value is kept as written.
//! - Increment is exact for digit runs of any length.

use once_cell::sync::Lazy;
use regex::Regex;

static TRAILING_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+$").expect("valid trailing digits regex"));

/// Returns `name` with its trailing numeral incremented, or with `1`
/// appended when it has none.
///
/// Only the digits of the numeral's value are replaced, so padding zeros
/// stay: `Units09` becomes `Units010` and `Units000` becomes `Units001`.
pub fn next_name(name: &str) -> String {
    let Some(found) = TRAILING_DIGITS.find(name) else {
        return format!("{name}1");
    };
    let digits = found.as_str();
    let value = match digits.trim_start_matches('0') {
        "" => &digits[digits.len() - 1..],
        significant => significant,
    };
    let kept = &name[..name.len() - value.len()];
    format!("{kept}{}", increment_decimal(value))
}

/// Applies `next_name` until `taken` no longer reports a collision.
///
/// # Errors
/// The first error returned by `taken`.
pub fn next_available_name<E>(
    name: &str,
    mut taken: impl FnMut(&str) -> Result<bool, E>,
) -> Result<String, E> {
    let mut candidate = next_name(name);
    while taken(&candidate)? {
        candidate = next_name(&candidate);
    }
    Ok(candidate)
}

fn increment_decimal(digits: &str) -> String {
    let mut out: Vec<u8> = digits.bytes().collect();
    let mut carry = true;
    for byte in out.iter_mut().rev() {
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            carry = false;
            break;
        }
    }
    if carry {
        out.insert(0, b'1');
    }
    out.into_iter().map(char::from).collect()
}
