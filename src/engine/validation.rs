//! Field normalisation and validation for registry and booking input.

use std::sync::LazyLock;

use regex::Regex;

use super::EngineError;

static PLATE_LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}\d{4}$").expect("static regex"));
static PLATE_MERCOSUL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}\d[A-Z]\d{2}$").expect("static regex"));

pub const LICENSE_NUMBER_DIGITS: usize = 11;

/// Accepts `ABC1234` and Mercosul `ABC1D23` in any case, with or without a
/// dash or spaces. Returns the canonical `ABC-1234` / `ABC-1D23` form.
pub fn normalize_plate(raw: &str) -> Result<String, EngineError> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect();
    if !PLATE_LEGACY.is_match(&compact) && !PLATE_MERCOSUL.is_match(&compact) {
        return Err(EngineError::invalid(
            "plate",
            format!("{raw:?} is not ABC1234 or ABC1D23"),
        ));
    }
    Ok(format!("{}-{}", &compact[..3], &compact[3..]))
}

/// Strips formatting; the remaining digits must be exactly eleven.
pub fn normalize_license_number(raw: &str) -> Result<String, EngineError> {
    let digits = digits_only(raw);
    if digits.len() != LICENSE_NUMBER_DIGITS {
        return Err(EngineError::invalid(
            "license_number",
            format!("must have {LICENSE_NUMBER_DIGITS} digits, got {}", digits.len()),
        ));
    }
    Ok(digits)
}

/// `(XX) XXXXX-XXXX` for mobiles, `(XX) XXXX-XXXX` for landlines.
pub fn normalize_phone(raw: &str) -> Result<String, EngineError> {
    let d = digits_only(raw);
    match d.len() {
        11 => Ok(format!("({}) {}-{}", &d[..2], &d[2..7], &d[7..])),
        10 => Ok(format!("({}) {}-{}", &d[..2], &d[2..6], &d[6..])),
        n => Err(EngineError::invalid(
            "phone",
            format!("must have 10 or 11 digits, got {n}"),
        )),
    }
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trimmed, non-blank and at most `max` characters.
pub fn required_text(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid(field, "must not be blank"));
    }
    check_len(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

/// Blank collapses to `None`.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            check_len(field, v, max)?;
            Ok(Some(v.to_string()))
        }
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    let len = value.chars().count();
    if len > max {
        return Err(EngineError::invalid(
            field,
            format!("at most {max} characters, got {len}"),
        ));
    }
    Ok(())
}

pub fn in_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<u32, EngineError> {
    if value < min || value > max {
        return Err(EngineError::invalid(
            field,
            format!("must be between {min} and {max}, got {value}"),
        ));
    }
    Ok(value)
}
