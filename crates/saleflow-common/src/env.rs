//! Typed access to process environment variables.
//!
//! Blank values are treated the same as unset ones, so `FOO=` in a `.env`
//! file never shadows a default.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Value of `name`, trimmed, or `None` when unset or blank.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First variable of `names` that has a value.
pub fn var_any(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| var(name))
}

pub fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

/// Parse `name` if it is set. A value that does not parse is an error rather
/// than a silent fallback.
pub fn parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommonError::invalid_env(name, raw, e)),
        None => Ok(None),
    }
}

pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse(name)?.unwrap_or(default))
}

/// Boolean flag accepting `true/false`, `1/0`, `yes/no` and `on/off`.
pub fn flag(name: &str, default: bool) -> Result<bool> {
    let Some(raw) = var(name) else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CommonError::invalid_env(name, raw, "expected a boolean")),
    }
}
