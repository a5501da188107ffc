//! Environment-driven configuration helpers.
//!
//! Every tunable of the bus and the aggregator can be overridden through an
//! `EVENTMESH_*` environment variable. Absent variables fall back to the
//! compiled-in default; present but malformed values are rejected.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// Prefix shared by all configuration variables.
pub const ENV_PREFIX: &str = "EVENTMESH_";

/// Parses `raw` as `T`, returning `default` when `raw` is `None` or blank.
///
/// # Errors
///
/// Returns `CoreError::Configuration` if `raw` is present but does not parse.
pub fn parse_or<T>(key: &str, raw: Option<&str>, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| CoreError::Configuration {
            key: key.to_owned(),
            message: format!("invalid value {value:?}: {e}"),
        }),
    }
}

/// Reads `EVENTMESH_<name>` from the process environment.
///
/// # Errors
///
/// Returns `CoreError::Configuration` if the variable is set but malformed.
pub fn env_or<T>(name: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    let raw = std::env::var(&key).ok();
    parse_or(&key, raw.as_deref(), default)
}

/// Reads a whole-second duration from `EVENTMESH_<name>`.
///
/// # Errors
///
/// Returns `CoreError::Configuration` if the variable is set but malformed.
pub fn env_secs(name: &str, default: Duration) -> Result<Duration, CoreError> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}

/// Reads a millisecond duration from `EVENTMESH_<name>`.
///
/// # Errors
///
/// Returns `CoreError::Configuration` if the variable is set but malformed.
pub fn env_millis(name: &str, default: Duration) -> Result<Duration, CoreError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_or(name, default_ms).map(Duration::from_millis)
}
