//! Parse human-friendly durations such as "90s", "30m" or "1.5h"

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::timer::Error;

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([0-9]*)(\.?)([0-9]+)([smh])$").unwrap());

/// Parse a duration string into a count of seconds.
///
/// The string is a number followed by a mandatory unit, one of `s`, `m` or
/// `h` (case-insensitive). The number may have a fractional part, and the
/// integer part may be left out when it does, so ".5h" is thirty minutes.
pub fn parse(text: &str) -> Result<f64, Error> {
    let text = text.trim();
    let invalid = || Error::InvalidDuration(text.to_string());

    let caps = DURATION_PATTERN.captures(text).ok_or_else(invalid)?;

    let number = format!("{}{}{}", &caps[1], &caps[2], &caps[3]);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let seconds = match caps[4].to_ascii_lowercase().as_str() {
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 60.0 * 60.0,
        _ => return Err(invalid()),
    };

    Ok(seconds)
}

/// Like [`parse`], but produce a [`Duration`] that a timer can be scheduled with.
pub fn parse_duration(text: &str) -> Result<Duration, Error> {
    let seconds = parse(text)?;

    Duration::try_from_secs_f64(seconds).map_err(|_| Error::InvalidDuration(text.trim().to_string()))
}

/// Formats a duration as a "kitchen timer" string, e.g. mm:ss.
///
/// If the duration is an hour or longer, it is formatted as hh:mm:ss.
pub fn to_kitchen(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[doc(hidden)]
pub mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sec: u64 = Deserialize::deserialize(deserializer)?;
        Ok(Duration::from_secs(sec))
    }
}
