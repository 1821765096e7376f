//! Duration strings shared by the Jaeger and Prometheus query surfaces.
//!
//! A duration is a run of `<integer><unit>` components in strictly
//! descending unit order, every component optional: `w`, `d`, `h`, `m`, `s`,
//! `ms`. The lookback dialect (Jaeger `lookback`, `minDuration`,
//! `maxDuration`) also accepts `μs` after `ms`. Blank input is a zero
//! duration.

use nom::{
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{map_res, not, opt},
    sequence::terminated,
    IResult,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;
const SECS_PER_WEEK: u64 = 7 * SECS_PER_DAY;

/// Which unit set a duration string may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationDialect {
    /// `w d h m s ms`
    General,
    /// `w d h m s ms μs`
    Lookback,
}

#[derive(Debug, Default)]
struct Components {
    weeks: u64,
    days: u64,
    hours: u64,
    minutes: u64,
    seconds: u64,
    millis: u64,
    micros: u64,
}

fn number(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse::<u64>)(input)
}

fn component<'a>(unit: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, Option<u64>> {
    opt(terminated(number, tag(unit)))
}

/// `m` must not swallow the `m` of a following `ms`.
fn minutes(input: &str) -> IResult<&str, Option<u64>> {
    opt(terminated(number, terminated(tag("m"), not(tag("s")))))(input)
}

fn components(input: &str, dialect: DurationDialect) -> IResult<&str, Components> {
    let (input, weeks) = component("w")(input)?;
    let (input, days) = component("d")(input)?;
    let (input, hours) = component("h")(input)?;
    let (input, minutes) = minutes(input)?;
    let (input, seconds) = component("s")(input)?;
    let (input, millis) = component("ms")(input)?;
    let (input, micros) = match dialect {
        DurationDialect::Lookback => component("μs")(input)?,
        DurationDialect::General => (input, None),
    };

    Ok((
        input,
        Components {
            weeks: weeks.unwrap_or(0),
            days: days.unwrap_or(0),
            hours: hours.unwrap_or(0),
            minutes: minutes.unwrap_or(0),
            seconds: seconds.unwrap_or(0),
            millis: millis.unwrap_or(0),
            micros: micros.unwrap_or(0),
        },
    ))
}

impl Components {
    fn to_duration(&self) -> Option<Duration> {
        let secs = self
            .weeks
            .checked_mul(SECS_PER_WEEK)?
            .checked_add(self.days.checked_mul(SECS_PER_DAY)?)?
            .checked_add(self.hours.checked_mul(SECS_PER_HOUR)?)?
            .checked_add(self.minutes.checked_mul(SECS_PER_MINUTE)?)?
            .checked_add(self.seconds)?;

        Duration::from_secs(secs)
            .checked_add(Duration::from_millis(self.millis))?
            .checked_add(Duration::from_micros(self.micros))
    }
}

/// Parses `text` in the given dialect; `None` for anything non-conforming.
pub fn parse_with_dialect(text: &str, dialect: DurationDialect) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Duration::ZERO);
    }

    match components(text, dialect) {
        Ok(("", parsed)) => parsed.to_duration(),
        _ => None,
    }
}

/// General dialect, e.g. `1h30m`, `5m`, `250ms`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    parse_with_dialect(text, DurationDialect::General)
}

/// Lookback dialect, which additionally accepts a trailing `μs` component.
pub fn parse_lookback(text: &str) -> Option<Duration> {
    parse_with_dialect(text, DurationDialect::Lookback)
}

/// Unix nanoseconds `lookback` before `now`, clamped at the epoch.
pub fn lookback_start_nanos(now: SystemTime, lookback: Duration) -> u64 {
    let now_nanos = now
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    let lookback_nanos = u64::try_from(lookback.as_nanos()).unwrap_or(u64::MAX);
    now_nanos.saturating_sub(lookback_nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_duration() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(90 * 60)));
        assert_eq!(parse_duration("1w2d"), Some(Duration::from_secs(9 * SECS_PER_DAY)));
        assert_eq!(parse_duration("1m1s500ms"), Some(Duration::from_millis(61_500)));
    }

    #[test]
    fn test_minutes_do_not_eat_milliseconds() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("5m250ms"), Some(Duration::from_millis(300_250)));
    }

    #[test]
    fn test_blank_is_zero() {
        assert_eq!(parse_duration(""), Some(Duration::ZERO));
        assert_eq!(parse_duration("   "), Some(Duration::ZERO));
        assert_eq!(parse_lookback(""), Some(Duration::ZERO));
    }

    #[test]
    fn test_rejects_non_conforming() {
        assert_eq!(parse_duration("bogus"), None);
        assert_eq!(parse_duration("30m1h"), None);
        assert_eq!(parse_duration("1h1h"), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("-5m"), None);
        assert_eq!(parse_duration("1.5h"), None);
        assert_eq!(parse_duration("99999999999999999999s"), None);
    }

    #[test]
    fn test_microseconds_only_in_lookback_dialect() {
        assert_eq!(parse_duration("1ms500μs"), None);
        assert_eq!(parse_lookback("1ms500μs"), Some(Duration::from_micros(1_500)));
        assert_eq!(parse_lookback("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_lookback_start() {
        let now = UNIX_EPOCH + Duration::from_secs(100);
        assert_eq!(lookback_start_nanos(now, Duration::from_secs(40)), 60_000_000_000);
        assert_eq!(lookback_start_nanos(now, Duration::from_secs(400)), 0);
    }
}
