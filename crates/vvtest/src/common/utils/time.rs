use std::time::Duration;

use anyhow::anyhow;
use nom::IResult;
use nom::character::complete::{char, u64 as p_u64};
use nom::combinator::{all_consuming, map_res, opt};
use nom::sequence::{preceded, tuple};
use serde::{Deserialize, Deserializer};

/// Format a duration as a batch system time string, e.g. 01:05:02
pub fn format_duration(duration: &Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Rounds a duration to whole minutes (at least one).
pub fn minutes_of_time(duration: &Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    ((millis + 30_000) / 60_000).max(1)
}

fn p_hms_time(input: &str) -> IResult<&str, Duration> {
    map_res(
        tuple((
            p_u64,
            opt(preceded(char(':'), p_u64)),
            opt(preceded(char(':'), p_u64)),
        )),
        |parsed| match parsed {
            (seconds, None, None) => Ok(Duration::from_secs(seconds)),
            (minutes, Some(seconds), None) => Ok(Duration::from_secs(minutes * 60 + seconds)),
            (hours, Some(minutes), Some(seconds)) => {
                Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
            }
            _ => Err(anyhow!("Invalid time specification")),
        },
    )(input)
}

/// Parses time strings in the format [[hh:]mm:]ss.
/// Individual time values may be zero padded.
pub fn parse_hms_time(input: &str) -> anyhow::Result<Duration> {
    all_consuming(p_hms_time)(input.trim())
        .map(|(_, duration)| duration)
        .map_err(|e| anyhow!("Invalid time specification `{input}`: {e}"))
}

/// Allows specifying humantime format (2h, 3m) or HH:MM:SS
pub fn parse_hms_or_human_time(text: &str) -> anyhow::Result<Duration> {
    parse_hms_time(text)
        .or_else(|_| humantime::parse_duration(text))
        .map_err(|e| {
            anyhow!(
                "Could not parse time `{text}`. Use either `HH:MM:SS` or humantime format (2hours): {e:?}"
            )
        })
}

pub fn deserialize_human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = String::deserialize(deserializer)?;
    parse_hms_or_human_time(&buf).map_err(serde::de::Error::custom)
}

pub fn deserialize_human_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = Option::<String>::deserialize(deserializer)?;

    if let Some(b) = buf {
        parse_hms_or_human_time(&b)
            .map(Some)
            .map_err(serde::de::Error::custom)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::{format_duration, minutes_of_time, parse_hms_or_human_time, parse_hms_time};
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(&Duration::from_secs(1)), "00:00:01");
        assert_eq!(format_duration(&Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_duration(&Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_duration(&Duration::from_secs(75600)), "21:00:00");
    }

    #[test]
    fn test_minutes_of_time() {
        assert_eq!(minutes_of_time(&Duration::from_secs(0)), 1);
        assert_eq!(minutes_of_time(&Duration::from_secs(29)), 1);
        assert_eq!(minutes_of_time(&Duration::from_secs(89)), 1);
        assert_eq!(minutes_of_time(&Duration::from_secs(90)), 2);
        assert_eq!(minutes_of_time(&Duration::from_secs(3600)), 60);
    }

    #[test]
    fn test_parse_hms_time() {
        assert_eq!(parse_hms_time("12").unwrap(), Duration::from_secs(12));
        assert_eq!(parse_hms_time("1:02").unwrap(), Duration::from_secs(62));
        assert_eq!(parse_hms_time("01:00:05").unwrap(), Duration::from_secs(3605));
        assert!(parse_hms_time("1:2:3:4").is_err());
        assert!(parse_hms_time("1h").is_err());
    }

    #[test]
    fn test_parse_hms_or_human_time() {
        assert_eq!(
            parse_hms_or_human_time("2m").unwrap(),
            Duration::from_secs(120)
        );
        assert_eq!(
            parse_hms_or_human_time("00:30:00").unwrap(),
            Duration::from_secs(1800)
        );
        assert!(parse_hms_or_human_time("soon").is_err());
    }
}
