//! Human-readable duration strings for the wire format.
//!
//! Schedules and sun offsets travel as unit strings such as `"18h30m0s"`,
//! `"-45m0s"` or `"1.5s"`. Formatting always produces the canonical form
//! (`h`, `m` and `s` components for anything of a second or more, `ms`/`µs`/`ns`
//! below that); parsing accepts any sequence of `<number><unit>` pairs with an
//! optional leading sign.

use chrono::TimeDelta;
use std::fmt::Write;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

fn total_nanos(d: TimeDelta) -> i128 {
    // subsec_nanos carries the same sign as the whole delta
    d.num_seconds() as i128 * NANOS_PER_SEC as i128 + d.subsec_nanos() as i128
}

/// Render `value / scale` with the fractional part trimmed of trailing zeros.
fn format_scaled(value: u128, scale: u128) -> String {
    let int = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return int.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{frac:0width$}");
    format!("{int}.{}", digits.trim_end_matches('0'))
}

/// Format a duration as a unit string, e.g. `2h0m0s`, `-30m0s`, `250ms`.
pub fn format_duration(d: TimeDelta) -> String {
    let total = total_nanos(d);
    if total == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    if total < 0 {
        out.push('-');
    }
    let mut rest = total.unsigned_abs();

    if rest < NANOS_PER_SEC {
        let (scale, unit) = if rest < NANOS_PER_MICRO {
            (1, "ns")
        } else if rest < NANOS_PER_MILLI {
            (NANOS_PER_MICRO, "µs")
        } else {
            (NANOS_PER_MILLI, "ms")
        };
        out.push_str(&format_scaled(rest, scale));
        out.push_str(unit);
        return out;
    }

    let hours = rest / NANOS_PER_HOUR;
    rest %= NANOS_PER_HOUR;
    let minutes = rest / NANOS_PER_MIN;
    rest %= NANOS_PER_MIN;

    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    out.push_str(&format_scaled(rest, NANOS_PER_SEC));
    out.push('s');
    out
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(NANOS_PER_MIN),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Parse a unit string such as `18h30m`, `-1h15m30.5s` or `0`.
pub fn parse_duration(input: &str) -> Result<TimeDelta, String> {
    let invalid = || format!("invalid duration {input:?}");

    let mut s = input.trim();
    let negative = match s.chars().next() {
        Some('-') => {
            s = &s[1..];
            true
        }
        Some('+') => {
            s = &s[1..];
            false
        }
        _ => false,
    };

    if s == "0" {
        return Ok(TimeDelta::zero());
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        // Leading integer part
        let int_len = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let int_part = &s[..int_len];
        s = &s[int_len..];

        // Optional fraction
        let mut frac_part = "";
        if let Some(rest) = s.strip_prefix('.') {
            let frac_len = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            frac_part = &rest[..frac_len];
            s = &rest[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = s
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(s.len());
        let unit = &s[..unit_len];
        s = &s[unit_len..];
        let scale = unit_scale(unit).ok_or_else(|| {
            if unit.is_empty() {
                format!("missing unit in duration {input:?}")
            } else {
                format!("unknown unit {unit:?} in duration {input:?}")
            }
        })?;

        let int: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut value = int.checked_mul(scale).ok_or_else(invalid)?;

        if !frac_part.is_empty() {
            let mut frac_scale = scale;
            for digit in frac_part.chars().filter_map(|c| c.to_digit(10)) {
                frac_scale /= 10;
                if frac_scale == 0 {
                    break;
                }
                value += digit as u128 * frac_scale;
            }
        }
        total = total.checked_add(value).ok_or_else(invalid)?;
    }

    let nanos = i64::try_from(total).map_err(|_| invalid())?;
    let delta = TimeDelta::nanoseconds(nanos);
    Ok(if negative { -delta } else { delta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_canonical_forms() {
        assert_eq!(format_duration(TimeDelta::zero()), "0s");
        assert_eq!(
            format_duration(TimeDelta::hours(18) + TimeDelta::minutes(30)),
            "18h30m0s"
        );
        assert_eq!(format_duration(TimeDelta::hours(2)), "2h0m0s");
        assert_eq!(format_duration(TimeDelta::minutes(-30)), "-30m0s");
        assert_eq!(format_duration(TimeDelta::seconds(45)), "45s");
        assert_eq!(format_duration(TimeDelta::milliseconds(1500)), "1.5s");
        assert_eq!(format_duration(TimeDelta::milliseconds(250)), "250ms");
        assert_eq!(format_duration(TimeDelta::microseconds(3)), "3µs");
    }

    #[test]
    fn test_parse_accepts_compact_and_partial_forms() {
        assert_eq!(
            parse_duration("18h30m0s").unwrap(),
            TimeDelta::hours(18) + TimeDelta::minutes(30)
        );
        assert_eq!(parse_duration("2h").unwrap(), TimeDelta::hours(2));
        assert_eq!(parse_duration("-45m").unwrap(), TimeDelta::minutes(-45));
        assert_eq!(parse_duration("0").unwrap(), TimeDelta::zero());
        assert_eq!(parse_duration("1.5h").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("100ms").unwrap(), TimeDelta::milliseconds(100));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("18").is_err());
        assert!(parse_duration("3 days").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("5x").is_err());
    }

    proptest! {
        #[test]
        fn test_formatted_durations_parse_back(secs in -200_000i64..200_000, millis in 0i64..1000) {
            let d = TimeDelta::seconds(secs) + TimeDelta::milliseconds(millis);
            prop_assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }
}
