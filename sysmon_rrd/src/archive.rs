//! Archive tiers: step/point-count pairs, the `STEP:SPAN` retention grammar, and
//! validation of tier lists.

use std::fmt;
use std::str::FromStr;

use crate::error::{RrdError, Result};

/// One resolution level: `points` slots, each covering `step` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub step: u32,
    pub points: u32,
}

impl ArchiveSpec {
    pub const fn new(step: u32, points: u32) -> Self {
        Self { step, points }
    }

    /// Seconds of history this tier holds.
    pub fn retention(&self) -> i64 {
        self.step as i64 * self.points as i64
    }
}

impl fmt::Display for ArchiveSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s:{}", self.step, self.points)
    }
}

impl FromStr for ArchiveSpec {
    type Err = RrdError;

    /// `1s:1h`, `1m:6h`, `60:1440` (bare step = seconds, bare span = point count). A span
    /// with a unit must be a whole number of steps.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || RrdError::InvalidRetention(s.to_string());
        let (step_s, span_s) = s.trim().split_once(':').ok_or_else(bad)?;

        let step = parse_span(step_s.trim())
            .map(|(n, unit)| n * unit.unwrap_or(1))
            .ok_or_else(bad)?;
        if step == 0 {
            return Err(bad());
        }

        let points = match parse_span(span_s.trim()).ok_or_else(bad)? {
            (n, None) => n,
            (n, Some(unit)) => {
                let span = n * unit;
                if span % step != 0 {
                    return Err(bad());
                }
                span / step
            }
        };
        if points == 0 {
            return Err(bad());
        }

        Ok(ArchiveSpec {
            step: u32::try_from(step).map_err(|_| bad())?,
            points: u32::try_from(points).map_err(|_| bad())?,
        })
    }
}

// Returns the number and the unit multiplier in seconds (None for a bare number).
fn parse_span(s: &str) -> Option<(u64, Option<u64>)> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    let mult = match unit.trim() {
        "" => return Some((n, None)),
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "y" | "year" | "years" => 31_536_000,
        _ => return None,
    };
    n.checked_mul(mult).map(|_| (n, Some(mult)))
}

/// 1s for an hour, 1 min for 6 hours, 1 hour for 31 days, 6 hours for 2 years.
pub fn default_archives() -> Vec<ArchiveSpec> {
    vec![
        ArchiveSpec::new(1, 3_600),
        ArchiveSpec::new(60, 360),
        ArchiveSpec::new(3_600, 744),
        ArchiveSpec::new(21_600, 2_920),
    ]
}

/// Parse a list of retention strings into tiers and validate them.
pub fn parse_archives<S: AsRef<str>>(specs: &[S]) -> Result<Vec<ArchiveSpec>> {
    let archives = specs
        .iter()
        .map(|s| s.as_ref().parse())
        .collect::<Result<Vec<ArchiveSpec>>>()?;
    validate_archives(&archives)?;
    Ok(archives)
}

/// Tiers must be ordered finest to coarsest, each coarser step an exact multiple of the
/// previous one, each coarser tier covering strictly more time, and each finer tier holding
/// enough points to fill one coarser point.
pub fn validate_archives(archives: &[ArchiveSpec]) -> Result<()> {
    if archives.is_empty() {
        return Err(RrdError::InvalidArchives("at least one archive is required".into()));
    }
    for (i, a) in archives.iter().enumerate() {
        if a.step == 0 || a.points == 0 {
            return Err(RrdError::InvalidArchives(format!(
                "archive {i} ({a}) has a zero step or point count"
            )));
        }
    }
    for (i, pair) in archives.windows(2).enumerate() {
        let (fine, coarse) = (pair[0], pair[1]);
        if coarse.step <= fine.step {
            return Err(RrdError::InvalidArchives(format!(
                "archive {} ({coarse}) is not coarser than archive {i} ({fine})",
                i + 1
            )));
        }
        if coarse.step % fine.step != 0 {
            return Err(RrdError::InvalidArchives(format!(
                "step of archive {} ({coarse}) is not a multiple of archive {i} ({fine})",
                i + 1
            )));
        }
        if coarse.retention() <= fine.retention() {
            return Err(RrdError::InvalidArchives(format!(
                "archive {} ({coarse}) must retain more than archive {i} ({fine})",
                i + 1
            )));
        }
        if fine.points < coarse.step / fine.step {
            return Err(RrdError::InvalidArchives(format!(
                "archive {i} ({fine}) holds too few points to consolidate into archive {} ({coarse})",
                i + 1
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unit_and_bare_forms() {
        assert_eq!("1s:1h".parse::<ArchiveSpec>().unwrap(), ArchiveSpec::new(1, 3_600));
        assert_eq!("1m:6h".parse::<ArchiveSpec>().unwrap(), ArchiveSpec::new(60, 360));
        assert_eq!("1h:31d".parse::<ArchiveSpec>().unwrap(), ArchiveSpec::new(3_600, 744));
        assert_eq!("6h:2y".parse::<ArchiveSpec>().unwrap(), ArchiveSpec::new(21_600, 2_920));
        assert_eq!("60:1440".parse::<ArchiveSpec>().unwrap(), ArchiveSpec::new(60, 1_440));
        assert_eq!(" 10s : 6h ".parse::<ArchiveSpec>().unwrap(), ArchiveSpec::new(10, 2_160));
    }

    #[test]
    fn rejects_malformed_retention() {
        for bad in ["", "1s", "0s:1h", "1s:0", "1x:1h", "s:1h", "1h:1m", "7s:1m", "1h:90m"] {
            assert!(bad.parse::<ArchiveSpec>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn default_tiers_are_valid() {
        validate_archives(&default_archives()).unwrap();
        let parsed = parse_archives(&["1s:1h", "1m:6h", "1h:31d", "6h:2y"]).unwrap();
        assert_eq!(parsed, default_archives());
    }

    #[test]
    fn rejects_non_multiple_steps() {
        let err = validate_archives(&[ArchiveSpec::new(2, 60), ArchiveSpec::new(3, 100)]);
        assert!(matches!(err, Err(RrdError::InvalidArchives(_))));
    }

    #[test]
    fn rejects_non_covering_span() {
        let err = validate_archives(&[ArchiveSpec::new(1, 60), ArchiveSpec::new(10, 5)]);
        assert!(matches!(err, Err(RrdError::InvalidArchives(_))));
    }

    #[test]
    fn rejects_unordered_and_empty() {
        assert!(validate_archives(&[]).is_err());
        assert!(validate_archives(&[ArchiveSpec::new(60, 100), ArchiveSpec::new(1, 3_600)]).is_err());
        assert!(validate_archives(&[ArchiveSpec::new(1, 5), ArchiveSpec::new(10, 100)]).is_err());
    }
}
