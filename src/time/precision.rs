use crate::time::error::DateError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use core::str::FromStr;
use lazy_static::*;
use regex::{Captures, Regex};
use std::fmt;

lazy_static! {
    static ref DATE_REGEX: Regex = Regex::new(
        r"^(?P<year>\d{4})(?:-(?P<month>\d{2})(?:-(?P<day>\d{2})(?:T(?P<hour>\d{2}):(?P<minute>\d{2})(?::(?P<second>\d{2})(?:\.(?P<fraction>\d{1,9}))?)?(?P<offset>Z|[+-]\d{2}:\d{2})?)?)?)?$"
    )
    .expect("Regex compilation error");
}

/// Smallest component a literal states explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precision {
    Year,
    Month,
    Day,
    Minute,
    Second,
    /// Fractional seconds with the given number of digits.
    Fraction(u8),
}

/// Interval endpoint. Open ends of a period sit at the infinities so they
/// never collapse to the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bound {
    NegInfinity,
    At(DateTime<Utc>),
    PosInfinity,
}

/// Half-open interval `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lower: Bound,
    pub upper: Bound,
}

/// A date, dateTime or instant literal of any precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDateTime {
    literal: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    precision: Precision,
}

impl PartialDateTime {
    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// First instant past the stated precision.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn interval(&self) -> Interval {
        Interval::new(Bound::At(self.start), Bound::At(self.end))
    }
}

impl fmt::Display for PartialDateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl FromStr for PartialDateTime {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DATE_REGEX
            .captures(s)
            .ok_or_else(|| DateError::Syntax(s.to_owned()))?;
        let year = component(s, &caps, "year")?.unwrap_or(0) as i32;
        let month = component(s, &caps, "month")?;
        let day = component(s, &caps, "day")?;
        let hour = component(s, &caps, "hour")?;
        let minute = component(s, &caps, "minute")?;
        let second = component(s, &caps, "second")?;

        let date = NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))
            .ok_or_else(|| DateError::OutOfRange(s.to_owned(), "no such calendar date"))?;

        let (nanos, digits) = match caps.name("fraction") {
            Some(fraction) => {
                let digits = fraction.as_str().len() as u32;
                let value = fraction
                    .as_str()
                    .parse::<u32>()
                    .map_err(|_| DateError::Syntax(s.to_owned()))?;
                (value * 10u32.pow(9 - digits), Some(digits as u8))
            }
            None => (0, None),
        };

        let naive = date
            .and_hms_nano_opt(
                hour.unwrap_or(0),
                minute.unwrap_or(0),
                second.unwrap_or(0),
                nanos,
            )
            .ok_or_else(|| DateError::OutOfRange(s.to_owned(), "no such time of day"))?;

        let offset = match caps.name("offset").map(|m| m.as_str()) {
            None | Some("Z") => FixedOffset::east(0),
            Some(offset) => parse_offset(s, offset)?,
        };
        let start = offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| DateError::OutOfRange(s.to_owned(), "ambiguous local time"))?
            .with_timezone(&Utc);

        let precision = match (month, day, hour, second, digits) {
            (None, _, _, _, _) => Precision::Year,
            (Some(_), None, _, _, _) => Precision::Month,
            (Some(_), Some(_), None, _, _) => Precision::Day,
            (_, _, Some(_), None, _) => Precision::Minute,
            (_, _, Some(_), Some(_), None) => Precision::Second,
            (_, _, Some(_), Some(_), Some(digits)) => Precision::Fraction(digits),
        };

        let end = match precision {
            Precision::Year => NaiveDate::from_ymd_opt(year + 1, 1, 1)
                .map(|next| Utc.from_utc_datetime(&next.and_hms(0, 0, 0))),
            Precision::Month => {
                let month = month.unwrap_or(1);
                let (year, month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|next| Utc.from_utc_datetime(&next.and_hms(0, 0, 0)))
            }
            Precision::Day => start.checked_add_signed(Duration::days(1)),
            Precision::Minute => start.checked_add_signed(Duration::minutes(1)),
            Precision::Second => start.checked_add_signed(Duration::seconds(1)),
            Precision::Fraction(digits) => start
                .checked_add_signed(Duration::nanoseconds(10i64.pow(9 - digits as u32))),
        }
        .ok_or_else(|| DateError::OutOfRange(s.to_owned(), "upper bound overflows"))?;

        trace!("Expanded '{}' into [{}, {})", s, start, end);
        Ok(Self {
            literal: s.to_owned(),
            start,
            end,
            precision,
        })
    }
}

fn component(literal: &str, caps: &Captures, name: &str) -> Result<Option<u32>, DateError> {
    match caps.name(name) {
        Some(value) => value
            .as_str()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| DateError::Syntax(literal.to_owned())),
        None => Ok(None),
    }
}

fn parse_offset(literal: &str, offset: &str) -> Result<FixedOffset, DateError> {
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let hours = offset[1..3]
        .parse::<i32>()
        .map_err(|_| DateError::Syntax(literal.to_owned()))?;
    let minutes = offset[4..6]
        .parse::<i32>()
        .map_err(|_| DateError::Syntax(literal.to_owned()))?;
    if hours > 14 || minutes > 59 {
        return Err(DateError::OutOfRange(literal.to_owned(), "offset beyond +/-14:00"));
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| DateError::OutOfRange(literal.to_owned(), "offset beyond +/-14:00"))
}

/// Expands a literal into the maximal half-open interval it denotes.
pub fn expand(literal: &str) -> Result<Interval, DateError> {
    literal.parse::<PartialDateTime>().map(|value| value.interval())
}

impl Interval {
    pub fn new(lower: Bound, upper: Bound) -> Self {
        Self { lower, upper }
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.lower < other.upper && other.lower < self.upper
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }
}
