pub mod guess;

use std::fmt;
use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike,
    Utc,
};
use regex::Regex;
use serde::{Serialize, Serializer};

/// How much of a stamp was actually observed. Ordered coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Precision {
    Day,
    Second,
    /// Fractional seconds with the given number of digits (1..=9).
    Fraction(u8),
}

/// A normalized datetime observation.
///
/// `local` is the wall-clock value as written by its source and is what
/// comparisons use. The offset, when the source had one, is kept for display
/// and for turning the stamp back into an instant. Digits beyond `precision`
/// are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp {
    local: NaiveDateTime,
    offset: Option<FixedOffset>,
    precision: Precision,
}

impl Stamp {
    pub fn new(local: NaiveDateTime, precision: Precision) -> Self {
        Self {
            local: truncate(local, precision),
            offset: None,
            precision,
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn local(&self) -> NaiveDateTime {
        self.local
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Two stamps are compatible when they agree at the coarser of their precisions.
    pub fn is_compatible(&self, other: &Stamp) -> bool {
        let precision = self.precision.min(other.precision);
        truncate(self.local, precision) == truncate(other.local, precision)
    }

    /// The finer of two stamps; `self` on equal precision.
    pub fn more_precise(self, other: Stamp) -> Stamp {
        if other.precision > self.precision {
            other
        } else {
            self
        }
    }

    /// Stamp for a filesystem time, expressed in host-local time.
    pub fn from_system_time(time: SystemTime) -> Self {
        let dt: DateTime<Local> = time.into();
        let nanos = dt.nanosecond() % 1_000_000_000;
        let precision = if nanos == 0 {
            Precision::Second
        } else {
            Precision::Fraction(significant_digits(nanos))
        };
        Stamp::new(dt.naive_local(), precision).with_offset(dt.offset().fix())
    }

    /// The instant this stamp denotes. Offset-less stamps are read as host-local time.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self.offset {
            Some(offset) => offset
                .from_local_datetime(&self.local)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
            None => Local
                .from_local_datetime(&self.local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    /// Value in the metadata tool's date syntax.
    pub fn exif_value(&self, with_fraction: bool) -> String {
        let mut out = self.local.format("%Y:%m:%d %H:%M:%S").to_string();
        if with_fraction {
            if let Precision::Fraction(digits) = self.precision {
                out.push('.');
                out.push_str(&fraction_digits(self.local, digits));
            }
            if let Some(offset) = self.offset {
                out.push_str(&offset.to_string());
            }
        }
        out
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precision {
            Precision::Day => write!(f, "{}", self.local.format("%Y-%m-%d"))?,
            Precision::Second => write!(f, "{}", self.local.format("%Y-%m-%d %H:%M:%S"))?,
            Precision::Fraction(digits) => write!(
                f,
                "{}.{}",
                self.local.format("%Y-%m-%d %H:%M:%S"),
                fraction_digits(self.local, digits)
            )?,
        }
        if let Some(offset) = self.offset {
            write!(f, "{offset}")?;
        }
        Ok(())
    }
}

impl Serialize for Stamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn truncate(dt: NaiveDateTime, precision: Precision) -> NaiveDateTime {
    match precision {
        Precision::Day => dt.date().and_time(NaiveTime::MIN),
        Precision::Second => dt.with_nanosecond(0).unwrap_or(dt),
        Precision::Fraction(digits) => {
            let unit = 10u32.pow(9 - u32::from(digits.clamp(1, 9)));
            let nanos = dt.nanosecond() % 1_000_000_000;
            dt.with_nanosecond(nanos - nanos % unit).unwrap_or(dt)
        }
    }
}

fn fraction_digits(dt: NaiveDateTime, digits: u8) -> String {
    let nanos = format!("{:09}", dt.nanosecond() % 1_000_000_000);
    nanos[..usize::from(digits.clamp(1, 9))].to_string()
}

fn significant_digits(mut nanos: u32) -> u8 {
    let mut digits = 9;
    while digits > 1 && nanos % 10 == 0 {
        nanos /= 10;
        digits -= 1;
    }
    digits
}

/// Attach a fractional-seconds string (e.g. `"5"`, `"732"`) to a whole-second value.
pub(crate) fn with_fraction(dt: NaiveDateTime, frac: &str) -> Option<Stamp> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let frac = &frac[..frac.len().min(9)];
    let nanos: u32 = format!("{frac:0<9}").parse().ok()?;
    let local = dt.with_nanosecond(nanos)?;
    Some(Stamp::new(local, Precision::Fraction(frac.len() as u8)))
}

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<y>\d{4})[:\-](?P<mo>\d{2})[:\-](?P<d>\d{2})(?:[ T](?P<h>\d{2}):(?P<mi>\d{2}):(?P<s>\d{2})(?:\.(?P<frac>\d{1,9})\d*)?)?\s*(?P<tz>Z|[+\-]\d{2}:?\d{2})?$",
    )
    .unwrap()
});

/// Parse the date syntaxes metadata tools emit.
///
/// Accepts `YYYY:MM:DD` or `YYYY-MM-DD`, optionally followed by a time,
/// fractional seconds and a `Z`/`±HH:MM` offset. Returns `None` for bare
/// numbers (e.g. a lone `SubSecTime` value) and all-zero placeholder dates.
pub fn parse_date(s: &str) -> Option<Stamp> {
    let caps = DATE_RE.captures(s.trim())?;
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = caps.name("y")?.as_str().parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, num("mo")?, num("d")?)?;

    let mut stamp = match (num("h"), num("mi"), num("s")) {
        (Some(h), Some(mi), Some(sec)) => {
            let dt = date.and_hms_opt(h, mi, sec)?;
            match caps.name("frac") {
                Some(frac) => with_fraction(dt, frac.as_str())?,
                None => Stamp::new(dt, Precision::Second),
            }
        }
        _ => Stamp::new(date.and_time(NaiveTime::MIN), Precision::Day),
    };

    if let Some(tz) = caps.name("tz") {
        stamp = stamp.with_offset(parse_offset(tz.as_str())?);
    }
    Some(stamp)
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    if s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let digits: String = s[1..].chars().filter(|c| *c != ':').collect();
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
