use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{with_fraction, Precision, Stamp};
use crate::tags::ConfigError;

/// A filename datetime pattern: a regex with a `date` group (and optionally a
/// `frac` group of fractional-second digits) plus the chrono format of `date`.
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Regex,
    format: String,
}

impl NamePattern {
    pub fn new(regex: &str, format: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::NamePattern {
            pattern: regex.to_string(),
            reason,
        };
        let compiled = Regex::new(regex).map_err(|e| invalid(e.to_string()))?;
        if !compiled.capture_names().flatten().any(|n| n == "date") {
            return Err(invalid("missing a (?P<date>...) group".into()));
        }
        Ok(Self {
            regex: compiled,
            format: format.to_string(),
        })
    }

    /// Parse `<regex>=<chrono format>` as given on the command line.
    pub fn parse_arg(arg: &str) -> Result<Self, ConfigError> {
        let (regex, format) = arg.rsplit_once('=').ok_or_else(|| ConfigError::NamePattern {
            pattern: arg.to_string(),
            reason: "expected <regex>=<format>".into(),
        })?;
        Self::new(regex, format)
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    fn matches(&self, name: &str) -> Option<Stamp> {
        let caps = self.regex.captures(name)?;
        let date_str = caps.name("date")?.as_str();

        let dt = if self.format.contains("%H") {
            NaiveDateTime::parse_from_str(date_str, &self.format).ok()?
        } else {
            let day = NaiveDate::parse_from_str(date_str, &self.format).ok()?;
            return Some(Stamp::new(day.and_time(NaiveTime::MIN), Precision::Day));
        };

        match caps.name("frac") {
            Some(frac) => with_fraction(dt, frac.as_str()),
            None => Some(Stamp::new(dt, Precision::Second)),
        }
    }
}

const MONTH: &str = "(0[1-9]|1[0-2])";
const DAY: &str = "(0[1-9]|[12]\\d|3[01])";
const YEAR: &str = "(20|19|18)\\d{2}";

static DEFAULT_PATTERNS: LazyLock<Vec<NamePattern>> = LazyLock::new(|| {
    let specs: [(String, &str); 11] = [
        (format!(r"PXL_(?P<date>{YEAR}{MONTH}{DAY}_\d{{6}})(?P<frac>\d{{1,3}})"), "%Y%m%d_%H%M%S"),
        (format!(r"(?P<date>{YEAR}{MONTH}{DAY}_\d{{6}})"), "%Y%m%d_%H%M%S"),
        (format!(r"(?P<date>{YEAR}{MONTH}{DAY}-\d{{6}})"), "%Y%m%d-%H%M%S"),
        (format!(r"(?P<date>{YEAR}-{MONTH}-{DAY} \d{{2}}\.\d{{2}}\.\d{{2}})"), "%Y-%m-%d %H.%M.%S"),
        (format!(r"(?P<date>{YEAR}-{MONTH}-{DAY}-\d{{2}}-\d{{2}}-\d{{2}})"), "%Y-%m-%d-%H-%M-%S"),
        (format!(r"(?P<date>{YEAR}-{MONTH}-{DAY}-\d{{6}})"), "%Y-%m-%d-%H%M%S"),
        (format!(r"(?P<date>{YEAR}_{MONTH}_{DAY}_\d{{2}}_\d{{2}}_\d{{2}})"), "%Y_%m_%d_%H_%M_%S"),
        (format!(r"(?P<date>{YEAR}{MONTH}{DAY}\d{{6}})"), "%Y%m%d%H%M%S"),
        (format!(r"(?P<date>{YEAR}-{MONTH}-{DAY})"), "%Y-%m-%d"),
        (format!(r"(?P<date>{YEAR}_{MONTH}_{DAY})"), "%Y_%m_%d"),
        (format!(r"(?:^|\D)(?P<date>{YEAR}{MONTH}{DAY})(?:\D|$)"), "%Y%m%d"),
    ];
    specs
        .iter()
        .map(|(regex, format)| NamePattern::new(regex, format).unwrap())
        .collect()
});

/// Built-in patterns, most specific first.
pub fn default_patterns() -> &'static [NamePattern] {
    &DEFAULT_PATTERNS
}

/// Infer a datetime from a file's base name. `extra` patterns are tried before the defaults.
pub fn guess_date_from_filename(filename: &str, extra: &[NamePattern]) -> Option<(Stamp, String)> {
    let basename = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    extra
        .iter()
        .chain(default_patterns())
        .find_map(|pat| pat.matches(basename).map(|stamp| (stamp, pat.format.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guess(name: &str) -> Option<Stamp> {
        guess_date_from_filename(name, &[]).map(|(stamp, _)| stamp)
    }

    #[test]
    fn test_guess_patterns() {
        assert!(guess("Screenshot_20190919-053857.jpg").is_some());
        assert!(guess("IMG_20190509_154733.jpg").is_some());
        assert!(guess("signal-2020-10-26-163832.jpg").is_some());
        assert!(guess("2016_01_30_11_49_15.mp4").is_some());
        assert!(guess("2020-04-19 11.13.54.jpg").is_some());
        assert!(guess("random_photo.jpg").is_none());
        assert!(guess("IMG_0001.jpg").is_none());
    }

    #[test]
    fn exact_values() {
        let stamp = guess("IMG_20201231_235959.JPG").unwrap();
        assert_eq!(stamp.to_string(), "2020-12-31 23:59:59");
        assert_eq!(stamp.precision(), Precision::Second);

        let stamp = guess("/some/dir/20230101-123045.jpg").unwrap();
        assert_eq!(stamp.to_string(), "2023-01-01 12:30:45");
    }

    #[test]
    fn pixel_names_keep_milliseconds() {
        let stamp = guess("PXL_20240201_073211123.mp4").unwrap();
        assert_eq!(stamp.precision(), Precision::Fraction(3));
        assert_eq!(stamp.to_string(), "2024-02-01 07:32:11.123");

        let stamp = guess("PXL_20210101_123045.jpg").unwrap();
        assert_eq!(stamp.precision(), Precision::Second);
    }

    #[test]
    fn date_only_names_have_day_precision() {
        let stamp = guess("2023_01_02.jpg").unwrap();
        assert_eq!(stamp.precision(), Precision::Day);
        assert_eq!(stamp.to_string(), "2023-01-02");

        assert_eq!(guess("scan 19991231.png").unwrap().to_string(), "1999-12-31");
    }

    #[test]
    fn extra_patterns_take_priority() {
        let custom = NamePattern::parse_arg(r"shot-(?P<date>\d{6})=%d%m%y").unwrap();
        let (stamp, format) = guess_date_from_filename("shot-311299.jpg", &[custom]).unwrap();
        assert_eq!(stamp.to_string(), "1999-12-31");
        assert_eq!(format, "%d%m%y");
    }

    #[test]
    fn non_digit_fraction_group_is_ignored() {
        let loose = NamePattern::parse_arg(r"x(?P<date>\d{8}_\d{6})(?P<frac>.*)=%Y%m%d_%H%M%S").unwrap();
        let name = "x20200101_101010ééééé.jpg";
        assert!(guess_date_from_filename(name, std::slice::from_ref(&loose)).is_none());

        let (stamp, _) =
            guess_date_from_filename("x20200101_101010123456789012", &[loose]).unwrap();
        assert_eq!(stamp.precision(), Precision::Fraction(9));
        assert_eq!(stamp.to_string(), "2020-01-01 10:10:10.123456789");
    }

    #[test]
    fn extra_patterns_need_a_date_group() {
        assert!(NamePattern::parse_arg(r"(\d{8})=%Y%m%d").is_err());
        assert!(NamePattern::parse_arg(r"no-format").is_err());
        assert!(NamePattern::parse_arg(r"(?P<date>[=%Y").is_err());
    }
}
