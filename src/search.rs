use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::date::{parse_date, Stamp};
use crate::fs_times::FsTimes;
use crate::metadata::{self, MetadataTool, TagMap};
use crate::relocate;
use crate::tags::{SystemTag, ALL_DATES, SYSTEM_PREFIX};
use crate::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            ">" => CmpOp::Gt,
            "<" => CmpOp::Lt,
            ">=" => CmpOp::Ge,
            "<=" => CmpOp::Le,
            "==" => CmpOp::Eq,
            "!=" | "<>" => CmpOp::Ne,
            _ => return None,
        })
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Ge => ordering != Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
        }
    }
}

/// `left OP right`, where each side is a tag name or a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub left: String,
    pub op: CmpOp,
    pub right: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Comparison expression is empty")]
    Empty,
    #[error("Invalid comparison '{0}'; expected 'TagA OP TagB' with OP one of > < >= <= == != <>")]
    Term(String),
}

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<a>.+?)\s*(?P<op>>=|<=|<>|!=|==|>|<)\s*(?P<b>.+?)\s*$").unwrap()
});

/// Comparisons joined by `&` (binds tighter) and `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    groups: Vec<Vec<Comparison>>,
}

impl Query {
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        let groups = expr
            .split('|')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(|group| {
                group
                    .split('&')
                    .map(str::trim)
                    .filter(|term| !term.is_empty())
                    .map(parse_term)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        if groups.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self { groups })
    }

    /// Every side of every comparison, first-seen order, no repeats.
    pub fn tag_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for cmp in self.groups.iter().flatten() {
            for side in [cmp.left.as_str(), cmp.right.as_str()] {
                if !names.contains(&side) {
                    names.push(side);
                }
            }
        }
        names
    }

    /// Whether some side can only be answered by the metadata tool.
    pub fn needs_metadata(&self) -> bool {
        self.tag_names()
            .into_iter()
            .any(|side| !side.starts_with(SYSTEM_PREFIX) && coerce(side).is_text())
    }

    pub fn matches(&self, tags: &TagMap, times: &FsTimes) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|cmp| cmp.holds(tags, times)))
    }
}

fn parse_term(term: &str) -> Result<Comparison, QueryError> {
    let caps = TERM_RE
        .captures(term)
        .ok_or_else(|| QueryError::Term(term.to_string()))?;
    let op = CmpOp::from_symbol(&caps["op"]).ok_or_else(|| QueryError::Term(term.to_string()))?;
    Ok(Comparison {
        left: caps["a"].to_string(),
        op,
        right: caps["b"].to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Date(Stamp),
    Number(f64),
    Text(String),
}

impl Operand {
    fn is_text(&self) -> bool {
        matches!(self, Operand::Text(_))
    }

    fn text(&self) -> String {
        match self {
            Operand::Date(stamp) => stamp.to_string(),
            Operand::Number(n) => n.to_string(),
            Operand::Text(s) => s.clone(),
        }
    }
}

fn coerce(raw: &str) -> Operand {
    let raw = raw.trim();
    if let Some(stamp) = parse_date(raw) {
        return Operand::Date(stamp);
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Operand::Number(n),
        _ => Operand::Text(raw.to_string()),
    }
}

fn compare(a: &Operand, b: &Operand) -> Option<Ordering> {
    match (a, b) {
        (Operand::Date(x), Operand::Date(y)) if x.is_compatible(y) => Some(Ordering::Equal),
        (Operand::Date(x), Operand::Date(y)) => Some(x.local().cmp(&y.local())),
        (Operand::Number(x), Operand::Number(y)) => x.partial_cmp(y),
        _ => Some(a.text().cmp(&b.text())),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(value_text),
        Value::Null | Value::Object(_) => None,
    }
}

/// A metadata key the tool reported for `name`, matched exactly, by group or
/// by trailing name, and finally ignoring case.
fn find_tag<'a>(tags: &'a TagMap, name: &str) -> Option<&'a Value> {
    if matches!(name, "AllDates" | "EXIF:AllDates") {
        if let Some(value) = tags.get(name) {
            return Some(value);
        }
        return ALL_DATES
            .iter()
            .find_map(|key| metadata::lookup(tags, key).map(|(_, v)| v));
    }
    if let Some((_, value)) = metadata::lookup(tags, name) {
        return Some(value);
    }
    let lower = name.to_lowercase();
    let suffix = format!(":{lower}");
    tags.iter()
        .find(|(k, _)| {
            let k = k.to_lowercase();
            k == lower || k.ends_with(&suffix)
        })
        .map(|(_, v)| v)
}

/// What one side of a comparison stands for. `None` when it names a
/// filesystem time this platform does not report.
fn resolve_side(side: &str, tags: &TagMap, times: &FsTimes) -> Option<Operand> {
    if let Some(tag) = side.strip_prefix(SYSTEM_PREFIX).and_then(SystemTag::from_name) {
        return times.stamp(tag).map(Operand::Date);
    }
    match find_tag(tags, side).and_then(value_text) {
        Some(text) => Some(coerce(&text)),
        None => Some(coerce(side)),
    }
}

impl Comparison {
    fn holds(&self, tags: &TagMap, times: &FsTimes) -> bool {
        let (Some(a), Some(b)) = (
            resolve_side(&self.left, tags, times),
            resolve_side(&self.right, tags, times),
        ) else {
            return false;
        };
        compare(&a, &b).is_some_and(|ordering| self.op.holds(ordering))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub pattern: String,
    /// Query such as `EXIF:DateTimeOriginal > EXIF:CreateDate | FileCreateDate <> ModifyDate`.
    #[serde(default)]
    pub compare: Option<String>,
    /// Move matches into this folder.
    #[serde(default)]
    pub move_to: Option<PathBuf>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub path: PathBuf,
    /// Where the file went, or would go on a dry run.
    pub destination: Option<PathBuf>,
    pub moved: bool,
}

#[derive(Debug, Default)]
pub struct SearchReport {
    pub matches: Vec<SearchMatch>,
    pub summary: RunSummary,
}

/// Files matching the glob for which the query holds, optionally moved.
///
/// An invalid query fails before any file is read. Unreadable files are
/// recorded as failures and the search continues.
pub fn search(options: &SearchOptions, tool: &dyn MetadataTool) -> anyhow::Result<SearchReport> {
    let query = options.compare.as_deref().map(Query::parse).transpose()?;
    let needs_metadata = query.as_ref().is_some_and(Query::needs_metadata);
    let files = crate::expand_pattern(&options.pattern)?;
    let mut report = SearchReport::default();
    let mut used = HashSet::new();

    for path in &files {
        report.summary.processed += 1;
        if let Some(query) = &query {
            let times = match FsTimes::read(path) {
                Ok(times) => times,
                Err(err) => {
                    report.summary.fail(path, err);
                    continue;
                }
            };
            let tags = if needs_metadata {
                match tool.read_tags(path) {
                    Ok(tags) => tags,
                    Err(err) => {
                        report.summary.fail(path, err);
                        continue;
                    }
                }
            } else {
                TagMap::new()
            };
            if !query.matches(&tags, &times) {
                continue;
            }
        }

        let mut found = SearchMatch {
            path: path.clone(),
            destination: None,
            moved: false,
        };
        if let Some(dir) = &options.move_to {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            let dest = relocate::unique_destination(dir, &name, &used);
            used.insert(dest.clone());
            if options.dry_run {
                log::info!("DRY RUN: would move {} -> {}", path.display(), dest.display());
            } else if let Err(err) = relocate::move_file(path, &dest) {
                report
                    .summary
                    .fail(path, format!("cannot move to {}: {err}", dest.display()));
                continue;
            } else {
                log::info!("MOVED {} -> {}", path.display(), dest.display());
                found.moved = true;
                report.summary.applied += 1;
            }
            found.destination = Some(dest);
        }
        report.matches.push(found);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::InMemoryTool;
    use filetime::FileTime;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn times_of(path: &Path) -> FsTimes {
        FsTimes::read(path).unwrap()
    }

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"x").unwrap();
        (dir, path)
    }

    #[test]
    fn parse_operators_and_grouping() {
        let query = Query::parse("A >= B & C <> D | E == F").unwrap();
        assert_eq!(query.groups.len(), 2);
        assert_eq!(query.groups[0].len(), 2);
        assert_eq!(query.groups[0][0].op, CmpOp::Ge);
        assert_eq!(query.groups[0][1].op, CmpOp::Ne);
        assert_eq!(query.groups[1][0].left, "E");
        assert_eq!(query.tag_names(), vec!["A", "B", "C", "D", "E", "F"]);

        let query = Query::parse("EXIF:DateTimeOriginal > 2020:01:01 00:00:00").unwrap();
        assert_eq!(query.groups[0][0].left, "EXIF:DateTimeOriginal");
        assert_eq!(query.groups[0][0].right, "2020:01:01 00:00:00");
    }

    #[test]
    fn parse_rejects_bad_expressions() {
        assert_eq!(Query::parse(" | "), Err(QueryError::Empty));
        assert!(matches!(Query::parse("DateTimeOriginal"), Err(QueryError::Term(_))));
        assert!(matches!(Query::parse("A > B & nonsense"), Err(QueryError::Term(_))));
    }

    #[test]
    fn tag_against_tag_and_literal() {
        let (_dir, path) = scratch();
        let times = times_of(&path);
        let map = tags(&[
            ("EXIF:ExifIFD:DateTimeOriginal", "2020:01:01 00:00:00"),
            ("EXIF:ExifIFD:CreateDate", "2021:01:01 00:00:00"),
            ("EXIF:ExifIFD:ISO", "100"),
        ]);

        let holds = |expr: &str| Query::parse(expr).unwrap().matches(&map, &times);
        assert!(holds("EXIF:DateTimeOriginal < EXIF:CreateDate"));
        assert!(!holds("DateTimeOriginal > CreateDate"));
        assert!(holds("DateTimeOriginal != CreateDate"));
        assert!(holds("DateTimeOriginal > 2019:06:01 12:00:00"));
        assert!(holds("DateTimeOriginal == 2020-01-01"));
        assert!(holds("iso >= 50"));
        assert!(!holds("ISO > 200"));
        assert!(holds("ISO > 200 | CreateDate > DateTimeOriginal"));
        assert!(!holds("ISO < 200 & CreateDate < DateTimeOriginal"));
    }

    #[test]
    fn all_dates_uses_the_first_present_key() {
        let (_dir, path) = scratch();
        let times = times_of(&path);
        let map = tags(&[("EXIF:IFD0:ModifyDate", "2020:01:01 00:00:00")]);
        assert!(Query::parse("AllDates == 2020:01:01 00:00:00")
            .unwrap()
            .matches(&map, &times));
    }

    #[test]
    fn filesystem_times_come_from_the_file() {
        let (_dir, path) = scratch();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
        let times = times_of(&path);
        let map = tags(&[("EXIF:ExifIFD:DateTimeOriginal", "2020:01:01 00:00:00")]);

        let holds = |expr: &str| Query::parse(expr).unwrap().matches(&map, &times);
        assert!(holds("File:System:FileModifyDate < 2002:01:01 00:00:00"));
        assert!(holds("File:System:FileModifyDate < EXIF:DateTimeOriginal"));
        assert!(!holds("File:System:FileModifyDate > EXIF:DateTimeOriginal"));
    }

    #[test]
    fn metadata_is_read_only_when_needed() {
        assert!(!Query::parse("File:System:FileModifyDate > 2020:01:01 00:00:00")
            .unwrap()
            .needs_metadata());
        assert!(Query::parse("File:System:FileModifyDate > DateTimeOriginal")
            .unwrap()
            .needs_metadata());
    }

    #[test]
    fn search_filters_and_moves() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.jpg");
        let new = dir.path().join("new.jpg");
        fs::write(&old, b"o").unwrap();
        fs::write(&new, b"n").unwrap();
        let tool = InMemoryTool::new()
            .with_tags(&old, [("EXIF:ExifIFD:DateTimeOriginal", "2001:01:01 00:00:00")])
            .with_tags(&new, [("EXIF:ExifIFD:DateTimeOriginal", "2021:01:01 00:00:00")]);
        let dest = dir.path().join("sorted");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("old.jpg"), b"taken").unwrap();

        let mut options = SearchOptions {
            pattern: dir.path().join("*.jpg").display().to_string(),
            compare: Some("DateTimeOriginal < 2010:01:01 00:00:00".into()),
            move_to: Some(dest.clone()),
            dry_run: true,
        };
        let report = search(&options, &tool).unwrap();
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].path, old);
        assert_eq!(report.matches[0].destination, Some(dest.join("old_1.jpg")));
        assert!(!report.matches[0].moved);
        assert!(old.exists());

        options.dry_run = false;
        let report = search(&options, &tool).unwrap();
        assert!(report.matches[0].moved);
        assert!(!old.exists());
        assert_eq!(fs::read(dest.join("old_1.jpg")).unwrap(), b"o");
        assert_eq!(fs::read(dest.join("old.jpg")).unwrap(), b"taken");
        assert!(new.exists());
        assert_eq!(report.summary.applied, 1);
    }

    #[test]
    fn unreadable_file_is_a_failure_not_an_abort() {
        let (dir, path) = scratch();
        let other = dir.path().join("b.jpg");
        fs::write(&other, b"x").unwrap();
        let tool = InMemoryTool::new()
            .unreadable(&path)
            .with_tags(&other, [("EXIF:ExifIFD:DateTimeOriginal", "2020:01:01 00:00:00")]);

        let options = SearchOptions {
            pattern: dir.path().join("*.jpg").display().to_string(),
            compare: Some("DateTimeOriginal == 2020:01:01 00:00:00".into()),
            ..Default::default()
        };
        let report = search(&options, &tool).unwrap();
        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.summary.failures.len(), 1);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].path, other);
    }

    #[test]
    fn invalid_query_fails_before_reading() {
        let (dir, _path) = scratch();
        let options = SearchOptions {
            pattern: dir.path().join("*.jpg").display().to_string(),
            compare: Some("no operator here".into()),
            ..Default::default()
        };
        assert!(search(&options, &InMemoryTool::new()).is_err());
    }

    #[test]
    fn no_query_lists_every_file() {
        let (dir, path) = scratch();
        let options = SearchOptions {
            pattern: dir.path().join("*").display().to_string(),
            ..Default::default()
        };
        let report = search(&options, &InMemoryTool::new().unreadable(&path)).unwrap();
        assert_eq!(report.matches.len(), 1);
        assert!(report.summary.success());
    }
}
