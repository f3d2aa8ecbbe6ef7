use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::date::Stamp;
use crate::fs_times::FsTimes;
use crate::relocate;
use crate::tags::SystemTag;
use crate::RunSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeOptions {
    pub pattern: String,
    /// Year folders are created under this directory.
    pub dest_root: PathBuf,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub year: i32,
}

#[derive(Debug, Default)]
pub struct OrganizeReport {
    pub moves: Vec<PlannedMove>,
    pub summary: RunSummary,
}

/// Birth time where the filesystem records one, else modify time.
pub fn file_date(path: &Path) -> Option<Stamp> {
    let times = FsTimes::read(path).ok()?;
    times
        .stamp(SystemTag::FileCreateDate)
        .or_else(|| times.stamp(SystemTag::FileModifyDate))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Move every file matching the pattern into `<dest_root>/<YYYY>/`, the year
/// taken from `date_of`. Name clashes get a `_N` suffix; files already in
/// their year folder stay put.
pub fn organize_by_year(
    options: &OrganizeOptions,
    date_of: impl Fn(&Path) -> Option<Stamp>,
) -> anyhow::Result<OrganizeReport> {
    let files = crate::expand_pattern(&options.pattern)?;
    let mut report = OrganizeReport::default();
    let mut used = HashSet::new();

    for path in &files {
        report.summary.processed += 1;
        let Some(date) = date_of(path) else {
            log::warn!("SKIPPED {} (no date)", path.display());
            report.summary.skipped += 1;
            continue;
        };
        let year = date.local().year();
        let target_dir = options.dest_root.join(format!("{year:04}"));
        if path.parent().is_some_and(|parent| same_dir(parent, &target_dir)) {
            log::debug!("{} is already in {}", path.display(), target_dir.display());
            report.summary.skipped += 1;
            continue;
        }

        let name = path.file_name().unwrap_or_default().to_string_lossy();
        let dest = relocate::unique_destination(&target_dir, &name, &used);
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
            report.summary.applied += 1;
        }
        report.moves.push(PlannedMove {
            source: path.clone(),
            dest,
            year,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::parse_date;
    use tempfile::tempdir;

    fn options(dir: &Path, pattern: &str, dry_run: bool) -> OrganizeOptions {
        OrganizeOptions {
            pattern: dir.join(pattern).display().to_string(),
            dest_root: dir.join("out"),
            dry_run,
        }
    }

    fn dated(name: &str) -> Option<Stamp> {
        match name {
            "a.jpg" => parse_date("2010:06:01 00:00:00"),
            "b.jpg" => parse_date("2022:12:31 00:00:00"),
            _ => None,
        }
    }

    fn by_name(path: &Path) -> Option<Stamp> {
        dated(path.file_name()?.to_str()?)
    }

    #[test]
    fn dry_run_plans_without_touching_and_skips_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("keep_dir")).unwrap();
        let photo = dir.path().join("a.jpg");
        fs::write(&photo, b"data").unwrap();

        let report = organize_by_year(&options(dir.path(), "*", true), by_name).unwrap();

        assert_eq!(report.moves.len(), 1);
        assert_eq!(report.moves[0].source, photo);
        assert_eq!(report.moves[0].dest, dir.path().join("out/2010/a.jpg"));
        assert!(photo.exists());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn files_go_to_their_year() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("c.jpg"), b"c").unwrap();

        let report = organize_by_year(&options(dir.path(), "*.jpg", false), by_name).unwrap();

        assert_eq!(report.summary.applied, 2);
        assert_eq!(report.summary.skipped, 1);
        assert!(dir.path().join("out/2010/a.jpg").exists());
        assert!(dir.path().join("out/2022/b.jpg").exists());
        assert!(!dir.path().join("a.jpg").exists());
        assert!(dir.path().join("c.jpg").exists());
    }

    #[test]
    fn clashes_and_already_sorted_files() {
        let dir = tempdir().unwrap();
        let year = dir.path().join("out/2010");
        fs::create_dir_all(&year).unwrap();
        fs::create_dir(dir.path().join("other")).unwrap();
        fs::write(year.join("a.jpg"), b"sorted").unwrap();
        fs::write(dir.path().join("other/a.jpg"), b"new").unwrap();

        let report =
            organize_by_year(&options(dir.path(), "**/a.jpg", false), by_name).unwrap();

        assert_eq!(report.summary.applied, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(fs::read(year.join("a.jpg")).unwrap(), b"sorted");
        assert_eq!(fs::read(year.join("a_1.jpg")).unwrap(), b"new");
    }

    #[test]
    fn nothing_matching_means_no_moves() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("other.txt"), b"x").unwrap();
        let report = organize_by_year(&options(dir.path(), "*.jpg", true), file_date).unwrap();
        assert!(report.moves.is_empty());
        assert_eq!(report.summary.processed, 0);
    }

    #[test]
    fn file_date_falls_back_to_modify_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"x").unwrap();
        assert!(file_date(&path).is_some());
        assert!(file_date(&dir.path().join("missing.jpg")).is_none());
    }
}
