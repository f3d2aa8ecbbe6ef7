use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use chrono::{Local, TimeZone};
use filetime::FileTime;
use predicates::prelude::*;
use tempfile::tempdir;

const OLD: i64 = 1_000_000_000;

fn touch(path: &Path) {
    fs::write(path, b"").unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(OLD, 0)).unwrap();
}

fn mtime(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
}

fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    Local
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .earliest()
        .unwrap()
        .timestamp()
}

fn datefix() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("datefix");
    cmd.env("DATEFIX_EXIFTOOL", "/nonexistent/exiftool")
        .env("RUST_LOG", "info");
    cmd
}

#[test]
fn unknown_system_tag_fails_before_touching_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("IMG_20200102_030405.jpg");
    touch(&path);

    datefix()
        .current_dir(dir.path())
        .args(["set-dates", "*.jpg", "--dest-tags", "File:System:FileAccessDate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("File:System:FileAccessDate"));
    assert_eq!(mtime(&path), OLD);
}

#[test]
fn dry_run_leaves_file_times_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("IMG_20200102_030405.jpg");
    touch(&path);

    datefix()
        .current_dir(dir.path())
        .args([
            "set-dates",
            "*.jpg",
            "--dest-tags",
            "File:System:FileModifyDate",
            "--dry-run",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("DRY RUN"));
    assert_eq!(mtime(&path), OLD);
}

#[test]
fn set_system_uses_the_filename() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("IMG_20200102_030405.jpg");
    touch(&path);

    datefix()
        .current_dir(dir.path())
        .args(["set-system", "*.jpg", "--no-exiftool"])
        .assert()
        .success()
        .stderr(predicate::str::contains("APPLIED"));
    assert_eq!(mtime(&path), local(2020, 1, 2, 3, 4, 5));
}

#[test]
fn tie_break_and_report() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("IMG_20200102_030405.jpg");
    touch(&path);
    let report = dir.path().join("report.json");

    datefix()
        .current_dir(dir.path())
        .args([
            "set-dates",
            "*.jpg",
            "--src-tags",
            "File:System:FileModifyDate",
            "--dest-tags",
            "File:System:FileModifyDate",
            "--tie-break",
            "latest",
            "--report",
        ])
        .arg(&report)
        .assert()
        .success();
    assert_eq!(mtime(&path), local(2020, 1, 2, 3, 4, 5));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json[0]["decision"]["kind"], "auto");
    assert_eq!(json[0]["candidates"].as_array().unwrap().len(), 2);
}

#[test]
fn file_without_dates_fails_the_run() {
    let dir = tempdir().unwrap();
    let undated = dir.path().join("holiday.jpg");
    let dated = dir.path().join("IMG_20200102_030405.jpg");
    touch(&undated);
    touch(&dated);

    datefix()
        .current_dir(dir.path())
        .args(["set-dates", "*.jpg", "--dest-tags", "File:System:FileModifyDate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No candidate dates found"));
    assert_eq!(mtime(&undated), OLD);
    assert_eq!(mtime(&dated), local(2020, 1, 2, 3, 4, 5));
}

#[test]
fn transcode_dry_run_prints_command() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("clip.mov");
    touch(&path);

    datefix()
        .current_dir(dir.path())
        .args(["transcode", "*.mov", "--crf", "32", "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("-crf 32").and(predicate::str::contains("clip.reduced.mp4")));
    assert!(!dir.path().join("clip.reduced.mp4").exists());
}

#[test]
fn search_moves_files_matching_filesystem_times() {
    let dir = tempdir().unwrap();
    let old = dir.path().join("old.jpg");
    let fresh = dir.path().join("fresh.jpg");
    touch(&old);
    fs::write(&fresh, b"").unwrap();

    datefix()
        .current_dir(dir.path())
        .args([
            "search",
            "*.jpg",
            "--compare",
            "File:System:FileModifyDate < 2005:01:01 00:00:00",
            "--move-to",
            "sorted",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("old.jpg").and(predicate::str::contains("fresh.jpg").not()))
        .stderr(predicate::str::contains("Found 1 match(es)"));
    assert!(dir.path().join("sorted/old.jpg").exists());
    assert!(!old.exists());
    assert!(fresh.exists());
}

#[test]
fn search_rejects_a_malformed_comparison() {
    let dir = tempdir().unwrap();
    touch(&dir.path().join("a.jpg"));

    datefix()
        .current_dir(dir.path())
        .args(["search", "*.jpg", "--compare", "DateTimeOriginal"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid comparison"));
}

#[test]
fn organize_moves_into_year_folders() {
    use chrono::Datelike;

    let dir = tempdir().unwrap();
    let path = dir.path().join("a.jpg");
    touch(&path);
    let year = datefix::organize::file_date(&path).unwrap().local().year();

    datefix()
        .current_dir(dir.path())
        .args(["organize", "*.jpg", "--dest", "out", "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("DRY RUN"));
    assert!(path.exists());

    datefix()
        .current_dir(dir.path())
        .args(["organize", "*.jpg", "--dest", "out"])
        .assert()
        .success();
    assert!(dir.path().join(format!("out/{year:04}/a.jpg")).exists());
    assert!(!path.exists());
}
