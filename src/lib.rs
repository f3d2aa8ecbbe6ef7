pub mod apply;
pub mod collect;
pub mod date;
pub mod fs_times;
pub mod metadata;
pub mod organize;
pub mod prompt;
pub mod reconcile;
pub mod relocate;
pub mod search;
pub mod tags;
pub mod transcode;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::apply::{Applier, ApplyReport, DestinationSpec, DestinationStatus};
use crate::collect::{Backups, Candidate, Collector};
use crate::date::guess::NamePattern;
use crate::metadata::MetadataTool;
use crate::prompt::Prompter;
use crate::reconcile::{Decision, ResolveError, ResolveOptions};
use crate::tags::Role;
use crate::transcode::TranscodeOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDatesOptions {
    /// Glob selecting the files to process.
    pub pattern: String,
    /// Comma-separated source tags. `None` leaves only filename inference and backups.
    pub src_tags: Option<String>,
    pub dest_tags: String,
    #[serde(default)]
    pub backups_path: Option<PathBuf>,
    #[serde(default)]
    pub backups_tags: Option<String>,
    #[serde(flatten)]
    pub resolve: ResolveOptions,
    pub dry_run: bool,
    pub update_system_time: bool,
    #[serde(default)]
    pub progress: bool,
    #[serde(default = "default_true")]
    pub guess_from_filename: bool,
    /// Extra `<regex>=<format>` filename patterns, tried before the built-in ones.
    #[serde(default)]
    pub name_patterns: Vec<String>,
    /// Where to write the per-file JSON report.
    #[serde(default)]
    pub report: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl SetDatesOptions {
    pub fn new(pattern: impl Into<String>, dest_tags: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            src_tags: None,
            dest_tags: dest_tags.into(),
            backups_path: None,
            backups_tags: None,
            resolve: ResolveOptions::default(),
            dry_run: false,
            update_system_time: false,
            progress: false,
            guess_from_filename: true,
            name_patterns: Vec::new(),
            report: None,
        }
    }
}

/// Everything that happened to one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub candidates: Vec<Candidate>,
    pub decision: Option<Decision>,
    pub apply: Option<ApplyReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failures: Vec<FileFailure>,
    /// The user quit before every file was processed.
    pub stopped: bool,
    #[serde(skip)]
    pub reports: Vec<FileReport>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, error: impl std::fmt::Display) {
        log::warn!("FAILED {}: {error}", path.display());
        self.failures.push(FileFailure {
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }
}

/// Regular files matching a glob pattern, absolute or relative.
pub fn expand_pattern(pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).with_context(|| format!("Invalid pattern '{pattern}'"))?;
    Ok(entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("Cannot read {}: {}", err.path().display(), err.error());
                None
            }
        })
        .filter(|path| path.is_file())
        .collect())
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn write_report(path: &Path, reports: &[FileReport]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), reports)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(())
}

fn log_outcome(path: &Path, value: &date::Stamp, report: &ApplyReport) {
    for entry in &report.entries {
        if let DestinationStatus::DryRun { before, after } = &entry.status {
            log::info!(
                "DRY RUN {}: {} {} -> {after}",
                path.display(),
                entry.tag,
                before.as_deref().unwrap_or("(unset)")
            );
        }
    }
    if report.changed() > 0 {
        log::info!("APPLIED {} -> {value}", path.display());
    }
}

/// Collect, resolve and apply dates for every file matching the pattern.
///
/// Bad tag lists or patterns fail the whole call before any file is touched.
/// Per-file problems are recorded in the summary and processing moves on.
pub fn set_dates(
    options: &SetDatesOptions,
    tool: &dyn MetadataTool,
    prompter: &mut dyn Prompter,
) -> anyhow::Result<RunSummary> {
    let sources = match &options.src_tags {
        Some(tags) => tags::parse(tags, Role::Source).context("Invalid --src-tags")?,
        None => Vec::new(),
    };
    let destinations = DestinationSpec::from_tags(
        tags::parse(&options.dest_tags, Role::Destination).context("Invalid --dest-tags")?,
        options.update_system_time,
        options.dry_run,
    );
    let backups = match &options.backups_path {
        Some(root) => Some(Backups {
            root: root.clone(),
            tags: options
                .backups_tags
                .as_deref()
                .map(|tags| tags::parse(tags, Role::Source))
                .transpose()
                .context("Invalid --backups-tags")?,
        }),
        None => None,
    };
    let name_patterns = options
        .name_patterns
        .iter()
        .map(|arg| NamePattern::parse_arg(arg))
        .collect::<Result<Vec<_>, _>>()?;

    let files = expand_pattern(&options.pattern)?;
    if files.is_empty() {
        log::warn!("No files match '{}'", options.pattern);
    }

    let collector = Collector::new(tool)
        .with_name_patterns(&name_patterns)
        .infer_from_filename(options.guess_from_filename)
        .keep_raw_tags(options.resolve.show_raw_dump);
    let applier = Applier::new(tool);
    let pb = progress_bar(files.len(), options.progress);
    let mut summary = RunSummary::default();

    for path in &files {
        pb.set_message(path.display().to_string());
        summary.processed += 1;
        let mut report = FileReport {
            path: path.clone(),
            candidates: Vec::new(),
            decision: None,
            apply: None,
            error: None,
        };

        let outcome = collector
            .collect(path, &sources, backups.as_ref())
            .map_err(anyhow::Error::from)
            .and_then(|mut set| {
                report.candidates = set.candidates.clone();
                let decision =
                    pb.suspend(|| reconcile::resolve(&mut set, &options.resolve, &mut *prompter))?;
                report.decision = Some(decision);
                Ok(decision)
            });

        let decision = match outcome {
            Ok(decision) => decision,
            Err(err) if matches!(err.downcast_ref::<ResolveError>(), Some(ResolveError::Quit)) => {
                log::info!("Stopping; remaining files left untouched");
                summary.processed -= 1;
                summary.stopped = true;
                break;
            }
            Err(err) => {
                report.error = Some(format!("{err:#}"));
                summary.fail(path, format!("{err:#}"));
                summary.reports.push(report);
                pb.inc(1);
                continue;
            }
        };

        match decision.value() {
            None => {
                log::info!("SKIPPED {} (no choice)", path.display());
                summary.skipped += 1;
            }
            Some(value) => match applier.apply(path, &decision, &destinations) {
                Ok(applied) => {
                    log_outcome(path, &value, &applied);
                    if applied.has_failures() {
                        summary.fail(path, "one or more destinations were not written");
                    } else {
                        summary.applied += 1;
                    }
                    report.apply = Some(applied);
                }
                Err(err) => {
                    report.error = Some(err.to_string());
                    summary.fail(path, err);
                }
            },
        }
        summary.reports.push(report);
        pb.inc(1);
    }
    pb.finish_and_clear();

    if let Some(report_path) = &options.report {
        write_report(report_path, &summary.reports)?;
    }
    Ok(summary)
}

/// Re-encode every file matching the pattern.
pub fn transcode_all(
    pattern: &str,
    options: &TranscodeOptions,
    progress: bool,
) -> anyhow::Result<RunSummary> {
    let files = expand_pattern(pattern)?;
    let pb = progress_bar(files.len(), progress);
    let mut summary = RunSummary::default();

    for path in &files {
        pb.set_message(path.display().to_string());
        summary.processed += 1;
        match transcode::transcode(path, options) {
            Ok(report) if report.dry_run => summary.skipped += 1,
            Ok(report) => {
                log::info!("TRANSCODED {} -> {}", path.display(), report.output.display());
                summary.applied += 1;
            }
            Err(err) => summary.fail(path, err),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(summary)
}
