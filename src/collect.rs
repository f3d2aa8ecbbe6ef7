use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::date::guess::{guess_date_from_filename, NamePattern};
use crate::date::Stamp;
use crate::fs_times::FsTimes;
use crate::metadata::{self, MetadataError, MetadataTool, TagMap};
use crate::tags::{SystemTag, TagSpec};

/// Where a candidate value was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    Exif,
    FilesystemStat,
    BackupFile { path: PathBuf },
    FilenameInference,
}

impl Origin {
    /// Extra context worth showing next to the value.
    pub fn detail(&self) -> Option<String> {
        match self {
            Origin::BackupFile { path } => Some(path.display().to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Exif => f.write_str("exif"),
            Origin::FilesystemStat => f.write_str("filesystem"),
            Origin::BackupFile { path } => write!(f, "backup {}", path.display()),
            Origin::FilenameInference => f.write_str("filename"),
        }
    }
}

/// One observed datetime for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Concrete tag the value came from, e.g. `EXIF:ExifIFD:DateTimeOriginal`.
    pub tag: String,
    pub value: Stamp,
    pub origin: Origin,
}

impl Candidate {
    pub fn new(tag: impl Into<String>, value: Stamp, origin: Origin) -> Self {
        Self {
            tag: tag.into(),
            value,
            origin,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}: {})", self.value, self.origin, self.tag)
    }
}

/// Everything observed for one file, in collection order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateSet {
    pub path: PathBuf,
    pub candidates: Vec<Candidate>,
    /// Raw metadata of the file itself, when it was read.
    #[serde(skip)]
    pub raw_tags: Option<TagMap>,
    /// Filled in once the set has been resolved.
    pub resolved: Option<Stamp>,
}

impl CandidateSet {
    pub fn new(path: impl Into<PathBuf>, candidates: Vec<Candidate>) -> Self {
        Self {
            path: path.into(),
            candidates,
            raw_tags: None,
            resolved: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Reference directory searched for files with the same name.
#[derive(Debug, Clone)]
pub struct Backups {
    pub root: PathBuf,
    /// Tags to read from each match; `None` reads everything.
    pub tags: Option<Vec<TagSpec>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Cannot access {path}: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub struct Collector<'a> {
    tool: &'a dyn MetadataTool,
    name_patterns: &'a [NamePattern],
    infer_from_filename: bool,
    keep_raw_tags: bool,
}

impl<'a> Collector<'a> {
    pub fn new(tool: &'a dyn MetadataTool) -> Self {
        Self {
            tool,
            name_patterns: &[],
            infer_from_filename: true,
            keep_raw_tags: false,
        }
    }

    pub fn with_name_patterns(mut self, patterns: &'a [NamePattern]) -> Self {
        self.name_patterns = patterns;
        self
    }

    pub fn infer_from_filename(mut self, enabled: bool) -> Self {
        self.infer_from_filename = enabled;
        self
    }

    /// Always read the file's metadata so it can be shown at the prompt.
    pub fn keep_raw_tags(mut self, enabled: bool) -> Self {
        self.keep_raw_tags = enabled;
        self
    }

    /// Gather candidates in a fixed order: configured sources, then the
    /// filename, then backups (sorted by path).
    pub fn collect(
        &self,
        path: &Path,
        sources: &[TagSpec],
        backups: Option<&Backups>,
    ) -> Result<CandidateSet, CollectError> {
        let times = FsTimes::read(path).map_err(|source| CollectError::Access {
            path: path.to_path_buf(),
            source,
        })?;

        let raw_tags = if self.keep_raw_tags || sources.iter().any(needs_metadata) {
            Some(self.tool.read_tags(path)?)
        } else {
            None
        };

        let mut candidates: Vec<Candidate> = read_specs(sources, raw_tags.as_ref(), &times)
            .into_iter()
            .map(|found| found.into_candidate(Origin::Exif, Origin::FilesystemStat))
            .collect();

        if self.infer_from_filename {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some((value, format)) = guess_date_from_filename(name, self.name_patterns) {
                    candidates.push(Candidate::new(
                        format!("Filename:{format}"),
                        value,
                        Origin::FilenameInference,
                    ));
                }
            }
        }

        if let Some(backups) = backups {
            candidates.extend(self.collect_backups(path, backups));
        }

        dedup(&mut candidates);
        log::debug!("{}: {} candidate(s)", path.display(), candidates.len());

        Ok(CandidateSet {
            path: path.to_path_buf(),
            candidates,
            raw_tags,
            resolved: None,
        })
    }

    fn collect_backups(&self, path: &Path, backups: &Backups) -> Vec<Candidate> {
        let everything = [TagSpec::Any];
        let specs = backups.tags.as_deref().unwrap_or(&everything);
        let mut out = Vec::new();

        for backup in find_backups(&backups.root, path) {
            let times = match FsTimes::read(&backup) {
                Ok(times) => times,
                Err(err) => {
                    log::warn!("Skipping backup {}: {err}", backup.display());
                    continue;
                }
            };
            let tags = if specs.iter().any(needs_metadata) {
                match self.tool.read_tags(&backup) {
                    Ok(tags) => Some(tags),
                    Err(err) => {
                        log::warn!("Skipping metadata of backup {}: {err}", backup.display());
                        None
                    }
                }
            } else {
                None
            };

            let origin = Origin::BackupFile {
                path: backup.clone(),
            };
            out.extend(
                read_specs(specs, tags.as_ref(), &times)
                    .into_iter()
                    .map(|found| found.into_candidate(origin.clone(), origin.clone())),
            );
        }
        out
    }
}

fn needs_metadata(spec: &TagSpec) -> bool {
    !spec.is_system()
}

enum Found {
    Meta(String, Stamp),
    System(SystemTag, Stamp),
}

impl Found {
    fn into_candidate(self, meta: Origin, system: Origin) -> Candidate {
        match self {
            Found::Meta(key, value) => Candidate::new(key, value, meta),
            Found::System(tag, value) => Candidate::new(tag.qualified(), value, system),
        }
    }
}

fn read_specs(specs: &[TagSpec], tags: Option<&TagMap>, times: &FsTimes) -> Vec<Found> {
    let mut found = Vec::new();
    let metadata_dates = |found: &mut Vec<Found>| {
        if let Some(tags) = tags {
            found.extend(
                metadata::date_values(tags)
                    .into_iter()
                    .map(|(k, v)| Found::Meta(k.to_string(), v)),
            );
        }
    };
    let system = |found: &mut Vec<Found>, tag: SystemTag| match times.stamp(tag) {
        Some(value) => found.push(Found::System(tag, value)),
        None => log::warn!("{tag} is not available on this platform"),
    };

    for spec in specs {
        match spec {
            TagSpec::System(tag) => system(&mut found, *tag),
            TagSpec::AnyExif => metadata_dates(&mut found),
            TagSpec::Any => {
                metadata_dates(&mut found);
                for tag in SystemTag::ALL {
                    if times.get(tag).is_some() {
                        system(&mut found, tag);
                    }
                }
            }
            TagSpec::Exif(_) | TagSpec::Alias { .. } => {
                let Some(tags) = tags else { continue };
                for key in spec.exif_keys() {
                    let Some((actual, value)) = metadata::lookup(tags, key) else {
                        continue;
                    };
                    found.extend(
                        metadata::value_strings(value)
                            .into_iter()
                            .filter_map(crate::date::parse_date)
                            .map(|v| Found::Meta(actual.to_string(), v)),
                    );
                }
            }
        }
    }
    found
}

/// Drop repeats of the same tag, value and origin, keeping the first.
fn dedup(candidates: &mut Vec<Candidate>) {
    let mut seen: Vec<Candidate> = Vec::with_capacity(candidates.len());
    candidates.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
}

fn normalized_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.nfc().collect())
}

/// Files under `root` (recursively) sharing `path`'s file name, excluding `path` itself.
pub fn find_backups(root: &Path, path: &Path) -> Vec<PathBuf> {
    let Some(wanted) = normalized_name(path) else {
        return Vec::new();
    };
    let own = path.canonicalize().ok();

    let mut matches: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Cannot read backup entry: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| normalized_name(entry.path()).as_deref() == Some(wanted.as_str()))
        .map(|entry| entry.into_path())
        .filter(|candidate| candidate.canonicalize().ok() != own)
        .collect();
    matches.sort();
    matches
}
