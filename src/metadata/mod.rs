pub mod exiftool;
#[cfg(test)]
pub mod memory;
pub mod native;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::date::{parse_date, Stamp};
use crate::tags::SYSTEM_PREFIX;

/// Tag key (exiftool `-G0:1` style, e.g. `EXIF:ExifIFD:DateTimeOriginal`) to raw value.
pub type TagMap = BTreeMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} failed on {path}: {stderr}")]
    Failed {
        program: String,
        path: PathBuf,
        stderr: String,
    },
    #[error("Unexpected output from {program}: {source}")]
    Json {
        program: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Could not read metadata from {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("The {0} reader cannot write metadata; install exiftool")]
    ReadOnly(&'static str),
}

/// Boundary to whatever reads and writes embedded metadata.
pub trait MetadataTool {
    fn name(&self) -> &str;

    /// All tags the tool reports for `path`.
    fn read_tags(&self, path: &Path) -> Result<TagMap, MetadataError>;

    /// Write `key=value` pairs in one invocation. With `preserve_system_time`
    /// the tool is asked to keep the file's modify time.
    fn write_tags(
        &self,
        path: &Path,
        values: &[(String, String)],
        preserve_system_time: bool,
    ) -> Result<(), MetadataError>;
}

/// Use exiftool when it can be run, otherwise fall back to the read-only reader.
pub fn detect(program: Option<PathBuf>) -> Box<dyn MetadataTool> {
    let tool = match program {
        Some(path) => exiftool::ExifTool::with_path(path),
        None => exiftool::ExifTool::new(),
    };
    match tool.version() {
        Some(version) => {
            log::debug!("Using exiftool {version}");
            Box::new(tool)
        }
        None => {
            log::warn!("exiftool not found; reading EXIF in-process, metadata writes will fail");
            Box::new(native::NativeReader)
        }
    }
}

/// String payloads of a tag value; arrays contribute each string element.
pub fn value_strings(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Find `key` exactly, or else the first key ending in `:<key>`.
///
/// A group-0 key such as `EXIF:DateTimeOriginal` also matches the `-G0:1`
/// form `EXIF:<group1>:DateTimeOriginal` that exiftool reports.
pub fn lookup<'a>(tags: &'a TagMap, key: &str) -> Option<(&'a str, &'a Value)> {
    if let Some((k, v)) = tags.get_key_value(key) {
        return Some((k.as_str(), v));
    }
    let suffix = format!(":{key}");
    let grouped = key
        .split_once(':')
        .filter(|(_, name)| !name.contains(':'))
        .map(|(group, name)| (format!("{group}:"), format!(":{name}")));
    tags.iter()
        .find(|(k, _)| {
            k.ends_with(&suffix)
                || grouped.as_ref().is_some_and(|(prefix, name)| {
                    k.starts_with(prefix.as_str())
                        && k.ends_with(name.as_str())
                        && k.matches(':').count() == 2
                })
        })
        .map(|(k, v)| (k.as_str(), v))
}

/// Every parseable date value, skipping filesystem entries (those are read natively).
pub fn date_values(tags: &TagMap) -> Vec<(&str, Stamp)> {
    tags.iter()
        .filter(|(k, _)| !k.starts_with(SYSTEM_PREFIX) && k.as_str() != "SourceFile")
        .flat_map(|(k, v)| {
            value_strings(v)
                .into_iter()
                .filter_map(parse_date)
                .map(move |stamp| (k.as_str(), stamp))
        })
        .collect()
}
