use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

use super::{MetadataError, MetadataTool, TagMap};

/// The `exiftool` binary, invoked once per read or write.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ExifTool {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("exiftool"),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            program: path.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Version string, or `None` when the binary cannot be run.
    pub fn version(&self) -> Option<String> {
        let output = Command::new(&self.program).arg("-ver").output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run(&self, args: &[String], path: &Path) -> Result<Output, MetadataError> {
        log::debug!("{} {} {}", self.program_name(), args.join(" "), path.display());
        let output = Command::new(&self.program)
            .args(args)
            .arg(command_path(path))
            .output()
            .map_err(|source| MetadataError::Spawn {
                program: self.program_name(),
                source,
            })?;
        if !output.status.success() {
            return Err(MetadataError::Failed {
                program: self.program_name(),
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Relative paths get a `./` prefix so a name like `-x.jpg` is not taken as an option.
fn command_path(path: &Path) -> PathBuf {
    if path.is_relative() {
        Path::new(".").join(path)
    } else {
        path.to_path_buf()
    }
}

/// Arguments for a write. Preserving system time keeps the inode (`_in_place`)
/// and asks exiftool to carry the modify time over (`-P`).
pub fn write_args(values: &[(String, String)], preserve_system_time: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(values.len() + 2);
    if preserve_system_time {
        args.push("-overwrite_original_in_place".to_string());
        args.push("-P".to_string());
    } else {
        args.push("-overwrite_original".to_string());
    }
    args.extend(values.iter().map(|(key, value)| format!("-{key}={value}")));
    args
}

/// Parse `exiftool -j` output: an array holding one object per file.
pub fn parse_json(program: &str, stdout: &[u8]) -> Result<TagMap, MetadataError> {
    let parsed: Vec<TagMap> = serde_json::from_slice(stdout).map_err(|source| MetadataError::Json {
        program: program.to_string(),
        source,
    })?;
    Ok(parsed.into_iter().next().unwrap_or_default())
}

impl MetadataTool for ExifTool {
    fn name(&self) -> &str {
        "exiftool"
    }

    fn read_tags(&self, path: &Path) -> Result<TagMap, MetadataError> {
        let args: Vec<String> = ["-time:all", "-a", "-G0:1", "-s", "-j"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self.run(&args, path)?;
        let mut tags = parse_json(&self.program_name(), &output.stdout)?;
        tags.retain(|_, v| !matches!(v, Value::Null));
        Ok(tags)
    }

    fn write_tags(
        &self,
        path: &Path,
        values: &[(String, String)],
        preserve_system_time: bool,
    ) -> Result<(), MetadataError> {
        self.run(&write_args(values, preserve_system_time), path)?;
        Ok(())
    }
}
