use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde_json::Value;

use super::{MetadataError, MetadataTool, TagMap};

/// A recorded `write_tags` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub path: PathBuf,
    pub values: Vec<(String, String)>,
    pub preserve_system_time: bool,
}

/// Metadata tool backed by a map, for running the pipeline without a binary.
///
/// Writes update the map and are recorded. `touching_files` makes every
/// successful write bump the file's modify time, the way rewriting a file
/// through a real tool can.
#[derive(Debug, Default)]
pub struct InMemoryTool {
    tags: RefCell<HashMap<PathBuf, TagMap>>,
    writes: RefCell<Vec<WriteCall>>,
    failing_keys: HashSet<String>,
    unreadable: HashSet<PathBuf>,
    touch_on_write: bool,
}

impl InMemoryTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<'a>(self, path: &Path, tags: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.tags.borrow_mut().entry(path.to_path_buf()).or_default().extend(
            tags.into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string()))),
        );
        self
    }

    /// Writes including `key` fail.
    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    /// Reads of `path` fail.
    pub fn unreadable(mut self, path: &Path) -> Self {
        self.unreadable.insert(path.to_path_buf());
        self
    }

    pub fn touching_files(mut self) -> Self {
        self.touch_on_write = true;
        self
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.borrow().clone()
    }

    pub fn tags_for(&self, path: &Path) -> TagMap {
        self.tags.borrow().get(path).cloned().unwrap_or_default()
    }
}

impl MetadataTool for InMemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn read_tags(&self, path: &Path) -> Result<TagMap, MetadataError> {
        if self.unreadable.contains(path) {
            return Err(MetadataError::Failed {
                program: self.name().to_string(),
                path: path.to_path_buf(),
                stderr: "unreadable".into(),
            });
        }
        Ok(self.tags_for(path))
    }

    fn write_tags(
        &self,
        path: &Path,
        values: &[(String, String)],
        preserve_system_time: bool,
    ) -> Result<(), MetadataError> {
        if let Some((key, _)) = values.iter().find(|(k, _)| self.failing_keys.contains(k)) {
            return Err(MetadataError::Failed {
                program: self.name().to_string(),
                path: path.to_path_buf(),
                stderr: format!("Warning: Tag '{key}' is not defined"),
            });
        }

        self.writes.borrow_mut().push(WriteCall {
            path: path.to_path_buf(),
            values: values.to_vec(),
            preserve_system_time,
        });
        let mut tags = self.tags.borrow_mut();
        let entry = tags.entry(path.to_path_buf()).or_default();
        for (key, value) in values {
            entry.insert(key.clone(), Value::String(value.clone()));
        }

        if self.touch_on_write {
            filetime::set_file_mtime(path, FileTime::now()).map_err(|e| MetadataError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}
