use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::date::Stamp;
use crate::fs_times::{self, FsTimeError, FsTimes};
use crate::metadata::{self, MetadataTool, TagMap};
use crate::reconcile::Decision;
use crate::tags::TagSpec;

/// A tag to write, with its write-time flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub tag: TagSpec,
    /// Let metadata writes change the file's system times instead of restoring them.
    pub update_system_time: bool,
    pub dry_run: bool,
}

impl DestinationSpec {
    pub fn from_tags(tags: Vec<TagSpec>, update_system_time: bool, dry_run: bool) -> Vec<Self> {
        tags.into_iter()
            .map(|tag| Self {
                tag,
                update_system_time,
                dry_run,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DestinationStatus {
    Changed {
        before: Option<String>,
        after: String,
    },
    DryRun {
        before: Option<String>,
        after: String,
    },
    Failed {
        reason: String,
    },
    Unsupported {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationReport {
    pub tag: String,
    #[serde(flatten)]
    pub status: DestinationStatus,
}

/// What happened to one file's destinations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub path: PathBuf,
    pub value: Option<Stamp>,
    pub entries: Vec<DestinationReport>,
    /// System times were put back after a metadata write.
    pub restored_system_times: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_error: Option<String>,
}

impl ApplyReport {
    fn new(path: &Path, value: Option<Stamp>) -> Self {
        Self {
            path: path.to_path_buf(),
            value,
            ..Default::default()
        }
    }

    fn push(&mut self, tag: impl Into<String>, status: DestinationStatus) {
        self.entries.push(DestinationReport {
            tag: tag.into(),
            status,
        });
    }

    pub fn changed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, DestinationStatus::Changed { .. }))
            .count()
    }

    /// Any destination failed or was unsupported, or system times could not be restored.
    pub fn has_failures(&self) -> bool {
        self.restore_error.is_some()
            || self.entries.iter().any(|e| {
                matches!(
                    e.status,
                    DestinationStatus::Failed { .. } | DestinationStatus::Unsupported { .. }
                )
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Cannot access {path}: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct Applier<'a> {
    tool: &'a dyn MetadataTool,
}

fn before_value(tags: Option<&TagMap>, key: &str) -> Option<String> {
    let (_, value) = metadata::lookup(tags?, key)?;
    metadata::value_strings(value).first().map(|s| s.to_string())
}

impl<'a> Applier<'a> {
    pub fn new(tool: &'a dyn MetadataTool) -> Self {
        Self { tool }
    }

    /// Write the decided value to every destination.
    ///
    /// Metadata destinations go first, one tool invocation each. Unless a
    /// destination asks to update system time, the file's access, modify and
    /// creation times are then put back to what they were before. Filesystem
    /// destinations are set last so nothing overwrites them.
    pub fn apply(
        &self,
        path: &Path,
        decision: &Decision,
        destinations: &[DestinationSpec],
    ) -> Result<ApplyReport, ApplyError> {
        let Some(value) = decision.value() else {
            return Ok(ApplyReport::new(path, None));
        };
        let mut report = ApplyReport::new(path, Some(value));

        let snapshot = FsTimes::read(path).map_err(|source| ApplyError::Access {
            path: path.to_path_buf(),
            source,
        })?;
        let (system, exif): (Vec<&DestinationSpec>, Vec<&DestinationSpec>) =
            destinations.iter().partition(|d| d.tag.is_system());

        let before_tags = if exif.is_empty() {
            None
        } else {
            match self.tool.read_tags(path) {
                Ok(tags) => Some(tags),
                Err(err) => {
                    log::debug!("No previous metadata for {}: {err}", path.display());
                    None
                }
            }
        };

        let mut wrote = false;
        let mut preserve = true;
        for dest in exif {
            let values: Vec<(String, String)> = dest
                .tag
                .exif_keys()
                .into_iter()
                .map(|key| (key.to_string(), value.exif_value(key.contains("SubSec"))))
                .collect();

            if dest.dry_run {
                for (key, after) in values {
                    let before = before_value(before_tags.as_ref(), &key);
                    report.push(key, DestinationStatus::DryRun { before, after });
                }
                continue;
            }

            match self.tool.write_tags(path, &values, !dest.update_system_time) {
                Ok(()) => {
                    wrote = true;
                    preserve &= !dest.update_system_time;
                    for (key, after) in values {
                        let before = before_value(before_tags.as_ref(), &key);
                        report.push(key, DestinationStatus::Changed { before, after });
                    }
                }
                Err(err) => {
                    log::warn!("Writing {} to {} failed: {err}", dest.tag, path.display());
                    for (key, _) in values {
                        report.push(
                            key,
                            DestinationStatus::Failed {
                                reason: err.to_string(),
                            },
                        );
                    }
                }
            }
        }

        if wrote && preserve {
            match snapshot.restore(path) {
                Ok(()) => report.restored_system_times = true,
                Err(err) => {
                    log::warn!("Could not restore system times of {}: {err}", path.display());
                    report.restore_error = Some(err.to_string());
                }
            }
        }

        for dest in system {
            let TagSpec::System(tag) = dest.tag else {
                continue;
            };
            let before = snapshot.stamp(tag).map(|s| s.to_string());
            let after = value.to_string();

            if !fs_times::can_set(tag) {
                report.push(
                    tag.qualified(),
                    DestinationStatus::Unsupported {
                        reason: FsTimeError::Unsupported(tag).to_string(),
                    },
                );
                continue;
            }
            if dest.dry_run {
                report.push(tag.qualified(), DestinationStatus::DryRun { before, after });
                continue;
            }

            let status = match fs_times::set_time(path, tag, value) {
                Ok(()) => DestinationStatus::Changed { before, after },
                Err(err @ FsTimeError::Unsupported(_)) => DestinationStatus::Unsupported {
                    reason: err.to_string(),
                },
                Err(err) => {
                    log::warn!("Setting {tag} on {} failed: {err}", path.display());
                    DestinationStatus::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            report.push(tag.qualified(), status);
        }

        Ok(report)
    }
}
