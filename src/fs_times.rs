use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use filetime::FileTime;

use crate::date::Stamp;
use crate::tags::SystemTag;

#[derive(Debug, thiserror::Error)]
pub enum FsTimeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} cannot be set on this platform")]
    Unsupported(SystemTag),
    #[error("{tag} value {value} is not representable as an instant")]
    Unrepresentable { tag: SystemTag, value: Stamp },
    #[error("SetFile failed: {0}")]
    SetFile(String),
}

/// Snapshot of a file's system timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsTimes {
    pub accessed: FileTime,
    pub modified: FileTime,
    pub changed: Option<FileTime>,
    pub created: Option<FileTime>,
}

impl FsTimes {
    pub fn read(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            accessed: FileTime::from_last_access_time(&meta),
            modified: FileTime::from_last_modification_time(&meta),
            changed: inode_change_time(&meta),
            created: FileTime::from_creation_time(&meta),
        })
    }

    pub fn get(&self, tag: SystemTag) -> Option<FileTime> {
        match tag {
            SystemTag::FileModifyDate => Some(self.modified),
            SystemTag::FileInodeChangeDate => self.changed,
            SystemTag::FileCreateDate => self.created,
        }
    }

    pub fn stamp(&self, tag: SystemTag) -> Option<Stamp> {
        self.get(tag).map(to_stamp)
    }

    /// Put access, modify and (where settable) creation times back to this snapshot.
    /// The inode change time is maintained by the kernel and cannot be restored.
    pub fn restore(&self, path: &Path) -> Result<(), FsTimeError> {
        filetime::set_file_times(path, self.accessed, self.modified)?;
        if let Some(created) = self.created {
            let now = FsTimes::read(path)?;
            if now.created != Some(created) && can_set(SystemTag::FileCreateDate) {
                set_creation_time(path, to_stamp(created))?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn inode_change_time(meta: &fs::Metadata) -> Option<FileTime> {
    use std::os::unix::fs::MetadataExt;
    Some(FileTime::from_unix_time(meta.ctime(), meta.ctime_nsec() as u32))
}

#[cfg(not(unix))]
fn inode_change_time(_meta: &fs::Metadata) -> Option<FileTime> {
    None
}

pub fn to_stamp(time: FileTime) -> Stamp {
    let utc = chrono::DateTime::from_timestamp(time.unix_seconds(), time.nanoseconds())
        .unwrap_or_default();
    Stamp::from_system_time(utc.into())
}

fn to_file_time(tag: SystemTag, value: Stamp) -> Result<FileTime, FsTimeError> {
    let utc = value
        .to_utc()
        .ok_or(FsTimeError::Unrepresentable { tag, value })?;
    Ok(FileTime::from_unix_time(utc.timestamp(), utc.timestamp_subsec_nanos()))
}

/// Whether `tag` can be written on this host.
pub fn can_set(tag: SystemTag) -> bool {
    match tag {
        SystemTag::FileModifyDate => true,
        SystemTag::FileInodeChangeDate => false,
        SystemTag::FileCreateDate => cfg!(target_os = "macos") && has_setfile(),
    }
}

/// Set one system timestamp to `value`.
pub fn set_time(path: &Path, tag: SystemTag, value: Stamp) -> Result<(), FsTimeError> {
    match tag {
        SystemTag::FileModifyDate => {
            filetime::set_file_mtime(path, to_file_time(tag, value)?)?;
            Ok(())
        }
        SystemTag::FileInodeChangeDate => Err(FsTimeError::Unsupported(tag)),
        SystemTag::FileCreateDate if can_set(tag) => set_creation_time(path, value),
        SystemTag::FileCreateDate => Err(FsTimeError::Unsupported(tag)),
    }
}

fn has_setfile() -> bool {
    Command::new("SetFile")
        .output()
        .map(|_| true)
        .unwrap_or(false)
}

/// macOS creation time via the developer tools' `SetFile`, which takes local time.
fn set_creation_time(path: &Path, value: Stamp) -> Result<(), FsTimeError> {
    let local = value
        .to_utc()
        .ok_or(FsTimeError::Unrepresentable {
            tag: SystemTag::FileCreateDate,
            value,
        })?
        .with_timezone(&chrono::Local);
    let arg = local.format("%m/%d/%Y %H:%M:%S").to_string();
    log::debug!("SetFile -d '{arg}' {}", path.display());
    let output = Command::new("SetFile").arg("-d").arg(&arg).arg(path).output()?;
    if !output.status.success() {
        return Err(FsTimeError::SetFile(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}
