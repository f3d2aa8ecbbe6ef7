use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::fs_times::{self, FsTimes};
use crate::relocate;
use crate::tags::SystemTag;

/// Re-encoding settings shared by every file of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeOptions {
    /// x265 constant rate factor; lower is higher quality.
    pub crf: u8,
    pub max_width: Option<u32>,
    /// Output extension, including the dot.
    pub suffix: String,
    pub move_original_to: Option<PathBuf>,
    pub dry_run: bool,
    pub ffmpeg: PathBuf,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            crf: 28,
            max_width: None,
            suffix: ".mp4".into(),
            move_original_to: None,
            dry_run: false,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub command: String,
    pub dry_run: bool,
    pub moved_original: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("{0} already exists")]
    OutputExists(PathBuf),
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("ffmpeg failed on {path}: {stderr}")]
    Failed { path: PathBuf, stderr: String },
    #[error("Cannot move {path} to {dest}: {source}")]
    Move {
        path: PathBuf,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `<stem>.reduced<suffix>` next to the source.
pub fn output_path(src: &Path, suffix: &str) -> PathBuf {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    src.with_file_name(format!("{stem}.reduced{suffix}"))
}

/// The ffmpeg invocation: x265 video, AAC audio, subtitles copied, container
/// metadata carried over from the source.
pub fn build_command(src: &Path, dst: &Path, options: &TranscodeOptions) -> Command {
    let mut cmd = Command::new(&options.ffmpeg);
    cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(src)
        .args(["-map_metadata", "0", "-c:v", "libx265", "-pix_fmt", "yuv420p"])
        .args(["-x265-params", "no-info=1:log-level=error"])
        .arg("-crf")
        .arg(options.crf.to_string())
        .args(["-preset", "medium", "-c:a", "aac", "-b:a", "128k", "-c:s", "copy"])
        .args(["-map", "0:v?", "-map", "0:a?", "-map", "0:s?"]);

    let is_mp4 = dst
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"));
    if is_mp4 {
        cmd.args(["-tag:v", "hvc1", "-brand", "mp42", "-movflags", "+faststart"]);
    }
    if let Some(width) = options.max_width {
        cmd.arg("-vf").arg(format!("scale=min({width},iw):-2"));
    }
    cmd.arg(dst);
    cmd
}

fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Copy access and modify times (and creation time where settable) from `src` to `dst`.
fn copy_times(src: &Path, dst: &Path) {
    let times = match FsTimes::read(src) {
        Ok(times) => times,
        Err(err) => {
            log::warn!("Cannot read times of {}: {err}", src.display());
            return;
        }
    };
    if let Err(err) = filetime::set_file_times(dst, times.accessed, times.modified) {
        log::warn!("Cannot copy times to {}: {err}", dst.display());
    }
    if let Some(created) = times.created {
        if fs_times::can_set(SystemTag::FileCreateDate) {
            let stamp = fs_times::to_stamp(created);
            if let Err(err) = fs_times::set_time(dst, SystemTag::FileCreateDate, stamp) {
                log::warn!("Cannot copy creation time to {}: {err}", dst.display());
            }
        }
    }
}

pub fn transcode(src: &Path, options: &TranscodeOptions) -> Result<TranscodeReport, TranscodeError> {
    let output = output_path(src, &options.suffix);
    let mut cmd = build_command(src, &output, options);
    let mut report = TranscodeReport {
        source: src.to_path_buf(),
        output: output.clone(),
        command: render(&cmd),
        dry_run: options.dry_run,
        moved_original: None,
    };

    if options.dry_run {
        log::info!("DRY RUN: {}", report.command);
        return Ok(report);
    }
    if output.exists() {
        return Err(TranscodeError::OutputExists(output));
    }

    log::debug!("{}", report.command);
    let result = cmd.output().map_err(|source| TranscodeError::Spawn {
        program: options.ffmpeg.display().to_string(),
        source,
    })?;
    if !result.status.success() {
        return Err(TranscodeError::Failed {
            path: src.to_path_buf(),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }

    copy_times(src, &output);

    if let Some(dir) = &options.move_original_to {
        let dest = dir.join(src.file_name().unwrap_or_default());
        relocate::move_file(src, &dest).map_err(|source| TranscodeError::Move {
            path: src.to_path_buf(),
            dest: dest.clone(),
            source,
        })?;
        report.moved_original = Some(dest);
    }

    Ok(report)
}
