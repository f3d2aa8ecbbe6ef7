use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where `name` can go inside `dir` without replacing an existing file or a
/// path already handed out in this run. Clashes get `_1`, `_2`, ... before
/// the extension.
pub fn unique_destination(dir: &Path, name: &str, used: &HashSet<PathBuf>) -> PathBuf {
    let dest = dir.join(name);
    if !used.contains(&dest) && !dest.exists() {
        return dest;
    }

    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = Path::new(name).extension().and_then(|s| s.to_str());
    let mut counter = 1u32;
    loop {
        let new_name = match ext {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        let candidate = dir.join(new_name);
        if !used.contains(&candidate) && !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Rename `src` to `dest`, creating the parent directory. Falls back to copy
/// and delete when a rename is refused (e.g. across filesystems).
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            log::debug!("rename {} failed ({err}); copying", src.display());
            fs::copy(src, dest)?;
            fs::remove_file(src)
        }
    }
}
