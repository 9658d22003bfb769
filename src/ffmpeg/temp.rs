use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Prefix shared by every temp file this crate creates; startup cleanup keys on it.
pub const TEMP_PREFIX: &str = "mediapress-";

/// Factory for uniquely-named temp paths inside one directory. Creating a path
/// does not create the file; the tool writes it.
#[derive(Debug, Clone)]
pub struct TempFileManager {
    dir: PathBuf,
}

impl Default for TempFileManager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

/// Short suffix for temp filenames. Uniqueness only, not security.
fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:x}", std::process::id(), n)
}

impl TempFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/mediapress-<millis>-<pid>-<n>-<suffix>`.
    pub fn create(&self, suffix: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let name = format!("{}{}-{}-{}", TEMP_PREFIX, millis, unique_suffix(), suffix);
        Ok(self.dir.join(name))
    }
}

/// Remove a file if present. Missing files are not an error.
pub fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::trace!(
            target: "mediapress::ffmpeg::temp",
            "removed {}",
            path.display()
        ),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            target: "mediapress::ffmpeg::temp",
            "failed to remove {}: {}",
            path.display(),
            e
        ),
    }
}

/// Delete this crate's temp files in `dir` older than `max_age`. Returns the count removed.
pub fn cleanup_old_temp_files(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age > max_age && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!(
            target: "mediapress::ffmpeg::temp",
            "removed {} stale temp file(s) from {}",
            removed,
            dir.display()
        );
    }
    removed
}

fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Move a finished output into place, copying when source and dest are on different devices.
pub fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_rename_error(&e) => {
            fs::copy(source, dest)?;
            fs::remove_file(source)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_paths_are_unique_and_prefixed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temp = TempFileManager::new(dir.path());
        let a = temp.create("preview.mp4").expect("path a");
        let b = temp.create("preview.mp4").expect("path b");
        assert_ne!(a, b);
        for p in [&a, &b] {
            let name = p.file_name().and_then(|n| n.to_str()).expect("file name");
            assert!(name.starts_with(TEMP_PREFIX));
            assert!(name.ends_with("preview.mp4"));
            assert!(!p.exists(), "create only reserves a name");
        }
    }

    #[test]
    fn cleanup_removes_only_old_prefixed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ours = dir.path().join(format!("{}old.mp4", TEMP_PREFIX));
        let theirs = dir.path().join("unrelated.mp4");
        fs::write(&ours, b"x").expect("write ours");
        fs::write(&theirs, b"x").expect("write theirs");

        assert_eq!(cleanup_old_temp_files(dir.path(), Duration::from_secs(3600)), 0);
        assert!(ours.exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_temp_files(dir.path(), Duration::from_millis(1)), 1);
        assert!(!ours.exists());
        assert!(theirs.exists());
    }

    #[test]
    fn move_file_replaces_destination_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("a.bin");
        let dest = dir.path().join("b.bin");
        fs::write(&source, b"payload").expect("write source");
        move_file(&source, &dest).expect("move");
        assert!(!source.exists());
        assert_eq!(fs::read(&dest).expect("read dest"), b"payload");
    }

    #[test]
    fn remove_if_exists_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        remove_if_exists(&dir.path().join("missing"));
    }
}
