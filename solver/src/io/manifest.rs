//! Persisted dependency manifest (`requirements.txt`-style, one specifier per line).
//!
//! Reads and appends happen under an exclusive advisory lock on a sidecar
//! `<manifest>.lock` file so concurrent requests cannot both append the same
//! missing package.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::requirements::{manifest_names, missing_from, unique_missing};

/// Handle on a manifest file. Cheap to clone; holds no open file.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
}

/// Exclusive lock on a manifest, released on drop.
#[derive(Debug)]
pub struct ManifestLock {
    file: File,
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "manifest".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Block until this process holds the manifest lock.
    pub fn lock(&self) -> Result<ManifestLock> {
        let lock_path = self.lock_path();
        ensure_parent(&lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("open lock {}", lock_path.display()))?;
        file.lock()
            .with_context(|| format!("lock {}", lock_path.display()))?;
        debug!(path = %lock_path.display(), "manifest lock acquired");
        Ok(ManifestLock { file })
    }

    /// Raw manifest text; a missing file reads as empty.
    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "manifest not found, treating as empty");
                Ok(String::new())
            }
            Err(err) => Err(err).with_context(|| format!("read {}", self.path.display())),
        }
    }

    /// Requested entries (verbatim) whose package name is not yet listed.
    pub fn diff(&self, requested: &[String]) -> Result<Vec<String>> {
        let known = manifest_names(&self.read()?);
        Ok(missing_from(requested, &known))
    }

    /// Append entries that are still absent, one per line.
    ///
    /// Re-reads the file first and skips names that are already present or
    /// repeated within `missing`, so a stale diff cannot create duplicates.
    /// Returns the number of lines appended. Callers racing with other
    /// processes should hold [`Manifest::lock`] across `diff` and `commit`.
    pub fn commit(&self, missing: &[String]) -> Result<usize> {
        if missing.is_empty() {
            debug!("no missing dependencies to append");
            return Ok(0);
        }
        let known = manifest_names(&self.read()?);
        let fresh = unique_missing(missing, &known);
        if fresh.is_empty() {
            debug!("all dependencies already listed");
            return Ok(0);
        }

        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;

        let mut buf = String::new();
        if !ends_with_newline(&mut file)? {
            buf.push('\n');
        }
        for entry in &fresh {
            buf.push_str(entry);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))?;

        info!(path = %self.path.display(), count = fresh.len(), appended = %fresh.join(", "), "appended dependencies to manifest");
        Ok(fresh.len())
    }
}

/// Whether the file is empty or its last byte is `\n`.
fn ends_with_newline(file: &mut File) -> Result<bool> {
    let len = file.metadata().context("stat manifest")?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))
        .context("seek manifest")?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).context("read manifest tail")?;
    Ok(last[0] == b'\n')
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_manifest_is_empty_set() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::new(temp.path().join("requirements.txt"));
        let requested = strings(&["numpy==1.24.3"]);
        assert_eq!(manifest.diff(&requested).expect("diff"), requested);
        assert!(!manifest.path().exists());
    }

    #[test]
    fn commit_then_diff_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::new(temp.path().join("requirements.txt"));
        let requested = strings(&["numpy==1.24.3", "Requests>=2.28", "rich"]);

        let missing = manifest.diff(&requested).expect("diff");
        assert_eq!(manifest.commit(&missing).expect("commit"), 3);
        assert!(manifest.diff(&requested).expect("diff").is_empty());

        let contents = fs::read_to_string(manifest.path()).expect("read");
        assert_eq!(contents, "numpy==1.24.3\nRequests>=2.28\nrich\n");
    }

    #[test]
    fn commit_adds_separator_before_partial_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("requirements.txt");
        fs::write(&path, "flask==2.3.2").expect("seed");
        let manifest = Manifest::new(&path);

        manifest.commit(&strings(&["numpy"])).expect("commit");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "flask==2.3.2\nnumpy\n");
    }

    #[test]
    fn commit_empty_is_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::new(temp.path().join("requirements.txt"));
        assert_eq!(manifest.commit(&[]).expect("commit"), 0);
        assert!(!manifest.path().exists());
    }

    #[test]
    fn commit_skips_stale_and_repeated_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("requirements.txt");
        fs::write(&path, "numpy\n").expect("seed");
        let manifest = Manifest::new(&path);

        let appended = manifest
            .commit(&strings(&["NumPy==2.0", "rich", "RICH>=13"]))
            .expect("commit");
        assert_eq!(appended, 1);
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "numpy\nrich\n");
    }

    #[test]
    fn creates_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::new(temp.path().join("state").join("requirements.txt"));
        manifest.commit(&strings(&["numpy"])).expect("commit");
        assert!(manifest.path().is_file());
    }

    #[test]
    fn lock_file_sits_next_to_manifest() {
        let manifest = Manifest::new("/srv/app/requirements.txt");
        assert_eq!(
            manifest.lock_path(),
            PathBuf::from("/srv/app/requirements.txt.lock")
        );
    }

    #[test]
    fn concurrent_locked_commits_never_duplicate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("requirements.txt");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manifest = Manifest::new(&path);
                std::thread::spawn(move || {
                    let requested = strings(&["numpy==1.24.3", "pandas", "rich"]);
                    let _guard = manifest.lock().expect("lock");
                    let missing = manifest.diff(&requested).expect("diff");
                    manifest.commit(&missing).expect("commit")
                })
            })
            .collect();
        let appended: usize = handles.into_iter().map(|h| h.join().expect("join")).sum();
        assert_eq!(appended, 3);

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 3);
    }
}
