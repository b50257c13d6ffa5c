//! Scratch file management for conversion jobs.
//!
//! A [`ScratchSpace`] owns one directory and hands out job-scoped paths
//! inside it. Paths are derived from the job id and the artifact kind, so two
//! jobs never collide. Releasing a path is idempotent and never fails.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sc_core::{ArtifactKind, JobId};
use tempfile::TempDir;

/// Root directory for job scratch files.
///
/// # Example
///
/// ```no_run
/// use sc_av::ScratchSpace;
/// use sc_core::{ArtifactKind, JobId};
///
/// let scratch = ScratchSpace::new("/tmp/stillcast").unwrap();
/// let job = JobId::new();
/// let image = scratch.allocate(job, ArtifactKind::UploadedImage);
/// // ... write the upload to `image` ...
/// scratch.release(&image);
/// ```
#[derive(Debug)]
pub struct ScratchSpace {
    root: PathBuf,
    // Keeps an ephemeral root alive; removed on drop.
    _owned: Option<TempDir>,
}

impl ScratchSpace {
    /// Use `root` as the scratch directory, creating it if missing.
    pub fn new(root: impl Into<PathBuf>) -> sc_core::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, _owned: None })
    }

    /// A scratch space in a fresh temporary directory that is deleted when
    /// this value is dropped.
    pub fn ephemeral() -> sc_core::Result<Self> {
        let dir = TempDir::with_prefix("stillcast-")?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            _owned: Some(dir),
        })
    }

    /// The scratch directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path for `kind` belonging to `job_id`. Nothing is created on disk.
    pub fn allocate(&self, job_id: JobId, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.file_name(job_id))
    }

    /// Delete `path` if it exists.
    ///
    /// A missing file is a no-op. Any other failure is logged as a warning
    /// and swallowed.
    pub fn release(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Released {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to delete {}: {e}", path.display()),
        }
    }

    /// Release every path in `paths`.
    pub fn release_all<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) {
        for path in paths {
            self.release(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn new_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("scratch");
        let scratch = ScratchSpace::new(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(scratch.root(), root);
    }

    #[test]
    fn allocate_is_inside_root_and_job_scoped() {
        let scratch = ScratchSpace::ephemeral().unwrap();
        let a = JobId::new();
        let b = JobId::new();

        let pa = scratch.allocate(a, ArtifactKind::CompositedImage);
        let pb = scratch.allocate(b, ArtifactKind::CompositedImage);

        assert!(pa.starts_with(scratch.root()));
        assert_ne!(pa, pb);
        assert!(pa.to_string_lossy().contains(&a.to_string()));
        assert!(!pa.exists());
    }

    #[test]
    fn release_deletes_file() {
        let scratch = ScratchSpace::ephemeral().unwrap();
        let path = scratch.allocate(JobId::new(), ArtifactKind::UploadedAudio);
        fs::write(&path, b"data").unwrap();

        scratch.release(&path);
        assert!(!path.exists());
    }

    #[test]
    fn release_missing_is_noop() {
        let scratch = ScratchSpace::ephemeral().unwrap();
        let path = scratch.allocate(JobId::new(), ArtifactKind::OutputVideo);
        scratch.release(&path);
        scratch.release(&path);
        assert!(!path.exists());
    }

    #[test]
    fn release_on_directory_only_warns() {
        let scratch = ScratchSpace::ephemeral().unwrap();
        let path = scratch.root().join("a-directory");
        fs::create_dir(&path).unwrap();

        scratch.release(&path);
        assert!(path.is_dir());
    }

    #[test]
    fn release_all_handles_mixed_paths() {
        let scratch = ScratchSpace::ephemeral().unwrap();
        let job = JobId::new();
        let image = scratch.allocate(job, ArtifactKind::UploadedImage);
        let audio = scratch.allocate(job, ArtifactKind::UploadedAudio);
        fs::write(&image, b"img").unwrap();

        scratch.release_all([image.as_path(), audio.as_path()]);
        assert!(!image.exists());
        assert!(!audio.exists());
    }

    #[test]
    fn ephemeral_root_removed_on_drop() {
        let scratch = ScratchSpace::ephemeral().unwrap();
        let root = scratch.root().to_path_buf();
        assert!(root.is_dir());
        drop(scratch);
        assert!(!root.exists());
    }
}
