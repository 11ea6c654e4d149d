//! Local staging area for image exports.
//!
//! The save-disk-as-image workflow downloads each image into its own
//! directory below a configured root, named after the local image id.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while preparing staging directories.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StagingError {
    /// Raised when an image id cannot be used as a directory name.
    #[error("'{name}' is not a valid staging directory name")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Raised when the directory cannot be created.
    #[error("failed to prepare staging directory {path}: {message}")]
    Io {
        /// Path being prepared.
        path: Utf8PathBuf,
        /// Error reported by the filesystem.
        message: String,
    },
}

/// Root directory under which per-image export directories are created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagingArea {
    root: Utf8PathBuf,
}

impl StagingArea {
    /// Creates a staging area rooted at `root`. Nothing is created until
    /// [`StagingArea::prepare`] runs.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the staging area.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Ensures the directory for `image_id` exists and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::InvalidName`] when `image_id` is empty or not a
    /// single path component, and [`StagingError::Io`] when the directory
    /// cannot be created.
    pub fn prepare(&self, image_id: &str) -> Result<Utf8PathBuf, StagingError> {
        validate_name(image_id)?;
        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))?;
        let dir = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))?;
        let target = self.root.join(image_id);
        dir.create_dir_all(image_id)
            .map_err(|err| io_error(&target, &err))?;
        Ok(target)
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StagingError {
    StagingError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn validate_name(name: &str) -> Result<(), StagingError> {
    let usable = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if usable {
        Ok(())
    } else {
        Err(StagingError::InvalidName {
            name: name.to_owned(),
        })
    }
}
