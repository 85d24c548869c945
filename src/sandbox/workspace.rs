//! Host working directories for sandboxes.
//!
//! Each sandbox gets its own directory under the pool's temporary root, keyed
//! by the sandbox id. The template filesystem is copied in, and the shared
//! sub-directory is what the container sees at the runner mount point:
//!
//! ```text
//! {tmp_dir}/{sandbox-id}/
//! ├── ...        # copy of the template directory
//! └── shared/    # bind-mounted into the container
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};
use walkdir::WalkDir;

use crate::error::SandboxError;
use crate::sandbox::SandboxId;

/// Paths of one sandbox working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxWorkspace {
    /// `{tmp_dir}/{sandbox-id}`.
    pub root: PathBuf,
    /// Sub-directory bind-mounted into the container.
    pub shared: PathBuf,
}

impl SandboxWorkspace {
    /// Computes the paths; nothing is created.
    #[must_use]
    pub fn new(tmp_dir: &Path, id: SandboxId, shared_subdir: &str) -> Self {
        let root = tmp_dir.join(id.to_string());
        Self {
            shared: root.join(shared_subdir),
            root,
        }
    }

    /// Creates the directory and materializes the template into it.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Workspace` if any filesystem operation fails.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn create(&self, template: Option<&Path>) -> Result<(), SandboxError> {
        let root = self.root.clone();
        let shared = self.shared.clone();
        let template = template.map(Path::to_path_buf);

        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&root).map_err(|e| SandboxError::Workspace {
                context: format!("failed to create directory: {}", root.display()),
                source: e,
            })?;

            if let Some(template) = &template {
                copy_tree(template, &root).map_err(|e| SandboxError::Workspace {
                    context: format!(
                        "failed to copy template {} into {}",
                        template.display(),
                        root.display()
                    ),
                    source: e,
                })?;
                trace!("Template copied");
            }

            fs::create_dir_all(&shared).map_err(|e| SandboxError::Workspace {
                context: format!("failed to create directory: {}", shared.display()),
                source: e,
            })
        })
        .await
        .map_err(|e| SandboxError::Workspace {
            context: "workspace setup task failed".to_string(),
            source: io::Error::other(e),
        })??;

        debug!("Sandbox workspace ready");
        Ok(())
    }

    /// Removes the directory tree. Missing directories are not an error.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Workspace` if removal fails.
    pub async fn remove(&self) -> Result<(), SandboxError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::Workspace {
                context: format!("failed to remove directory: {}", self.root.display()),
                source: e,
            }),
        }
    }

    /// Checks whether the root directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.exists()
    }
}

/// Recursively copies the contents of `src` into `dst`, preserving symlinks.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
