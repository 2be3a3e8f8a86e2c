//! The prebuilt runner template that every workspace is cloned from.
//!
//! Building the template may download and install the runner runtime, so it is done at most once
//! per host. A marker file is written only after a build succeeds; a directory without it is
//! treated as a failed build and rebuilt from scratch.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use walkdir::WalkDir;

use crate::config::{CommandTemplate, CommandVars};
use crate::error::{FleetError, FleetResult};

/// Written into the template directory once it is ready to be cloned.
pub const READY_MARKER: &str = ".fleet-template-ready";

#[derive(Debug, Clone)]
pub struct TemplateCache {
    dir: PathBuf,
    source: Option<PathBuf>,
    install: Option<CommandTemplate>,
}

impl TemplateCache {
    pub fn new(dir: PathBuf, source: Option<PathBuf>, install: Option<CommandTemplate>) -> Self {
        Self {
            dir,
            source,
            install,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_ready(&self) -> bool {
        self.dir.join(READY_MARKER).exists()
    }

    /// Build the template unless a ready one is already cached.
    ///
    /// Returns `true` if a build was performed.
    pub async fn ensure(&self) -> FleetResult<bool> {
        if self.is_ready() {
            log::debug!("Using cached runner template at {}", self.dir.display());
            return Ok(false);
        }

        log::info!("Building runner template at {}", self.dir.display());
        if self.dir.exists() {
            log::warn!("Removing incomplete runner template");
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        if let Some(source) = &self.source {
            let source = source.clone();
            let dir = self.dir.clone();
            tokio::task::spawn_blocking(move || copy_tree(&source, &dir))
                .await
                .map_err(|e| FleetError::Provision {
                    reason: format!("Template copy task failed: {e}"),
                })?
                .map_err(|e| FleetError::Provision {
                    reason: format!("Failed to copy template source: {e}"),
                })?;
        }

        if let Some(install) = &self.install {
            let vars = CommandVars {
                workspace: Some(self.dir.clone()),
                ..Default::default()
            };
            let output = install
                .to_command(&vars, &self.dir)?
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| FleetError::Provision {
                    reason: format!("Failed to run install command: {e}"),
                })?;

            if !output.status.success() {
                return Err(FleetError::Provision {
                    reason: format!(
                        "Install command failed with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                });
            }
        }

        tokio::fs::write(self.dir.join(READY_MARKER), b"").await?;
        log::info!("Runner template is ready");
        Ok(true)
    }

    /// Copy the ready template into a new workspace.
    pub async fn clone_into(&self, workspace: &Path) -> FleetResult<()> {
        if !self.is_ready() {
            return Err(FleetError::Provision {
                reason: "Runner template has not been built".to_string(),
            });
        }

        let dir = self.dir.clone();
        let workspace = workspace.to_path_buf();
        tokio::task::spawn_blocking(move || {
            copy_tree(&dir, &workspace)?;
            // The marker belongs to the template only.
            match std::fs::remove_file(workspace.join(READY_MARKER)) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        })
        .await
        .map_err(|e| FleetError::Provision {
            reason: format!("Workspace copy task failed: {e}"),
        })??;
        Ok(())
    }
}

/// Recursively copy `from` into `to`, keeping file permissions.
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
