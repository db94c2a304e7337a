// Local git operations for preparing release branches

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::errors::GitError;

/// A working clone of the repository being released
pub struct GitRepo {
    clone_url: String,
    repo_path: PathBuf,
}

impl GitRepo {
    pub fn new(clone_url: impl Into<String>, work_dir: &Path, name: &str) -> Self {
        Self {
            clone_url: clone_url.into(),
            repo_path: work_dir.join(name),
        }
    }

    /// Base directory for working clones, overridable with
    /// `RELEASE_BOT_WORK_DIR`
    pub fn default_work_dir() -> PathBuf {
        std::env::var("RELEASE_BOT_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("release-bot-repos"))
    }

    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    async fn run_in(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        debug!(?args, "Running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GitError::Io(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        if !self.repo_path.join(".git").exists() {
            return Err(GitError::NotCloned);
        }
        let dir = self.repo_path.clone();
        self.run_in(&dir, args).await
    }

    /// Clone the repository into the work directory, or pull when a clone
    /// is already there
    #[instrument(skip(self))]
    pub async fn clone_or_update(&self) -> Result<(), GitError> {
        if self.repo_path.join(".git").exists() {
            return self.pull().await;
        }

        if let Some(parent) = self.repo_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GitError::Io(e.to_string()))?;
        }

        let parent = self
            .repo_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let target = self.repo_path.to_string_lossy().to_string();

        self.run_in(&parent, &["clone", &self.clone_url, &target])
            .await?;
        Ok(())
    }

    pub async fn pull(&self) -> Result<(), GitError> {
        self.run(&["pull"]).await?;
        Ok(())
    }

    pub async fn fetch_tags(&self) -> Result<(), GitError> {
        self.run(&["fetch", "--tags", "origin"]).await?;
        Ok(())
    }

    pub async fn checkout(&self, git_ref: &str) -> Result<(), GitError> {
        self.run(&["checkout", git_ref]).await?;
        Ok(())
    }

    pub async fn checkout_new_branch(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-b", branch]).await?;
        Ok(())
    }

    pub async fn add(&self, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["add"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str, allow_empty: bool) -> Result<(), GitError> {
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args).await?;
        Ok(())
    }

    pub async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["push", "origin", branch]).await?;
        Ok(())
    }

    /// Configure the author identity used for release commits
    pub async fn set_credentials(&self, name: &str, email: &str) -> Result<(), GitError> {
        self.run(&["config", "user.name", name]).await?;
        self.run(&["config", "user.email", email]).await?;
        Ok(())
    }

    /// Bullet-list changelog of commits since the previous release tag.
    ///
    /// `previous` of "0.0.0" means the project has never been released, so
    /// the whole history is used. With `gitchangelog` the external tool
    /// generates the log instead.
    #[instrument(skip(self))]
    pub async fn log_since_last_release(
        &self,
        previous: &str,
        gitchangelog: bool,
    ) -> Result<String, GitError> {
        if gitchangelog {
            let output = Command::new("gitchangelog")
                .current_dir(&self.repo_path)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| GitError::Io(e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return Err(GitError::CommandFailed {
                    command: "gitchangelog".to_string(),
                    stderr,
                });
            }

            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let range = if previous == "0.0.0" {
            "HEAD".to_string()
        } else {
            format!("{}..HEAD", previous)
        };

        let log = match self
            .run(&["log", "--no-merges", "--format=* %s", &range])
            .await
        {
            Ok(log) => log,
            Err(e) => {
                // Tag may be missing locally (e.g. release created outside git)
                warn!(previous, error = %e, "Falling back to full history for changelog");
                self.run(&["log", "--no-merges", "--format=* %s", "HEAD"])
                    .await?
            }
        };

        Ok(log.trim().to_string())
    }

    /// Remove the working clone
    pub async fn cleanup(&self) {
        if self.repo_path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.repo_path).await {
                warn!(path = %self.repo_path.display(), error = %e, "Failed to remove working clone");
            }
        }
    }
}
