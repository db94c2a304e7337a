// PyPI version queries and package uploads

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::errors::ReleaseError;

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    info: ProjectMetadata,
}

#[derive(Debug, Deserialize)]
struct ProjectMetadata {
    version: String,
}

/// Client for the PyPI JSON API and twine-based uploads
pub struct PypiClient {
    http: Client,
    index_url: String,
}

impl PypiClient {
    pub fn new() -> Result<Self, ReleaseError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("release-bot")
            .build()
            .map_err(|e| ReleaseError::Pypi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            index_url: "https://pypi.org/pypi".to_string(),
        })
    }

    pub fn with_index_url(mut self, index_url: impl Into<String>) -> Self {
        self.index_url = index_url.into();
        self
    }

    /// Latest version released on PyPI; "0.0.0" for projects that have
    /// never been published
    #[instrument(skip(self))]
    pub async fn latest_version(&self, project: &str) -> Result<String, ReleaseError> {
        let url = format!("{}/{}/json", self.index_url.trim_end_matches('/'), project);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ReleaseError::Pypi(format!("PyPI request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(project, "Project not yet published on PyPI");
            return Ok("0.0.0".to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ReleaseError::Pypi(format!(
                "PyPI returned {} for {}",
                status, project
            )));
        }

        let info: ProjectInfo = response
            .json()
            .await
            .map_err(|e| ReleaseError::Pypi(format!("Invalid PyPI response: {}", e)))?;

        Ok(info.info.version)
    }

    /// Build sdist + wheel from the checked-out release tag and upload with
    /// twine
    #[instrument(skip(self, repo_path))]
    pub async fn release(&self, repo_path: &Path, dry_run: bool) -> Result<(), ReleaseError> {
        let dist_dir = repo_path.join("dist");
        if dist_dir.exists() {
            tokio::fs::remove_dir_all(&dist_dir)
                .await
                .map_err(|e| ReleaseError::Pypi(format!("Failed to clean dist/: {}", e)))?;
        }

        run_build_step(repo_path, &["setup.py", "sdist"]).await?;
        run_build_step(repo_path, &["setup.py", "bdist_wheel"]).await?;

        let mut artifacts = Vec::new();
        let mut entries = tokio::fs::read_dir(&dist_dir)
            .await
            .map_err(|e| ReleaseError::Pypi(format!("No dist/ directory after build: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ReleaseError::Pypi(e.to_string()))?
        {
            artifacts.push(entry.path());
        }

        if artifacts.is_empty() {
            return Err(ReleaseError::Pypi("Build produced no artifacts".to_string()));
        }

        if dry_run {
            info!(count = artifacts.len(), "Dry run: skipping twine upload");
            return Ok(());
        }

        let mut args: Vec<String> = vec!["upload".to_string()];
        args.extend(
            artifacts
                .iter()
                .map(|p| p.to_string_lossy().to_string()),
        );

        let output = Command::new("twine")
            .args(&args)
            .current_dir(repo_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReleaseError::Pypi(format!("Failed to run twine: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ReleaseError::Pypi(format!("twine upload failed: {}", stderr)));
        }

        info!(count = artifacts.len(), "Uploaded artifacts to PyPI");
        Ok(())
    }
}

async fn run_build_step(repo_path: &Path, args: &[&str]) -> Result<(), ReleaseError> {
    let output = Command::new("python3")
        .args(args)
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ReleaseError::Pypi(format!("Failed to run python3: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ReleaseError::Pypi(format!(
            "python3 {} failed: {}",
            args.join(" "),
            stderr
        )));
    }

    Ok(())
}
