// Fedora dist-git releases driven through fedpkg

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::FedoraConfig;
use crate::errors::ReleaseError;

lazy_static! {
    static ref SPEC_VERSION_RE: Regex =
        Regex::new(r"(?m)^(Version:\s*)\S+").expect("valid regex");
    static ref SPEC_RELEASE_RE: Regex =
        Regex::new(r"(?m)^(Release:\s*)\d+").expect("valid regex");
}

/// Releases a new upstream version into Fedora dist-git: updates the spec,
/// uploads sources, and kicks off builds on the configured branches.
pub struct FedoraReleaser {
    fas_username: Option<String>,
    keytab_path: Option<String>,
    package: String,
}

impl FedoraReleaser {
    pub fn new(config: &FedoraConfig, package: impl Into<String>) -> Self {
        Self {
            fas_username: config.fas_username.clone(),
            keytab_path: config.keytab_path.clone(),
            package: package.into(),
        }
    }

    /// Run a command in `dir`. With `fail` a non-zero exit is an error;
    /// without it the failure is logged and reported as Ok(false).
    async fn run(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        fail: bool,
    ) -> Result<bool, ReleaseError> {
        debug!(program, ?args, "Running command");

        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReleaseError::Fedora(format!("Failed to run {}: {}", program, e)))?;

        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if fail {
            Err(ReleaseError::Fedora(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                stderr
            )))
        } else {
            warn!(program, ?args, stderr = %stderr, "Command failed, continuing");
            Ok(false)
        }
    }

    /// Obtain (or renew) a kerberos ticket for dist-git pushes
    async fn init_kerberos_ticket(&self) -> Result<bool, ReleaseError> {
        let Some(username) = &self.fas_username else {
            warn!("No FAS username configured, skipping fedora release");
            return Ok(false);
        };

        let principal = format!("{}@FEDORAPROJECT.ORG", username);
        let cwd = std::env::current_dir()
            .map_err(|e| ReleaseError::Fedora(format!("Cannot determine cwd: {}", e)))?;

        match &self.keytab_path {
            Some(keytab) if Path::new(keytab).is_file() => {
                self.run(&cwd, "kinit", &[&principal, "-k", "-t", keytab], false)
                    .await
            }
            // No keytab: an existing ticket may still be renewable
            _ => self.run(&cwd, "kinit", &["-R", &principal], false).await,
        }
    }

    /// Release `version` to the main branch and every configured branch.
    /// Failures on secondary branches are tolerated.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        version: &str,
        branches: &[String],
        dry_run: bool,
    ) -> Result<bool, ReleaseError> {
        if !self.init_kerberos_ticket().await? {
            warn!("Can't obtain a valid kerberos ticket, skipping fedora release");
            return Ok(false);
        }

        if dry_run {
            info!(version, "Dry run: skipping fedora release");
            return Ok(false);
        }

        let workdir = std::env::temp_dir().join(format!("release-bot-fedora-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| ReleaseError::Fedora(format!("Failed to create workdir: {}", e)))?;

        let result = self.release_in(&workdir, version, branches).await;

        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(path = %workdir.display(), error = %e, "Failed to remove fedora workdir");
        }

        result
    }

    async fn release_in(
        &self,
        workdir: &Path,
        version: &str,
        branches: &[String],
    ) -> Result<bool, ReleaseError> {
        if !self
            .run(workdir, "fedpkg", &["clone", self.package.as_str()], false)
            .await?
        {
            return Ok(false);
        }
        let root = workdir.join(&self.package);

        if !self
            .run(&root, "fedpkg", &["switch-branch", "rawhide"], false)
            .await?
        {
            return Ok(false);
        }

        if !self.update_package(&root, "rawhide", version).await? {
            return Ok(false);
        }

        for branch in branches {
            if !self
                .run(&root, "fedpkg", &["switch-branch", branch], false)
                .await?
            {
                continue;
            }
            if !self
                .run(&root, "git", &["merge", "rawhide", "--ff-only"], false)
                .await?
            {
                debug!(branch, "Fast-forward failed, updating the branch from scratch");
                self.update_package(&root, branch, version).await?;
                continue;
            }
            if !self.run(&root, "fedpkg", &["push"], false).await? {
                continue;
            }
            self.run(&root, "fedpkg", &["build"], false).await?;
        }

        Ok(true)
    }

    /// Pull in the new source, patch the spec file, commit, push and build
    /// on `branch`
    async fn update_package(
        &self,
        root: &Path,
        branch: &str,
        version: &str,
    ) -> Result<bool, ReleaseError> {
        let fail = branch == "rawhide";

        if !self.run(root, "fedpkg", &["sources"], fail).await? {
            return Ok(false);
        }

        let spec_path = root.join(format!("{}.spec", self.package));
        update_spec(&spec_path, version, self.fas_username.as_deref()).await?;

        if !self.run(root, "fedpkg", &["lint"], fail).await? {
            return Ok(false);
        }

        let before = list_dir(root).await?;

        let spec_arg = spec_path.to_string_lossy().to_string();
        if !self.run(root, "spectool", &["-g", &spec_arg], fail).await? {
            return Ok(false);
        }

        let after = list_dir(root).await?;
        let new_sources: Vec<String> = after.difference(&before).cloned().collect();

        if new_sources.is_empty() {
            warn!("There are no new sources, won't continue releasing to fedora");
            return Ok(false);
        }

        let mut args = vec!["new-sources".to_string()];
        args.extend(new_sources);
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        if !self.run(root, "fedpkg", &args_ref, fail).await? {
            return Ok(false);
        }

        let message = format!("Update to {}", version);
        if !self
            .run(root, "fedpkg", &["commit", "-m", &message], fail)
            .await?
        {
            return Ok(false);
        }
        if !self.run(root, "fedpkg", &["push"], fail).await? {
            return Ok(false);
        }
        if !self.run(root, "fedpkg", &["build"], fail).await? {
            return Ok(false);
        }

        Ok(true)
    }
}

async fn list_dir(dir: &Path) -> Result<HashSet<String>, ReleaseError> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ReleaseError::Fedora(e.to_string()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ReleaseError::Fedora(e.to_string()))?
    {
        names.insert(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// Patch the spec file for the new version: bump Version, reset Release to
/// 1, and prepend a changelog entry
pub async fn update_spec(
    spec_path: &Path,
    version: &str,
    author: Option<&str>,
) -> Result<(), ReleaseError> {
    let content = tokio::fs::read_to_string(spec_path)
        .await
        .map_err(|e| ReleaseError::Fedora(format!("Cannot read spec file: {}", e)))?;

    let updated = SPEC_VERSION_RE
        .replace(&content, |caps: &regex::Captures| {
            format!("{}{}", &caps[1], version)
        })
        .into_owned();
    let updated = SPEC_RELEASE_RE
        .replace(&updated, |caps: &regex::Captures| format!("{}1", &caps[1]))
        .into_owned();

    let author = author.unwrap_or("release-bot");
    let date = chrono::Utc::now().format("%a %b %d %Y");
    let entry = format!("* {} {} - {}-1\n- Update to {}\n", date, author, version, version);

    let updated = if let Some(pos) = updated.find("%changelog\n") {
        let insert_at = pos + "%changelog\n".len();
        format!("{}{}\n{}", &updated[..insert_at], entry, &updated[insert_at..])
    } else {
        format!("{}\n%changelog\n{}", updated.trim_end(), entry)
    };

    tokio::fs::write(spec_path, updated)
        .await
        .map_err(|e| ReleaseError::Fedora(format!("Cannot write spec file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "\
Name:           release-botos
Version:        0.4.1
Release:        2%{?dist}
Summary:        Demo package

%changelog
* Mon Jan 01 2024 somebody - 0.4.1-2
- Old entry
";

    #[tokio::test]
    async fn test_update_spec_bumps_version_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("release-botos.spec");
        tokio::fs::write(&spec_path, SPEC).await.unwrap();

        update_spec(&spec_path, "0.5.0", Some("jdoe")).await.unwrap();

        let updated = tokio::fs::read_to_string(&spec_path).await.unwrap();
        assert!(updated.contains("Version:        0.5.0"));
        assert!(updated.contains("Release:        1%{?dist}"));
        assert!(updated.contains("- Update to 0.5.0"));
        assert!(updated.contains("jdoe - 0.5.0-1"));
        // The old changelog entry is preserved below the new one
        let new_pos = updated.find("Update to 0.5.0").unwrap();
        let old_pos = updated.find("Old entry").unwrap();
        assert!(new_pos < old_pos);
    }

    #[tokio::test]
    async fn test_update_spec_without_changelog_section() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("pkg.spec");
        tokio::fs::write(&spec_path, "Name: pkg\nVersion: 1.0.0\nRelease: 3%{?dist}\n")
            .await
            .unwrap();

        update_spec(&spec_path, "1.1.0", None).await.unwrap();

        let updated = tokio::fs::read_to_string(&spec_path).await.unwrap();
        assert!(updated.contains("Version: 1.1.0"));
        assert!(updated.contains("%changelog"));
        assert!(updated.contains("release-bot - 1.1.0-1"));
    }

    #[test]
    fn test_releaser_without_fas_username_skips() {
        let releaser = FedoraReleaser::new(&FedoraConfig::default(), "release-botos");
        assert!(releaser.fas_username.is_none());
    }
}
