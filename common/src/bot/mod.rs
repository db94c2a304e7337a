// Release workflow engine: evaluates release triggers and performs the
// release steps against GitHub, PyPI, and Fedora

use semver::Version;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::changelog::{insert_in_changelog, parse_changelog};
use crate::config::{ReleaseConf, Settings};
use crate::errors::{GitError, ReleaseError};
use crate::fedora::FedoraReleaser;
use crate::git::GitRepo;
use crate::github::GithubClient;
use crate::models::{MergedReleasePr, ReleaseIssue};
use crate::pypi::PypiClient;
use crate::version::{coerce_version, update_version_files, version_from_title};

const BOT_AUTHOR_NAME: &str = "Release bot";
const BOT_AUTHOR_EMAIL: &str = "bot@releasebot.bot";

/// The release workflow engine.
///
/// One instance handles one unit of release work; progress comments
/// accumulate and are flushed onto the release PR at the end.
pub struct ReleaseBot {
    settings: Arc<Settings>,
    github: GithubClient,
    pypi: PypiClient,
    fedora: FedoraReleaser,
    comments: Vec<String>,
}

impl ReleaseBot {
    pub async fn new(settings: Arc<Settings>) -> Result<Self, ReleaseError> {
        let github = GithubClient::from_settings(&settings).await?;
        Ok(Self::with_clients(settings, github, PypiClient::new()?))
    }

    /// Construct with prebuilt clients (tests point them at mock servers)
    pub fn with_clients(settings: Arc<Settings>, github: GithubClient, pypi: PypiClient) -> Self {
        let fedora = FedoraReleaser::new(&settings.fedora, settings.repository.name.clone());
        Self {
            settings,
            github,
            pypi,
            fedora,
            comments: Vec::new(),
        }
    }

    pub fn github(&self) -> &GithubClient {
        &self.github
    }

    /// Fetch and resolve the repository's release configuration.
    /// Returns the parsed config and the effective PyPI project name.
    #[instrument(skip(self))]
    pub async fn load_release_conf(&self) -> Result<(ReleaseConf, String), ReleaseError> {
        let content = self
            .github
            .get_file("release-conf.yaml", None)
            .await?
            .ok_or_else(|| {
                ReleaseError::ReleaseConf(
                    "repository has no release-conf.yaml".to_string(),
                )
            })?;
        let conf = ReleaseConf::parse(&content)?;

        let setup_cfg = self.github.get_file("setup.cfg", None).await?;
        let pypi_project =
            conf.resolve_pypi_project(setup_cfg.as_deref(), &self.settings.repository.name);

        Ok((conf, pypi_project))
    }

    /// Latest released version with its original title string
    pub async fn latest_release(&self) -> Result<(Version, String), ReleaseError> {
        let title = self.github.latest_release().await?;
        let version = coerce_version(&title)?;
        Ok((version, title))
    }

    /// Look for an open issue requesting a release.
    ///
    /// More than one candidate is a configuration problem the maintainers
    /// have to resolve; issues the bot cannot close are skipped.
    #[instrument(skip(self))]
    pub async fn find_open_release_issue(&self) -> Result<Option<ReleaseIssue>, ReleaseError> {
        let (latest, _) = self.latest_release().await?;
        let issues = self.github.open_issues().await?;
        if issues.is_empty() {
            debug!("No open issues found");
            return Ok(None);
        }

        let username = match &self.settings.github.username {
            Some(username) => username.clone(),
            None => self.github.username().await?,
        };

        let mut candidates = Vec::new();
        for issue in &issues {
            let Some(version) = version_from_title(&issue.title, &latest) else {
                continue;
            };

            if self.github.can_modify_issue(&username, issue).await? {
                info!(version = %version, issue = issue.number, "Found new release issue");
                candidates.push(ReleaseIssue {
                    version: version.to_string(),
                    issue_number: issue.number,
                });
            } else {
                warn!(
                    user = %username,
                    issue = issue.number,
                    "User has no permission to modify issue"
                );
            }
        }

        if candidates.len() > 1 {
            return Err(ReleaseError::MultipleReleaseIssues(candidates.len()));
        }
        Ok(candidates.pop())
    }

    /// Find the newest merged release PR
    #[instrument(skip(self))]
    pub async fn find_newest_release_pull_request(
        &self,
    ) -> Result<Option<MergedReleasePr>, ReleaseError> {
        let (latest, _) = self.latest_release().await?;
        let merged = self.github.merged_pull_requests().await?;

        for pr in &merged {
            if let Some(version) = version_from_title(&pr.title, &latest) {
                info!(version = %version, pr = pr.number, "Found merged release PR");
                return Ok(Some(MergedReleasePr {
                    version: version.to_string(),
                    pr_number: pr.number,
                    author: Some(pr.user.login.clone()),
                }));
            }
        }

        debug!("No merged release PR found");
        Ok(None)
    }

    fn record_comment(&mut self, message: String) {
        self.comments.push(message);
    }

    /// Post accumulated progress comments onto the release PR
    pub async fn flush_comments(&mut self, pr_number: Option<u64>) -> Result<(), ReleaseError> {
        if self.comments.is_empty() {
            return Ok(());
        }

        if let Some(number) = pr_number {
            let body = self.comments.join("\n");
            self.github.comment(number, &body).await?;
        }
        self.comments.clear();
        Ok(())
    }

    async fn default_branch(&self) -> Result<String, ReleaseError> {
        if let Some(branch) = &self.settings.repository.default_branch {
            return Ok(branch.clone());
        }
        Ok(self.github.default_branch().await?)
    }

    fn working_clone(&self) -> GitRepo {
        let clone_url = match &self.settings.repository.clone_url {
            Some(url) => url.clone(),
            None => self
                .settings
                .repository
                .authenticated_clone_url(self.github.token()),
        };
        GitRepo::new(
            clone_url,
            &GitRepo::default_work_dir(),
            &self.settings.repository.name,
        )
    }

    fn author_identity(&self, conf: &ReleaseConf) -> (String, String) {
        (
            conf.author_name
                .clone()
                .unwrap_or_else(|| BOT_AUTHOR_NAME.to_string()),
            conf.author_email
                .clone()
                .unwrap_or_else(|| BOT_AUTHOR_EMAIL.to_string()),
        )
    }

    /// Prepare the release branch and open a release PR for an
    /// issue-triggered release. Returns whether a PR was created.
    #[instrument(skip(self, conf))]
    pub async fn make_release_pull_request(
        &mut self,
        conf: &ReleaseConf,
        issue: &ReleaseIssue,
    ) -> Result<bool, ReleaseError> {
        let (latest, latest_title) = self.latest_release().await?;
        let version = coerce_version(&issue.version)?;

        if latest >= version {
            warn!(
                "Version ({}) is already released and this issue is ignored.",
                latest_title
            );
            return Ok(false);
        }

        let branch = format!("{}-release", issue.version);
        if self.github.branch_exists(&branch).await? {
            warn!(branch = %branch, "Branch already exists, aborting creating PR.");
            return Ok(false);
        }

        if self.settings.dry_run {
            info!(
                "I would make a new PR for release of version {} based on the issue.",
                issue.version
            );
            return Ok(false);
        }

        if !conf.labels.is_empty() {
            self.github
                .add_labels(issue.issue_number, &conf.labels)
                .await?;
        }

        info!(
            "Making a new PR for release of version {} based on the issue.",
            issue.version
        );

        match self
            .prepare_release_branch(conf, issue, &branch, &latest_title)
            .await
        {
            Ok(Some(pr_url)) => {
                let message = format!(
                    "I just made a PR request for a release version {}\n \
                     Here's a [link to the PR]({})",
                    issue.version, pr_url
                );
                info!("{}", message);
                self.github.comment(issue.issue_number, &message).await?;
                self.github.close_issue(issue.issue_number).await?;
                debug!(issue = issue.issue_number, "Closed issue");
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                let message = format!(
                    "I just failed to make a PR request for a release version {}",
                    issue.version
                );
                error!("{}", message);
                // Best effort; the original failure is what matters
                let _ = self.github.comment(issue.issue_number, &message).await;
                Err(e)
            }
        }
    }

    /// Branch, version bump, changelog update, push, PR. Returns the PR URL
    /// or None when an equivalent PR already exists.
    async fn prepare_release_branch(
        &self,
        conf: &ReleaseConf,
        issue: &ReleaseIssue,
        branch: &str,
        previous_version: &str,
    ) -> Result<Option<String>, ReleaseError> {
        let repo = self.working_clone();
        repo.clone_or_update().await?;

        let (name, email) = self.author_identity(conf);
        repo.set_credentials(&name, &email).await?;

        // Start the release branch from the tip of the default branch so it
        // carries every commit since the last release
        let default_branch = self.default_branch().await?;
        repo.checkout(&default_branch).await?;
        let changelog = repo
            .log_since_last_release(previous_version, self.settings.repository.gitchangelog)
            .await?;
        repo.checkout_new_branch(branch).await?;

        let mut changed = update_version_files(repo.path(), &issue.version)
            .await
            .map_err(|e| GitError::Io(e.to_string()))?;

        let changelog_path = repo.path().join("CHANGELOG.md");
        let existing = tokio::fs::read_to_string(&changelog_path)
            .await
            .unwrap_or_default();
        if let Some(updated) = insert_in_changelog(&existing, &issue.version, &changelog) {
            tokio::fs::write(&changelog_path, updated)
                .await
                .map_err(|e| GitError::Io(e.to_string()))?;
            changed.push("CHANGELOG.md".to_string());
        }

        if !changed.is_empty() {
            repo.add(&changed).await?;
        }
        repo.commit(&format!("{} release", issue.version), true)
            .await?;
        repo.push(branch).await?;

        let title = format!("{} release", issue.version);
        if let Some(number) = self.github.pr_exists(&title).await? {
            warn!(pr = number, "Release PR already open, not creating another");
            repo.checkout(&default_branch).await?;
            return Ok(None);
        }

        let version_files: Vec<String> = changed
            .iter()
            .filter(|f| f.as_str() != "CHANGELOG.md")
            .cloned()
            .collect();
        let body = release_pr_body(&changelog, &version_files, branch);
        let pr = self
            .github
            .create_pull_request(&title, &body, branch, &default_branch)
            .await?;
        info!(pr = pr.number, url = %pr.html_url, "Created PR");

        if !conf.labels.is_empty() {
            self.github.add_labels(pr.number, &conf.labels).await?;
        }

        repo.checkout(&default_branch).await?;
        Ok(Some(pr.html_url))
    }

    /// Create the GitHub release for a merged release PR. Returns whether a
    /// release was created.
    #[instrument(skip(self))]
    pub async fn make_github_release(&mut self, version: &str) -> Result<bool, ReleaseError> {
        let (latest, _) = self.latest_release().await?;
        let new_version = coerce_version(version)?;

        if latest >= new_version {
            info!("{} has already been released on Github", version);
            return Ok(false);
        }

        if self.settings.dry_run {
            info!("I would have released version {} on Github now.", version);
            return Ok(false);
        }

        let body = self.release_body(version).await?;
        match self.github.create_release(version, version, &body).await {
            Ok(_) => {
                let message = format!("I just released version {} on Github", version);
                info!("{}", message);
                self.record_comment(message);
                Ok(true)
            }
            Err(e) => {
                let message = format!("I just failed to release version {} on Github", version);
                error!("{}", message);
                self.record_comment(message);
                Err(e.into())
            }
        }
    }

    /// Release body: the CHANGELOG.md section for the version, emptied when
    /// it would repeat the previous release's body
    async fn release_body(&self, version: &str) -> Result<String, ReleaseError> {
        let content = self
            .github
            .get_file("CHANGELOG.md", None)
            .await?
            .unwrap_or_default();
        if content.is_empty() {
            info!("CHANGELOG.md not found");
            return Ok(String::new());
        }

        let changelog = parse_changelog(version, &content);

        let previous_body = self.github.latest_release_body().await?;
        if previous_body.as_deref() == Some(changelog.as_str()) {
            return Ok(String::new());
        }

        Ok(changelog)
    }

    /// Upload the release to PyPI. Returns whether an upload happened.
    #[instrument(skip(self, conf))]
    pub async fn make_pypi_release(
        &mut self,
        conf: &ReleaseConf,
        pypi_project: &str,
        version: &str,
    ) -> Result<bool, ReleaseError> {
        if !conf.pypi {
            debug!("Skipping PyPi release");
            return Ok(false);
        }

        let latest_pypi = coerce_version(&self.pypi.latest_version(pypi_project).await?)?;
        let new_version = coerce_version(version)?;
        if latest_pypi >= new_version {
            info!(
                "{}-{} or higher version has already been released on PyPi",
                pypi_project, version
            );
            return Ok(false);
        }

        let repo = self.working_clone();
        repo.clone_or_update().await?;
        repo.fetch_tags().await?;
        repo.checkout(version).await?;

        let result = self.pypi.release(repo.path(), self.settings.dry_run).await;

        // Leave the clone on the default branch whatever happened
        if let Ok(default_branch) = self.default_branch().await {
            let _ = repo.checkout(&default_branch).await;
        }

        match result {
            Ok(()) => {
                if self.settings.dry_run {
                    let message =
                        format!("I would have released version {} on PyPI now.", version);
                    info!("{}", message);
                    self.record_comment(message);
                    return Ok(false);
                }
                let message = format!("I just released version {} on PyPI", version);
                info!("{}", message);
                self.record_comment(message);
                Ok(true)
            }
            Err(e) => {
                let message = format!("I just failed to release version {} on PyPI", version);
                error!("{}", message);
                self.record_comment(message);
                Err(e)
            }
        }
    }

    /// Release to Fedora dist-git. Returns whether a release happened.
    #[instrument(skip(self, conf))]
    pub async fn make_fedora_release(
        &mut self,
        conf: &ReleaseConf,
        version: &str,
    ) -> Result<bool, ReleaseError> {
        if !conf.fedora {
            debug!("Skipping Fedora release");
            return Ok(false);
        }

        let released = self
            .fedora
            .release(version, &conf.fedora_branches, self.settings.dry_run)
            .await?;
        if released {
            let message = format!("I just released version {} in Fedora", version);
            info!("{}", message);
            self.record_comment(message);
        }
        Ok(released)
    }
}

/// Body of the release PR the bot opens
fn release_pr_body(log: &str, changed_version_files: &[String], branch: &str) -> String {
    let mut message = format!(
        "Hi,\n you have requested a release PR from me. Here it is!\n\
         This is the changelog I created:\n\
         ### Changes\n{}\n\nYou can change it by editing `CHANGELOG.md` \
         in the root of this repository and pushing to `{}` branch \
         before merging this PR.\n",
        log, branch
    );

    match changed_version_files.len() {
        0 => message.push_str("I didn't find any files where  `__version__` is set."),
        1 => message.push_str("I have also updated the  `__version__ ` in file:\n"),
        _ => message.push_str(
            "There were multiple files where  `__version__ ` was set, \
             so I left updating them up to you. These are the files:\n",
        ),
    }

    for file in changed_version_files {
        message.push_str(&format!("* {}\n", file));
    }

    message
}
