// GitHub REST API client for the release workflow

pub mod app;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use semver::Version;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::{GithubConfig, RepositoryConfig, Settings};
use crate::errors::GithubError;
use crate::version::coerce_version;

const MEDIA_TYPE_JSON: &str = "application/vnd.github+json";
const MEDIA_TYPE_RAW: &str = "application/vnd.github.raw";

/// A published release
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl Release {
    /// Display title, matching what the release workflow compares versions
    /// against
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.tag_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

/// An issue as returned by the issues API. Pull requests also appear there;
/// they carry a `pull_request` key and are filtered out of issue listings.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub user: Account,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub user: Account,
    pub html_url: String,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RepositoryInfo {
    default_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PermissionInfo {
    permission: String,
}

/// GitHub REST v3 client bound to a single repository
#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    owner: String,
    name: String,
    token: String,
}

impl GithubClient {
    pub fn new(github: &GithubConfig, repository: &RepositoryConfig) -> Result<Self, GithubError> {
        Self::with_token(github, repository, github.token.clone())
    }

    pub fn with_token(
        github: &GithubConfig,
        repository: &RepositoryConfig,
        token: String,
    ) -> Result<Self, GithubError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("release-bot")
            .build()
            .map_err(|e| GithubError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: github.api_url.trim_end_matches('/').to_string(),
            owner: repository.owner.clone(),
            name: repository.name.clone(),
            token,
        })
    }

    /// Build a client from settings, minting an installation token when
    /// GitHub App credentials are configured
    pub async fn from_settings(settings: &Settings) -> Result<Self, GithubError> {
        let token = app::resolve_token(&settings.github).await?;
        Self::with_token(&settings.github, &settings.repository, token)
    }

    /// The token this client authenticates with (needed for authenticated
    /// clone URLs)
    pub fn token(&self) -> &str {
        &self.token
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, self.name, path)
    }

    async fn check(response: Response) -> Result<Response, GithubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(GithubError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, GithubError> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_JSON)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GithubError::UnexpectedResponse(e.to_string()))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<T, GithubError> {
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_JSON)
            .json(&body)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GithubError::UnexpectedResponse(e.to_string()))
    }

    /// Latest released version, by semver ordering of release titles.
    /// Returns "0.0.0" when the project has no release yet.
    #[instrument(skip(self))]
    pub async fn latest_release(&self) -> Result<String, GithubError> {
        let releases: Vec<Release> = self
            .get_json(&self.repo_url("/releases?per_page=100"))
            .await?;

        if releases.is_empty() {
            debug!("There is no github release");
            return Ok("0.0.0".to_string());
        }

        let mut versions: Vec<(Version, String)> = Vec::new();
        for release in &releases {
            match coerce_version(release.title()) {
                Ok(version) => versions.push((version, release.title().to_string())),
                Err(_) => warn!(title = release.title(), "Skipping unparseable release title"),
            }
        }

        versions.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(versions
            .pop()
            .map(|(_, title)| title)
            .unwrap_or_else(|| "0.0.0".to_string()))
    }

    /// Body of the most recent release, for changelog deduplication
    pub async fn latest_release_body(&self) -> Result<Option<String>, GithubError> {
        let response = self
            .http
            .get(self.repo_url("/releases/latest"))
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_JSON)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let release: Release = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GithubError::UnexpectedResponse(e.to_string()))?;
        Ok(release.body)
    }

    /// Fetch a file from the repository via the contents API.
    /// Returns None when the file does not exist.
    #[instrument(skip(self))]
    pub async fn get_file(
        &self,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<String>, GithubError> {
        debug!(path, "Fetching file from repository");

        let mut url = self.repo_url(&format!("/contents/{}", path));
        if let Some(git_ref) = git_ref {
            url.push_str(&format!("?ref={}", git_ref));
        }

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_RAW)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "File not found in repository");
            return Ok(None);
        }

        let content = Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| GithubError::UnexpectedResponse(e.to_string()))?;
        Ok(Some(content))
    }

    /// Open issues, with pull requests filtered out
    pub async fn open_issues(&self) -> Result<Vec<Issue>, GithubError> {
        let issues: Vec<Issue> = self
            .get_json(&self.repo_url("/issues?state=open&per_page=100"))
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect())
    }

    /// Merged pull requests, most recently updated first
    pub async fn merged_pull_requests(&self) -> Result<Vec<PullRequest>, GithubError> {
        let prs: Vec<PullRequest> = self
            .get_json(&self.repo_url(
                "/pulls?state=closed&sort=updated&direction=desc&per_page=100",
            ))
            .await?;
        Ok(prs.into_iter().filter(|pr| pr.merged_at.is_some()).collect())
    }

    pub async fn open_pull_requests(&self) -> Result<Vec<PullRequest>, GithubError> {
        self.get_json(&self.repo_url("/pulls?state=open&per_page=100"))
            .await
    }

    /// Number of an already-open PR whose title matches, if any
    pub async fn pr_exists(&self, title: &str) -> Result<Option<u64>, GithubError> {
        let wanted = title.to_lowercase();
        let open = self.open_pull_requests().await?;
        Ok(open
            .into_iter()
            .find(|pr| pr.title.to_lowercase().starts_with(&wanted))
            .map(|pr| pr.number))
    }

    #[instrument(skip(self, body))]
    pub async fn create_release(
        &self,
        tag: &str,
        name: &str,
        body: &str,
    ) -> Result<Release, GithubError> {
        self.post_json(
            &self.repo_url("/releases"),
            json!({
                "tag_name": tag,
                "name": name,
                "body": body,
            }),
        )
        .await
    }

    #[instrument(skip(self, body))]
    pub async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, GithubError> {
        self.post_json(
            &self.repo_url("/pulls"),
            json!({
                "title": title,
                "body": body,
                "head": head,
                "base": base,
            }),
        )
        .await
    }

    /// Label an issue or pull request (the labels endpoint covers both)
    pub async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), GithubError> {
        let _: serde_json::Value = self
            .post_json(
                &self.repo_url(&format!("/issues/{}/labels", number)),
                json!({ "labels": labels }),
            )
            .await?;
        Ok(())
    }

    /// Comment on an issue or pull request
    pub async fn comment(&self, number: u64, body: &str) -> Result<(), GithubError> {
        let _: serde_json::Value = self
            .post_json(
                &self.repo_url(&format!("/issues/{}/comments", number)),
                json!({ "body": body }),
            )
            .await?;
        Ok(())
    }

    pub async fn close_issue(&self, number: u64) -> Result<(), GithubError> {
        let response = self
            .http
            .patch(self.repo_url(&format!("/issues/{}", number)))
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_JSON)
            .json(&json!({ "state": "closed" }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, GithubError> {
        let response = self
            .http
            .get(self.repo_url(&format!("/branches/{}", branch)))
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_JSON)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    pub async fn default_branch(&self) -> Result<String, GithubError> {
        let info: RepositoryInfo = self.get_json(&self.repo_url("")).await?;
        Ok(info.default_branch)
    }

    /// Login of the authenticated account
    pub async fn username(&self) -> Result<String, GithubError> {
        let account: Account = self.get_json(&format!("{}/user", self.api_url)).await?;
        Ok(account.login)
    }

    /// Whether `username` may close the issue: its author, or a collaborator
    /// with write access
    pub async fn can_modify_issue(
        &self,
        username: &str,
        issue: &Issue,
    ) -> Result<bool, GithubError> {
        if issue.user.login == username {
            return Ok(true);
        }

        let response = self
            .http
            .get(self.repo_url(&format!("/collaborators/{}/permission", username)))
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, MEDIA_TYPE_JSON)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let info: PermissionInfo = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GithubError::UnexpectedResponse(e.to_string()))?;
        Ok(matches!(info.permission.as_str(), "admin" | "write"))
    }
}
