// Release version helpers: title parsing and version-file rewriting

use lazy_static::lazy_static;
use regex::Regex;
use semver::Version;
use std::path::Path;

use crate::errors::ReleaseError;

lazy_static! {
    static ref EXPLICIT_RELEASE_RE: Regex =
        Regex::new(r"(?i)^\s*(\d+\.\d+\.\d+)\s+release\s*$").expect("valid regex");
    static ref BUMP_RELEASE_RE: Regex =
        Regex::new(r"(?i)^\s*new\s+(major|minor|patch)\s+release\s*$").expect("valid regex");
    static ref SETUP_VERSION_RE: Regex =
        Regex::new(r#"version\s*=\s*["']([^"']+)["']"#).expect("valid regex");
    static ref DUNDER_VERSION_RE: Regex =
        Regex::new(r#"__version__\s*=\s*["']([^"']+)["']"#).expect("valid regex");
}

/// Files the bot rewrites when preparing a release commit
pub const VERSION_FILE_CANDIDATES: [&str; 4] =
    ["setup.py", "__init__.py", "__about__.py", "version.py"];

/// Parse a release version out of an issue or PR title.
///
/// `"X.Y.Z release"` names the version explicitly; `"new major release"`,
/// `"new minor release"` and `"new patch release"` bump the latest released
/// version. Any other title is not a release request.
pub fn version_from_title(title: &str, latest: &Version) -> Option<Version> {
    if let Some(caps) = EXPLICIT_RELEASE_RE.captures(title) {
        return Version::parse(&caps[1]).ok();
    }

    if let Some(caps) = BUMP_RELEASE_RE.captures(title) {
        let bumped = match caps[1].to_ascii_lowercase().as_str() {
            "major" => Version::new(latest.major + 1, 0, 0),
            "minor" => Version::new(latest.major, latest.minor + 1, 0),
            _ => Version::new(latest.major, latest.minor, latest.patch + 1),
        };
        return Some(bumped);
    }

    None
}

/// Lenient version parse for tags and release titles in the wild:
/// tolerates a leading `v` and missing components (`"1.2"` -> `1.2.0`)
pub fn coerce_version(raw: &str) -> Result<Version, ReleaseError> {
    let trimmed = raw.trim().trim_start_matches('v');

    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    let mut parts: Vec<&str> = trimmed.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    let padded = parts.join(".");

    Version::parse(&padded).map_err(|e| ReleaseError::InvalidVersion {
        version: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite version declarations in a checked-out tree to `version`.
///
/// Scans for the candidate files (`version=` in setup.py, `__version__=`
/// elsewhere) and returns the root-relative paths of files that were
/// actually changed, ready for `git add`.
pub async fn update_version_files(root: &Path, version: &str) -> std::io::Result<Vec<String>> {
    let mut changed = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    dirs.push(path);
                }
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !VERSION_FILE_CANDIDATES.contains(&name.as_str()) {
                continue;
            }

            let pattern: &Regex = if name == "setup.py" {
                &SETUP_VERSION_RE
            } else {
                &DUNDER_VERSION_RE
            };

            let content = tokio::fs::read_to_string(&path).await?;
            if let Some(updated) = splice_version(&content, pattern, version) {
                tokio::fs::write(&path, updated).await?;
                let relative = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                changed.push(relative);
            }
        }
    }

    changed.sort();
    Ok(changed)
}

/// Replace the declared version in `content`, preserving surrounding
/// formatting. Returns None when no declaration is found or it already
/// matches.
fn splice_version(content: &str, pattern: &Regex, version: &str) -> Option<String> {
    let caps = pattern.captures(content)?;
    let declared = caps.get(1)?;
    if declared.as_str() == version {
        return None;
    }

    let mut updated = String::with_capacity(content.len() + version.len());
    updated.push_str(&content[..declared.start()]);
    updated.push_str(version);
    updated.push_str(&content[declared.end()..]);
    Some(updated)
}
