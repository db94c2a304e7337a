// GitHub webhook signature validation and payload classification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::errors::WebhookError;
use crate::models::{Repository, WebhookTrigger};

type HmacSha256 = Hmac<Sha256>;

/// Validate GitHub's `X-Hub-Signature-256` header against the raw payload.
///
/// The header format is `sha256=<hex digest>`; comparison is constant-time.
pub fn validate_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<(), WebhookError> {
    let signature = signature_header
        .strip_prefix("sha256=")
        .ok_or(WebhookError::InvalidSignature)?;

    let signature_bytes = hex::decode(signature).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(payload);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Compute the signature header value for a payload (used by tests and
/// outgoing notifications)
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Classify a webhook payload into a release-relevant trigger.
///
/// Only two events matter to the release workflow: a newly opened issue
/// (possible release request) and a closed pull request that was merged
/// (possible release PR landing). Everything else yields None.
pub fn classify_payload(payload: &serde_json::Value) -> Option<WebhookTrigger> {
    let repository = payload.get("repository")?;
    let repository = Repository::new(
        repository.get("owner")?.get("login")?.as_str()?,
        repository.get("name")?.as_str()?,
    );

    let action = payload.get("action")?.as_str()?;

    if let Some(issue) = payload.get("issue") {
        if action != "opened" {
            debug!(action, "Ignoring issue event");
            return None;
        }
        return Some(WebhookTrigger::IssueOpened {
            repository,
            issue_number: issue.get("number")?.as_u64()?,
            title: issue.get("title")?.as_str()?.to_string(),
        });
    }

    if let Some(pull_request) = payload.get("pull_request") {
        let merged = pull_request
            .get("merged")
            .and_then(|m| m.as_bool())
            .unwrap_or(false);
        if action != "closed" || !merged {
            debug!(action, merged, "Ignoring pull request event");
            return None;
        }
        return Some(WebhookTrigger::PullRequestMerged {
            repository,
            pr_number: pull_request.get("number")?.as_u64()?,
            title: pull_request.get("title")?.as_str()?.to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repository_fragment() -> serde_json::Value {
        json!({
            "name": "project",
            "owner": {"login": "owner"}
        })
    }

    #[test]
    fn test_signature_round_trip() {
        let payload = br#"{"action": "opened"}"#;
        let header = sign_payload(payload, "secret");
        assert!(header.starts_with("sha256="));
        assert!(validate_signature(payload, &header, "secret").is_ok());
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let header = sign_payload(b"original", "secret");
        assert!(validate_signature(b"tampered", &header, "secret").is_err());
    }

    #[test]
    fn test_signature_rejects_wrong_secret() {
        let header = sign_payload(b"payload", "secret");
        assert!(validate_signature(b"payload", &header, "other").is_err());
    }

    #[test]
    fn test_signature_requires_sha256_prefix() {
        let err = validate_signature(b"payload", "deadbeef", "secret").unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn test_classify_opened_issue() {
        let payload = json!({
            "action": "opened",
            "issue": {"number": 7, "title": "0.1.0 release"},
            "repository": repository_fragment(),
        });

        let trigger = classify_payload(&payload).unwrap();
        assert_eq!(
            trigger,
            WebhookTrigger::IssueOpened {
                repository: Repository::new("owner", "project"),
                issue_number: 7,
                title: "0.1.0 release".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_ignores_closed_issue() {
        let payload = json!({
            "action": "closed",
            "issue": {"number": 7, "title": "0.1.0 release"},
            "repository": repository_fragment(),
        });
        assert!(classify_payload(&payload).is_none());
    }

    #[test]
    fn test_classify_merged_pull_request() {
        let payload = json!({
            "action": "closed",
            "pull_request": {"number": 12, "title": "0.2.0 release", "merged": true},
            "repository": repository_fragment(),
        });

        let trigger = classify_payload(&payload).unwrap();
        assert_eq!(
            trigger,
            WebhookTrigger::PullRequestMerged {
                repository: Repository::new("owner", "project"),
                pr_number: 12,
                title: "0.2.0 release".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_ignores_unmerged_close() {
        let payload = json!({
            "action": "closed",
            "pull_request": {"number": 12, "title": "0.2.0 release", "merged": false},
            "repository": repository_fragment(),
        });
        assert!(classify_payload(&payload).is_none());
    }

    #[test]
    fn test_classify_ignores_unrelated_events() {
        let payload = json!({
            "action": "created",
            "comment": {"body": "hello"},
            "repository": repository_fragment(),
        });
        assert!(classify_payload(&payload).is_none());
    }
}
