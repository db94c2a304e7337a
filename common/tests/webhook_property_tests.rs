// Property-based tests for webhook signature validation and payload
// classification

use common::models::WebhookTrigger;
use common::webhook::{classify_payload, sign_payload, validate_signature};
use proptest::prelude::*;

proptest! {
    /// *For any* payload and secret, a freshly computed signature
    /// validates.
    #[test]
    fn property_signature_round_trips(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        secret in "[a-zA-Z0-9]{1,64}",
    ) {
        let header = sign_payload(&payload, &secret);
        prop_assert!(validate_signature(&payload, &header, &secret).is_ok());
    }

    /// *For any* payload, validating against a different secret fails.
    #[test]
    fn property_signature_binds_the_secret(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        secret in "[a-zA-Z0-9]{1,64}",
        other_secret in "[a-zA-Z0-9]{1,64}",
    ) {
        prop_assume!(secret != other_secret);
        let header = sign_payload(&payload, &secret);
        prop_assert!(validate_signature(&payload, &header, &other_secret).is_err());
    }

    /// *For any* payload, flipping a byte invalidates the signature.
    #[test]
    fn property_signature_binds_the_payload(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        flip_index in 0usize..512,
        secret in "[a-zA-Z0-9]{1,64}",
    ) {
        let header = sign_payload(&payload, &secret);

        let mut tampered = payload.clone();
        let index = flip_index % tampered.len();
        tampered[index] ^= 0xFF;

        prop_assert!(validate_signature(&tampered, &header, &secret).is_err());
    }

    /// *For any* issue number and title, an opened-issue payload classifies
    /// into the matching trigger.
    #[test]
    fn property_opened_issues_classify(
        issue_number in 1u64..100_000,
        title in "[a-zA-Z0-9 .]{1,60}",
    ) {
        let payload = serde_json::json!({
            "action": "opened",
            "issue": {"number": issue_number, "title": title},
            "repository": {"name": "project", "owner": {"login": "owner"}}
        });

        match classify_payload(&payload) {
            Some(WebhookTrigger::IssueOpened { issue_number: n, title: t, .. }) => {
                prop_assert_eq!(n, issue_number);
                prop_assert_eq!(t, title);
            }
            other => prop_assert!(false, "unexpected classification: {:?}", other),
        }
    }

    /// *For any* closed PR payload, classification fires only when the PR
    /// was actually merged.
    #[test]
    fn property_only_merged_prs_classify(
        pr_number in 1u64..100_000,
        merged in any::<bool>(),
    ) {
        let payload = serde_json::json!({
            "action": "closed",
            "pull_request": {"number": pr_number, "title": "0.1.0 release", "merged": merged},
            "repository": {"name": "project", "owner": {"login": "owner"}}
        });

        let trigger = classify_payload(&payload);
        if merged {
            let is_merged_trigger = matches!(
                trigger,
                Some(WebhookTrigger::PullRequestMerged { pr_number: n, .. }) if n == pr_number
            );
            prop_assert!(is_merged_trigger);
        } else {
            prop_assert!(trigger.is_none());
        }
    }
}
