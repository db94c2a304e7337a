// Property-based tests for release version handling

use common::version::{coerce_version, version_from_title};
use proptest::prelude::*;
use semver::Version;

proptest! {
    /// *For any* version named explicitly in a "`X.Y.Z` release" title,
    /// parsing returns exactly that version, regardless of the latest
    /// released version.
    #[test]
    fn property_explicit_release_title_round_trips(
        major in 0u64..1000,
        minor in 0u64..1000,
        patch in 0u64..1000,
        latest_major in 0u64..1000,
    ) {
        let title = format!("{}.{}.{} release", major, minor, patch);
        let latest = Version::new(latest_major, 0, 0);

        let parsed = version_from_title(&title, &latest);
        prop_assert_eq!(parsed, Some(Version::new(major, minor, patch)));
    }

    /// *For any* latest version, a bump title produces a strictly greater
    /// version and resets the lower components.
    #[test]
    fn property_bump_titles_are_strictly_increasing(
        major in 0u64..1000,
        minor in 0u64..1000,
        patch in 0u64..1000,
        kind in prop::sample::select(vec!["major", "minor", "patch"]),
    ) {
        let latest = Version::new(major, minor, patch);
        let title = format!("new {} release", kind);

        let bumped = version_from_title(&title, &latest).unwrap();
        prop_assert!(bumped > latest);

        match kind {
            "major" => {
                prop_assert_eq!(bumped, Version::new(major + 1, 0, 0));
            }
            "minor" => {
                prop_assert_eq!(bumped, Version::new(major, minor + 1, 0));
            }
            _ => {
                prop_assert_eq!(bumped, Version::new(major, minor, patch + 1));
            }
        }
    }

    /// *For any* title without a release marker, nothing is parsed.
    #[test]
    fn property_non_release_titles_do_not_match(title in "[a-zA-Z ]{0,40}") {
        // Filter out accidental bump phrases
        prop_assume!(!title.to_lowercase().contains("release"));
        let latest = Version::new(1, 0, 0);
        prop_assert_eq!(version_from_title(&title, &latest), None);
    }

    /// *For any* two- or one-component version string, coercion pads with
    /// zeros instead of failing.
    #[test]
    fn property_coerce_pads_missing_components(major in 0u64..1000, minor in 0u64..1000) {
        let coerced = coerce_version(&format!("{}.{}", major, minor)).unwrap();
        prop_assert_eq!(coerced, Version::new(major, minor, 0));

        let coerced = coerce_version(&format!("{}", major)).unwrap();
        prop_assert_eq!(coerced, Version::new(major, 0, 0));
    }

    /// *For any* full version, a leading `v` never changes the result.
    #[test]
    fn property_coerce_strips_v_prefix(
        major in 0u64..1000,
        minor in 0u64..1000,
        patch in 0u64..1000,
    ) {
        let plain = coerce_version(&format!("{}.{}.{}", major, minor, patch)).unwrap();
        let prefixed = coerce_version(&format!("v{}.{}.{}", major, minor, patch)).unwrap();
        prop_assert_eq!(plain, prefixed);
    }
}
