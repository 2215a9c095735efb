// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for odh-test-fixtures.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;

use odh_test_fixtures::NameRegistry;
use odh_test_fixtures::fixtures::StorageSize;
use odh_test_fixtures::fixtures::validation::{MAX_NAME_LEN, MAX_PREFIX_LEN, dns_label};
use odh_test_fixtures::lifecycle::state_machine::BundleStateMachine;
use odh_test_fixtures::lifecycle::{BundleEvent, BundlePhase};
use odh_test_fixtures::resources::common::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, RUN_ID_LABEL};
use odh_test_fixtures::resources::standard_labels;

/// Strategy for generating valid DNS-1123 labels up to `max` characters.
fn dns_label_of(max: usize) -> impl Strategy<Value = String> {
    let inner = max.saturating_sub(2);
    proptest::string::string_regex(&format!("[a-z0-9]([-a-z0-9]{{0,{inner}}}[a-z0-9])?"))
        .expect("valid regex")
}

/// Strategy for generating random phases.
fn any_phase() -> impl Strategy<Value = BundlePhase> {
    prop_oneof![
        Just(BundlePhase::Unprovisioned),
        Just(BundlePhase::Provisioning),
        Just(BundlePhase::Ready),
        Just(BundlePhase::TearingDown),
        Just(BundlePhase::Released),
        any::<bool>().prop_map(|cleanup_attempted| BundlePhase::Failed { cleanup_attempted }),
    ]
}

/// Strategy for generating random events.
fn any_event() -> impl Strategy<Value = BundleEvent> {
    prop_oneof![
        Just(BundleEvent::ProvisioningStarted),
        Just(BundleEvent::ResourcesReady),
        any::<bool>()
            .prop_map(|cleanup_attempted| BundleEvent::ProvisioningFailed { cleanup_attempted }),
        Just(BundleEvent::TeardownStarted),
        Just(BundleEvent::TeardownCompleted),
        Just(BundleEvent::TeardownFailed),
    ]
}

proptest! {
    /// Property: Same (phase, event) pair always yields the same result.
    #[test]
    fn test_state_transitions_deterministic(
        phase in any_phase(),
        event in any_event()
    ) {
        let sm = BundleStateMachine::new();
        prop_assert_eq!(sm.can_transition(phase, event), sm.can_transition(phase, event));
    }

    /// Property: Released never transitions again.
    #[test]
    fn test_released_is_terminal(event in any_event()) {
        let sm = BundleStateMachine::new();
        prop_assert!(
            !sm.can_transition(BundlePhase::Released, event),
            "Released should not transition on {:?}", event
        );
    }

    /// Property: Teardown can only start from Ready.
    #[test]
    fn test_teardown_only_from_ready(phase in any_phase()) {
        let sm = BundleStateMachine::new();
        prop_assert_eq!(
            sm.can_transition(phase, BundleEvent::TeardownStarted),
            phase == BundlePhase::Ready
        );
    }

    /// Property: valid_events agrees with can_transition.
    #[test]
    fn test_valid_events_consistent(phase in any_phase(), event in any_event()) {
        let sm = BundleStateMachine::new();
        prop_assert_eq!(
            sm.valid_events(phase).contains(&event),
            sm.can_transition(phase, event)
        );
    }

    /// Property: Generated labels are accepted.
    #[test]
    fn test_valid_labels_accepted(name in dns_label_of(MAX_NAME_LEN)) {
        prop_assert!(dns_label("name", &name, MAX_NAME_LEN).is_ok(), "rejected {}", name);
    }

    /// Property: Uppercase letters and underscores are always rejected.
    #[test]
    fn test_invalid_characters_rejected(
        head in dns_label_of(20),
        bad in prop_oneof![Just('_'), Just('.'), proptest::char::range('A', 'Z')],
        tail in dns_label_of(20),
    ) {
        let name = format!("{head}{bad}{tail}");
        prop_assert!(dns_label("name", &name, MAX_NAME_LEN).is_err(), "accepted {}", name);
    }

    /// Property: Prefixes over the prefix limit are rejected.
    #[test]
    fn test_prefix_length_limit(extra in 1usize..20) {
        let prefix = "p".repeat(MAX_PREFIX_LEN + extra);
        prop_assert!(dns_label("prefix", &prefix, MAX_PREFIX_LEN).is_err());
    }

    /// Property: Any positive quantity with a known suffix parses.
    #[test]
    fn test_positive_storage_sizes_parse(
        amount in 1u64..1_000_000,
        suffix in prop_oneof![Just(""), Just("Mi"), Just("Gi"), Just("Ti"), Just("G")],
    ) {
        let text = format!("{amount}{suffix}");
        let size: StorageSize = text.parse().unwrap();
        prop_assert_eq!(size.as_str(), text.as_str());
    }

    /// Property: User labels never override ownership labels.
    #[test]
    fn test_ownership_labels_win(
        values in proptest::collection::vec("[a-z]{1,10}", 4),
        run_id in "[a-z0-9]{1,12}",
    ) {
        let mut extra = BTreeMap::new();
        extra.insert(MANAGED_BY_LABEL.to_string(), values[0].clone());
        extra.insert(RUN_ID_LABEL.to_string(), values[1].clone());
        extra.insert("team".to_string(), values[2].clone());
        let labels = standard_labels("mr", &values[3], &run_id, &extra);

        prop_assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGED_BY_VALUE));
        prop_assert_eq!(labels.get(RUN_ID_LABEL), Some(&run_id));
        prop_assert_eq!(labels.get("team"), Some(&values[2]));
    }

    /// Property: Generated names are unique among active leases.
    #[test]
    fn test_generated_names_unique(
        prefix in dns_label_of(MAX_PREFIX_LEN),
        count in 1usize..50,
    ) {
        let registry = NameRegistry::new();
        let leases: Vec<_> = (0..count)
            .map(|_| registry.claim_generated(Some("ns"), &prefix).unwrap())
            .collect();
        let names: HashSet<&str> = leases.iter().map(|l| l.name()).collect();

        prop_assert_eq!(names.len(), count);
        prop_assert_eq!(registry.active(), count);
        for name in &names {
            prop_assert!(name.len() <= MAX_NAME_LEN);
            prop_assert!(dns_label("name", name, MAX_NAME_LEN).is_ok());
        }
        drop(leases);
        prop_assert_eq!(registry.active(), 0);
    }

    /// Property: The same name may be held once per namespace.
    #[test]
    fn test_claims_scoped_by_namespace(name in dns_label_of(MAX_NAME_LEN)) {
        let registry = NameRegistry::new();
        let first = registry.claim(Some("a"), &name).unwrap();
        let _other_ns = registry.claim(Some("b"), &name).unwrap();
        prop_assert!(registry.claim(Some("a"), &name).is_err());
        drop(first);
        prop_assert!(registry.claim(Some("a"), &name).is_ok());
    }
}
