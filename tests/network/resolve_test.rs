//! Resolving the single bluetooth connection profile.

use tokio::sync::watch;

use btrescue::network::{read_profiles, resolve_target, QueryError, ResolveError};

use crate::fakes::{entry, FakeNetwork};

#[tokio::test]
async fn resolves_single_profile_of_kind() {
    let nm = FakeNetwork::with(
        vec![
            entry("Home WiFi", "uuid-wifi", "802-11-wireless"),
            entry("Phone PAN", "uuid-bt", "bluetooth"),
        ],
        vec!["uuid-wifi"],
    );
    let (_tx, shutdown) = watch::channel(false);

    let target = resolve_target(nm.as_ref(), "bluetooth", &shutdown)
        .await
        .expect("one bluetooth profile exists");

    assert_eq!(target.id, "Phone PAN");
    assert_eq!(target.uuid, "uuid-bt");
    assert_eq!(target.kind, "bluetooth");
    assert!(!target.is_active);
}

#[tokio::test]
async fn marks_profile_active_by_uuid() {
    let nm = FakeNetwork::with(vec![entry("Phone PAN", "uuid-bt", "bluetooth")], vec!["uuid-bt"]);
    let (_tx, shutdown) = watch::channel(false);

    let target = resolve_target(nm.as_ref(), "bluetooth", &shutdown)
        .await
        .expect("one bluetooth profile exists");
    assert!(target.is_active);
}

#[tokio::test]
async fn zero_matches_is_not_unique() {
    let nm = FakeNetwork::with(vec![entry("Home WiFi", "uuid-wifi", "802-11-wireless")], vec![]);
    let (_tx, shutdown) = watch::channel(false);

    let err = resolve_target(nm.as_ref(), "bluetooth", &shutdown)
        .await
        .expect_err("no bluetooth profile");

    match &err {
        ResolveError::NotUnique {
            kind,
            count,
            candidates,
        } => {
            assert_eq!(kind, "bluetooth");
            assert_eq!(*count, 0);
            assert_eq!(candidates.len(), 1);
        }
        other => panic!("expected NotUnique, got {other:?}"),
    }
    assert!(err.to_string().contains("found 0"));
}

#[tokio::test]
async fn two_matches_is_not_unique_and_lists_candidates() {
    let nm = FakeNetwork::with(
        vec![
            entry("Phone PAN", "uuid-1", "bluetooth"),
            entry("Tablet PAN", "uuid-2", "bluetooth"),
            entry("Home WiFi", "uuid-3", "802-11-wireless"),
        ],
        vec![],
    );
    let (_tx, shutdown) = watch::channel(false);

    let err = resolve_target(nm.as_ref(), "bluetooth", &shutdown)
        .await
        .expect_err("ambiguous bluetooth profiles");

    let message = err.to_string();
    assert!(message.contains("found 2"), "message: {message}");
    assert!(message.contains("Phone PAN"));
    assert!(message.contains("Tablet PAN"));
    assert!(matches!(
        err,
        ResolveError::NotUnique { count: 2, ref candidates, .. } if candidates.len() == 3
    ));
}

#[tokio::test]
async fn query_failure_propagates() {
    let nm = FakeNetwork::failing();
    let (_tx, shutdown) = watch::channel(false);

    let err = resolve_target(nm.as_ref(), "bluetooth", &shutdown)
        .await
        .expect_err("NetworkManager is down");
    assert!(matches!(err, ResolveError::Query(QueryError::Failed { .. })));
}

#[tokio::test]
async fn read_profiles_keeps_every_kind() {
    let nm = FakeNetwork::with(
        vec![
            entry("Phone PAN", "uuid-bt", "bluetooth"),
            entry("Home WiFi", "uuid-wifi", "802-11-wireless"),
        ],
        vec!["uuid-wifi"],
    );
    let (_tx, shutdown) = watch::channel(false);

    let profiles = read_profiles(nm.as_ref(), &shutdown)
        .await
        .expect("listing succeeds");
    assert_eq!(profiles.len(), 2);
    assert!(!profiles[0].is_active);
    assert!(profiles[1].is_active);
}
