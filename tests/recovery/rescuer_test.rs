//! Full rescue: resolve the target, then recover it.

use std::sync::Arc;

use tokio::sync::watch;

use btrescue::command::CommandError;
use btrescue::network::{NmcliNetworkManager, ResolveError};
use btrescue::recovery::{
    RecoveryOutcome, RecoveryPlan, Recoverer, RescueAction, RescueError, Rescuer,
};

use crate::fakes::{entry, FakeNetwork, ScriptedRunner};

#[tokio::test(start_paused = true)]
async fn rescues_inactive_bluetooth_connection() {
    let runner = ScriptedRunner::new();
    let nm = FakeNetwork::with(
        vec![
            entry("Home WiFi", "uuid-wifi", "802-11-wireless"),
            entry("Phone PAN", "uuid-bt", "bluetooth"),
        ],
        vec!["uuid-wifi"],
    );
    let rescuer = Rescuer::new(
        nm,
        Recoverer::new(runner.clone(), RecoveryPlan::default()),
        "bluetooth",
    );
    let (_tx, shutdown) = watch::channel(false);

    let outcome = rescuer.rescue(&shutdown).await.expect("rescue succeeds");

    assert_eq!(outcome, RecoveryOutcome::Recovered { attempts: 1 });
    assert_eq!(
        runner.calls(),
        vec![
            "rmmod hci_uart",
            "modprobe hci_uart",
            "nmcli connection up Phone PAN"
        ]
    );
}

#[tokio::test]
async fn active_connection_is_left_alone() {
    let runner = ScriptedRunner::new();
    let nm = FakeNetwork::with(vec![entry("Phone PAN", "uuid-bt", "bluetooth")], vec!["uuid-bt"]);
    let rescuer = Rescuer::new(
        nm,
        Recoverer::new(runner.clone(), RecoveryPlan::default()),
        "bluetooth",
    );
    let (_tx, shutdown) = watch::channel(false);

    let outcome = rescuer.rescue(&shutdown).await.expect("nothing to do");

    assert_eq!(outcome, RecoveryOutcome::AlreadyActive);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn unresolved_target_runs_no_commands() {
    let runner = ScriptedRunner::new();
    let nm = FakeNetwork::with(vec![], vec![]);
    let rescuer = Rescuer::new(
        nm,
        Recoverer::new(runner.clone(), RecoveryPlan::default()),
        "bluetooth",
    );
    let (_tx, shutdown) = watch::channel(false);

    let err = rescuer.rescue(&shutdown).await.expect_err("no profile");

    assert!(matches!(
        err,
        RescueError::Resolve(ResolveError::NotUnique { count: 0, .. })
    ));
    assert!(!err.is_cancelled());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn cancelled_lookup_counts_as_cancellation() {
    let runner = ScriptedRunner::new();
    runner.respond_always(
        "nmcli -t -f NAME,UUID,TYPE connection show",
        Err(CommandError::Cancelled {
            program: "nmcli".to_owned(),
        }),
    );
    let nm = Arc::new(NmcliNetworkManager::new(runner.clone()));
    let rescuer = Rescuer::new(
        nm,
        Recoverer::new(runner.clone(), RecoveryPlan::default()),
        "bluetooth",
    );
    let (_tx, shutdown) = watch::channel(false);

    let err = rescuer.rescue(&shutdown).await.expect_err("lookup cancelled");
    assert!(err.is_cancelled());
    assert_eq!(runner.calls().len(), 1);
}
