//! Unit tests for the connection table.

use rstest::{fixture, rstest};

use super::*;
use crate::tests::{FakeConnection, ScriptHandle, ScriptedTransport};
use crate::transport::TransportFactory;

const FILE_LOCATOR: &str = "probe:///test/probes/probe_file";
const FAMILY_LOCATOR: &str = "probe:///test/probes/probe_family";

struct Harness {
    script: ScriptHandle,
    table: ConnectionTable<ScriptedTransport>,
}

#[fixture]
fn harness() -> Harness {
    let script = ScriptHandle::default();
    let transport = script
        .factory()
        .create()
        .expect("scripted factory never fails");
    Harness {
        script,
        table: ConnectionTable::new(transport),
    }
}

fn checkout(
    table: &mut ConnectionTable<ScriptedTransport>,
    object_type: ObjectType,
    locator: &str,
) -> Lease<FakeConnection> {
    match table.checkout(object_type, || locator.to_owned()) {
        Ok(lease) => lease,
        Err(CheckoutError::InFlight) => panic!("entry unexpectedly in flight"),
        Err(CheckoutError::Open { source, .. }) => panic!("open failed: {source}"),
    }
}

#[rstest]
fn entries_stay_sorted_by_type(mut harness: Harness) {
    harness.table.insert(ObjectType::RUNLEVEL, "probe:///p/probe_runlevel");
    harness.table.insert(ObjectType::FAMILY, FAMILY_LOCATOR);
    harness.table.insert(ObjectType::FILE, FILE_LOCATOR);

    let order: Vec<_> = harness.table.entries().map(ConnectionEntry::object_type).collect();
    assert_eq!(
        order,
        vec![ObjectType::FAMILY, ObjectType::FILE, ObjectType::RUNLEVEL]
    );
    assert!(harness.table.entries().all(|entry| !entry.is_connected()));
}

#[rstest]
fn insert_keeps_the_existing_entry(mut harness: Harness) {
    harness.table.insert(ObjectType::FILE, FILE_LOCATOR);
    let entry = harness.table.insert(ObjectType::FILE, "probe:///elsewhere/probe_file");
    assert_eq!(entry.locator(), FILE_LOCATOR);
    assert_eq!(harness.table.len(), 1);
}

#[rstest]
fn find_misses_unknown_types(mut harness: Harness) {
    assert!(harness.table.is_empty());
    harness.table.insert(ObjectType::FILE, FILE_LOCATOR);
    assert!(harness.table.find(ObjectType::FAMILY).is_none());
    assert!(harness.table.find(ObjectType::FILE).is_some());
}

#[rstest]
fn checkout_opens_lazily_and_checkin_caches(mut harness: Harness) {
    let lease = checkout(&mut harness.table, ObjectType::FILE, FILE_LOCATOR);
    assert_eq!(lease.locator, FILE_LOCATOR);
    let entry = harness.table.find(ObjectType::FILE).expect("entry created");
    assert!(entry.is_in_flight());
    assert!(!entry.is_connected());

    harness.table.checkin(ObjectType::FILE, lease.descriptor);
    let reused = checkout(&mut harness.table, ObjectType::FILE, "unused");
    assert_eq!(reused.descriptor.id, 1);
    assert_eq!(harness.script.get().opens, vec![FILE_LOCATOR.to_owned()]);
}

#[rstest]
fn second_checkout_of_busy_entry_is_refused(mut harness: Harness) {
    let _lease = checkout(&mut harness.table, ObjectType::FILE, FILE_LOCATOR);
    assert!(matches!(
        harness.table.checkout(ObjectType::FILE, || FILE_LOCATOR.to_owned()),
        Err(CheckoutError::InFlight)
    ));
    assert_eq!(harness.script.get().opens.len(), 1);
}

#[rstest]
fn failed_open_leaves_entry_idle(mut harness: Harness) {
    harness.script.get().failing_opens = 1;
    let result = harness.table.checkout(ObjectType::FILE, || FILE_LOCATOR.to_owned());
    assert!(matches!(
        result,
        Err(CheckoutError::Open { ref locator, .. }) if locator == FILE_LOCATOR
    ));
    let entry = harness.table.find(ObjectType::FILE).expect("entry kept");
    assert!(!entry.is_in_flight());
    assert!(!entry.is_connected());
}

#[rstest]
fn discard_closes_and_unconnects(mut harness: Harness) {
    let lease = checkout(&mut harness.table, ObjectType::FILE, FILE_LOCATOR);
    harness.table.discard(ObjectType::FILE, lease.descriptor);

    assert_eq!(harness.script.get().closed, vec![1]);
    let entry = harness.table.find(ObjectType::FILE).expect("entry kept");
    assert!(!entry.is_connected());
    assert!(!entry.is_in_flight());
    assert_eq!(entry.locator(), FILE_LOCATOR);
}

#[rstest]
fn discard_tolerates_close_failure(mut harness: Harness) {
    harness.script.get().failing_close = true;
    let lease = checkout(&mut harness.table, ObjectType::FILE, FILE_LOCATOR);
    harness.table.discard(ObjectType::FILE, lease.descriptor);
    assert!(!harness.table.find(ObjectType::FILE).expect("entry kept").is_in_flight());
}

#[rstest]
fn remove_closes_cached_descriptor(mut harness: Harness) {
    let lease = checkout(&mut harness.table, ObjectType::FILE, FILE_LOCATOR);
    harness.table.checkin(ObjectType::FILE, lease.descriptor);

    assert!(harness.table.remove(ObjectType::FILE).expect("remove succeeds"));
    assert!(harness.table.find(ObjectType::FILE).is_none());
    assert_eq!(harness.script.get().closed, vec![1]);
    assert!(!harness.table.remove(ObjectType::FILE).expect("nothing to remove"));
}

#[rstest]
fn remove_refuses_in_flight_entry(mut harness: Harness) {
    let _lease = checkout(&mut harness.table, ObjectType::FILE, FILE_LOCATOR);
    let err = harness
        .table
        .remove(ObjectType::FILE)
        .expect_err("entry is busy");
    assert!(matches!(err, TransportError::Busy { object_type } if object_type == ObjectType::FILE));
    assert_eq!(harness.table.len(), 1);
}

#[rstest]
fn remove_reports_close_failure_but_forgets_entry(mut harness: Harness) {
    let lease = checkout(&mut harness.table, ObjectType::FAMILY, FAMILY_LOCATOR);
    harness.table.checkin(ObjectType::FAMILY, lease.descriptor);
    harness.script.get().failing_close = true;

    assert!(harness.table.remove(ObjectType::FAMILY).is_err());
    assert!(harness.table.is_empty());
}

#[rstest]
fn commands_are_registered_once(mut harness: Harness) {
    harness
        .table
        .ensure_commands_registered()
        .expect("registration succeeds");
    harness
        .table
        .ensure_commands_registered()
        .expect("already registered");

    assert!(harness.table.commands_registered());
    assert_eq!(harness.script.get().registrations, ProbeCommand::ALL.to_vec());
}

#[rstest]
fn partial_registration_leaves_flag_unset(mut harness: Harness) {
    harness.script.get().failing_registration = Some(ProbeCommand::StateFetch);
    let err = harness
        .table
        .ensure_commands_registered()
        .expect_err("second command fails");

    assert!(matches!(
        err,
        TransportError::Registration {
            command: ProbeCommand::StateFetch,
            ..
        }
    ));
    assert!(!harness.table.commands_registered());
    assert_eq!(
        harness.script.get().registrations,
        vec![ProbeCommand::ObjectEval]
    );
}
