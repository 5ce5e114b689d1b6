use rmmu_host::extras::rmmu::{PrintJob, RmmuEvent};
use rmmu_host::extras::routing::Routing;
use rmmu_host::sim::{SimBench, SHARED_SENSOR_CONFIG, TWO_UNIT_CONFIG};
use rmmu_host::RmmuError;

#[test]
fn test_remap_changes_are_notified() {
    let (mut hub, bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
    hub.remap(Some(vec![0, 3])).unwrap();
    assert_eq!(hub.get_status().remap, vec![vec![0, 3]]);
    hub.remap(None).unwrap();
    assert!(hub.get_status().remap.is_empty());

    let events = bench.notifier.events();
    assert!(events.contains(&RmmuEvent::RemapChanged { groups: vec![vec![0, 3]] }));
    assert!(events.contains(&RmmuEvent::RemapChanged { groups: vec![] }));
}

#[test]
fn test_remapped_print_starts_with_partner_tool() {
    let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
    hub.remap(Some(vec![0, 2])).unwrap();
    hub.load(2).unwrap();
    hub.start_print(PrintJob::new(0, [0])).unwrap();
    assert!(!hub.unit(0).unwrap().state().needs_initial_purging);
    assert_eq!(hub.get_status().initial_tool, Some(0));
}

#[test]
fn test_join_rejects_tools_of_the_running_print() {
    let (mut hub, _bench) = SimBench::from_config_str(SHARED_SENSOR_CONFIG).unwrap();
    hub.start_print(PrintJob::new(0, [0, 1])).unwrap();
    assert!(matches!(hub.join(Some(vec![0, 1])), Err(RmmuError::RoutingConflict { .. })));
    hub.join(Some(vec![1, 2])).unwrap();
    hub.join(None).unwrap();
    assert!(hub.get_status().spool_joins.is_empty());
}

#[test]
fn test_end_print_drops_routing() {
    let (mut hub, _bench) = SimBench::from_config_str(TWO_UNIT_CONFIG).unwrap();
    hub.remap(Some(vec![1, 5])).unwrap();
    hub.join(Some(vec![4, 5])).unwrap();
    hub.start_print(PrintJob::new(0, [0])).unwrap();
    hub.end_print();

    let status = hub.get_status();
    assert!(status.remap.is_empty());
    assert!(status.spool_joins.is_empty());
    assert!(status.units.iter().all(|u| !u.is_printing));
}

#[test]
fn test_routing_table_stays_disjoint() {
    let mut routing = Routing::new(6);
    routing.join(vec![0, 1, 2], None).unwrap();
    assert!(routing.join(vec![2, 3], None).is_err());
    routing.join(vec![3, 4], None).unwrap();
    let mut seen = std::collections::BTreeSet::new();
    for group in routing.join_table().groups() {
        for tool in group {
            assert!(seen.insert(*tool));
        }
    }
    assert_eq!(routing.join_candidates(1), vec![0, 2]);
}
