//! End-to-end exercise of the server registry's dedup behaviour (scenario
//! E2: "two tests in the same process requesting the same installation get
//! the same running server"), driven entirely by fakes so it needs neither
//! network access nor a real `postgres` binary.

use std::sync::atomic::Ordering;

use pgtest::collaborators::fakes::{FakePinger, FakeSpawner};
use pgtest::collaborators::Pinger;
use pgtest::{Config, Registry};
use serial_test::serial;

fn make_config(root: &std::path::Path) -> Config {
    let snapshot = root.join("snapshot");
    std::fs::create_dir_all(&snapshot).unwrap();
    Config::new(root.join("bin"), snapshot, root.join("work"))
}

#[test]
#[serial(pgtest_port_range_env)]
fn two_requests_for_the_same_installation_share_one_server() {
    std::env::set_var("PGTEST_PORT_RANGE", "31300-31310");
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path());
    let registry = Registry::new();
    let spawner = FakeSpawner::default();

    let pinger: Box<dyn Pinger> = Box::new(FakePinger::failing_first(0));
    let first = registry.start_with(&config, &spawner, pinger).unwrap();

    let pinger: Box<dyn Pinger> = Box::new(FakePinger::failing_first(0));
    let second = registry.start_with(&config, &spawner, pinger).unwrap();

    assert!(std::sync::Arc::ptr_eq(&first, &second), "both requests must observe the same server");
    assert_eq!(spawner.spawn_count.load(Ordering::SeqCst), 1, "the server must be started exactly once");

    std::env::remove_var("PGTEST_PORT_RANGE");
}
