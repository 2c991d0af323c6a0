//! Full end-to-end exercise of [`pgtest::with_database`] (scenarios E1 and
//! E5): acquires a real installation, starts a real server, and runs a
//! setup/test closure pair against a fresh logical database. Needs network
//! access (or a local Nix store) and a working `postgres` binary for the
//! host platform, so it's `#[ignore]`d by default; run explicitly with
//! `cargo test -- --ignored` once those are available.

use pgtest::with_database;

#[test]
#[ignore = "requires network access and a real postgres binary"]
fn with_database_runs_setup_then_test_against_a_fresh_database() {
    let greeting = with_database(
        "with_database_runs_setup_then_test_against_a_fresh_database",
        |conn| {
            conn.batch_execute("CREATE TABLE greetings (body TEXT NOT NULL)")?;
            conn.execute("INSERT INTO greetings (body) VALUES ($1)", &[&"hello"])?;
            Ok(())
        },
        |conn| {
            let row = conn.query_one("SELECT body FROM greetings", &[]).unwrap();
            row.get::<_, String>(0)
        },
    )
    .expect("with_database should succeed");

    assert_eq!(greeting, "hello");
}

#[test]
#[ignore = "requires network access and a real postgres binary"]
fn two_tests_in_the_same_process_get_independent_databases() {
    with_database(
        "two_tests_in_the_same_process_get_independent_databases::a",
        pgtest::no_setup,
        |conn| {
            conn.batch_execute("CREATE TABLE only_in_a (id INT)").unwrap();
        },
    )
    .unwrap();

    with_database(
        "two_tests_in_the_same_process_get_independent_databases::b",
        pgtest::no_setup,
        |conn| {
            let result = conn.batch_execute("SELECT * FROM only_in_a");
            assert!(result.is_err(), "a fresh database must not see another test's tables");
        },
    )
    .unwrap();
}

#[test]
#[ignore = "requires network access and a real postgres binary"]
fn setup_failure_is_reported_and_releases_the_instance() {
    let result = with_database(
        "setup_failure_is_reported_and_releases_the_instance",
        |_conn| Err("fixture loading failed".into()),
        |_conn| (),
    );
    assert!(matches!(result, Err(pgtest::PgTestError::SetupFailure(_))));
}
