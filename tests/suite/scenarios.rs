//! Full startup sequences: wait, setup, handoff.

use std::net::TcpListener;

use tempfile::tempdir;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{line_count, run, stderr, stdout, write_config};

/// Database ready on the second attempt, cache ready at once, broker topology
/// declared, then handoff to `echo ready`.
#[tokio::test]
async fn dependencies_come_up_then_handoff_runs() {
    let dir = tempdir().unwrap();
    let cache = TcpListener::bind("127.0.0.1:0").unwrap();
    let cache_port = cache.local_addr().unwrap().port();

    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/exchanges/%2F/[^/]+$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&broker)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/queues/%2F/[^/]+$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&broker)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/bindings/%2F/e/[^/]+/q/[^/]+$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&broker)
        .await;

    write_config(
        dir.path(),
        &format!(
            r#"
            [defaults]
            interval_ms = 20
            max_attempts = 5

            [[check]]
            name = "db"
            kind = "command"
            command = ["sh", "-c", 'echo attempt >> db.attempts; test -f db.up || {{ touch db.up; exit 1; }}']

            [[check]]
            name = "cache"
            kind = "tcp"
            url = "redis://127.0.0.1:{cache_port}/0"

            [[setup]]
            name = "declare-topology"
            kind = "rabbitmq-topology"
            management_url = "{broker}"
            preset = "event-pipeline"

            [handoff]
            command = ["echo", "ready"]
            "#,
            broker = broker.uri(),
        ),
    );

    let output = run(dir.path(), &[]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "ready");
    assert_eq!(line_count(&dir.path().join("db.attempts")), 2);

    let log = stderr(&output);
    let waits_for = |dependency: &str| {
        let field = format!("dependency=\"{dependency}\"");
        log.lines()
            .filter(|line| line.contains("Waiting for dependency") && line.contains(&field))
            .count()
    };
    assert_eq!(waits_for("db"), 2, "log: {log}");
    assert_eq!(waits_for("cache"), 1, "log: {log}");
    assert!(log.contains("Broker topology declared"), "log: {log}");
    assert!(
        log.lines().any(|line| line.contains("Setup action complete")
            && line.contains("action=\"declare-topology\"")),
        "log: {log}"
    );
    assert!(log.contains("Handing off"), "log: {log}");
    drop(cache);
}

/// Database never comes up: exactly `max_attempts` probes, then a non-zero
/// exit without setup or handoff.
#[tokio::test]
async fn dependency_never_ready_stops_before_setup() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [[check]]
        name = "db"
        kind = "command"
        command = ["sh", "-c", "echo attempt >> db.attempts; exit 1"]
        interval_ms = 10
        max_attempts = 3

        [[setup]]
        name = "migrate"
        kind = "command"
        command = ["touch", "setup.ran"]

        [handoff]
        command = ["touch", "handoff.ran"]
        "#,
    );

    let output = run(dir.path(), &[]).await;

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(line_count(&dir.path().join("db.attempts")), 3);
    assert!(!dir.path().join("setup.ran").exists());
    assert!(!dir.path().join("handoff.ran").exists());
    let stderr = stderr(&output);
    assert!(stderr.contains("[wait]"), "stderr: {stderr}");
    assert!(stderr.contains("after 3 attempts"), "stderr: {stderr}");
}

/// No checks; the first setup action fails, so the second never runs and
/// handoff is never reached.
#[tokio::test]
async fn failing_setup_stops_the_sequence() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [[setup]]
        name = "declare-topology"
        kind = "command"
        command = ["sh", "-c", "echo run >> topology.runs; echo 'broker refused' >&2; exit 5"]

        [[setup]]
        name = "migrate"
        kind = "command"
        command = ["touch", "migrate.ran"]

        [handoff]
        command = ["echo", "ready"]
        "#,
    );

    let output = run(dir.path(), &[]).await;

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(line_count(&dir.path().join("topology.runs")), 1);
    assert!(!dir.path().join("migrate.ran").exists());
    assert!(!stdout(&output).contains("ready"));
    let stderr = stderr(&output);
    assert!(stderr.contains("[setup]"), "stderr: {stderr}");
    assert!(stderr.contains("broker refused"), "stderr: {stderr}");
}

#[tokio::test]
async fn broker_rejection_fails_setup() {
    let dir = tempdir().unwrap();
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(406).set_body_string("PRECONDITION_FAILED"))
        .mount(&broker)
        .await;

    write_config(
        dir.path(),
        &format!(
            r#"
            [[setup]]
            name = "declare-topology"
            kind = "rabbitmq-topology"
            management_url = "{}"
            exchanges = [{{ name = "events.exchange" }}]

            [handoff]
            command = ["touch", "handoff.ran"]
            "#,
            broker.uri()
        ),
    );

    let output = run(dir.path(), &[]).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("406"));
    assert!(!dir.path().join("handoff.ran").exists());
}
