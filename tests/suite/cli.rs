//! Command-line surface: overrides, exit codes, signals.

use std::net::TcpListener;
use std::time::Duration;

use tempfile::tempdir;

use crate::common::{closed_port, readygate, run, stderr, stdout, write_config};

#[tokio::test]
async fn wait_flag_and_trailing_command_need_no_config() {
    let dir = tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let target = format!("db=127.0.0.1:{}", listener.local_addr().unwrap().port());

    let output = run(dir.path(), &["--wait", &target, "--", "echo", "hello"]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "hello");
}

#[tokio::test]
async fn wait_env_reads_standard_variables() {
    let dir = tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let output = readygate(dir.path())
        .env("POSTGRES_URL", format!("postgresql+asyncpg://app@127.0.0.1:{port}/app"))
        .args(["--wait-env", "--", "echo", "up"])
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("postgres"));
    assert_eq!(stdout(&output).trim(), "up");
}

#[tokio::test]
async fn cli_budget_overrides_config_defaults() {
    let dir = tempdir().unwrap();
    let target = format!("db=127.0.0.1:{}", closed_port());

    let output = run(
        dir.path(),
        &[
            "--wait",
            &target,
            "--interval-ms",
            "5",
            "--max-attempts",
            "2",
            "--",
            "echo",
            "never",
        ],
    )
    .await;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("after 2 attempts"));
    assert!(!stdout(&output).contains("never"));
}

#[tokio::test]
async fn missing_handoff_is_a_usage_error() {
    let dir = tempdir().unwrap();

    let output = run(dir.path(), &[]).await;

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("no handoff command"));
}

#[tokio::test]
async fn invalid_config_is_a_usage_error() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [[check]]
        name = "db"
        kind = "tcp"
        url = "db:5432"

        [[check]]
        name = "db"
        kind = "tcp"
        url = "db:5433"
        "#,
    );

    let output = run(dir.path(), &["--", "true"]).await;

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("duplicate check name `db`"));
}

#[tokio::test]
async fn explicit_config_must_exist() {
    let dir = tempdir().unwrap();

    let output = run(dir.path(), &["--config", "missing.toml", "--", "true"]).await;

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("missing.toml"));
}

#[tokio::test]
async fn config_path_from_environment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gate.toml");
    std::fs::write(&path, "[handoff]\ncommand = [\"echo\", \"from-env\"]\n").unwrap();

    let output = readygate(dir.path())
        .env("READYGATE_CONFIG", &path)
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "from-env");
}

#[tokio::test]
async fn check_only_skips_handoff() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [[check]]
        name = "shell"
        kind = "command"
        command = ["true"]

        [[setup]]
        name = "marker"
        kind = "command"
        command = ["touch", "setup.ran"]
        "#,
    );

    let output = run(dir.path(), &["--check-only"]).await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(dir.path().join("setup.ran").exists());
}

#[tokio::test]
async fn check_only_accepts_handoff_env_without_command() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [[check]]
        name = "shell"
        kind = "command"
        command = ["true"]

        [handoff]
        env = { PYTHONUNBUFFERED = "1" }
        "#,
    );

    let checked = run(dir.path(), &["--check-only"]).await;
    assert!(checked.status.success(), "stderr: {}", stderr(&checked));

    let launched = run(dir.path(), &[]).await;
    assert_eq!(launched.status.code(), Some(2));
    assert!(stderr(&launched).contains("no handoff command"));
}

#[tokio::test]
async fn exit_code_of_target_propagates() {
    let dir = tempdir().unwrap();

    let exec = run(dir.path(), &["--", "sh", "-c", "exit 7"]).await;
    assert_eq!(exec.status.code(), Some(7));

    let spawned = run(dir.path(), &["--spawn", "--", "sh", "-c", "exit 9"]).await;
    assert_eq!(spawned.status.code(), Some(9));
}

#[tokio::test]
async fn handoff_env_reaches_target() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [handoff]
        command = ["sh", "-c", "echo $GREETING"]
        env = { GREETING = "hi from ${USER_NAME}" }
        "#,
    );

    let output = readygate(dir.path())
        .env("USER_NAME", "gate")
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "hi from gate");
}

#[tokio::test]
async fn missing_target_binary_fails() {
    let dir = tempdir().unwrap();

    let output = run(dir.path(), &["--", "readygate-no-such-service"]).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("[handoff]"), "stderr: {stderr}");
    assert!(stderr.contains("readygate-no-such-service"), "stderr: {stderr}");
}

#[cfg(unix)]
#[tokio::test]
async fn sigterm_while_waiting_exits_143() {
    let dir = tempdir().unwrap();
    write_config(
        dir.path(),
        r#"
        [[check]]
        name = "never"
        kind = "command"
        command = ["sh", "-c", "touch probing; exit 1"]
        interval_ms = 20
        max_attempts = "unbounded"

        [handoff]
        command = ["touch", "handoff.ran"]
        "#,
    );

    let mut child = readygate(dir.path()).spawn().unwrap();
    let marker = dir.path().join("probing");
    for _ in 0..250 {
        if marker.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(marker.exists(), "probe never ran");

    let pid = libc::pid_t::try_from(child.id().unwrap()).unwrap();
    // SAFETY: signalling a child we spawned and have not reaped.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.code(), Some(143));
    assert!(!dir.path().join("handoff.ran").exists());
}

#[tokio::test]
async fn malformed_url_does_not_print_its_password() {
    let dir = tempdir().unwrap();

    let output = run(
        dir.path(),
        &["--wait", "db=postgres://app:s3cret@db:notaport/app", "--", "true"],
    )
    .await;

    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr(&output);
    assert!(stderr.contains("***@db:notaport"), "stderr: {stderr}");
    assert!(!stderr.contains("s3cret"), "stderr: {stderr}");
}
