//! Shared helpers for driving the binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;

pub const BIN: &str = env!("CARGO_BIN_EXE_readygate");

/// A `readygate` invocation with a clean environment for config discovery.
pub fn readygate(dir: &Path) -> Command {
    let mut command = Command::new(BIN);
    command
        .current_dir(dir)
        .env_remove("READYGATE_CONFIG")
        .env_remove("POSTGRES_URL")
        .env_remove("REDIS_URL")
        .env_remove("RABBITMQ_URL")
        .env("READYGATE_LOG", "info");
    command
}

pub async fn run(dir: &Path, args: &[&str]) -> Output {
    readygate(dir)
        .args(args)
        .output()
        .await
        .expect("failed to run readygate")
}

pub fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("readygate.toml");
    std::fs::write(&path, content).expect("failed to write config");
    path
}

/// Lines appended to `file`, or 0 if it was never created.
pub fn line_count(file: &Path) -> usize {
    std::fs::read_to_string(file).map_or(0, |content| content.lines().count())
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}
