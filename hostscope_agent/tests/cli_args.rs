//! CLI surface of the agent binary.
use assert_cmd::Command;

fn agent() -> Command {
    Command::cargo_bin("hostscope_agent").expect("agent binary")
}

#[test]
fn help_prints_usage() {
    let out = agent().arg("--help").assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("Usage:"), "{text}");
    assert!(text.contains("--remote NAME=URL"));
}

#[test]
fn bad_flags_exit_with_usage_error() {
    agent().args(["--port", "notaport"]).assert().code(2);
    agent().arg("--bogus").assert().code(2);
}

#[test]
fn list_network_interfaces() {
    agent().args(["--list", "net"]).assert().success();
    agent().args(["--list", "gpu"]).assert().failure();
}

#[test]
fn malformed_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");
    std::fs::write(&path, "[1, 2").unwrap();
    let out = agent()
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&out).contains("parsing config"));
}
