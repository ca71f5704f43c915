//! CLI integration tests

use std::process::{Command, Output};

fn apctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_apctl"))
        .args(args)
        .env_remove("APCTL_API_URL")
        .output()
        .expect("Failed to execute apctl")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = apctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Cluster Autopilot"), "Should show app name");
    for command in ["ping", "backends", "apps", "nodes", "pods", "targets"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = apctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("apctl"), "Should show binary name");
}

#[test]
fn test_backends_help_lists_subcommands() {
    let output = apctl(&["backends", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for sub in ["list", "add", "remove", "latency", "check"] {
        assert!(stdout.contains(sub), "Should show {} subcommand", sub);
    }
}

#[test]
fn test_apps_register_help() {
    let output = apctl(&["apps", "register", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--mirror-app"));
    assert!(stdout.contains("--url-key"));
    assert!(stdout.contains("--port"));
}

#[test]
fn test_apps_register_requires_ports() {
    let output = apctl(&[
        "apps",
        "register",
        "--name",
        "web",
        "--namespace",
        "shop",
        "--mirror-app",
        "web-mirror",
        "--mirror-namespace",
        "shop-mirror",
        "--url-key",
        "BACKEND_URL",
        "--backend",
        "10.0.0.1",
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--port"));
}

#[test]
fn test_nodes_help_lists_subcommands() {
    let output = apctl(&["nodes", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for sub in ["backup-list", "backup-add", "backup-remove", "add", "delete"] {
        assert!(stdout.contains(sub), "Should show {} subcommand", sub);
    }
}

#[test]
fn test_backends_list_against_server() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/get_backends")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"["10.0.0.1"]"#)
        .create();

    let output = apctl(&["--api-url", &server.url(), "--format", "json", "backends", "list"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("10.0.0.1"));
    mock.assert();
}

#[test]
fn test_api_error_exits_nonzero() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/add_node")
        .with_status(502)
        .with_body(r#"{"error":"command `sealos add` failed","code":"UPSTREAM_ERROR"}"#)
        .create();

    let output = apctl(&["--api-url", &server.url(), "nodes", "add", "10.1.0.5"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("UPSTREAM_ERROR"));
}
