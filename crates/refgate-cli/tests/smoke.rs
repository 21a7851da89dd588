//! Smoke tests for the `refgate` binary.
//!
//! Each test points `--config` at a file in a temp dir so no user config or
//! ambient CGI variables leak in.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const CGI_VARS: &[&str] = &[
    "HTTP_COOKIE",
    "REQUEST_METHOD",
    "QUERY_STRING",
    "HTTP_REFERER",
    "PATH_INFO",
    "HTTP_HOST",
    "HTTPS",
    "REMOTE_USER",
    "REFGATE_AUTH_FILTER",
];

fn refgate(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_refgate"));
    for var in CGI_VARS {
        cmd.env_remove(var);
    }
    cmd.arg("--config").arg(config);
    cmd
}

fn empty_config(dir: &Path) -> PathBuf {
    let path = dir.join("refgate.toml");
    std::fs::write(&path, "").unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ── Help / basic CLI ──────────────────────────────────────────────────────────

#[test]
fn binary_responds_to_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_refgate"))
        .arg("--help")
        .output()
        .expect("failed to execute refgate");
    assert!(output.status.success(), "refgate --help should exit 0");
    let out = stdout(&output);
    assert!(out.contains("route"));
    assert!(out.contains("check"));
    assert!(out.contains("pages"));
}

#[test]
fn pages_lists_dispatch_table() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&empty_config(dir.path()))
        .arg("pages")
        .output()
        .unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    assert_eq!(out.lines().count(), 13);
    assert!(out.contains("tree"));
    assert!(out.contains("ls_cache"));
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[test]
fn route_defaults_to_repolist() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&empty_config(dir.path()))
        .arg("route")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let route: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(route["page"], "repolist");
    assert_eq!(route["wants_repo"], false);
    assert_eq!(route["request"]["page"], "repolist");
}

#[test]
fn route_reads_query_string() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&empty_config(dir.path()))
        .args(["route", "--repo-url", "pub/linux.git"])
        .env("QUERY_STRING", "r=pub/linux.git&p=tree&id=abc&path=src")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let route: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(route["page"], "tree");
    assert_eq!(route["request"]["id"], "abc");
    assert_eq!(route["request"]["path"], "src");
}

#[test]
fn route_unknown_page_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&empty_config(dir.path()))
        .arg("route")
        .env("QUERY_STRING", "p=no-such-page")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown page: no-such-page"));
    assert!(stdout(&output).is_empty());
}

#[test]
fn route_repository_page_needs_repository() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&empty_config(dir.path()))
        .arg("route")
        .env("QUERY_STRING", "p=log")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("requires a repository"));
}

// ── Checks ────────────────────────────────────────────────────────────────────

#[test]
fn check_repo_without_filter_is_authorized() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&empty_config(dir.path()))
        .args(["check", "repo", "anything.git"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "authorized");
}

#[cfg(unix)]
#[test]
fn check_repo_consults_policy_program() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("policy.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\n[ \"${10}\" = \"public.git\" ] && exit 1\nexit 0\n",
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();

    let config = dir.path().join("refgate.toml");
    std::fs::write(
        &config,
        format!("[filter]\nprogram = \"{}\"\n", script.display()),
    )
    .unwrap();

    let allowed = refgate(&config)
        .args(["check", "repo", "public.git"])
        .output()
        .unwrap();
    assert!(allowed.status.success(), "stderr: {}", stderr(&allowed));
    assert_eq!(stdout(&allowed).trim(), "authorized");

    let denied = refgate(&config)
        .args(["check", "repo", "secret.git"])
        .output()
        .unwrap();
    assert!(!denied.status.success());
    assert_eq!(stdout(&denied).trim(), "denied");
}

#[test]
fn missing_policy_program_fails_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("refgate.toml");
    let program = dir.path().join("no-such-policy");
    std::fs::write(
        &config,
        format!("[filter]\nprogram = \"{}\"\n", program.display()),
    )
    .unwrap();

    let output = refgate(&config)
        .args(["route", "--repo-url", "linux.git"])
        .env("QUERY_STRING", "p=log")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
    let err = stderr(&output);
    assert!(err.contains("authorization failed"), "stderr: {err}");
    assert!(!err.contains("access to repository"), "stderr: {err}");

    let check = refgate(&config)
        .args(["check", "repo", "linux.git"])
        .output()
        .unwrap();
    assert!(!check.status.success());
    assert!(!stdout(&check).contains("denied"));
    assert!(stderr(&check).contains("failed to start policy program"));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = refgate(&dir.path().join("absent.toml"))
        .arg("pages")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("failed to load config"));
}
