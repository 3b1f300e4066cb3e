//! CLI tests spawning the solver binary.
//!
//! Checks exit codes and output for `init`, `parse`, `deps` and `exec`.

use std::fs;
use std::process::Command;

use solver::exit_codes;
use solver::io::config::{SolverConfig, load_config, write_config};
use solver::test_support::python_available;

fn solver() -> Command {
    Command::new(env!("CARGO_BIN_EXE_solver"))
}

#[test]
fn init_writes_loadable_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = solver()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("solver init");

    assert_eq!(status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join("solver.toml")).expect("load");
    assert_eq!(cfg, SolverConfig::default());
}

#[test]
fn parse_reports_missing_code_block() {
    let temp = tempfile::tempdir().expect("tempdir");
    let reply = temp.path().join("reply.txt");
    fs::write(&reply, "no fences here").expect("write");

    let output = solver()
        .current_dir(temp.path())
        .arg("parse")
        .arg(&reply)
        .output()
        .expect("solver parse");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(parsed["success"], false);
    assert_eq!(parsed["error"], "Code block not found");
}

#[test]
fn deps_with_everything_listed_installs_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = SolverConfig::default();
    cfg.dependencies.manifest_path = temp.path().join("requirements.txt");
    // Never invoked: every requested name is already in the manifest.
    cfg.dependencies.install_command = vec!["definitely-not-a-real-binary-7f3a".to_string()];
    write_config(&temp.path().join("solver.toml"), &cfg).expect("write config");
    fs::write(&cfg.dependencies.manifest_path, "numpy\nrich\n").expect("seed");

    let output = solver()
        .current_dir(temp.path())
        .args(["deps", "NumPy==1.24.3", "rich>=13"])
        .output()
        .expect("solver deps");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let contents = fs::read_to_string(&cfg.dependencies.manifest_path).expect("read");
    assert_eq!(contents, "numpy\nrich\n");
}

#[test]
fn exec_missing_file_is_a_failed_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = solver()
        .current_dir(temp.path())
        .args(["exec", "missing.py", "--json"])
        .output()
        .expect("solver exec");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(result["error_kind"], "file_read");
    assert_eq!(result["exit_code"], -1);
}

#[test]
fn exec_prints_program_output() {
    if !python_available() {
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("main.py"), "print(\"ok\")\n").expect("write");

    let output = solver()
        .current_dir(temp.path())
        .args(["exec", "main.py"])
        .output()
        .expect("solver exec");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ok\n");
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("solver.toml"), "max_trials = 0\n").expect("write");

    let output = solver()
        .current_dir(temp.path())
        .args(["deps", "numpy"])
        .output()
        .expect("solver deps");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_trials"));
}
