#![allow(missing_docs)]
#![cfg(all(unix, feature = "cli"))]
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

// Records its arguments, the password it obtained and its stdin.
// Exits with 3 if an argument equals $FAKE_RESTIC_FAIL.
const FAKE_RESTIC: &str = r#"#!/bin/sh
dir=$(dirname "$0")
password=$(sh -c "$5")
shift 5
echo "$* [$password]" >> "$dir/calls.txt"
cat >> "$dir/stdin.txt"
for arg in "$@"; do
    if [ "$arg" = "$FAKE_RESTIC_FAIL" ]; then
        echo "$1 $arg failed" >&2
        exit 3
    fi
done
echo "$1 done"
"#;

struct Setup {
    dir: TempDir,
    config_file: PathBuf,
}

impl Setup {
    fn new(config: &Value) -> Result<Self> {
        let dir = tempdir()?;
        let restic = dir.path().join("fake-restic");
        fs::write(&restic, FAKE_RESTIC)?;
        fs::set_permissions(&restic, fs::Permissions::from_mode(0o755))?;
        let config_file = dir.path().join("backup.json");
        fs::write(&config_file, serde_json::to_string_pretty(config)?)?;
        Ok(Self { dir, config_file })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut command = Command::new(env!("CARGO_BIN_EXE_restic-backup"));
        _ = command.arg("--base-dir").arg(self.path());
        if args.first() == Some(&"--log") {
            _ = command.arg("--log");
        }
        _ = command
            .arg(&self.config_file)
            .args(args.iter().filter(|arg| **arg != "--log"));
        Ok(command.output()?)
    }

    fn read(&self, name: &str) -> Result<String> {
        Ok(fs::read_to_string(self.path().join(name))?)
    }
}

#[fixture]
fn config() -> Value {
    json!({
        "repository": "/srv/restic-repo",
        "password": " hunter2 ",
        "restic-path": "./fake-restic",
        "log-directory": "logs",
        "prune-policy": 1.0,
        "backup-commands": [{"command": ["echo", "dump"], "repo-path": "/dump.sql"}],
        "backup-paths": [
            {"path": "/data", "excludes": ["*.tmp"], "forget-policy": ["--keep-last", "1"]}
        ]
    })
}

#[rstest]
fn password_is_printed_verbatim(config: Value) -> Result<()> {
    let setup = Setup::new(&config)?;
    let output = setup.run(&["password"])?;
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout)?, "hunter2");
    Ok(())
}

#[rstest]
fn backup_prune_runs_all_steps(config: Value) -> Result<()> {
    let setup = Setup::new(&config)?;
    let output = setup.run(&["backup-prune"])?;
    assert!(output.status.success());

    assert_eq!(
        setup.read("calls.txt")?,
        "backup --stdin --stdin-filename /dump.sql [hunter2]\n\
         backup --one-file-system /data --exclude *.tmp [hunter2]\n\
         forget --path /data --keep-last 1 [hunter2]\n\
         prune [hunter2]\n\
         check [hunter2]\n\
         stats --mode raw-data [hunter2]\n"
    );
    assert_eq!(setup.read("stdin.txt")?, "dump\n");

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("*************** config"));
    assert!(stdout.contains("prune done"));
    assert!(stdout.contains("COMPLETE in"));
    assert!(!stdout.contains("hunter2"));
    Ok(())
}

fn subcommands(calls: &str) -> Vec<&str> {
    calls
        .lines()
        .filter_map(|line| line.split(' ').next())
        .collect()
}

#[rstest]
fn failing_restic_fails_the_run_after_all_steps(mut config: Value) -> Result<()> {
    config["environment"] = json!({"FAKE_RESTIC_FAIL": "prune"});
    let setup = Setup::new(&config)?;
    let output = setup.run(&["backup-prune"])?;
    assert_eq!(output.status.code(), Some(1));

    let calls = setup.read("calls.txt")?;
    assert_eq!(
        subcommands(&calls),
        ["backup", "backup", "forget", "prune", "check", "stats"]
    );

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("prune prune failed"));
    Ok(())
}

#[rstest]
fn failing_path_still_backs_up_the_others(mut config: Value) -> Result<()> {
    config["prune-policy"] = json!(0.0);
    config["backup-paths"] = json!([{"path": "/first"}, {"path": "/second"}]);
    config["environment"] = json!({"FAKE_RESTIC_FAIL": "/first"});
    let setup = Setup::new(&config)?;
    let output = setup.run(&["backup-prune"])?;
    assert_eq!(output.status.code(), Some(1));

    let calls = setup.read("calls.txt")?;
    assert!(calls.contains("backup --one-file-system /first"));
    assert!(calls.contains("backup --one-file-system /second"));
    assert_eq!(subcommands(&calls), ["backup", "backup", "backup", "stats"]);
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("restic backup failed: exit code 3"));
    Ok(())
}

#[rstest]
fn log_file_is_written(config: Value) -> Result<()> {
    let setup = Setup::new(&config)?;
    let output = setup.run(&["--log", "snapshots"])?;
    assert!(output.status.success());

    let logs: Vec<_> = fs::read_dir(setup.path().join("logs"))?.collect::<Result<_, _>>()?;
    assert_eq!(logs.len(), 1);
    let log = fs::read_to_string(logs[0].path())?;
    assert!(log.contains("snapshots done"));
    assert!(log.contains("COMPLETE in"));
    Ok(())
}

#[rstest]
#[case(&["nope"], "BAD sub-command: 'nope'")]
#[case(&[], "missing sub-command: ")]
#[case(&["restore", "latest"], "usage: restore")]
fn bad_sub_commands_fail(
    config: Value,
    #[case] args: &[&str],
    #[case] message: &str,
) -> Result<()> {
    let setup = Setup::new(&config)?;
    let output = setup.run(args)?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8(output.stderr)?.contains(message));
    assert!(!setup.path().join("calls.txt").exists());
    Ok(())
}

#[test]
fn missing_config_fails() -> Result<()> {
    let dir = tempdir()?;
    let output = Command::new(env!("CARGO_BIN_EXE_restic-backup"))
        .arg(dir.path().join("missing.json"))
        .arg("snapshots")
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8(output.stderr)?.contains("can not be read"));
    Ok(())
}
