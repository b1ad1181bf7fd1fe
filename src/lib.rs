/*!
Configuration-driven orchestration of [`restic`](https://restic.net) backups.

# Overview

A JSON configuration file describes a restic repository, the password, the paths and
commands to back up, and the retention policies. This crate validates such a file and
turns it into restic command lines.

The main types are:

- [`Configuration`] which holds a validated configuration, together with its
  [`BackupPath`]s, [`BackupCommand`]s and [`Exclude`]s.
- [`CommandBuilder`] which builds the restic [`Invocation`]s for an [`Operation`].
- [`Runner`] which executes the invocations of an operation with an [`Executor`], e.g.
  the process spawning [`ProcessExecutor`].

Every restic call starts with the same prefix: the restic program, the repository, `--verbose`
and a `--password-command` that invokes this program with the `password` sub-command, so the
password is never put on a command line.

# Example - build the restic calls of a backup

```rust
    use restic_backup::{CommandBuilder, Configuration, Operation};
    use serde_json::json;

    let config = Configuration::from_value(
        &json!({
            "repository": "/srv/restic-repo",
            "password": "secret",
            "log-directory": "logs",
            "backup-paths": [{"path": "/etc", "excludes": ["*.tmp"]}]
        }),
        "/opt/backup",
    )
    .unwrap();

    let program = "/opt/backup/restic-backup";
    let builder = CommandBuilder::new(&config, program, "/opt/backup/backup.json").unwrap();
    let invocations = builder.invocations(&Operation::Backup).unwrap();

    assert_eq!(invocations.len(), 1);
    assert_eq!(
        invocations[0].argv(),
        [
            "restic",
            "--repo",
            "/srv/restic-repo",
            "--verbose",
            "--password-command",
            "/opt/backup/restic-backup /opt/backup/backup.json password",
            "backup",
            "--one-file-system",
            "/etc",
            "--exclude",
            "*.tmp",
        ]
    );
```

# Crate features

- **cli** - Builds the `restic-backup` binary, enabling the `clap` and `simplelog`
  dependencies. The library itself does not use them. *This feature is enabled by default*.
*/

// Workspace lints don't seem to work for this?
#![allow(clippy::redundant_pub_crate)]

/// Construction of restic command lines
pub mod commands;
/// Loading and validating configuration files
pub mod config;
pub mod display;
pub(crate) mod error;
pub mod logging;
pub(crate) mod runner;

// restic_backup Public API
pub use crate::{
    commands::{
        CommandBuilder, CommandErrorKind, ForgetStep, Invocation, Operation, OperationKind,
        ResticCall,
    },
    config::{BackupCommand, BackupPath, ConfigErrorKind, Configuration, Exclude, ExcludeSource},
    display::format_command,
    error::{BackupError, BackupErrorKind, BackupResult, ErrorCategory},
    logging::LogErrorKind,
    runner::{Execution, Executor, ProcessExecutor, RunErrorKind, Runner},
};
