//! Construction of restic command lines from a [`Configuration`].
//!
//! Everything in here is pure: no process is spawned and nothing is read from the environment.
//! The program path and the config file used for the `--password-command` self-invocation are
//! passed in explicitly.

use std::{collections::BTreeMap, path::Path};

use strum::VariantNames;

use crate::config::{ConfigResult, Configuration};

/// [`CommandErrorKind`] describes the errors that can happen while selecting an operation or
/// building its command line
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum CommandErrorKind {
    /// missing sub-command: {0}
    MissingSubCommand(String),
    /// BAD sub-command: '{0}'
    UnknownSubCommand(String),
    /// usage: {0}
    Usage(&'static str),
    /// `{0}` is not a single restic command
    NotASingleCommand(OperationKind),
}

pub(crate) type CommandResult<T> = Result<T, CommandErrorKind>;

const LS_USAGE: &str = "ls [snapshot|'latest']";
const RESTORE_USAGE: &str = "restore [snapshot|'latest'] [restore-path] [extract-to-path]";

/// The names of the operations, as given on the command line.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "kebab-case")]
pub enum OperationKind {
    /// `backup`
    Backup,
    /// `backup-prune`
    BackupPrune,
    /// `check`
    Check,
    /// `forget`
    Forget,
    /// `init`
    Init,
    /// `ls`
    Ls,
    /// `password`
    Password,
    /// `prune`
    Prune,
    /// `restore`
    Restore,
    /// `stats`
    Stats,
    /// `snapshots`
    Snapshots,
    /// `unlock`
    Unlock,
}

/// An operation requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Initialize the repository
    Init,
    /// Remove stale locks
    Unlock,
    /// List snapshots
    Snapshots,
    /// Check the repository
    Check,
    /// Show raw data statistics
    Stats,
    /// List the files of a snapshot
    Ls { snapshot: Option<String> },
    /// Restore a path of a snapshot into a target directory
    Restore {
        snapshot: Option<String>,
        path: Option<String>,
        target: Option<String>,
    },
    /// Back up all commands and paths
    Backup,
    /// Apply the forget policies
    Forget,
    /// Remove unreferenced data
    Prune,
    /// Backup, then forget/prune/check with probability `prune-policy`, then stats
    BackupPrune,
    /// Print the repository password
    Password,
}

impl Operation {
    /// Parse the sub-command and its positional arguments.
    ///
    /// # Errors
    ///
    /// * [`CommandErrorKind::MissingSubCommand`] if `args` is empty
    /// * [`CommandErrorKind::UnknownSubCommand`] for an unknown name
    /// * [`CommandErrorKind::Usage`] if `ls` or `restore` get the wrong number of arguments
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> CommandResult<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Err(CommandErrorKind::MissingSubCommand(
                OperationKind::VARIANTS.join(", "),
            ));
        };
        let kind: OperationKind = name
            .as_ref()
            .parse()
            .map_err(|_| CommandErrorKind::UnknownSubCommand(name.as_ref().to_string()))?;
        let arg = |i: usize| rest.get(i).map(|s| s.as_ref().to_string());

        let operation = match kind {
            OperationKind::Backup => Self::Backup,
            OperationKind::BackupPrune => Self::BackupPrune,
            OperationKind::Check => Self::Check,
            OperationKind::Forget => Self::Forget,
            OperationKind::Init => Self::Init,
            OperationKind::Ls => {
                if rest.len() != 1 {
                    return Err(CommandErrorKind::Usage(LS_USAGE));
                }
                Self::Ls { snapshot: arg(0) }
            }
            OperationKind::Password => Self::Password,
            OperationKind::Prune => Self::Prune,
            OperationKind::Restore => {
                if rest.len() != 3 {
                    return Err(CommandErrorKind::Usage(RESTORE_USAGE));
                }
                Self::Restore {
                    snapshot: arg(0),
                    path: arg(1),
                    target: arg(2),
                }
            }
            OperationKind::Stats => Self::Stats,
            OperationKind::Snapshots => Self::Snapshots,
            OperationKind::Unlock => Self::Unlock,
        };
        Ok(operation)
    }

    /// The name of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Init => OperationKind::Init,
            Self::Unlock => OperationKind::Unlock,
            Self::Snapshots => OperationKind::Snapshots,
            Self::Check => OperationKind::Check,
            Self::Stats => OperationKind::Stats,
            Self::Ls { .. } => OperationKind::Ls,
            Self::Restore { .. } => OperationKind::Restore,
            Self::Backup => OperationKind::Backup,
            Self::Forget => OperationKind::Forget,
            Self::Prune => OperationKind::Prune,
            Self::BackupPrune => OperationKind::BackupPrune,
            Self::Password => OperationKind::Password,
        }
    }
}

/// The operation specific part of a restic call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResticCall {
    /// Arguments following the common prefix, starting with the restic sub-command
    pub args: Vec<String>,
    /// A command whose stdout is piped into restic's stdin
    pub stdin_command: Option<Vec<String>>,
}

impl ResticCall {
    fn new(args: Vec<String>) -> Self {
        Self {
            args,
            stdin_command: None,
        }
    }
}

/// One entry of the `forget` plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForgetStep {
    /// Run restic with these arguments
    Forget(Vec<String>),
    /// No forget policy applies to this path
    Skip { path: String },
}

fn strings<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

/// `init`
pub fn init() -> Vec<String> {
    strings(["init"])
}

/// `unlock`
pub fn unlock() -> Vec<String> {
    strings(["unlock"])
}

/// `snapshots`
pub fn snapshots() -> Vec<String> {
    strings(["snapshots"])
}

/// `check`
pub fn check() -> Vec<String> {
    strings(["check"])
}

/// `stats --mode raw-data`
pub fn stats() -> Vec<String> {
    strings(["stats", "--mode", "raw-data"])
}

/// `prune`
pub fn prune() -> Vec<String> {
    strings(["prune"])
}

/// `ls --long <snapshot>`
///
/// # Errors
///
/// * [`CommandErrorKind::Usage`] if no snapshot is given
pub fn ls(snapshot: Option<&str>) -> CommandResult<Vec<String>> {
    let snapshot = snapshot.ok_or(CommandErrorKind::Usage(LS_USAGE))?;
    Ok(strings(["ls", "--long", snapshot]))
}

/// `restore <snapshot> --path <path> --target <target>`
///
/// # Errors
///
/// * [`CommandErrorKind::Usage`] if any argument is missing
pub fn restore(
    snapshot: Option<&str>,
    path: Option<&str>,
    target: Option<&str>,
) -> CommandResult<Vec<String>> {
    match (snapshot, path, target) {
        (Some(snapshot), Some(path), Some(target)) => Ok(strings([
            "restore", snapshot, "--path", path, "--target", target,
        ])),
        _ => Err(CommandErrorKind::Usage(RESTORE_USAGE)),
    }
}

/// One restic call per backup command, then one per backup path, in configuration order.
pub fn backup(config: &Configuration) -> Vec<ResticCall> {
    let commands = config.backup_commands().iter().map(|command| ResticCall {
        args: strings(["backup", "--stdin", "--stdin-filename", command.repo_path()]),
        stdin_command: Some(command.command().to_vec()),
    });

    let paths = config.backup_paths().iter().map(|path| {
        let mut args = strings(["backup", "--one-file-system", path.path()]);
        for exclude in path.excludes().unwrap_or_default() {
            args.extend(strings(["--exclude", exclude.pattern()]));
        }
        ResticCall::new(args)
    });

    commands.chain(paths).collect()
}

/// The forget plan: backup commands use the global policy, backup paths their own policy or
/// the global one. Sources without any policy are skipped.
pub fn forget(config: &Configuration) -> Vec<ForgetStep> {
    let global = config.forget_policy();
    let step = |path: &str, policy: Option<&[String]>| match policy {
        Some(policy) => {
            let mut args = strings(["forget", "--path", path]);
            args.extend_from_slice(policy);
            ForgetStep::Forget(args)
        }
        None => ForgetStep::Skip {
            path: path.to_string(),
        },
    };

    let commands = config
        .backup_commands()
        .iter()
        .map(|command| step(command.repo_path(), global));
    let paths = config
        .backup_paths()
        .iter()
        .map(|path| step(path.path(), path.forget_policy().or(global)));

    commands.chain(paths).collect()
}

/// Whether forget/prune/check should run after a backup, given a uniform sample in `[0,1)`.
pub fn maintenance_due(prune_policy: f64, sample: f64) -> bool {
    prune_policy > 0.0 && sample <= prune_policy
}

/// A complete restic call, ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    stdin_command: Option<Vec<String>>,
    subcommand: String,
}

impl Invocation {
    /// Create an invocation from a complete argument vector.
    pub fn new(
        subcommand: impl Into<String>,
        argv: Vec<String>,
        env: BTreeMap<String, String>,
        stdin_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            argv,
            env,
            stdin_command,
            subcommand: subcommand.into(),
        }
    }

    /// The full argument vector, the restic program first.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment variables added to the inherited environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The producer command whose stdout becomes restic's stdin.
    pub fn stdin_command(&self) -> Option<&[String]> {
        self.stdin_command.as_deref()
    }

    /// The restic sub-command, e.g. `backup`.
    pub fn subcommand(&self) -> &str {
        &self.subcommand
    }
}

/// Builds [`Invocation`]s for a [`Configuration`].
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    config: &'a Configuration,
    restic: String,
    password_command: String,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new builder.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration
    /// * `program` - Path of this program, used to let restic ask for the password
    /// * `config_file` - The configuration file this program was started with
    ///
    /// # Errors
    ///
    /// * If the restic path can not be resolved
    pub fn new(
        config: &'a Configuration,
        program: impl AsRef<Path>,
        config_file: impl AsRef<Path>,
    ) -> ConfigResult<Self> {
        let program = program.as_ref().to_string_lossy();
        let config_file = config_file.as_ref().to_string_lossy();
        let password_command = shell_words::join([&*program, &*config_file, "password"]);
        Ok(Self {
            config,
            restic: config.restic_program()?,
            password_command,
        })
    }

    /// The configuration this builder works on.
    pub fn config(&self) -> &'a Configuration {
        self.config
    }

    /// The `--password-command` value.
    pub fn password_command(&self) -> &str {
        &self.password_command
    }

    /// The arguments every restic call starts with.
    pub fn prefix(&self) -> Vec<String> {
        strings([
            self.restic.as_str(),
            "--repo",
            self.config.repository(),
            "--verbose",
            "--password-command",
            self.password_command.as_str(),
        ])
    }

    /// Turn a [`ResticCall`] into a full [`Invocation`].
    pub fn invocation(&self, call: ResticCall) -> Invocation {
        let subcommand = call.args.first().cloned().unwrap_or_default();
        let mut argv = self.prefix();
        argv.extend(call.args);
        Invocation::new(
            subcommand,
            argv,
            self.config.environment().cloned().unwrap_or_default(),
            call.stdin_command,
        )
    }

    /// All restic calls for a single operation.
    ///
    /// For `forget`, sources without policy are left out; use [`forget`] to see them.
    ///
    /// # Errors
    ///
    /// * [`CommandErrorKind::Usage`] if `ls` or `restore` miss arguments
    /// * [`CommandErrorKind::NotASingleCommand`] for `backup-prune` and `password`
    pub fn invocations(&self, operation: &Operation) -> CommandResult<Vec<Invocation>> {
        let calls = match operation {
            Operation::Init => vec![ResticCall::new(init())],
            Operation::Unlock => vec![ResticCall::new(unlock())],
            Operation::Snapshots => vec![ResticCall::new(snapshots())],
            Operation::Check => vec![ResticCall::new(check())],
            Operation::Stats => vec![ResticCall::new(stats())],
            Operation::Prune => vec![ResticCall::new(prune())],
            Operation::Ls { snapshot } => vec![ResticCall::new(ls(snapshot.as_deref())?)],
            Operation::Restore {
                snapshot,
                path,
                target,
            } => vec![ResticCall::new(restore(
                snapshot.as_deref(),
                path.as_deref(),
                target.as_deref(),
            )?)],
            Operation::Backup => backup(self.config),
            Operation::Forget => forget(self.config)
                .into_iter()
                .filter_map(|step| match step {
                    ForgetStep::Forget(args) => Some(ResticCall::new(args)),
                    ForgetStep::Skip { .. } => None,
                })
                .collect(),
            Operation::BackupPrune | Operation::Password => {
                return Err(CommandErrorKind::NotASingleCommand(operation.kind()))
            }
        };
        Ok(calls.into_iter().map(|call| self.invocation(call)).collect())
    }
}
