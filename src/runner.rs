//! Execution of restic calls.
//!
//! A [`Runner`] turns [`Operation`]s into [`Invocation`]s and hands them to an [`Executor`].
//! [`ProcessExecutor`] spawns real processes; tests plug in their own executor.

use std::{
    io::{self, BufRead, BufReader, PipeReader},
    process::{Child, Command, Stdio},
};

use log::{debug, error, info, warn};
use rand::Rng;

use crate::{
    commands::{self, CommandBuilder, ForgetStep, Invocation, Operation, ResticCall},
    display::{banner, format_command},
    error::{BackupError, BackupResult},
};

/// [`RunErrorKind`] describes the errors that can happen while running restic or a producer
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum RunErrorKind {
    /// error spawning `{program}`: `{source:?}`
    SpawningFailed { program: String, source: io::Error },
    /// error creating output pipe: `{0:?}`
    CreatingPipeFailed(io::Error),
    /// error reading output of `{program}`: `{source:?}`
    ReadingOutputFailed { program: String, source: io::Error },
    /// error waiting for `{program}`: `{source:?}`
    WaitingFailed { program: String, source: io::Error },
    /// restic {subcommand} failed: {status}
    ResticFailed { subcommand: String, status: String },
    /// command `{command}` failed: {status}
    ProducerFailed { command: String, status: String },
    /// cannot run an empty command line
    EmptyInvocation,
}

pub(crate) type RunResult<T> = Result<T, RunErrorKind>;

/// The outcome of a finished restic call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Whether restic exited successfully
    pub success: bool,
    /// The exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    /// stdout and stderr, interleaved as written
    pub output: String,
}

impl Execution {
    fn status(&self) -> String {
        self.code.map_or_else(
            || "terminated by signal".to_string(),
            |code| format!("exit code {code}"),
        )
    }
}

/// Runs a single [`Invocation`] to completion.
pub trait Executor {
    /// Execute the invocation.
    ///
    /// A non-zero exit of restic is reported in the returned [`Execution`], not as error.
    ///
    /// # Errors
    ///
    /// * If a process can not be spawned or waited for
    /// * [`RunErrorKind::ProducerFailed`] if the stdin producer exits unsuccessfully
    fn execute(&mut self, invocation: &Invocation) -> RunResult<Execution>;
}

/// An [`Executor`] spawning restic as child process.
///
/// Output is logged line by line while restic runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

fn split_program(argv: &[String]) -> RunResult<(&String, &[String])> {
    argv.split_first().ok_or(RunErrorKind::EmptyInvocation)
}

fn spawn_producer(argv: &[String]) -> RunResult<Child> {
    let (program, args) = split_program(argv)?;
    debug!("starting producer {}", format_command(argv));
    Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|source| RunErrorKind::SpawningFailed {
            program: program.clone(),
            source,
        })
}

fn spawn_restic(invocation: &Invocation, stdin: Stdio) -> RunResult<(Child, PipeReader)> {
    let (program, args) = split_program(invocation.argv())?;
    let (reader, writer) = io::pipe().map_err(RunErrorKind::CreatingPipeFailed)?;
    let stdout = writer.try_clone().map_err(RunErrorKind::CreatingPipeFailed)?;

    // the command owns the write ends; it must be dropped before reading or the reader never ends
    let child = Command::new(program)
        .args(args)
        .envs(invocation.env())
        .stdin(stdin)
        .stdout(stdout)
        .stderr(writer)
        .spawn()
        .map_err(|source| RunErrorKind::SpawningFailed {
            program: program.clone(),
            source,
        })?;
    Ok((child, reader))
}

fn read_output(reader: PipeReader, program: &str) -> RunResult<String> {
    let mut reader = BufReader::new(reader);
    let mut output = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| RunErrorKind::ReadingOutputFailed {
                program: program.to_string(),
                source,
            })?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        info!("{line}");
        output.push_str(line);
        output.push('\n');
    }
    Ok(output)
}

impl Executor for ProcessExecutor {
    fn execute(&mut self, invocation: &Invocation) -> RunResult<Execution> {
        let (program, _) = split_program(invocation.argv())?;

        let mut producer = invocation.stdin_command().map(spawn_producer).transpose()?;
        let stdin = producer
            .as_mut()
            .and_then(|producer| producer.stdout.take())
            .map_or_else(Stdio::null, Stdio::from);

        let (mut child, reader) = match spawn_restic(invocation, stdin) {
            Ok(spawned) => spawned,
            Err(err) => {
                if let Some(producer) = producer.as_mut() {
                    _ = producer.kill();
                    _ = producer.wait();
                }
                return Err(err);
            }
        };

        let output = read_output(reader, program);
        let status = child
            .wait()
            .map_err(|source| RunErrorKind::WaitingFailed {
                program: program.clone(),
                source,
            })?;
        let output = output?;

        if let (Some(mut producer), Some(command)) = (producer, invocation.stdin_command()) {
            let command = format_command(command);
            let producer_status =
                producer
                    .wait()
                    .map_err(|source| RunErrorKind::WaitingFailed {
                        program: command.clone(),
                        source,
                    })?;
            if !producer_status.success() {
                return Err(RunErrorKind::ProducerFailed {
                    command,
                    status: producer_status.to_string(),
                });
            }
        }

        Ok(Execution {
            success: status.success(),
            code: status.code(),
            output,
        })
    }
}

/// Runs [`Operation`]s by executing the restic calls they consist of.
#[derive(Debug)]
pub struct Runner<'a, E> {
    builder: CommandBuilder<'a>,
    executor: E,
}

impl<'a, E: Executor> Runner<'a, E> {
    /// Create a new runner.
    pub fn new(builder: CommandBuilder<'a>, executor: E) -> Self {
        Self { builder, executor }
    }

    /// The executor used by this runner.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Consume the runner and return its executor.
    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Run an operation.
    ///
    /// A failing restic call does not stop the operation: every source is backed up, every
    /// forget entry is applied and `backup-prune` always ends with `stats`. The first failure
    /// is returned once all calls are done.
    ///
    /// `rng` decides whether `backup-prune` does maintenance.
    ///
    /// # Errors
    ///
    /// * [`RunErrorKind::ResticFailed`] if restic exits unsuccessfully
    /// * If a restic call can not be built or executed
    pub fn run<R: Rng>(&mut self, operation: &Operation, rng: &mut R) -> BackupResult<()> {
        let mut failure = None;
        match operation {
            Operation::BackupPrune => self.backup_prune(rng, &mut failure)?,
            Operation::Forget => self.forget(&mut failure),
            _ => self.run_each(operation, &mut failure)?,
        }
        failure.map_or(Ok(()), Err)
    }

    fn backup_prune<R: Rng>(
        &mut self,
        rng: &mut R,
        failure: &mut Option<BackupError>,
    ) -> BackupResult<()> {
        self.run_each(&Operation::Backup, failure)?;

        let prune_policy = self.builder.config().prune_policy();
        let sample: f64 = rng.random();
        debug!("maintenance sample {sample} against prune-policy {prune_policy}");
        if commands::maintenance_due(prune_policy, sample) {
            self.forget(failure);
            self.run_each(&Operation::Prune, failure)?;
            self.run_each(&Operation::Check, failure)?;
        } else {
            info!("skipping forget, prune and check");
        }

        self.run_each(&Operation::Stats, failure)
    }

    /// Execute all calls of a single operation, recording failures.
    fn run_each(
        &mut self,
        operation: &Operation,
        failure: &mut Option<BackupError>,
    ) -> BackupResult<()> {
        for invocation in self.builder.invocations(operation)? {
            let result = self.execute(&invocation);
            record(failure, result);
        }
        Ok(())
    }

    fn forget(&mut self, failure: &mut Option<BackupError>) {
        for step in commands::forget(self.builder.config()) {
            match step {
                ForgetStep::Forget(args) => {
                    let invocation = self.builder.invocation(ResticCall {
                        args,
                        stdin_command: None,
                    });
                    let result = self.execute(&invocation);
                    record(failure, result);
                }
                ForgetStep::Skip { path } => {
                    warn!("no forget-policy for '{path}', skipping forget");
                }
            }
        }
    }

    fn execute(&mut self, invocation: &Invocation) -> BackupResult<()> {
        banner(invocation.subcommand());
        info!("{}", format_command(invocation.argv()));
        let execution = self.executor.execute(invocation)?;
        if !execution.success {
            return Err(RunErrorKind::ResticFailed {
                subcommand: invocation.subcommand().to_string(),
                status: execution.status(),
            }
            .into());
        }
        Ok(())
    }
}

/// Log a failed call and keep the first failure.
fn record(failure: &mut Option<BackupError>, result: BackupResult<()>) {
    if let Err(err) = result {
        error!("{err}");
        if failure.is_none() {
            *failure = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rstest::{fixture, rstest};
    use serde_json::{json, Value};

    use super::*;
    use crate::{config::Configuration, error::BackupErrorKind};

    /// Records every call; fails calls having the given argument with exit code 3.
    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<Vec<String>>,
        fail: Option<&'static str>,
    }

    impl Executor for Recorder {
        fn execute(&mut self, invocation: &Invocation) -> RunResult<Execution> {
            let args = invocation.argv()[6..].to_vec();
            let success = !self
                .fail
                .is_some_and(|fail| args.iter().any(|arg| arg == fail));
            self.calls.push(args);
            Ok(Execution {
                success,
                code: Some(if success { 0 } else { 3 }),
                output: String::new(),
            })
        }
    }

    #[fixture]
    fn config_value() -> Value {
        json!({
            "repository": "/srv/restic",
            "password": "secret",
            "log-directory": "logs",
            "forget-policy": ["--keep-daily", "7"],
            "backup-commands": [{"command": ["pg_dumpall"], "repo-path": "/pg.sql"}],
            "backup-paths": [{"path": "/etc"}]
        })
    }

    fn config_with(mut value: Value, key: &str, new: Value) -> Configuration {
        _ = value.as_object_mut().unwrap().insert(key.to_string(), new);
        Configuration::from_value(&value, "/opt/backup").unwrap()
    }

    fn run(
        config: &Configuration,
        operation: &Operation,
        fail: Option<&'static str>,
    ) -> (BackupResult<()>, Vec<Vec<String>>) {
        let builder =
            CommandBuilder::new(config, "/opt/backup/restic-backup", "/etc/b.json").unwrap();
        let mut runner = Runner::new(
            builder,
            Recorder {
                fail,
                ..Default::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(42);
        let result = runner.run(operation, &mut rng);
        (result, runner.into_executor().calls)
    }

    fn subcommands(calls: &[Vec<String>]) -> Vec<&str> {
        calls.iter().map(|call| call[0].as_str()).collect()
    }

    #[rstest]
    fn backup_prune_without_maintenance(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(0.0));
        let (result, calls) = run(&config, &Operation::BackupPrune, None);
        result.unwrap();
        assert_eq!(subcommands(&calls), ["backup", "backup", "stats"]);
    }

    #[rstest]
    fn backup_prune_with_maintenance(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(1.0));
        let (result, calls) = run(&config, &Operation::BackupPrune, None);
        result.unwrap();
        assert_eq!(
            subcommands(&calls),
            ["backup", "backup", "forget", "forget", "prune", "check", "stats"]
        );
        assert_eq!(calls[2], ["forget", "--path", "/pg.sql", "--keep-daily", "7"]);
        assert_eq!(calls[3], ["forget", "--path", "/etc", "--keep-daily", "7"]);
    }

    #[rstest]
    fn failure_does_not_stop_composite_operation(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(1.0));
        let (result, calls) = run(&config, &Operation::BackupPrune, Some("prune"));
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "restic prune failed: exit code 3");
        assert!(matches!(
            err.kind(),
            BackupErrorKind::Run(RunErrorKind::ResticFailed { .. })
        ));
        assert_eq!(
            subcommands(&calls),
            ["backup", "backup", "forget", "forget", "prune", "check", "stats"]
        );
    }

    #[rstest]
    fn failing_path_does_not_skip_later_paths(config_value: Value) {
        let mut value = config_value;
        _ = value.as_object_mut().unwrap().remove("backup-commands");
        let config = config_with(
            value,
            "backup-paths",
            json!([{"path": "/first"}, {"path": "/second"}]),
        );
        let (result, calls) = run(&config, &Operation::BackupPrune, Some("/first"));
        assert_eq!(
            result.unwrap_err().to_string(),
            "restic backup failed: exit code 3"
        );
        assert_eq!(
            calls,
            [
                vec!["backup", "--one-file-system", "/first"],
                vec!["backup", "--one-file-system", "/second"],
                vec!["stats", "--mode", "raw-data"],
            ]
        );
    }

    #[rstest]
    fn first_failure_is_returned(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(1.0));
        let (result, calls) = run(&config, &Operation::BackupPrune, Some("/etc"));
        assert_eq!(
            result.unwrap_err().to_string(),
            "restic backup failed: exit code 3"
        );
        // both the backup and the forget of /etc failed
        assert_eq!(calls.len(), 7);
    }

    #[rstest]
    fn forget_applies_every_entry(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(0.0));
        let (result, calls) = run(&config, &Operation::Forget, Some("/pg.sql"));
        assert!(result.is_err());
        assert_eq!(subcommands(&calls), ["forget", "forget"]);
    }

    #[rstest]
    fn forget_skips_sources_without_policy(config_value: Value) {
        let mut value = config_value;
        _ = value.as_object_mut().unwrap().remove("forget-policy");
        let config = config_with(
            value,
            "backup-paths",
            json!([{"path": "/etc"}, {"path": "/home", "forget-policy": ["--keep-last", "3"]}]),
        );
        let (result, calls) = run(&config, &Operation::Forget, None);
        result.unwrap();
        assert_eq!(calls, [["forget", "--path", "/home", "--keep-last", "3"]]);
    }

    #[rstest]
    fn password_is_not_run(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(0.5));
        let (result, calls) = run(&config, &Operation::Password, None);
        assert!(result.is_err());
        assert!(calls.is_empty());
    }

    #[rstest]
    fn single_operation(config_value: Value) {
        let config = config_with(config_value, "prune-policy", json!(0.5));
        let (result, calls) = run(
            &config,
            &Operation::Ls {
                snapshot: Some("latest".to_string()),
            },
            None,
        );
        result.unwrap();
        assert_eq!(calls, [["ls", "--long", "latest"]]);
    }

    #[cfg(unix)]
    mod process {
        use std::collections::BTreeMap;

        use pretty_assertions::assert_eq;

        use super::*;

        fn invocation(argv: &[&str], stdin_command: Option<&[&str]>) -> Invocation {
            Invocation::new(
                "test",
                argv.iter().map(ToString::to_string).collect(),
                BTreeMap::from([("BACKUP_TEST_VAR".to_string(), "from-env".to_string())]),
                stdin_command.map(|cmd| cmd.iter().map(ToString::to_string).collect()),
            )
        }

        #[test]
        fn output_is_captured() {
            let execution = ProcessExecutor
                .execute(&invocation(&["echo", "hello"], None))
                .unwrap();
            assert!(execution.success);
            assert_eq!(execution.code, Some(0));
            assert_eq!(execution.output, "hello\n");
        }

        #[test]
        fn stderr_is_merged_and_env_is_set() {
            let execution = ProcessExecutor
                .execute(&invocation(
                    &["sh", "-c", "echo \"$BACKUP_TEST_VAR\"; echo oops >&2"],
                    None,
                ))
                .unwrap();
            assert_eq!(execution.output, "from-env\noops\n");
        }

        #[test]
        fn producer_output_is_stdin() {
            let execution = ProcessExecutor
                .execute(&invocation(&["cat"], Some(&["printf", "a\\nb\\n"])))
                .unwrap();
            assert!(execution.success);
            assert_eq!(execution.output, "a\nb\n");
        }

        #[test]
        fn failing_producer_is_an_error() {
            let err = ProcessExecutor
                .execute(&invocation(&["cat"], Some(&["false"])))
                .unwrap_err();
            assert!(matches!(err, RunErrorKind::ProducerFailed { .. }));
        }

        #[test]
        fn non_zero_exit_is_reported() {
            let execution = ProcessExecutor
                .execute(&invocation(&["sh", "-c", "exit 3"], None))
                .unwrap();
            assert!(!execution.success);
            assert_eq!(execution.code, Some(3));
        }

        #[test]
        fn missing_program_fails_to_spawn() {
            let err = ProcessExecutor
                .execute(&invocation(&["/nonexistent/restic"], None))
                .unwrap_err();
            assert!(matches!(err, RunErrorKind::SpawningFailed { .. }));
        }
    }
}
