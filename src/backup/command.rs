//! External engine tools (dump, restore, integrity check) behind one seam.
//!
//! Engines describe what to run with [`CommandSpec`]; a [`CommandRunner`]
//! executes it. Production uses [`SystemCommandRunner`], tests script a fake.

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use getset::Getters;
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// One invocation of an external tool.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct CommandSpec {
    #[builder(into)]
    program: String,
    #[builder(default, into)]
    args: Vec<String>,
    /// Environment additions; values are secrets and never logged
    #[builder(default, into)]
    env: Vec<(String, RedactedString)>,
    /// Redirect the child's stdout into this file
    #[builder(into)]
    stdout_to: Option<PathBuf>,
    /// Feed the child's stdin from this file
    #[builder(into)]
    stdin_from: Option<PathBuf>,
    /// Arguments at these positions are replaced with a placeholder in logs
    #[builder(default, into)]
    secret_args: Vec<usize>,
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let args = self
            .args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if self.secret_args.contains(&i) {
                    "***"
                } else {
                    a.as_str()
                }
            })
            .join(" ");
        write!(f, "{} {}", self.program, args)
    }
}

/// What an external tool reported back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Builder)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub status: Option<i32>,
    #[builder(default, into)]
    pub stdout: String,
    #[builder(default, into)]
    pub stderr: String,
}

impl CommandOutput {
    /// stderr if the tool wrote any, else stdout, trimmed.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// How an engine's tool reports failure through its exit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCodePolicy {
    /// Anything but 0 is a failure
    ZeroOnly,
    /// Codes below the bound succeed; nonzero ones are logged as warnings
    WarningsBelow(i32),
}

impl ExitCodePolicy {
    pub fn accepts(&self, status: Option<i32>) -> bool {
        match (self, status) {
            (_, None) => false,
            (ExitCodePolicy::ZeroOnly, Some(code)) => code == 0,
            (ExitCodePolicy::WarningsBelow(bound), Some(code)) => (0..*bound).contains(&code),
        }
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Spawns real processes and waits for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for (k, v) in &spec.env {
            command.env(k, v.inner());
        }
        command.stdout(match &spec.stdout_to {
            Some(path) => Stdio::from(File::create(path)?),
            None => Stdio::piped(),
        });
        command.stdin(match &spec.stdin_from {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        });
        command.stderr(Stdio::piped());

        let output = command.output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs `spec` and turns a spawn failure or a rejected exit status into
/// the error built by `into_error`, with the tool's output verbatim.
pub fn run_checked<F>(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    policy: ExitCodePolicy,
    into_error: F,
) -> Result<CommandOutput>
where
    F: Fn(String) -> Error,
{
    tracing::debug!("Running: {spec}");
    let output = runner
        .run(spec)
        .map_err(|e| into_error(format!("cannot run {}: {}", spec.program, e)))?;

    if !policy.accepts(output.status) {
        return Err(into_error(format!(
            "{} exited with {}: {}",
            spec.program,
            output
                .status
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output.diagnostics()
        )));
    }
    if output.status != Some(0) {
        tracing::warn!(
            "{} exited with warning code {:?}: {}",
            spec.program,
            output.status,
            output.diagnostics()
        );
    }
    Ok(output)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Script = Box<dyn Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync>;

    /// Records every invocation and answers from a list of scripted rules.
    ///
    /// Rules are matched by program name (and an optional argument
    /// substring); unmatched commands succeed with empty output.
    #[derive(Clone, Default)]
    pub struct FakeRunner {
        pub calls: Arc<Mutex<Vec<CommandSpec>>>,
        rules: Arc<Mutex<VecDeque<(String, Option<String>, Script)>>>,
    }

    impl FakeRunner {
        pub fn on<F>(self, program: &str, arg_contains: Option<&str>, f: F) -> Self
        where
            F: Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync + 'static,
        {
            self.rules.lock().unwrap().push_back((
                program.to_string(),
                arg_contains.map(str::to_string),
                Box::new(f),
            ));
            self
        }

        pub fn exit(code: i32, stderr: &str) -> std::io::Result<CommandOutput> {
            Ok(CommandOutput::builder()
                .status(code)
                .stderr(stderr)
                .build())
        }

        pub fn ok(stdout: &str) -> std::io::Result<CommandOutput> {
            Ok(CommandOutput::builder().status(0).stdout(stdout).build())
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.program().clone())
                .collect()
        }

        pub fn command_lines(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| format!("{} {}", c.program(), c.args().join(" ")))
                .collect()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            let rules = self.rules.lock().unwrap();
            let rule = rules.iter().find(|(program, arg, _)| {
                program == spec.program()
                    && arg
                        .as_ref()
                        .map_or(true, |needle| spec.args().iter().any(|a| a.contains(needle)))
            });
            let output = match rule {
                Some((_, _, f)) => f(spec)?,
                None => CommandOutput::builder().status(0).build(),
            };
            if let (Some(path), Some(0)) = (spec.stdout_to(), output.status) {
                if !path.exists() {
                    std::fs::write(path, &output.stdout)?;
                }
            }
            Ok(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeRunner;
    use super::*;
    use crate::backup::result_error::error::ErrorKind;

    #[test]
    fn test_exit_code_policy() {
        assert!(ExitCodePolicy::ZeroOnly.accepts(Some(0)));
        assert!(!ExitCodePolicy::ZeroOnly.accepts(Some(1)));
        assert!(!ExitCodePolicy::ZeroOnly.accepts(None));
        assert!(ExitCodePolicy::WarningsBelow(2).accepts(Some(1)));
        assert!(!ExitCodePolicy::WarningsBelow(2).accepts(Some(2)));
        assert!(!ExitCodePolicy::WarningsBelow(2).accepts(Some(-1)));
    }

    #[test]
    fn test_display_hides_secret_args() {
        let spec = CommandSpec::builder()
            .program("db2")
            .args(vec!["CONNECT TO app USER bob USING hunter22".to_string()])
            .secret_args(vec![0])
            .build();
        assert_eq!(spec.to_string(), "db2 ***");
    }

    #[test]
    fn test_run_checked_surfaces_stderr_verbatim() {
        let runner = FakeRunner::default().on("mysqldump", None, |_| {
            FakeRunner::exit(2, "mysqldump: Got error: 1045: Access denied")
        });
        let spec = CommandSpec::builder().program("mysqldump").build();

        let err = run_checked(&runner, &spec, ExitCodePolicy::ZeroOnly, Error::backup)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Backup);
        assert!(err.to_string().contains("Access denied"));
        assert!(err.to_string().contains("exited with 2"));
    }

    #[test]
    fn test_run_checked_tolerates_warning_codes() {
        let runner = FakeRunner::default().on("db2", None, |_| FakeRunner::exit(1, "SQL1234W"));
        let spec = CommandSpec::builder().program("db2").build();

        let output =
            run_checked(&runner, &spec, ExitCodePolicy::WarningsBelow(2), Error::backup).unwrap();
        assert_eq!(output.status, Some(1));
    }

    #[test]
    fn test_system_runner_missing_program() {
        let spec = CommandSpec::builder()
            .program("definitely-not-a-real-tool-db-vault")
            .build();
        let err = run_checked(
            &SystemCommandRunner,
            &spec,
            ExitCodePolicy::ZeroOnly,
            Error::connection,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_redirects_stdout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let out = temp_dir.path().join("out.txt");
        let spec = CommandSpec::builder()
            .program("sh")
            .args(vec!["-c".to_string(), "echo dumped".to_string()])
            .stdout_to(out.clone())
            .build();

        let output = SystemCommandRunner.run(&spec).unwrap();
        assert_eq!(output.status, Some(0));
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "dumped");
    }
}
