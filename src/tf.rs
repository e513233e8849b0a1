use crate::debug;
use crate::error::TfError;
use crate::labels;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// captured result of one `tf` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TfOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl TfOutput {
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// true for the "No items match" response, which is an empty result rather than a failure
    pub fn no_items_match(&self) -> bool {
        labels::no_items_match(&self.stdout).is_some()
            || labels::no_items_match(&self.stderr).is_some()
    }

    /// error output to report for a failed run
    fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// something that can run `tf` and capture its output
pub trait TfRunner: Send + Sync {
    /// run `tf` with `args`, in `cwd` if given, returning raw output whatever the exit status
    fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<TfOutput, TfError>;

    /// run and turn a failed exit into [`TfError::Execution`]
    ///
    /// a "No items match" response counts as success
    fn run_checked(&self, args: &[String], cwd: Option<&Path>) -> Result<TfOutput, TfError> {
        let output = self.run(args, cwd)?;
        if output.success || output.no_items_match() {
            return Ok(output);
        }
        Err(TfError::Execution {
            command: command_line("tf", args),
            message: output.failure_message(),
        })
    }
}

/// shell-style rendering of a command for messages
pub fn command_line(program: &str, args: &[String]) -> String {
    let parts = std::iter::once(program).chain(args.iter().map(String::as_str));
    shlex::try_join(parts).unwrap_or_else(|_| format!("{program} {}", args.join(" ")))
}

/// runs the real `tf` executable, killing it after `timeout`
pub struct ProcessTf {
    program: PathBuf,
    timeout: Duration,
}

impl ProcessTf {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

/// drain a child pipe on its own thread so a full pipe cannot stall the child
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut data = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(e) = pipe.read_to_end(&mut data)
        {
            debug!("failed to read tf output: {}", e);
        }
        data
    })
}

impl TfRunner for ProcessTf {
    fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<TfOutput, TfError> {
        let program = self.program.to_string_lossy().into_owned();
        let command = command_line(&program, args);
        match cwd {
            Some(cwd) => debug!("$ {} (in {})", command, cwd.display()),
            None => debug!("$ {}", command),
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| TfError::Spawn { program, source })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // timeout occurred, kill the process
                if let Err(e) = child.kill() {
                    debug!("failed to kill tf process: {}", e);
                }
                let _ = child.wait();
                return Err(TfError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
            Err(source) => {
                let _ = child.kill();
                return Err(TfError::Spawn {
                    program: command,
                    source,
                });
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        Ok(TfOutput {
            success: status.success(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}
