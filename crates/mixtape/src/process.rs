//! Helpers for running the external resolver and transcoder programs.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured result of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last few lines of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = lines.len().saturating_sub(5);
        lines[start..].join("\n")
    }
}

#[derive(Debug)]
pub enum RunError {
    Spawn(std::io::Error),
    Io(std::io::Error),
    Cancelled,
}

/// Create a `tokio::process::Command` that is killed when its handle is
/// dropped, has no stdin, and pipes stdout/stderr.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Substitute `{name}` placeholders in an argument template.
pub fn expand_args(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

/// Spawn `cmd` and wait for it to exit.
///
/// If `cancel` fires first the child is dropped, which kills it, and
/// `RunError::Cancelled` is returned.
pub async fn run(
    cmd: &mut Command,
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput, RunError> {
    let child = cmd.spawn().map_err(RunError::Spawn)?;

    let output = match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RunError::Cancelled),
                out = child.wait_with_output() => out,
            }
        }
        None => child.wait_with_output().await,
    }
    .map_err(RunError::Io)?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_run_captures_output() {
        let mut cmd = command("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let output = run(&mut cmd, None).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr_tail(), "err");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let mut cmd = command("sh");
        cmd.args(["-c", "exit 3"]);
        let output = run(&mut cmd, None).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let mut cmd = command("mixtape-definitely-not-installed");
        assert!(matches!(run(&mut cmd, None).await, Err(RunError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let mut cmd = command("sleep");
        cmd.arg("30");
        let result = run(&mut cmd, Some(&token)).await;
        assert!(matches!(result, Err(RunError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_expand_args() {
        let template = vec![
            "-o".to_string(),
            "{output_dir}/track.%(ext)s".to_string(),
            r#"{"title":%(title)j}"#.to_string(),
            "{locator}".to_string(),
        ];
        let args = expand_args(
            &template,
            &[("output_dir", "/tmp/x"), ("locator", "https://a/b")],
        );
        assert_eq!(
            args,
            vec![
                "-o",
                "/tmp/x/track.%(ext)s",
                r#"{"title":%(title)j}"#,
                "https://a/b"
            ]
        );
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let output = CommandOutput {
            status: std::process::ExitStatus::default(),
            stdout: String::new(),
            stderr: "1\n2\n3\n4\n5\n6\n7\n".to_string(),
        };
        assert_eq!(output.stderr_tail(), "3\n4\n5\n6\n7");
    }
}
