//! Blocking subprocess invocation with a hard wall-clock timeout.
//!
//! `std::process::Command::output()` has no timeout primitive, so external
//! tool calls (ffprobe, ffmpeg, the metadata tool) are run through
//! [`run_with_timeout`], which polls `try_wait` against a deadline and kills
//! the child on expiry.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::AppError;

pub struct TimedOutput {
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs `command` to completion, killing it if it exceeds `timeout`.
///
/// stdout/stderr are drained on dedicated reader threads concurrently with
/// the `try_wait` poll loop below, not after the child exits: a chatty
/// tool (ffmpeg logging to stderr, in particular) can fill the OS pipe
/// buffer and block on write before it exits, which would otherwise starve
/// `try_wait` forever and trip a spurious timeout.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<TimedOutput, AppError> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command.spawn()?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || drain(stdout_pipe));
    let stderr_thread = std::thread::spawn(move || drain(stderr_pipe));

    let deadline = Instant::now() + timeout;
    let status_code = loop {
        match child.try_wait()? {
            Some(status) => break status.code(),
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_thread.join();
                    let _ = stderr_thread.join();
                    return Err(AppError::Subprocess {
                        tool: program_name(&child),
                        status: None,
                        stderr: "timed out".to_string(),
                    });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    Ok(TimedOutput { status_code, stdout, stderr })
}

fn program_name(_child: &Child) -> String {
    "subprocess".to_string()
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_command_completes_within_timeout() {
        let mut cmd = Command::new("true");
        if which_exists("true") {
            let result = run_with_timeout(cmd, Duration::from_secs(5));
            assert!(result.is_ok());
        } else {
            cmd.arg("noop");
        }
    }

    fn which_exists(name: &str) -> bool {
        Command::new("which").arg(name).output().map(|o| o.status.success()).unwrap_or(false)
    }

    #[test]
    fn slow_command_times_out() {
        if !which_exists("sleep") {
            return;
        }
        let mut cmd = Command::new("sleep");
        cmd.arg("2");
        let result = run_with_timeout(cmd, Duration::from_millis(100));
        assert!(result.is_err());
    }

    /// A command that writes well past the OS pipe buffer on stderr before
    /// exiting must still be observed as exited, not time out waiting for
    /// `try_wait` while the write blocks.
    #[test]
    fn large_stderr_output_does_not_spuriously_time_out() {
        if !which_exists("sh") {
            return;
        }
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("i=0; while [ $i -lt 200000 ]; do printf 'x'; i=$((i+1)); done 1>&2");
        let result = run_with_timeout(cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(result.status_code, Some(0));
        assert_eq!(result.stderr.len(), 200000);
    }
}
