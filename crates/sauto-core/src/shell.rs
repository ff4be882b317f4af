//! SSH/SCP subprocess runner.
//!
//! QRB switches and LSU file mode are driven through the system `ssh`/`scp`
//! binaries. When a password is configured the call is wrapped in `sshpass`,
//! otherwise key authentication is assumed and `BatchMode` keeps ssh from
//! prompting.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Result, SautoError};

/// Runs one external program to completion and returns its stdout.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<String>;
}

/// Spawns real processes, resolving programs on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<String> {
        let path = which::which(program).map_err(|_| SautoError::ToolMissing(program.into()))?;
        let printable = printable(program, args);
        tracing::debug!(command = %printable, "spawning");

        let mut cmd = Command::new(path);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| SautoError::Shell {
            command: printable.clone(),
            reason: e.to_string(),
        })?;

        if let Some(input) = stdin {
            if let Some(pipe) = child.stdin.as_mut() {
                pipe.write_all(input.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SautoError::Shell {
                command: printable,
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Command line for logs and errors, with `sshpass -p` arguments masked.
fn printable(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    let mut mask_next = program == "sshpass";
    for a in args {
        out.push(' ');
        if mask_next && a != "-p" {
            out.push_str("****");
            mask_next = false;
        } else {
            out.push_str(a);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Ssh
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHost {
    pub host: String,
    pub user: String,
    pub password: Option<String>,
}

impl RemoteHost {
    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

pub struct Ssh {
    remote: RemoteHost,
    runner: Box<dyn CommandRunner>,
}

impl Ssh {
    pub fn new(remote: RemoteHost) -> Self {
        Self::with_runner(remote, Box::new(SystemRunner))
    }

    pub fn with_runner(remote: RemoteHost, runner: Box<dyn CommandRunner>) -> Self {
        Self { remote, runner }
    }

    pub fn remote(&self) -> &RemoteHost {
        &self.remote
    }

    fn invoke(&self, program: &str, mut args: Vec<String>, stdin: Option<&str>) -> Result<String> {
        let mut opts = vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()];
        if self.remote.password.is_none() {
            opts.push("-o".into());
            opts.push("BatchMode=yes".into());
        }
        opts.append(&mut args);
        match &self.remote.password {
            Some(pw) => {
                let mut wrapped = vec!["-p".to_string(), pw.clone(), program.to_string()];
                wrapped.extend(opts);
                self.runner.run("sshpass", &wrapped, stdin)
            }
            None => self.runner.run(program, &opts, stdin),
        }
    }

    /// Run one remote shell command.
    pub fn exec(&self, command: &str) -> Result<String> {
        tracing::info!(host = %self.remote.host, command, "ssh exec");
        self.invoke("ssh", vec![self.remote.target(), command.to_string()], None)
    }

    /// Feed `lines` to a remote CLI over a non-tty session, then `exit`.
    pub fn session(&self, lines: &[String]) -> Result<String> {
        tracing::info!(host = %self.remote.host, commands = ?lines, "ssh session");
        let mut script = lines.join("\n");
        script.push_str("\nexit\n");
        self.invoke("ssh", vec!["-T".into(), self.remote.target()], Some(&script))
    }

    /// Copy a local file to `remote_path` on the host.
    pub fn copy_to(&self, local: &Path, remote_path: &str) -> Result<()> {
        tracing::info!(host = %self.remote.host, local = %local.display(), remote_path, "scp");
        self.invoke(
            "scp",
            vec![
                local.display().to_string(),
                format!("{}:{remote_path}", self.remote.target()),
            ],
            None,
        )?;
        Ok(())
    }
}
