//! Process dispatch: each bank job runs in a child `nxingest worker`.

use nxingest_loader::{BankJob, Error, JobOutput, JobReply, WorkerLauncher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Launches this executable as a worker that reopens `input` itself.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    exe: PathBuf,
    input: PathBuf,
    verbosity: u8,
}

impl SubprocessLauncher {
    /// # Errors
    /// Returns an error if the path of the running executable is unknown.
    pub fn new(input: &Path, verbosity: u8) -> std::io::Result<Self> {
        Ok(Self {
            exe: std::env::current_exe()?,
            input: input.to_path_buf(),
            verbosity,
        })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.exe);
        command
            .args(std::iter::repeat("-v").take(usize::from(self.verbosity)))
            .arg("worker")
            .arg(&self.input)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

impl WorkerLauncher for SubprocessLauncher {
    fn launch(&self, job: &BankJob) -> nxingest_loader::Result<JobOutput> {
        let request = serde_json::to_vec(job)?;
        let mut child = self.command().spawn().map_err(|e| {
            Error::Worker(format!("cannot start worker for bank '{}': {e}", job.bank))
        })?;
        log::debug!("worker {} started for bank '{}'", child.id(), job.bank);

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::Worker("worker stdin is not piped".to_string()))?;
            stdin.write_all(&request)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Worker(format!(
                "worker for bank '{}' exited with {}",
                job.bank, output.status
            )));
        }
        let reply: JobReply = serde_json::from_slice(&output.stdout)?;
        reply.into_result()
    }
}
