use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use fedtrust_certificate::{Certificate, Gid};
use fedtrust_keypair::Keypair;
use tempfile::NamedTempFile;

use super::{SignatureTool, ToolConfig};
use crate::error::ToolError;

const BINARY: &str = "xmlsec1";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The `xmlsec1` command line utility.
///
/// Every call writes its document, key and certificates to fresh temporary
/// files, so concurrent calls never share paths.
#[derive(Debug, Clone, Default)]
pub struct Xmlsec1 {
    config: ToolConfig,
}

struct Output {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl Xmlsec1 {
    /// A tool using `config`.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Path of the binary: the configured path if set, else the first
    /// `xmlsec1` in the search directories, then in `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Unavailable`] if no binary is found.
    pub fn locate(&self) -> Result<PathBuf, ToolError> {
        if let Some(path) = &self.config.path {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(ToolError::Unavailable(format!(
                    "{} does not exist",
                    path.display()
                )))
            };
        }
        let from_env = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();
        self.config
            .search_dirs
            .iter()
            .chain(from_env.iter())
            .map(|dir| dir.join(BINARY))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                tracing::error!("could not locate {BINARY}; signing is unavailable");
                ToolError::Unavailable(format!("{BINARY} not found"))
            })
    }

    fn run(&self, binary: &Path, args: &[String]) -> Result<Output, ToolError> {
        let unavailable = |e: std::io::Error| ToolError::Unavailable(e.to_string());
        let mut stdout = tempfile::tempfile().map_err(unavailable)?;
        let mut stderr = tempfile::tempfile().map_err(unavailable)?;

        tracing::debug!(binary = %binary.display(), ?args, "running");
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout.try_clone().map_err(unavailable)?)
            .stderr(stderr.try_clone().map_err(unavailable)?)
            .spawn()
            .map_err(unavailable)?;

        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(unavailable)? {
                break status;
            }
            if Instant::now() >= deadline {
                // Already exited or unkillable; either way the call failed.
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(?timeout, "{BINARY} timed out");
                return Err(ToolError::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        Ok(Output {
            status,
            stdout: read_all(&mut stdout)?,
            stderr: read_all(&mut stderr)?,
        })
    }
}

impl SignatureTool for Xmlsec1 {
    fn sign(
        &self,
        document: &str,
        node_id: &str,
        key: &Keypair,
        issuer: &Gid,
    ) -> Result<String, ToolError> {
        let binary = self.locate()?;

        let key_file = temp_file_with(&key.to_bytes().map_err(failed)?)?;
        let mut chain_files = Vec::new();
        let mut next = Some(issuer.certificate());
        while let Some(certificate) = next {
            let pem = certificate.save_to_string(false).map_err(failed)?;
            chain_files.push(temp_file_with(pem.as_bytes())?);
            next = certificate.parent();
        }
        let document_file = temp_file_with(document.as_bytes())?;

        let bundle = std::iter::once(&key_file)
            .chain(chain_files.iter())
            .map(|file| file.path().display().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let output = self.run(
            &binary,
            &[
                "--sign".into(),
                "--node-id".into(),
                node_id.into(),
                "--privkey-pem".into(),
                bundle,
                document_file.path().display().to_string(),
            ],
        )?;

        if !output.status.success() || output.stdout.trim().is_empty() {
            tracing::warn!(node_id, stderr = %output.stderr.trim(), "{BINARY} failed to sign");
            return Err(ToolError::Failed(error_message(&output.stderr)));
        }
        Ok(output.stdout)
    }

    fn verify(
        &self,
        document: &str,
        node_id: &str,
        trusted: &[Certificate],
    ) -> Result<(), ToolError> {
        let binary = self.locate()?;

        let trusted_files = trusted
            .iter()
            .map(|certificate| {
                let pem = certificate.save_to_string(false).map_err(failed)?;
                temp_file_with(pem.as_bytes())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let document_file = temp_file_with(document.as_bytes())?;

        let mut args = vec!["--verify".into(), "--node-id".into(), node_id.to_string()];
        for file in &trusted_files {
            args.push("--trusted-pem".into());
            args.push(file.path().display().to_string());
        }
        args.push(document_file.path().display().to_string());

        let output = self.run(&binary, &args)?;
        if !output.status.success() {
            tracing::warn!(node_id, stderr = %output.stderr.trim(), "{BINARY} rejected signature");
            return Err(ToolError::Failed(error_message(&output.stderr)));
        }
        if !output.stdout.contains("OK") && !output.stderr.contains("OK") {
            tracing::warn!(node_id, "{BINARY} succeeded without reporting OK");
        }
        Ok(())
    }
}

fn temp_file_with(contents: &[u8]) -> Result<NamedTempFile, ToolError> {
    let mut file = NamedTempFile::new().map_err(|e| ToolError::Unavailable(e.to_string()))?;
    file.write_all(contents)
        .and_then(|()| file.flush())
        .map_err(|e| ToolError::Unavailable(e.to_string()))?;
    Ok(file)
}

fn read_all(file: &mut File) -> Result<String, ToolError> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut text))
        .map_err(failed)?;
    Ok(text)
}

/// The `msg=` part of xmlsec1's error output, or all of it.
fn error_message(stderr: &str) -> String {
    stderr
        .find("msg=")
        .map(|start| {
            let rest = &stderr[start + 4..];
            rest.split(['\\', '\n']).next().unwrap_or(rest).to_string()
        })
        .unwrap_or_else(|| stderr.trim().to_string())
}

fn failed(error: impl std::fmt::Display) -> ToolError {
    ToolError::Failed(error.to_string())
}
