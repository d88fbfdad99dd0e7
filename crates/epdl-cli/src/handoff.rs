//! External downloader hand-off through a child process.
//!
//! The engine hands an episode over when the user prefers an external
//! program. The program gets the URL, the request headers, a target
//! directory and a file name, translated into its own flags.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use epdl_core::DownloadError;
use epdl_core::ports::{ExternalDownloaderPort, HandoffRequest};

/// Program used when preferences name none.
pub const DEFAULT_EXTERNAL_DOWNLOADER: &str = "aria2c";

/// How long a freshly spawned program may take to reject its arguments.
const ACCEPT_WINDOW: Duration = Duration::from_millis(500);

/// Launches a download program and leaves it running.
#[derive(Debug, Clone)]
pub struct ProcessHandoff {
    default_program: String,
}

impl ProcessHandoff {
    pub fn new(default_program: impl Into<String>) -> Self {
        Self {
            default_program: default_program.into(),
        }
    }

    fn program<'a>(&'a self, request: &'a HandoffRequest) -> &'a str {
        request
            .program
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.default_program)
    }
}

impl Default for ProcessHandoff {
    fn default() -> Self {
        Self::new(DEFAULT_EXTERNAL_DOWNLOADER)
    }
}

/// Command-line arguments for `program`, chosen by its file name.
///
/// Unknown programs receive the URL only.
pub fn handoff_args(program: &str, request: &HandoffRequest) -> Vec<String> {
    let name = Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program);
    let target = request.target_dir.join(&request.file_name);
    let mut args = Vec::new();

    match name {
        "aria2c" => {
            args.push("--dir".to_string());
            args.push(request.target_dir.display().to_string());
            args.push("--out".to_string());
            args.push(request.file_name.clone());
            for (key, value) in &request.headers {
                args.push("--header".to_string());
                args.push(format!("{key}: {value}"));
            }
        }
        "wget" => {
            args.push("-O".to_string());
            args.push(target.display().to_string());
            for (key, value) in &request.headers {
                args.push(format!("--header={key}: {value}"));
            }
        }
        "curl" => {
            args.push("-L".to_string());
            args.push("-o".to_string());
            args.push(target.display().to_string());
            for (key, value) in &request.headers {
                args.push("-H".to_string());
                args.push(format!("{key}: {value}"));
            }
        }
        _ => {}
    }
    args.push(request.url.clone());
    args
}

#[async_trait]
impl ExternalDownloaderPort for ProcessHandoff {
    async fn hand_off(&self, request: &HandoffRequest) -> Result<(), DownloadError> {
        let program = self.program(request);
        tokio::fs::create_dir_all(&request.target_dir)
            .await
            .map_err(|e| DownloadError::from_io_error(&e))?;

        let args = handoff_args(program, request);
        debug!(program, ?args, "launching external downloader");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DownloadError::handoff(format!("could not launch {program}: {e}")))?;

        // A program that rejects its arguments exits right away; anything
        // still running after the window has taken the job.
        match tokio::time::timeout(ACCEPT_WINDOW, child.wait()).await {
            Ok(Ok(status)) if !status.success() => Err(DownloadError::handoff(format!(
                "{program} exited with {status}"
            ))),
            Ok(Err(e)) => Err(DownloadError::handoff(format!(
                "could not wait for {program}: {e}"
            ))),
            Ok(Ok(_)) | Err(_) => {
                info!(program, file = %request.file_name, "episode handed to external downloader");
                Ok(())
            }
        }
    }
}
