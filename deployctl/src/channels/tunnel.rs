//! External tunnel processes (ngrok, cloudflared)
//!
//! The tunnel runs in the foreground for as long as the invocation lives.
//! Its lifetime is independent of the deployment: interrupting it kills
//! the tunnel process and nothing else.

use std::fmt;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::DeployError;
use crate::utils::display_command;

/// Tunnel provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProvider {
    #[default]
    Ngrok,
    Cloudflared,
}

impl fmt::Display for TunnelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelProvider::Ngrok => f.write_str("ngrok"),
            TunnelProvider::Cloudflared => f.write_str("cloudflared"),
        }
    }
}

impl std::str::FromStr for TunnelProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ngrok" => Ok(TunnelProvider::Ngrok),
            "cloudflared" | "cloudflare" => Ok(TunnelProvider::Cloudflared),
            _ => Err(format!("Invalid tunnel provider: {}", s)),
        }
    }
}

/// How to launch a tunnel and recognise that it is forwarding
#[derive(Debug, Clone)]
pub struct TunnelCommand {
    pub provider: TunnelProvider,
    pub program: String,
    pub args: Vec<String>,

    /// Reserved domain, when the provider assigns a fixed one
    pub domain: Option<String>,
}

impl TunnelCommand {
    /// Provider command forwarding a public URL to `http://localhost:{port}`
    pub fn for_provider(
        provider: TunnelProvider,
        port: u16,
        domain: Option<&str>,
        binary: Option<&str>,
    ) -> Self {
        let target = format!("http://localhost:{}", port);
        let mut args: Vec<String> = match provider {
            // logfmt on stdout carries the `url=` of the started tunnel
            TunnelProvider::Ngrok => vec![
                "http".into(),
                target,
                "--log".into(),
                "stdout".into(),
                "--log-format".into(),
                "logfmt".into(),
            ],
            TunnelProvider::Cloudflared => vec!["tunnel".into(), "--url".into(), target],
        };
        if let Some(domain) = domain {
            match provider {
                TunnelProvider::Ngrok => args.push(format!("--domain={}", domain)),
                TunnelProvider::Cloudflared => {
                    args.push("--hostname".into());
                    args.push(domain.to_string());
                }
            }
        }

        Self {
            provider,
            program: binary
                .map(str::to_string)
                .unwrap_or_else(|| provider.to_string()),
            args,
            domain: domain.map(str::to_string),
        }
    }

    pub fn display(&self) -> String {
        display_command(&self.program, &self.args)
    }

    /// Public URL announced by a line of tunnel output, if any
    pub fn established_url(&self, line: &str) -> Option<Url> {
        match self.provider {
            TunnelProvider::Ngrok => line
                .split_whitespace()
                .filter_map(|token| token.strip_prefix("url="))
                .find_map(|raw| parse_public(raw.trim_matches('"'))),
            TunnelProvider::Cloudflared => {
                let quick = line
                    .split(|c: char| c.is_whitespace() || c == '|')
                    .filter(|token| token.starts_with("https://"))
                    .filter_map(parse_public)
                    .find(|url| {
                        url.host_str()
                            .is_some_and(|h| h.ends_with(".trycloudflare.com"))
                    });
                quick.or_else(|| {
                    let domain = self.domain.as_deref()?;
                    if line.contains("Registered tunnel connection") {
                        parse_public(&format!("https://{}", domain))
                    } else {
                        None
                    }
                })
            }
        }
    }
}

fn parse_public(raw: &str) -> Option<Url> {
    Url::parse(raw).ok().filter(|url| url.scheme() == "https")
}

/// How a tunnel session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelOutcome {
    /// The operator interrupted the session; the tunnel process was killed
    Interrupted,

    /// The tunnel process exited on its own after forwarding
    Exited(String),
}

/// How long a failed exit waits for an interrupt that may have caused it
const INTERRUPT_GRACE: Duration = Duration::from_millis(250);

enum Step {
    Shutdown,
    Line(Option<String>),
    ErrLine(Option<String>),
    Exited(std::io::Result<ExitStatus>),
}

/// Launch the tunnel and block until it exits or `shutdown` resolves.
///
/// `on_established` runs once, with the public URL, when the provider
/// reports that it is forwarding. A tunnel that dies before that, or
/// fails afterwards, is an exposure error.
pub async fn run_tunnel<S, F>(
    command: &TunnelCommand,
    shutdown: S,
    mut on_established: F,
) -> Result<TunnelOutcome, DeployError>
where
    S: Future<Output = ()>,
    F: FnMut(&Url),
{
    tokio::pin!(shutdown);

    // first poll arms the operator's signal handlers before the child exists
    tokio::select! {
        biased;
        _ = &mut shutdown => return Ok(TunnelOutcome::Interrupted),
        _ = std::future::ready(()) => {}
    }

    info!("Launching tunnel: {}", command.display());
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // a terminal Ctrl+C reaches deployctl only; the tunnel is killed below
    #[cfg(unix)]
    cmd.process_group(0);
    let mut child = cmd.spawn().map_err(|e| {
        DeployError::ExposureError(format!("Failed to launch {}: {}", command.program, e))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DeployError::Internal("tunnel stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DeployError::Internal("tunnel stderr not captured".to_string()))?;
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let (mut out_open, mut err_open) = (true, true);
    let mut established = false;

    loop {
        let step = tokio::select! {
            biased;
            _ = &mut shutdown => Step::Shutdown,
            line = out_lines.next_line(), if out_open => Step::Line(line.unwrap_or(None)),
            line = err_lines.next_line(), if err_open => Step::ErrLine(line.unwrap_or(None)),
            status = child.wait(), if !out_open && !err_open => Step::Exited(status),
        };

        let line = match step {
            Step::Shutdown => {
                info!("Interrupt received, closing tunnel");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill tunnel process: {}", e);
                }
                return Ok(TunnelOutcome::Interrupted);
            }
            Step::Exited(status) => {
                let failed = !matches!(&status, Ok(status) if status.success());
                if failed && time::timeout(INTERRUPT_GRACE, &mut shutdown).await.is_ok() {
                    info!("{} ended by the operator's interrupt", command.provider);
                    return Ok(TunnelOutcome::Interrupted);
                }
                return match status {
                    Ok(status) if established && status.success() => {
                        Ok(TunnelOutcome::Exited(status.to_string()))
                    }
                    Ok(status) if established => Err(DeployError::ExposureError(format!(
                        "{} terminated ({})",
                        command.provider, status
                    ))),
                    Ok(status) => Err(DeployError::ExposureError(format!(
                        "{} exited before forwarding ({})",
                        command.provider, status
                    ))),
                    Err(e) => Err(DeployError::ExposureError(format!(
                        "Lost track of {}: {}",
                        command.provider, e
                    ))),
                };
            }
            Step::Line(None) => {
                out_open = false;
                continue;
            }
            Step::ErrLine(None) => {
                err_open = false;
                continue;
            }
            Step::Line(Some(line)) | Step::ErrLine(Some(line)) => line,
        };

        debug!("{}: {}", command.provider, line);
        if !established {
            if let Some(url) = command.established_url(&line) {
                established = true;
                on_established(&url);
            }
        }
    }
}
