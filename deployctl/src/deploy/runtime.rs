//! Container runtime backed by Docker Compose
//!
//! Every compose invocation carries `-p <namespace>`, so two deployments
//! that reuse a service name under different namespaces never see each
//! other's containers.

use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::models::deployment::Deployment;
use crate::utils::display_command;

/// Operations the lifecycle manager needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stop the deployment's container; `force` kills it instead
    async fn stop(&self, deployment: &Deployment, force: bool) -> Result<(), DeployError>;

    /// Remove the deployment's stopped container
    async fn remove(&self, deployment: &Deployment) -> Result<(), DeployError>;

    /// Remove the image tagged for this deployment, and only that image
    async fn remove_image(&self, deployment: &Deployment) -> Result<(), DeployError>;

    async fn build(&self, deployment: &Deployment, no_cache: bool) -> Result<(), DeployError>;

    /// Start detached from the already built image
    async fn start(&self, deployment: &Deployment, force_recreate: bool) -> Result<(), DeployError>;

    /// IDs of the deployment's running containers
    async fn running_containers(&self, deployment: &Deployment) -> Result<Vec<String>, DeployError>;

    /// Start a secondary process inside the running container
    async fn exec_detached(&self, deployment: &Deployment, command: &[String]) -> Result<(), DeployError>;

    /// Run a command inside the container attached to the operator's terminal
    async fn exec_interactive(&self, deployment: &Deployment, command: &[String]) -> Result<(), DeployError>;

    async fn follow_logs(&self, deployment: &Deployment) -> Result<(), DeployError>;

    /// Command line the operator can paste to stream logs
    fn logs_command(&self, deployment: &Deployment) -> String;
}

/// Which compose binary is available on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose` (v2 plugin)
    Plugin,

    /// `docker-compose` (standalone v1)
    Standalone,
}

/// [`ContainerRuntime`] shelling out to Docker Compose
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    flavor: ComposeFlavor,
    docker_bin: String,
}

impl ComposeRuntime {
    pub fn new(flavor: ComposeFlavor) -> Self {
        Self {
            flavor,
            docker_bin: "docker".to_string(),
        }
    }

    /// Prefer the compose plugin, fall back to standalone `docker-compose`
    pub async fn detect() -> Self {
        let plugin = Command::new("docker")
            .args(["compose", "version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        let flavor = if plugin {
            ComposeFlavor::Plugin
        } else {
            debug!("'docker compose' unavailable, using 'docker-compose'");
            ComposeFlavor::Standalone
        };
        Self::new(flavor)
    }

    /// Program and arguments for a compose subcommand scoped to `deployment`
    pub fn compose_invocation(&self, deployment: &Deployment, sub: &[&str]) -> (String, Vec<String>) {
        let (program, mut args) = match self.flavor {
            ComposeFlavor::Plugin => (self.docker_bin.clone(), vec!["compose".to_string()]),
            ComposeFlavor::Standalone => ("docker-compose".to_string(), Vec::new()),
        };

        args.push("-p".to_string());
        args.push(deployment.namespace.clone());
        if let Some(compose_file) = &deployment.compose_file {
            args.push("-f".to_string());
            args.push(compose_file.to_string_lossy().into_owned());
        }
        args.extend(sub.iter().map(|s| s.to_string()));
        (program, args)
    }

    /// Tag of the image compose builds for `deployment`.
    ///
    /// The compose plugin names built images `<project>-<service>`, standalone
    /// `docker-compose` uses `<project>_<service>`. An explicit `image` wins.
    pub fn image_tag(&self, deployment: &Deployment) -> String {
        match (&deployment.image, self.flavor) {
            (Some(image), _) => image.clone(),
            (None, ComposeFlavor::Plugin) => deployment.image_tag(),
            (None, ComposeFlavor::Standalone) => {
                format!("{}_{}", deployment.namespace, deployment.service)
            }
        }
    }

    fn command(&self, deployment: &Deployment, sub: &[&str]) -> (Command, String) {
        let (program, args) = self.compose_invocation(deployment, sub);
        let rendered = display_command(&program, &args);
        let mut cmd = Command::new(&program);
        cmd.args(&args).current_dir(context_dir(&deployment.build_context));
        (cmd, rendered)
    }

    fn with_command<'a>(sub: &[&'a str], command: &'a [String]) -> Vec<&'a str> {
        let mut all = sub.to_vec();
        all.extend(command.iter().map(String::as_str));
        all
    }
}

fn context_dir(build_context: &Path) -> &Path {
    if build_context.as_os_str().is_empty() {
        Path::new(".")
    } else {
        build_context
    }
}

/// Run with the operator's stdio inherited, so output reaches them verbatim
async fn run_inherited(mut cmd: Command, rendered: &str) -> Result<ExitStatus, DeployError> {
    debug!("Running: {}", rendered);
    cmd.status().await.map_err(|e| DeployError::CommandFailed {
        command: rendered.to_string(),
        status: e.to_string(),
    })
}

async fn run_captured(mut cmd: Command, rendered: &str) -> Result<Output, DeployError> {
    debug!("Running: {}", rendered);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| DeployError::CommandFailed {
            command: rendered.to_string(),
            status: e.to_string(),
        })
}

fn check_status(status: ExitStatus, rendered: &str) -> Result<(), DeployError> {
    if status.success() {
        return Ok(());
    }
    Err(DeployError::CommandFailed {
        command: rendered.to_string(),
        status: status.to_string(),
    })
}

fn check_output(output: Output, rendered: &str) -> Result<Output, DeployError> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(DeployError::CommandFailed {
        command: rendered.to_string(),
        status: format!("{}: {}", output.status, stderr.trim()),
    })
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn stop(&self, deployment: &Deployment, force: bool) -> Result<(), DeployError> {
        let verb = if force { "kill" } else { "stop" };
        let (cmd, rendered) = self.command(deployment, &[verb, deployment.service.as_str()]);
        check_output(run_captured(cmd, &rendered).await?, &rendered)?;
        Ok(())
    }

    async fn remove(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let (cmd, rendered) = self.command(deployment, &["rm", "-f", deployment.service.as_str()]);
        check_output(run_captured(cmd, &rendered).await?, &rendered)?;
        Ok(())
    }

    async fn remove_image(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let tag = self.image_tag(deployment);
        let args = vec!["image".to_string(), "rm".to_string(), tag];
        let rendered = display_command(&self.docker_bin, &args);
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(&args);
        check_output(run_captured(cmd, &rendered).await?, &rendered)?;
        Ok(())
    }

    async fn build(&self, deployment: &Deployment, no_cache: bool) -> Result<(), DeployError> {
        let mut sub = vec!["build"];
        if no_cache {
            sub.push("--no-cache");
        }
        sub.push(deployment.service.as_str());

        let (cmd, rendered) = self.command(deployment, &sub);
        let status = run_inherited(cmd, &rendered).await?;
        if !status.success() {
            return Err(DeployError::BuildFailed {
                deployment: deployment.to_string(),
                reason: format!("'{}' exited with {}", rendered, status),
            });
        }
        Ok(())
    }

    async fn start(&self, deployment: &Deployment, force_recreate: bool) -> Result<(), DeployError> {
        let mut sub = vec!["up", "-d", "--no-build"];
        if force_recreate {
            sub.push("--force-recreate");
        }
        sub.push(deployment.service.as_str());

        let (cmd, rendered) = self.command(deployment, &sub);
        let status = run_inherited(cmd, &rendered).await?;
        if !status.success() {
            return Err(DeployError::StartFailed {
                deployment: deployment.to_string(),
                reason: format!("'{}' exited with {}", rendered, status),
            });
        }
        Ok(())
    }

    async fn running_containers(&self, deployment: &Deployment) -> Result<Vec<String>, DeployError> {
        let (cmd, rendered) = self.command(
            deployment,
            &["ps", "-q", "--status", "running", deployment.service.as_str()],
        );
        let output = check_output(run_captured(cmd, &rendered).await?, &rendered)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn exec_detached(&self, deployment: &Deployment, command: &[String]) -> Result<(), DeployError> {
        let sub = Self::with_command(&["exec", "-d", deployment.service.as_str()], command);
        let (cmd, rendered) = self.command(deployment, &sub);
        check_output(run_captured(cmd, &rendered).await?, &rendered)?;
        Ok(())
    }

    async fn exec_interactive(&self, deployment: &Deployment, command: &[String]) -> Result<(), DeployError> {
        let sub = Self::with_command(&["exec", deployment.service.as_str()], command);
        let (cmd, rendered) = self.command(deployment, &sub);
        let status = run_inherited(cmd, &rendered).await?;
        check_status(status, &rendered)
    }

    async fn follow_logs(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let (cmd, rendered) = self.command(deployment, &["logs", "-f", deployment.service.as_str()]);
        let status = run_inherited(cmd, &rendered).await?;
        check_status(status, &rendered)
    }

    fn logs_command(&self, deployment: &Deployment) -> String {
        let (program, args) = self.compose_invocation(deployment, &["logs", "-f", deployment.service.as_str()]);
        display_command(&program, &args)
    }
}
