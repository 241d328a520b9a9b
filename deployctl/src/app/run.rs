//! Operator pipelines
//!
//! Each CLI operation is a strict pipeline: configuration, then the
//! container lifecycle, then channel exposure, then the announcement.
//! The first strict failure aborts the remaining steps.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::announce::{Announcement, HealthAnnouncer};
use crate::app::options::ControllerOptions;
use crate::channels::exposure::ExposureManager;
use crate::console;
use crate::deploy::lifecycle::{LifecycleManager, RebuildReport};
use crate::deploy::runtime::ContainerRuntime;
use crate::errors::DeployError;
use crate::models::deployment::{ChannelBinding, ChannelType, Deployment, RebuildOptions};
use crate::storage::env_file::{
    check_keys, resolve_update, EnvStore, EnvironmentRecord, KeyCheck, UpdateDecision,
};
use crate::storage::settings::Settings;
use crate::utils::mask_value;

/// Result of an environment update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvUpdate {
    /// Blank input; the persisted value stays and nothing restarted
    Kept(String),

    /// New value persisted and the deployment recreated
    Updated { value: String, container_id: String },
}

pub struct Controller {
    options: ControllerOptions,
    env: EnvStore,
    lifecycle: LifecycleManager,
    exposure: ExposureManager,
    announcer: HealthAnnouncer,
}

impl Controller {
    pub fn new(options: ControllerOptions, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let lifecycle = LifecycleManager::new(runtime);
        let exposure = ExposureManager::new(
            lifecycle.clone(),
            options.settings.webhook.clone(),
            options.settings.tunnel.clone(),
        );
        Self {
            env: EnvStore::new(options.settings.env_file.clone()),
            announcer: HealthAnnouncer::new(options.probe.clone()),
            lifecycle,
            exposure,
            options,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.options.settings
    }

    pub fn env(&self) -> &EnvStore {
        &self.env
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn deployment(&self, name: &str) -> Result<Deployment, DeployError> {
        self.settings().deployment(name).cloned()
    }

    /// Fail before touching containers when a required key has no value
    pub async fn preflight(&self, deployment: &Deployment) -> Result<(), DeployError> {
        if deployment.required_env.is_empty() {
            return Ok(());
        }
        let record = self.env.load().await?;
        let check = check_keys(&record, &deployment.required_env, &[]);
        if !check.is_complete() {
            return Err(DeployError::MissingConfig(format!(
                "{} (in {})",
                check.missing_required.join(", "),
                self.env.file().path().display()
            )));
        }
        Ok(())
    }

    /// Rebuild the deployment and announce where it is reachable
    pub async fn rebuild(
        &self,
        deployment: &Deployment,
        options: RebuildOptions,
    ) -> Result<RebuildReport, DeployError> {
        self.preflight(deployment).await?;
        console::step(&format!("Rebuilding {}", deployment));
        let report = self.lifecycle.rebuild(deployment, options).await?;

        let logs = self.lifecycle.runtime().logs_command(deployment);
        self.announcer
            .announce(&Announcement::new(deployment, None, logs))
            .await;
        Ok(report)
    }

    /// Rebuild, then attach the operator to the interactive entry point
    pub async fn run_interactive(
        &self,
        deployment: &Deployment,
        options: RebuildOptions,
    ) -> Result<(), DeployError> {
        self.rebuild(deployment, options).await?;
        console::step(&format!(
            "Attaching to {} ({})",
            deployment,
            deployment.shell_command.join(" ")
        ));
        self.lifecycle.attach(deployment).await
    }

    /// Rebuild, then expose the deployment through `channel`.
    ///
    /// For tunnels this blocks until `shutdown` resolves or the tunnel
    /// ends; the container keeps running either way.
    pub async fn expose<S>(
        &self,
        deployment: &Deployment,
        options: RebuildOptions,
        channel: ChannelType,
        route_path: Option<String>,
        shutdown: S,
    ) -> Result<ChannelBinding, DeployError>
    where
        S: Future<Output = ()>,
    {
        self.rebuild(deployment, options).await?;

        let port = deployment.internal_port;
        let binding = match channel {
            ChannelType::DirectHttp => ChannelBinding::direct(port),
            ChannelType::WebhookEmbedded => ChannelBinding::webhook(
                port,
                route_path.unwrap_or_else(|| self.settings().webhook.route_path.clone()),
            ),
            ChannelType::Tunnel => ChannelBinding::tunnel(port, route_path),
        };

        console::step(&format!("Exposing {} via {}", deployment, channel));
        let logs = self.lifecycle.runtime().logs_command(deployment);
        let result = self
            .exposure
            .expose(deployment, binding, shutdown, |ready| {
                Announcement::new(deployment, Some(ready), logs.clone()).print();
            })
            .await;

        if result.is_err() {
            console::warn(&format!("{} is still running", deployment));
        }
        result
    }

    /// Interactive update of a single key.
    ///
    /// Blank input keeps the persisted value and restarts nothing. A new
    /// value is written and the deployment recreated once so it rereads
    /// the file. Blank input with nothing persisted fails without writing.
    pub async fn update_env(
        &self,
        key: &str,
        input: Option<&str>,
        deployment: &Deployment,
    ) -> Result<EnvUpdate, DeployError> {
        let prior = self.env.get(key).await?;
        match resolve_update(key, prior.as_deref(), input)? {
            UpdateDecision::Keep(value) => {
                console::step(&format!(
                    "Keeping {}={}; no restart needed",
                    key,
                    mask_value(&value)
                ));
                Ok(EnvUpdate::Kept(value))
            }
            UpdateDecision::Replace(value) => {
                self.env.set(key, &value).await?;
                console::success(&format!("{}={} saved", key, mask_value(&value)));
                console::step(&format!("Restarting {} to apply it", deployment));
                let report = self.lifecycle.recreate(deployment).await?;
                info!("{} recreated as {}", deployment, report.container_id);
                Ok(EnvUpdate::Updated {
                    value,
                    container_id: report.container_id,
                })
            }
        }
    }

    /// Report required and optional keys for `deployment`, or for all.
    ///
    /// Without an environment file the process environment is checked
    /// instead.
    pub async fn check_env(&self, deployment: Option<&Deployment>) -> Result<KeyCheck, DeployError> {
        let record = if self.env.file().exists().await {
            self.env.load().await?
        } else {
            console::warn(&format!(
                "{} not found, checking the process environment",
                self.env.file().path().display()
            ));
            EnvironmentRecord::from_process_env()
        };

        let settings = self.settings();
        let mut required = settings.required_env.clone();
        match deployment {
            Some(d) => required.extend(d.required_env.iter().cloned()),
            None => required.extend(
                settings
                    .deployments
                    .iter()
                    .flat_map(|d| d.required_env.iter().cloned()),
            ),
        }
        let mut seen = Vec::new();
        required.retain(|k| {
            let first = !seen.contains(k);
            seen.push(k.clone());
            first
        });
        let optional: Vec<String> = settings
            .optional_env
            .iter()
            .filter(|k| !required.contains(k))
            .cloned()
            .collect();

        Ok(check_keys(&record, &required, &optional))
    }

    pub async fn teardown(&self, deployment: &Deployment) {
        console::step(&format!("Tearing down {}", deployment));
        self.lifecycle.teardown(deployment).await;
        console::success(&format!("{} removed", deployment));
    }

    pub async fn logs(&self, deployment: &Deployment) -> Result<(), DeployError> {
        self.lifecycle.follow_logs(deployment).await
    }
}
