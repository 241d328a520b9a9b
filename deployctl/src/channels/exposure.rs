//! Channel exposure manager
//!
//! Binds a running deployment's internal port to an external channel.
//! Nothing here stops, removes or restarts the deployment: an exposure
//! failure or an interrupted tunnel leaves the container as it was.

use std::future::Future;

use tracing::info;

use crate::channels::tunnel::{run_tunnel, TunnelCommand, TunnelOutcome};
use crate::deploy::lifecycle::LifecycleManager;
use crate::errors::DeployError;
use crate::models::deployment::{ChannelBinding, ChannelType, Deployment};
use crate::storage::settings::{TunnelSettings, WebhookSettings};

pub struct ExposureManager {
    lifecycle: LifecycleManager,
    webhook: WebhookSettings,
    tunnel: TunnelSettings,
}

impl ExposureManager {
    pub fn new(lifecycle: LifecycleManager, webhook: WebhookSettings, tunnel: TunnelSettings) -> Self {
        Self {
            lifecycle,
            webhook,
            tunnel,
        }
    }

    /// Command line of the embedded webhook listener for `binding`
    pub fn webhook_command(&self, binding: &ChannelBinding) -> Vec<String> {
        let port = binding.internal_port.to_string();
        let route = binding
            .route_path
            .clone()
            .unwrap_or_else(|| self.webhook.route_path.clone());
        self.webhook
            .command
            .iter()
            .map(|arg| arg.replace("{port}", &port).replace("{route}", &route))
            .collect()
    }

    pub fn tunnel_command(&self, binding: &ChannelBinding) -> TunnelCommand {
        TunnelCommand::for_provider(
            self.tunnel.provider,
            binding.internal_port,
            self.tunnel.domain.as_deref(),
            self.tunnel.binary.as_deref(),
        )
    }

    /// Expose `deployment` through `binding`.
    ///
    /// `on_ready` runs once the channel is reachable. For tunnels the call
    /// then blocks until the tunnel ends or `shutdown` resolves.
    pub async fn expose<S, F>(
        &self,
        deployment: &Deployment,
        binding: ChannelBinding,
        shutdown: S,
        on_ready: F,
    ) -> Result<ChannelBinding, DeployError>
    where
        S: Future<Output = ()>,
        F: FnMut(&ChannelBinding),
    {
        let tunnel = self.tunnel_command(&binding);
        self.expose_via(deployment, binding, &tunnel, shutdown, on_ready)
            .await
    }

    /// [`expose`](Self::expose) with `tunnel` as the tunnel process
    pub async fn expose_via<S, F>(
        &self,
        deployment: &Deployment,
        mut binding: ChannelBinding,
        tunnel: &TunnelCommand,
        shutdown: S,
        mut on_ready: F,
    ) -> Result<ChannelBinding, DeployError>
    where
        S: Future<Output = ()>,
        F: FnMut(&ChannelBinding),
    {
        if binding.internal_port == 0 {
            return Err(DeployError::ConfigError(format!(
                "No internal port to expose for {}",
                deployment
            )));
        }

        // forwarding to a port nothing listens on fails every request
        let container = self.lifecycle.ensure_running(deployment).await?;
        info!(
            "Exposing {} (container {}) via {}",
            deployment, container, binding.channel_type
        );

        match binding.channel_type {
            ChannelType::DirectHttp => {
                on_ready(&binding);
                Ok(binding)
            }
            ChannelType::WebhookEmbedded => {
                if binding.route_path.is_none() {
                    binding.route_path = Some(self.webhook.route_path.clone());
                }
                let command = self.webhook_command(&binding);
                self.lifecycle
                    .runtime()
                    .exec_detached(deployment, &command)
                    .await
                    .map_err(|e| {
                        DeployError::ExposureError(format!("Webhook listener failed to start: {}", e))
                    })?;
                on_ready(&binding);
                Ok(binding)
            }
            ChannelType::Tunnel => {
                self.forward(deployment, binding, tunnel, shutdown, on_ready)
                    .await
            }
        }
    }

    async fn forward<S, F>(
        &self,
        deployment: &Deployment,
        binding: ChannelBinding,
        command: &TunnelCommand,
        shutdown: S,
        mut on_ready: F,
    ) -> Result<ChannelBinding, DeployError>
    where
        S: Future<Output = ()>,
        F: FnMut(&ChannelBinding),
    {
        let mut announced = binding;
        let outcome = run_tunnel(command, shutdown, |url| {
            announced.public_endpoint = Some(url.as_str().trim_end_matches('/').to_string());
            on_ready(&announced);
        })
        .await?;

        match outcome {
            TunnelOutcome::Interrupted => info!("Tunnel for {} closed by operator", deployment),
            TunnelOutcome::Exited(status) => info!("Tunnel for {} exited ({})", deployment, status),
        }
        Ok(announced)
    }
}
