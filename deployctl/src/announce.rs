//! Endpoint announcements
//!
//! Purely informational. Nothing here can fail a pipeline: probe errors
//! are printed as warnings and swallowed.

use tracing::debug;

use crate::app::options::ProbeOptions;
use crate::console;
use crate::errors::DeployError;
use crate::models::deployment::{ChannelBinding, Deployment};
use crate::utils::calc_exp_backoff;

/// What the operator needs to reach a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub deployment: String,
    pub base_url: String,
    pub health_url: String,
    pub public_endpoint: Option<String>,
    pub webhook_url: Option<String>,
    pub logs_command: String,
}

impl Announcement {
    pub fn new(deployment: &Deployment, binding: Option<&ChannelBinding>, logs_command: String) -> Self {
        let base_url = deployment.base_url();
        let health_url = format!(
            "{}/{}",
            base_url,
            deployment.health_path.trim_start_matches('/')
        );
        let public_endpoint = binding.and_then(|b| b.public_endpoint.clone());
        let webhook_url = binding.and_then(|b| {
            b.webhook_url().or_else(|| {
                let route = b.route_path.as_deref()?;
                Some(format!("{}/{}", base_url, route.trim_start_matches('/')))
            })
        });

        Self {
            deployment: deployment.to_string(),
            base_url,
            health_url,
            public_endpoint,
            webhook_url,
            logs_command,
        }
    }

    pub fn print(&self) {
        console::success(&format!("{} is up", self.deployment));
        console::field("URL", &self.base_url);
        console::field("Health", &self.health_url);
        if let Some(public) = &self.public_endpoint {
            console::field("Public", public);
        }
        if let Some(webhook) = &self.webhook_url {
            console::field("Webhook", webhook);
        }
        console::field("Logs", &self.logs_command);
    }
}

pub struct HealthAnnouncer {
    client: reqwest::Client,
    probe: ProbeOptions,
}

impl HealthAnnouncer {
    pub fn new(probe: ProbeOptions) -> Self {
        let client = reqwest::Client::builder()
            .timeout(probe.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, probe }
    }

    /// Print the announcement, then probe health if enabled
    pub async fn announce(&self, announcement: &Announcement) {
        announcement.print();
        if !self.probe.enabled {
            return;
        }
        match self.probe_health(&announcement.health_url).await {
            Ok(()) => console::success(&format!("{} answered", announcement.health_url)),
            Err(e) => console::warn(&format!(
                "{} did not answer yet ({}); check the logs",
                announcement.health_url, e
            )),
        }
    }

    /// GET `url` until it answers 2xx or attempts run out
    pub async fn probe_health(&self, url: &str) -> Result<(), DeployError> {
        let mut last_error = DeployError::NotFound(url.to_string());
        for attempt in 0..self.probe.attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(calc_exp_backoff(&self.probe.cooldown, attempt - 1)).await;
            }
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    debug!("Health probe {} returned {}", url, response.status());
                    last_error = DeployError::Internal(format!("status {}", response.status()));
                }
                Err(e) => {
                    debug!("Health probe {} failed: {}", url, e);
                    last_error = e.into();
                }
            }
        }
        Err(last_error)
    }
}
