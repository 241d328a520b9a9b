//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::channels::tunnel::TunnelProvider;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::deployment::{BuildPatch, Deployment};

/// Controller settings, read from `deployctl.json` when present
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Environment file consumed by the deployments
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,

    /// Keys `check-env` requires on top of each deployment's own
    #[serde(default = "default_required_env")]
    pub required_env: Vec<String>,

    /// Keys reported by `check-env` but never required
    #[serde(default = "default_optional_env")]
    pub optional_env: Vec<String>,

    /// Known deployments
    #[serde(default = "default_deployments")]
    pub deployments: Vec<Deployment>,

    /// Tunnel configuration
    #[serde(default)]
    pub tunnel: TunnelSettings,

    /// Embedded webhook configuration
    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Channel identity updated by `set-chat-id`
    #[serde(default)]
    pub identity: IdentitySettings,
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_required_env() -> Vec<String> {
    [
        "SUPABASE_URL",
        "SUPABASE_KEY",
        "OPENAI_API_KEY",
        "AWS_DEFAULT_REGION",
        "S3_BUCKET",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_optional_env() -> Vec<String> {
    [
        "SUPABASE_BUCKET",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_CHAT_ID",
        "WHATSAPP_TOKEN",
        "WHATSAPP_PHONE_ID",
        "WHATSAPP_VERIFY_TOKEN",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_deployments() -> Vec<Deployment> {
    let mut app = Deployment::new("app", "bookai", "bookai", 8000, ".");
    app.required_env = vec!["OPENAI_API_KEY".to_string()];

    let mut mcp = Deployment::new("mcp", "mcp-server", "bookai-mcp", 8001, ".");
    mcp.compose_file = Some(PathBuf::from("docker-compose.mcp.yml"));
    mcp.shell_command = vec!["python".to_string(), "mcp_server.py".to_string()];
    // the MCP SDK logs every request at info level
    mcp.patches = vec![BuildPatch {
        target_dependency: "mcp".to_string(),
        target_file_path: PathBuf::from("vendor/mcp/server/lowlevel/server.py"),
        match_pattern: r#"logger.info("Processing request of type %s", type(req).__name__)"#
            .to_string(),
        replacement: r#"logger.debug("Processing request of type %s", type(req).__name__)"#
            .to_string(),
    }];

    vec![app, mcp]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            json_logs: false,
            env_file: default_env_file(),
            required_env: default_required_env(),
            optional_env: default_optional_env(),
            deployments: default_deployments(),
            tunnel: TunnelSettings::default(),
            webhook: WebhookSettings::default(),
            identity: IdentitySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `file`, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject tables where two deployments would collide on the host
    pub fn validate(&self) -> Result<(), DeployError> {
        for (i, a) in self.deployments.iter().enumerate() {
            for b in &self.deployments[i + 1..] {
                if a.name == b.name {
                    return Err(DeployError::ConfigError(format!(
                        "Duplicate deployment name: {}",
                        a.name
                    )));
                }
                if a.namespace == b.namespace && a.service == b.service {
                    return Err(DeployError::ConfigError(format!(
                        "Deployments {} and {} share identity {}",
                        a.name, b.name, a
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a deployment by operator-facing name
    pub fn deployment(&self, name: &str) -> Result<&Deployment, DeployError> {
        self.deployments
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| DeployError::NotFound(format!("deployment '{}'", name)))
    }
}

/// Tunnel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelSettings {
    #[serde(default)]
    pub provider: TunnelProvider,

    /// Reserved domain, for a public endpoint that survives restarts
    #[serde(default)]
    pub domain: Option<String>,

    /// Override for the provider binary path
    #[serde(default)]
    pub binary: Option<String>,
}

/// Embedded webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Route the provider posts to
    #[serde(default = "default_webhook_route")]
    pub route_path: String,

    /// Listener started inside the container; `{port}` is substituted
    #[serde(default = "default_webhook_command")]
    pub command: Vec<String>,
}

fn default_webhook_route() -> String {
    "/webhook".to_string()
}

fn default_webhook_command() -> Vec<String> {
    [
        "uvicorn",
        "main:app",
        "--host",
        "0.0.0.0",
        "--port",
        "{port}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            route_path: default_webhook_route(),
            command: default_webhook_command(),
        }
    }
}

/// Channel identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default = "default_identity_key")]
    pub key: String,

    /// Deployment restarted after the identity changes
    #[serde(default = "default_identity_deployment")]
    pub deployment: String,
}

fn default_identity_key() -> String {
    "TELEGRAM_CHAT_ID".to_string()
}

fn default_identity_deployment() -> String {
    "app".to_string()
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            key: default_identity_key(),
            deployment: default_identity_deployment(),
        }
    }
}
