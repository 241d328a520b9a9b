//! Deployment models

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One addressable service instance, identified by `(namespace, service)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Operator-facing name (`app`, `mcp`, ...)
    pub name: String,

    /// Compose service name
    pub service: String,

    /// Compose project namespace isolating this deployment on the host
    pub namespace: String,

    /// Port the service listens on
    pub internal_port: u16,

    /// Directory handed to the image builder
    pub build_context: PathBuf,

    /// Compose file, relative to the build context
    #[serde(default)]
    pub compose_file: Option<PathBuf>,

    /// Explicit image tag, when the compose file sets `image:`
    #[serde(default)]
    pub image: Option<String>,

    /// Health endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Entry point for interactive sessions inside the container
    #[serde(default = "default_shell_command")]
    pub shell_command: Vec<String>,

    /// Env keys that must be present before the service is started
    #[serde(default)]
    pub required_env: Vec<String>,

    /// Patches applied to the build context before every build
    #[serde(default)]
    pub patches: Vec<BuildPatch>,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_shell_command() -> Vec<String> {
    vec!["python".to_string(), "chat_cli.py".to_string()]
}

impl Deployment {
    /// Create a deployment with default health path and shell command
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        namespace: impl Into<String>,
        internal_port: u16,
        build_context: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            namespace: namespace.into(),
            internal_port,
            build_context: build_context.into(),
            compose_file: None,
            image: None,
            health_path: default_health_path(),
            shell_command: default_shell_command(),
            required_env: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Image tag owned by this deployment.
    ///
    /// The compose plugin names built images `<project>-<service>` unless
    /// the service sets `image:` explicitly.
    pub fn image_tag(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.namespace, self.service))
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.internal_port)
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Options for a rebuild cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Build without the layer cache
    pub no_cache: bool,

    /// Kill instead of stopping gracefully, and force-recreate on start
    pub force: bool,

    /// Remove the deployment's previous image before building
    pub remove_image: bool,
}

/// How a deployment is reached from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    DirectHttp,
    WebhookEmbedded,
    Tunnel,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelType::DirectHttp => "direct-http",
            ChannelType::WebhookEmbedded => "webhook-embedded",
            ChannelType::Tunnel => "tunnel",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct-http" | "direct" | "http" => Ok(ChannelType::DirectHttp),
            "webhook-embedded" | "webhook" => Ok(ChannelType::WebhookEmbedded),
            "tunnel" => Ok(ChannelType::Tunnel),
            _ => Err(format!("Invalid channel type: {}", s)),
        }
    }
}

/// Mapping from a deployment's internal port to an external address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub channel_type: ChannelType,

    pub internal_port: u16,

    /// Assigned by the tunnel at runtime; not stable across restarts
    /// unless the provider reserves a fixed domain
    #[serde(default)]
    pub public_endpoint: Option<String>,

    #[serde(default)]
    pub route_path: Option<String>,
}

impl ChannelBinding {
    pub fn direct(internal_port: u16) -> Self {
        Self {
            channel_type: ChannelType::DirectHttp,
            internal_port,
            public_endpoint: None,
            route_path: None,
        }
    }

    pub fn webhook(internal_port: u16, route_path: impl Into<String>) -> Self {
        Self {
            channel_type: ChannelType::WebhookEmbedded,
            internal_port,
            public_endpoint: None,
            route_path: Some(route_path.into()),
        }
    }

    pub fn tunnel(internal_port: u16, route_path: Option<String>) -> Self {
        Self {
            channel_type: ChannelType::Tunnel,
            internal_port,
            public_endpoint: None,
            route_path,
        }
    }

    /// Full webhook URL, once both a public endpoint and a route are known
    pub fn webhook_url(&self) -> Option<String> {
        let endpoint = self.public_endpoint.as_deref()?;
        let route = self.route_path.as_deref()?;
        Some(format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            route.trim_start_matches('/')
        ))
    }
}

/// One-time textual modification of a dependency's source during a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPatch {
    pub target_dependency: String,

    /// Path of the file to patch, relative to the build context
    pub target_file_path: PathBuf,

    pub match_pattern: String,

    pub replacement: String,
}
