//! deployctl - Entry Point
//!
//! Operator CLI for the BookAI containers: rebuild, attach, expose via
//! webhook or tunnel, and update channel credentials in `.env`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use deployctl::app::options::ControllerOptions;
use deployctl::app::run::{Controller, EnvUpdate};
use deployctl::channels::tunnel::TunnelProvider;
use deployctl::console;
use deployctl::deploy::patch;
use deployctl::deploy::runtime::ComposeRuntime;
use deployctl::errors::DeployError;
use deployctl::filesys::file::File;
use deployctl::logs::{init_logging, LogLevel};
use deployctl::models::deployment::{BuildPatch, ChannelType, Deployment, RebuildOptions};
use deployctl::storage::settings::Settings;
use deployctl::utils::{mask_value, version_info};

#[derive(Parser)]
#[command(name = "deployctl", about = "Rebuild, configure and expose the BookAI service containers")]
struct Cli {
    /// Settings file
    #[arg(long, default_value = "deployctl.json", env = "DEPLOYCTL_CONFIG")]
    config: PathBuf,

    /// Environment file read by the deployments
    #[arg(long, env = "DEPLOYCTL_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Skip the health probe after starting
    #[arg(long)]
    no_probe: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stop, remove, rebuild and start a deployment
    Rebuild(RebuildArgs),

    /// Rebuild, then attach an interactive chat session
    Run(RebuildArgs),

    /// Rebuild, then expose through a webhook listener or a tunnel
    Expose {
        #[command(flatten)]
        rebuild: RebuildArgs,

        /// direct-http, webhook-embedded or tunnel
        #[arg(long, default_value = "tunnel")]
        channel: ChannelType,

        /// Webhook route served by the deployment
        #[arg(long)]
        route: Option<String>,

        /// Tunnel provider (ngrok or cloudflared)
        #[arg(long)]
        provider: Option<TunnelProvider>,

        /// Reserved tunnel domain
        #[arg(long)]
        domain: Option<String>,
    },

    /// Update one `.env` key and restart the deployment that reads it
    SetEnv {
        key: String,

        /// New value; prompted for when absent
        #[arg(long)]
        value: Option<String>,

        /// Deployment to restart
        #[arg(long)]
        deployment: Option<String>,
    },

    /// Update the Telegram chat identity and restart the chat service
    SetChatId {
        /// New chat ID; prompted for when absent
        #[arg(long)]
        value: Option<String>,
    },

    /// Report required and optional `.env` keys
    CheckEnv {
        deployment: Option<String>,
    },

    /// Stop and remove a deployment's container
    Down(TargetArgs),

    /// Follow a deployment's logs
    Logs(TargetArgs),

    /// Apply build patches: a deployment's configured ones, or a single one
    Patch {
        deployment: Option<String>,

        /// File to patch instead of the deployment's patch list
        #[arg(long, requires_all = ["pattern", "replacement"])]
        file: Option<PathBuf>,

        #[arg(long)]
        pattern: Option<String>,

        #[arg(long)]
        replacement: Option<String>,
    },

    /// Print version information
    Version,
}

#[derive(Args)]
struct TargetArgs {
    /// Deployment name from the settings file
    #[arg(default_value = "app")]
    deployment: String,

    /// Project namespace override
    #[arg(long, short = 'p')]
    namespace: Option<String>,
}

#[derive(Args)]
struct RebuildArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Build without the layer cache
    #[arg(long)]
    no_cache: bool,

    /// Kill instead of stop and force-recreate the container
    #[arg(long)]
    force: bool,

    /// Remove the deployment's previous image first
    #[arg(long)]
    remove_image: bool,
}

impl RebuildArgs {
    fn options(&self) -> RebuildOptions {
        RebuildOptions {
            no_cache: self.no_cache,
            force: self.force,
            remove_image: self.remove_image,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            debug!("{:?}", e);
            console::failure(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut settings = Settings::load(&File::new(&cli.config))
        .await
        .with_context(|| format!("Unable to read settings file {}", cli.config.display()))?;
    if let Some(env_file) = cli.env_file {
        settings.env_file = env_file;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    let mut options = ControllerOptions::from_settings(settings);
    options.probe.enabled = !cli.no_probe;
    if let Err(e) = init_logging(options.logging.clone()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Commands::Expose { provider, domain, .. } = &cli.command {
        if let Some(provider) = provider {
            options.settings.tunnel.provider = *provider;
        }
        if domain.is_some() {
            options.settings.tunnel.domain = domain.clone();
        }
    }

    let runtime = Arc::new(ComposeRuntime::detect().await);
    let controller = Controller::new(options, runtime);
    info!("Running {:?}", version_info());

    match cli.command {
        Commands::Rebuild(args) => {
            let deployment = target(&controller, &args.target)?;
            controller.rebuild(&deployment, args.options()).await?;
        }
        Commands::Run(args) => {
            let deployment = target(&controller, &args.target)?;
            controller.run_interactive(&deployment, args.options()).await?;
        }
        Commands::Expose {
            rebuild,
            channel,
            route,
            ..
        } => {
            let deployment = target(&controller, &rebuild.target)?;
            controller
                .expose(
                    &deployment,
                    rebuild.options(),
                    channel,
                    route,
                    await_shutdown_signal(),
                )
                .await?;
        }
        Commands::SetEnv {
            key,
            value,
            deployment,
        } => {
            let name = deployment.unwrap_or_else(|| controller.settings().identity.deployment.clone());
            let deployment = controller.deployment(&name)?;
            update_env(&controller, &key, value, &deployment).await?;
        }
        Commands::SetChatId { value } => {
            let identity = controller.settings().identity.clone();
            let deployment = controller.deployment(&identity.deployment)?;
            update_env(&controller, &identity.key, value, &deployment).await?;
        }
        Commands::CheckEnv { deployment } => {
            let deployment = deployment.map(|n| controller.deployment(&n)).transpose()?;
            let check = controller.check_env(deployment.as_ref()).await?;
            console::step(&format!(
                "Checking {}",
                controller.env().file().path().display()
            ));
            for key in &check.present {
                console::field(key, "present");
            }
            for key in &check.missing_optional {
                console::field(key, "not set (optional)");
            }
            for key in &check.missing_required {
                console::field(key, "MISSING");
            }
            if !check.is_complete() {
                console::failure(&format!(
                    "Missing required keys: {}",
                    check.missing_required.join(", ")
                ));
                return Ok(ExitCode::FAILURE);
            }
            console::success("All required keys are set");
        }
        Commands::Down(args) => {
            let deployment = target(&controller, &args)?;
            controller.teardown(&deployment).await;
        }
        Commands::Logs(args) => {
            let deployment = target(&controller, &args)?;
            controller.logs(&deployment).await?;
        }
        Commands::Patch {
            deployment,
            file,
            pattern,
            replacement,
        } => {
            apply_patches(&controller, deployment, file, pattern, replacement).await?;
        }
        Commands::Version => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn target(controller: &Controller, args: &TargetArgs) -> Result<Deployment, DeployError> {
    let mut deployment = controller.deployment(&args.deployment)?;
    if let Some(namespace) = &args.namespace {
        deployment.namespace = namespace.clone();
    }
    Ok(deployment)
}

async fn update_env(
    controller: &Controller,
    key: &str,
    value: Option<String>,
    deployment: &Deployment,
) -> Result<(), DeployError> {
    let input = match value {
        Some(value) => Some(value),
        None => {
            let current = controller.env().get(key).await?;
            let hint = match &current {
                Some(v) if !v.is_empty() => format!(" [current: {}, blank keeps it]", mask_value(v)),
                _ => String::new(),
            };
            prompt(&format!("{}{}: ", key, hint)).await?
        }
    };

    match controller.update_env(key, input.as_deref(), deployment).await? {
        EnvUpdate::Kept(_) => {}
        EnvUpdate::Updated { container_id, .. } => {
            console::success(&format!("{} restarted ({})", deployment, container_id));
        }
    }
    Ok(())
}

async fn prompt(question: &str) -> Result<Option<String>, DeployError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    Ok(lines.next_line().await?)
}

async fn apply_patches(
    controller: &Controller,
    deployment: Option<String>,
    file: Option<PathBuf>,
    pattern: Option<String>,
    replacement: Option<String>,
) -> Result<(), DeployError> {
    if let (Some(file), Some(pattern), Some(replacement)) = (file, pattern, replacement) {
        let single = BuildPatch {
            target_dependency: file.display().to_string(),
            target_file_path: file,
            match_pattern: pattern,
            replacement,
        };
        let changed = patch::apply_to_context(&single, std::path::Path::new("")).await?;
        report_patch(&single, changed);
        return Ok(());
    }

    let name = deployment.unwrap_or_else(|| "app".to_string());
    let deployment = controller.deployment(&name)?;
    if deployment.patches.is_empty() {
        console::step(&format!("{} has no build patches", deployment));
    }
    for build_patch in &deployment.patches {
        let changed = patch::apply_to_context(build_patch, &deployment.build_context).await?;
        report_patch(build_patch, changed);
    }
    Ok(())
}

fn report_patch(build_patch: &BuildPatch, changed: bool) {
    let what = format!(
        "{} ({})",
        build_patch.target_dependency,
        build_patch.target_file_path.display()
    );
    if changed {
        console::success(&format!("Patched {}", what));
    } else {
        console::step(&format!("{} already patched", what));
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, closing tunnel...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, closing tunnel...");
                    }
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
                info!("Ctrl+C received, closing tunnel...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, closing tunnel...");
    }
}
