//! Channel exposure tests

use std::time::Duration;

use deployctl::channels::exposure::ExposureManager;
use deployctl::channels::tunnel::{TunnelCommand, TunnelProvider};
use deployctl::deploy::lifecycle::LifecycleManager;
use deployctl::errors::DeployError;
use deployctl::models::deployment::{ChannelBinding, Deployment};
use deployctl::storage::settings::{TunnelSettings, WebhookSettings};

use crate::support::{Call, FakeRuntime};

fn manager(runtime: std::sync::Arc<FakeRuntime>) -> ExposureManager {
    ExposureManager::new(
        LifecycleManager::new(runtime),
        WebhookSettings::default(),
        TunnelSettings::default(),
    )
}

fn app() -> Deployment {
    Deployment::new("app", "bookai", "bookai", 8000, ".")
}

/// Shell stand-in for ngrok: prints a started-tunnel line, then runs `tail`
fn fake_ngrok(tail: &str) -> TunnelCommand {
    TunnelCommand {
        provider: TunnelProvider::Ngrok,
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            format!(
                "echo 'lvl=info msg=\"started tunnel\" url=https://t1.ngrok-free.app'; {}",
                tail
            ),
        ],
        domain: None,
    }
}

#[tokio::test]
async fn test_expose_requires_running_deployment() {
    let runtime = FakeRuntime::new();
    let exposure = manager(runtime.clone());

    let result = exposure
        .expose(&app(), ChannelBinding::direct(8000), std::future::pending::<()>(), |_| {})
        .await;

    assert!(matches!(result, Err(DeployError::NotRunning(_))));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_webhook_listener_runs_beside_primary_process() {
    let runtime = FakeRuntime::new();
    let deployment = app();
    let primary = runtime.seed_running(&deployment);
    let exposure = manager(runtime.clone());

    let mut ready = Vec::new();
    let binding = exposure
        .expose(
            &deployment,
            ChannelBinding::webhook(8000, "/webhook/telegram"),
            std::future::pending::<()>(),
            |b| ready.push(b.clone()),
        )
        .await
        .unwrap();

    assert_eq!(binding.route_path.as_deref(), Some("/webhook/telegram"));
    assert_eq!(ready.len(), 1);
    assert_eq!(
        runtime.calls(),
        vec![Call::ExecDetached {
            target: "bookai/bookai".to_string(),
            command: ["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "8000"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }]
    );
    assert_eq!(runtime.running_ids(&deployment), vec![primary]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_interrupting_tunnel_leaves_container_running() {
    let runtime = FakeRuntime::new();
    let deployment = app();
    let container = runtime.seed_running(&deployment);
    let exposure = manager(runtime.clone());

    let mut announced = Vec::new();
    let binding = exposure
        .expose_via(
            &deployment,
            ChannelBinding::tunnel(8000, Some("/webhook".to_string())),
            &fake_ngrok("exec sleep 30"),
            tokio::time::sleep(Duration::from_millis(500)),
            |b| announced.push(b.public_endpoint.clone()),
        )
        .await
        .unwrap();

    assert_eq!(announced, vec![Some("https://t1.ngrok-free.app".to_string())]);
    assert_eq!(
        binding.webhook_url().as_deref(),
        Some("https://t1.ngrok-free.app/webhook")
    );
    assert_eq!(runtime.running_ids(&deployment), vec![container]);
    assert!(runtime.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_tunnel_exit_racing_interrupt_is_clean_teardown() {
    let runtime = FakeRuntime::new();
    let deployment = app();
    let container = runtime.seed_running(&deployment);
    let exposure = manager(runtime.clone());

    // the tunnel dies on the same Ctrl+C just before the interrupt is seen
    let result = exposure
        .expose_via(
            &deployment,
            ChannelBinding::tunnel(8000, None),
            &fake_ngrok("exit 130"),
            tokio::time::sleep(Duration::from_millis(100)),
            |_| {},
        )
        .await;

    assert!(result.is_ok(), "interrupt reported as {:?}", result.err());
    assert_eq!(runtime.running_ids(&deployment), vec![container]);
    assert!(runtime.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_tunnel_dying_before_forwarding_is_an_error() {
    let runtime = FakeRuntime::new();
    let deployment = app();
    let container = runtime.seed_running(&deployment);
    let exposure = manager(runtime.clone());

    let command = TunnelCommand {
        provider: TunnelProvider::Ngrok,
        program: "sh".to_string(),
        args: vec!["-c".to_string(), "echo 'ERR failed to bind' >&2; exit 1".to_string()],
        domain: None,
    };
    let result = exposure
        .expose_via(
            &deployment,
            ChannelBinding::tunnel(8000, None),
            &command,
            std::future::pending::<()>(),
            |_| panic!("tunnel never forwarded"),
        )
        .await;

    assert!(matches!(result, Err(DeployError::ExposureError(_))));
    assert_eq!(runtime.running_ids(&deployment), vec![container]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_tunnel_that_exits_cleanly_after_forwarding() {
    let runtime = FakeRuntime::new();
    let deployment = app();
    runtime.seed_running(&deployment);
    let exposure = manager(runtime.clone());

    let binding = exposure
        .expose_via(
            &deployment,
            ChannelBinding::tunnel(8000, None),
            &fake_ngrok("exit 0"),
            std::future::pending::<()>(),
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(binding.public_endpoint.as_deref(), Some("https://t1.ngrok-free.app"));
}

#[tokio::test]
async fn test_missing_tunnel_binary_is_an_exposure_error() {
    let runtime = FakeRuntime::new();
    let deployment = app();
    runtime.seed_running(&deployment);
    let exposure = manager(runtime.clone());

    let command = TunnelCommand::for_provider(
        TunnelProvider::Ngrok,
        8000,
        None,
        Some("/nonexistent/ngrok-binary"),
    );
    let result = exposure
        .expose_via(
            &deployment,
            ChannelBinding::tunnel(8000, None),
            &command,
            std::future::pending::<()>(),
            |_| {},
        )
        .await;

    assert!(matches!(result, Err(DeployError::ExposureError(_))));
}
