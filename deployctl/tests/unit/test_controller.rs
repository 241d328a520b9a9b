//! End-to-end pipeline tests against the in-memory runtime

use std::path::Path;
use std::sync::Arc;

use deployctl::app::options::ControllerOptions;
use deployctl::app::run::{Controller, EnvUpdate};
use deployctl::deploy::fsm::RebuildPhase;
use deployctl::errors::DeployError;
use deployctl::models::deployment::{
    BuildPatch, ChannelType, Deployment, RebuildOptions,
};
use deployctl::storage::settings::Settings;

use crate::support::{Call, FakeRuntime};

fn controller(dir: &Path, runtime: Arc<FakeRuntime>) -> Controller {
    let mut app = Deployment::new("app", "bookai", "bookai", 8000, dir);
    app.required_env = vec!["OPENAI_API_KEY".to_string()];
    let mcp = Deployment::new("mcp", "mcp-server", "bookai-mcp", 8001, dir);

    let settings = Settings {
        env_file: dir.join(".env"),
        deployments: vec![app, mcp],
        ..Default::default()
    };
    let mut options = ControllerOptions::from_settings(settings);
    options.probe.enabled = false;
    Controller::new(options, runtime)
}

#[tokio::test]
async fn test_first_chat_id_is_written_and_restarts_once() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let ctl = controller(dir.path(), runtime.clone());
    let app = ctl.deployment("app").unwrap();
    runtime.seed_running(&app);

    let update = ctl
        .update_env("TELEGRAM_CHAT_ID", Some("12345"), &app)
        .await
        .unwrap();

    assert!(matches!(update, EnvUpdate::Updated { ref value, .. } if value == "12345"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join(".env")).unwrap(),
        "TELEGRAM_CHAT_ID=12345\n"
    );
    assert_eq!(runtime.starts(), 1);
    assert_eq!(runtime.running_ids(&app).len(), 1);
}

#[tokio::test]
async fn test_blank_input_keeps_prior_value_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let env = dir.path().join(".env");
    std::fs::write(&env, "OPENAI_API_KEY=sk\nTELEGRAM_CHAT_ID=777\n").unwrap();
    let runtime = FakeRuntime::new();
    let ctl = controller(dir.path(), runtime.clone());
    let app = ctl.deployment("app").unwrap();

    let update = ctl.update_env("TELEGRAM_CHAT_ID", Some(""), &app).await.unwrap();

    assert_eq!(update, EnvUpdate::Kept("777".to_string()));
    assert_eq!(ctl.env().get("TELEGRAM_CHAT_ID").await.unwrap().as_deref(), Some("777"));
    assert_eq!(
        std::fs::read_to_string(&env).unwrap(),
        "OPENAI_API_KEY=sk\nTELEGRAM_CHAT_ID=777\n"
    );
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_blank_input_without_prior_value_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let ctl = controller(dir.path(), runtime.clone());
    let app = ctl.deployment("app").unwrap();

    let err = ctl.update_env("TELEGRAM_CHAT_ID", None, &app).await.unwrap_err();

    assert!(matches!(err, DeployError::MissingConfig(ref key) if key == "TELEGRAM_CHAT_ID"));
    assert!(!dir.path().join(".env").exists());
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_rebuild_requires_credentials_first() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let ctl = controller(dir.path(), runtime.clone());
    let app = ctl.deployment("app").unwrap();

    let err = ctl.rebuild(&app, RebuildOptions::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::MissingConfig(_)));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_rebuild_no_cache_on_stale_container() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "OPENAI_API_KEY=sk\n").unwrap();
    let runtime = FakeRuntime::new();
    let ctl = controller(dir.path(), runtime.clone());
    let app = ctl.deployment("app").unwrap();
    runtime.seed_running(&app);

    let options = RebuildOptions {
        no_cache: true,
        ..Default::default()
    };
    let report = ctl.rebuild(&app, options).await.unwrap();

    assert_eq!(runtime.containers_at_build(), vec![0]);
    assert_eq!(runtime.running_ids(&app), vec![report.container_id]);
    assert_eq!(
        report.phases,
        vec![
            RebuildPhase::Pending,
            RebuildPhase::Stopping,
            RebuildPhase::Removing,
            RebuildPhase::Patching,
            RebuildPhase::Building,
            RebuildPhase::Starting,
            RebuildPhase::Verifying,
            RebuildPhase::Running,
        ]
    );
}

#[tokio::test]
async fn test_rebuild_applies_patches_once() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let target = dir.path().join("vendor/lib/log.py");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, "log.info('tick')\n").unwrap();

    let mut mcp = Deployment::new("mcp", "mcp-server", "bookai-mcp", 8001, dir.path());
    mcp.patches = vec![BuildPatch {
        target_dependency: "lib".to_string(),
        target_file_path: "vendor/lib/log.py".into(),
        match_pattern: "log.info('tick')".to_string(),
        replacement: "# log.info('tick')".to_string(),
    }];
    let ctl = controller(dir.path(), runtime.clone());

    let first = ctl.rebuild(&mcp, RebuildOptions::default()).await.unwrap();
    let second = ctl.rebuild(&mcp, RebuildOptions::default()).await.unwrap();

    assert_eq!(first.patches_applied, 1);
    assert_eq!(second.patches_applied, 0);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "# log.info('tick')\n");
    assert_eq!(runtime.container_count(&mcp), 1);
}

#[tokio::test]
async fn test_failed_patch_aborts_build() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new();
    let mut mcp = Deployment::new("mcp", "mcp-server", "bookai-mcp", 8001, dir.path());
    mcp.patches = vec![BuildPatch {
        target_dependency: "lib".to_string(),
        target_file_path: "vendor/missing.py".into(),
        match_pattern: "x".to_string(),
        replacement: "y".to_string(),
    }];
    let ctl = controller(dir.path(), runtime.clone());

    let err = ctl.rebuild(&mcp, RebuildOptions::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::PatchError(_)));
    assert!(!runtime
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Build { .. })));
}

#[tokio::test]
async fn test_expose_direct_after_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "OPENAI_API_KEY=sk\n").unwrap();
    let runtime = FakeRuntime::new();
    let ctl = controller(dir.path(), runtime.clone());
    let app = ctl.deployment("app").unwrap();

    let binding = ctl
        .expose(
            &app,
            RebuildOptions::default(),
            ChannelType::DirectHttp,
            None,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

    assert_eq!(binding.internal_port, 8000);
    assert_eq!(runtime.running_ids(&app).len(), 1);
}

#[tokio::test]
async fn test_check_env_reports_required_keys() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".env"),
        "TELEGRAM_BOT_TOKEN=abc\nSUPABASE_URL=https://db.example.co\n",
    )
    .unwrap();
    let ctl = controller(dir.path(), FakeRuntime::new());

    let check = ctl.check_env(None).await.unwrap();

    assert!(!check.is_complete());
    assert_eq!(
        check.missing_required,
        vec!["SUPABASE_KEY", "OPENAI_API_KEY", "AWS_DEFAULT_REGION", "S3_BUCKET"]
    );
    assert!(check.present.contains(&"SUPABASE_URL".to_string()));
    assert!(check.present.contains(&"TELEGRAM_BOT_TOKEN".to_string()));
    assert!(check.missing_optional.contains(&"SUPABASE_BUCKET".to_string()));
}

fn key_controller(dir: &Path, required: &str) -> Controller {
    let settings = Settings {
        env_file: dir.join(".env"),
        required_env: vec![required.to_string()],
        optional_env: Vec::new(),
        deployments: Vec::new(),
        ..Default::default()
    };
    let mut options = ControllerOptions::from_settings(settings);
    options.probe.enabled = false;
    Controller::new(options, FakeRuntime::new())
}

#[tokio::test]
async fn test_check_env_uses_process_environment_without_file() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("DEPLOYCTL_CHECK_REGION", "eu-west-1");
    let ctl = key_controller(dir.path(), "DEPLOYCTL_CHECK_REGION");

    let check = ctl.check_env(None).await.unwrap();

    assert!(check.is_complete());
    assert_eq!(check.present, vec!["DEPLOYCTL_CHECK_REGION"]);
    assert!(!dir.path().join(".env").exists());
}

#[tokio::test]
async fn test_check_env_prefers_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "OTHER=1\n").unwrap();
    std::env::set_var("DEPLOYCTL_CHECK_BUCKET", "bookai-pre");
    let ctl = key_controller(dir.path(), "DEPLOYCTL_CHECK_BUCKET");

    let check = ctl.check_env(None).await.unwrap();

    assert_eq!(check.missing_required, vec!["DEPLOYCTL_CHECK_BUCKET"]);
}
