//! Build patch tests

use deployctl::deploy::patch::{apply, apply_to_context, PatchOutcome};
use deployctl::errors::DeployError;
use deployctl::models::deployment::BuildPatch;

const SERVER_PY: &str = r#"async def _handle_request(self, message, req):
    logger.info("Processing request of type %s", type(req).__name__)
    response = await handler(req)
"#;

fn quiet_patch() -> BuildPatch {
    BuildPatch {
        target_dependency: "mcp".to_string(),
        target_file_path: "vendor/mcp/server/lowlevel/server.py".into(),
        match_pattern: r#"logger.info("Processing request of type %s", type(req).__name__)"#.to_string(),
        replacement: r#"logger.debug("Processing request of type %s", type(req).__name__)"#.to_string(),
    }
}

#[test]
fn test_apply_twice_equals_apply_once() {
    let patch = quiet_patch();
    let once = match apply(&patch, SERVER_PY).unwrap() {
        PatchOutcome::Applied(s) => s,
        PatchOutcome::AlreadyApplied => panic!("pristine source should be patched"),
    };

    let twice = match apply(&patch, &once).unwrap() {
        PatchOutcome::Applied(s) => s,
        PatchOutcome::AlreadyApplied => once.clone(),
    };
    assert_eq!(twice, once);
    assert!(once.contains("logger.debug(\"Processing request"));
    assert!(!once.contains("logger.info(\"Processing request"));
}

#[tokio::test]
async fn test_apply_to_context_is_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let patch = quiet_patch();
    let target = dir.path().join(&patch.target_file_path);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, SERVER_PY).unwrap();

    assert!(apply_to_context(&patch, dir.path()).await.unwrap());
    let first = std::fs::read_to_string(&target).unwrap();

    assert!(!apply_to_context(&patch, dir.path()).await.unwrap());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), first);
}

#[tokio::test]
async fn test_missing_dependency_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = apply_to_context(&quiet_patch(), dir.path()).await.unwrap_err();
    assert!(matches!(err, DeployError::PatchError(_)));
}

#[tokio::test]
async fn test_repeated_builds_patch_only_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let patch = BuildPatch {
        target_dependency: "mcp".to_string(),
        target_file_path: "server.py".into(),
        match_pattern: "logger.info(".to_string(),
        replacement: "logger.debug(".to_string(),
    };
    let target = dir.path().join("server.py");
    std::fs::write(&target, "logger.info(a)\nlogger.info(b)\n").unwrap();

    assert!(apply_to_context(&patch, dir.path()).await.unwrap());
    for _ in 0..3 {
        assert!(!apply_to_context(&patch, dir.path()).await.unwrap());
    }
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "logger.debug(a)\nlogger.info(b)\n"
    );
}

#[test]
fn test_replacement_containing_pattern_is_stable() {
    let patch = BuildPatch {
        target_dependency: "mcp".to_string(),
        target_file_path: "server.py".into(),
        match_pattern: "log()".to_string(),
        replacement: "if DEBUG: log() # log()".to_string(),
    };
    let once = match apply(&patch, "log()\n").unwrap() {
        PatchOutcome::Applied(s) => s,
        PatchOutcome::AlreadyApplied => panic!("pristine source should be patched"),
    };
    assert_eq!(apply(&patch, &once).unwrap(), PatchOutcome::AlreadyApplied);
}
