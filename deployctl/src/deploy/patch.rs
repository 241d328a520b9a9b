//! Build-time source patches

use std::path::Path;

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::deployment::BuildPatch;

/// Result of applying a patch to a file's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Contents after replacing the first unpatched match
    Applied(String),

    /// The replacement is already in place; nothing to do
    AlreadyApplied,
}

/// Replace the first occurrence of `match_pattern` with `replacement`.
///
/// Content that already holds the replacement counts as patched and is left
/// alone, even when further copies of the pattern remain or the replacement
/// itself embeds the pattern. Applying twice therefore equals applying once.
pub fn apply(patch: &BuildPatch, contents: &str) -> Result<PatchOutcome, DeployError> {
    let pattern = patch.match_pattern.as_str();
    let replacement = patch.replacement.as_str();
    if pattern.is_empty() {
        return Err(DeployError::PatchError(format!(
            "Empty match pattern for {}",
            patch.target_dependency
        )));
    }
    // a deletion leaves no trace to recognise on the next build
    if replacement.is_empty() {
        return Err(DeployError::PatchError(format!(
            "Empty replacement for {}",
            patch.target_dependency
        )));
    }

    if contents.contains(replacement) {
        return Ok(PatchOutcome::AlreadyApplied);
    }

    match contents.find(pattern) {
        Some(pos) => {
            let mut patched = String::with_capacity(contents.len() + replacement.len());
            patched.push_str(&contents[..pos]);
            patched.push_str(replacement);
            patched.push_str(&contents[pos + pattern.len()..]);
            Ok(PatchOutcome::Applied(patched))
        }
        None => Err(DeployError::PatchError(format!(
            "Pattern not found in {} ({}): {:?}",
            patch.target_file_path.display(),
            patch.target_dependency,
            pattern
        ))),
    }
}

/// Apply `patch` to its target file under `build_context`.
///
/// A missing file or a pattern that matches nothing aborts the build.
pub async fn apply_to_context(patch: &BuildPatch, build_context: &Path) -> Result<bool, DeployError> {
    let file = File::new(build_context.join(&patch.target_file_path));
    if !file.exists().await {
        return Err(DeployError::PatchError(format!(
            "Patch target for {} not found: {}",
            patch.target_dependency,
            file.path().display()
        )));
    }

    let contents = file.read_string().await?;
    match apply(patch, &contents)? {
        PatchOutcome::Applied(patched) => {
            file.write_atomic(patched.as_bytes()).await?;
            info!(
                "Patched {} in {}",
                patch.target_dependency,
                file.path().display()
            );
            Ok(true)
        }
        PatchOutcome::AlreadyApplied => {
            debug!("{} already patched", file.path().display());
            Ok(false)
        }
    }
}
