//! Container lifecycle manager
//!
//! A rebuild runs in two phases with two error policies. Cleanup of the
//! previous container and image is best effort: anything already absent is
//! fine. Delivery (patch, build, start, verify) is strict: the first
//! failure aborts the cycle and is returned unchanged.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::console;
use crate::deploy::fsm::{RebuildEvent, RebuildFsm, RebuildPhase};
use crate::deploy::patch;
use crate::deploy::runtime::ContainerRuntime;
use crate::errors::DeployError;
use crate::models::deployment::{Deployment, RebuildOptions};

/// Outcome of a successful rebuild or restart
#[derive(Debug, Clone)]
pub struct RebuildReport {
    /// Phases entered, in order
    pub phases: Vec<RebuildPhase>,

    /// The single running container
    pub container_id: String,

    /// Number of patches that changed a file
    pub patches_applied: usize,
}

/// Drives a deployment's container through stop, remove, build and start
#[derive(Clone)]
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Replace the deployment's container with one running a fresh image
    pub async fn rebuild(
        &self,
        deployment: &Deployment,
        options: RebuildOptions,
    ) -> Result<RebuildReport, DeployError> {
        info!("Rebuilding {} with {:?}", deployment, options);
        let mut fsm = RebuildFsm::new();

        self.clear_previous(deployment, options, &mut fsm).await?;

        match self.deliver(deployment, options, &mut fsm).await {
            Ok((container_id, patches_applied)) => Ok(RebuildReport {
                phases: fsm.history().to_vec(),
                container_id,
                patches_applied,
            }),
            Err(e) => Err(fail(&mut fsm, deployment, e)),
        }
    }

    /// Recreate the container from the current image so it rereads `.env`
    pub async fn recreate(&self, deployment: &Deployment) -> Result<RebuildReport, DeployError> {
        info!("Recreating {}", deployment);
        let mut fsm = RebuildFsm::new();

        let result = async {
            advance(&mut fsm, deployment, RebuildEvent::Start)?;
            self.runtime.start(deployment, true).await?;
            advance(&mut fsm, deployment, RebuildEvent::Verify)?;
            let container_id = self.verify(deployment).await?;
            advance(&mut fsm, deployment, RebuildEvent::Complete)?;
            Ok::<_, DeployError>(container_id)
        }
        .await;

        match result {
            Ok(container_id) => Ok(RebuildReport {
                phases: fsm.history().to_vec(),
                container_id,
                patches_applied: 0,
            }),
            Err(e) => Err(fail(&mut fsm, deployment, e)),
        }
    }

    /// Stop and remove the deployment's container; absence is not an error
    pub async fn teardown(&self, deployment: &Deployment) {
        info!("Tearing down {}", deployment);
        best_effort("stop", deployment, self.runtime.stop(deployment, false)).await;
        best_effort("remove", deployment, self.runtime.remove(deployment)).await;
    }

    /// The running container's ID, or `NotRunning`
    pub async fn ensure_running(&self, deployment: &Deployment) -> Result<String, DeployError> {
        self.runtime
            .running_containers(deployment)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeployError::NotRunning(deployment.to_string()))
    }

    /// Open the deployment's interactive entry point on the operator's terminal
    pub async fn attach(&self, deployment: &Deployment) -> Result<(), DeployError> {
        self.ensure_running(deployment).await?;
        self.runtime
            .exec_interactive(deployment, &deployment.shell_command)
            .await
    }

    pub async fn follow_logs(&self, deployment: &Deployment) -> Result<(), DeployError> {
        self.runtime.follow_logs(deployment).await
    }

    async fn clear_previous(
        &self,
        deployment: &Deployment,
        options: RebuildOptions,
        fsm: &mut RebuildFsm,
    ) -> Result<(), DeployError> {
        advance(fsm, deployment, RebuildEvent::Stop)?;
        best_effort("stop", deployment, self.runtime.stop(deployment, options.force)).await;

        advance(fsm, deployment, RebuildEvent::Remove)?;
        best_effort("remove", deployment, self.runtime.remove(deployment)).await;

        if options.remove_image {
            advance(fsm, deployment, RebuildEvent::RemoveImage)?;
            best_effort("image removal", deployment, self.runtime.remove_image(deployment)).await;
        }
        Ok(())
    }

    async fn deliver(
        &self,
        deployment: &Deployment,
        options: RebuildOptions,
        fsm: &mut RebuildFsm,
    ) -> Result<(String, usize), DeployError> {
        advance(fsm, deployment, RebuildEvent::Patch)?;
        let mut patches_applied = 0;
        for build_patch in &deployment.patches {
            if patch::apply_to_context(build_patch, &deployment.build_context).await? {
                patches_applied += 1;
            }
        }

        advance(fsm, deployment, RebuildEvent::Build)?;
        self.runtime.build(deployment, options.no_cache).await?;

        advance(fsm, deployment, RebuildEvent::Start)?;
        self.runtime.start(deployment, options.force).await?;

        advance(fsm, deployment, RebuildEvent::Verify)?;
        let container_id = self.verify(deployment).await?;

        advance(fsm, deployment, RebuildEvent::Complete)?;
        Ok((container_id, patches_applied))
    }

    /// Exactly one running container must exist after a start
    async fn verify(&self, deployment: &Deployment) -> Result<String, DeployError> {
        let mut containers = self.runtime.running_containers(deployment).await?;
        match containers.len() {
            1 => Ok(containers.remove(0)),
            0 => Err(DeployError::StartFailed {
                deployment: deployment.to_string(),
                reason: "no running container after start".to_string(),
            }),
            n => Err(DeployError::StartFailed {
                deployment: deployment.to_string(),
                reason: format!("{} running containers, expected one", n),
            }),
        }
    }
}

fn advance(fsm: &mut RebuildFsm, deployment: &Deployment, event: RebuildEvent) -> Result<(), DeployError> {
    let phase = fsm.process(event).map_err(DeployError::Internal)?;
    console::phase(deployment, phase);
    Ok(())
}

fn fail(fsm: &mut RebuildFsm, deployment: &Deployment, err: DeployError) -> DeployError {
    debug!("{} failed while {}: {}", deployment, fsm.phase(), err);
    if fsm.process(RebuildEvent::Fail).is_ok() {
        console::phase(deployment, RebuildPhase::Failed);
    }
    err
}

async fn best_effort<F>(what: &str, deployment: &Deployment, op: F)
where
    F: Future<Output = Result<(), DeployError>>,
{
    if let Err(e) = op.await {
        debug!("Ignoring {} failure for {}: {}", what, deployment, e);
    }
}
