//! The provisioning pipeline: create → start → inspect → warm up.
//!
//! Any failing stage stops the pipeline, tears down whatever exists so far
//! and reports a single `PoolError::ProvisioningFailed` naming the stage.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::PoolConfig;
use crate::error::{PoolError, SandboxError};
use crate::platform::{ContainerPlatform, ContainerSpec};
use crate::sandbox::{SandboxHandle, SandboxWorkspace};

/// Stage of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    /// Working directory setup and container creation.
    Create,
    /// Starting the container.
    Start,
    /// Reading back the container's address.
    Inspect,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Start => write!(f, "start"),
            Self::Inspect => write!(f, "inspect"),
        }
    }
}

/// Turns platform containers into ready sandbox handles.
#[derive(Clone)]
pub struct Provisioner {
    platform: Arc<dyn ContainerPlatform>,
    config: Arc<PoolConfig>,
}

impl Provisioner {
    #[must_use]
    pub fn new(platform: Arc<dyn ContainerPlatform>, config: Arc<PoolConfig>) -> Self {
        Self { platform, config }
    }

    /// Runs the whole pipeline for a new sandbox.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ProvisioningFailed` with the failing stage.
    #[instrument(skip(self))]
    pub async fn provision(&self) -> Result<SandboxHandle, PoolError> {
        let mut handle = self.create().await?;
        debug!(sandbox = %handle.id(), container = %handle.container_id(), "Container created");

        if let Err(source) = handle.container().start().await {
            self.abandon(&mut handle).await;
            return Err(failed(
                ProvisionStage::Start,
                SandboxError::Platform {
                    operation: "start",
                    source,
                },
            ));
        }
        trace!(sandbox = %handle.id(), "Container started");

        let address = match self.inspect(&handle).await {
            Ok(address) => address,
            Err(e) => {
                self.abandon(&mut handle).await;
                return Err(failed(ProvisionStage::Inspect, e));
            }
        };
        handle.set_address(address);
        trace!(sandbox = %handle.id(), %address, "Container address resolved");

        // Fixed grace period for the runner to come up; not a readiness probe.
        tokio::time::sleep(self.config.warmup).await;
        handle.mark_ready();

        debug!(sandbox = %handle.id(), %address, "Sandbox ready");
        Ok(handle)
    }

    async fn create(&self) -> Result<SandboxHandle, PoolError> {
        let id = Uuid::new_v4();
        let workspace =
            SandboxWorkspace::new(&self.config.tmp_dir, id, &self.config.launch.shared_subdir);

        if let Err(e) = workspace.create(self.config.template_dir.as_deref()).await {
            discard_workspace(&workspace).await;
            return Err(failed(ProvisionStage::Create, e));
        }

        let spec = ContainerSpec {
            name: format!("sandbox-{id}"),
            launch: self.config.launch.clone(),
            host_mount: workspace.shared.clone(),
        };

        match self.platform.create_container(&spec).await {
            Ok(container) => Ok(SandboxHandle::new(id, container, Some(workspace))),
            Err(source) => {
                discard_workspace(&workspace).await;
                Err(failed(
                    ProvisionStage::Create,
                    SandboxError::Platform {
                        operation: "create",
                        source,
                    },
                ))
            }
        }
    }

    async fn inspect(&self, handle: &SandboxHandle) -> Result<SocketAddr, SandboxError> {
        let info = handle
            .container()
            .inspect()
            .await
            .map_err(|source| SandboxError::Platform {
                operation: "inspect",
                source,
            })?;

        let ip = info
            .network_address
            .ok_or_else(|| SandboxError::AddressUnavailable {
                container: handle.container_id().to_string(),
            })?;

        Ok(SocketAddr::new(ip, self.config.runner_port))
    }

    async fn abandon(&self, handle: &mut SandboxHandle) {
        if let Err(e) = handle.teardown().await {
            warn!(sandbox = %handle.id(), error = %e, "Failed to tear down partially provisioned sandbox");
        }
    }
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn failed(stage: ProvisionStage, source: SandboxError) -> PoolError {
    PoolError::ProvisioningFailed { stage, source }
}

async fn discard_workspace(workspace: &SandboxWorkspace) {
    if let Err(e) = workspace.remove().await {
        warn!(error = %e, "Failed to remove workspace of failed sandbox");
    }
}
