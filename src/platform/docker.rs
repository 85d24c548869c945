//! Docker implementation of the container platform.

use std::net::IpAddr;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerInspectResponse, HostConfig};
use tracing::{debug, instrument, trace};

use super::{ContainerInfo, ContainerPlatform, ContainerSpec, PlatformContainer};
use crate::error::PlatformError;

/// Seconds Docker waits for a graceful stop before killing.
const STOP_GRACE_SECS: i64 = 1;

/// HTTP status Docker answers with when the container is already stopped.
const NOT_MODIFIED: u16 = 304;

/// Container platform backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerPlatform {
    docker: Docker,
}

impl DockerPlatform {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects with the local defaults and checks the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Docker` if the daemon is unreachable.
    #[instrument]
    pub async fn connect() -> Result<Self, PlatformError> {
        let docker = Docker::connect_with_local_defaults()?;
        let version = docker.ping().await?;
        debug!(%version, "Connected to Docker daemon");
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerPlatform for DockerPlatform {
    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.launch.image))]
    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn PlatformContainer>, PlatformError> {
        let env = spec
            .launch
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();

        let config = Config {
            image: Some(spec.launch.image.clone()),
            env: Some(env),
            host_config: Some(HostConfig {
                binds: Some(vec![spec.bind()]),
                memory: spec.launch.memory_bytes,
                nano_cpus: spec.launch.nano_cpus,
                network_mode: spec.launch.network_mode.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self.docker.create_container(Some(options), config).await?;
        trace!(id = %created.id, "Docker container created");

        Ok(Box::new(DockerContainer {
            docker: self.docker.clone(),
            id: created.id,
        }))
    }
}

/// One container created through [`DockerPlatform`].
#[derive(Debug)]
pub struct DockerContainer {
    docker: Docker,
    id: String,
}

#[async_trait]
impl PlatformContainer for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), PlatformError> {
        self.docker
            .start_container(&self.id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect(&self) -> Result<ContainerInfo, PlatformError> {
        let response = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;
        Ok(ContainerInfo {
            network_address: network_address(&response),
        })
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(&self.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: NOT_MODIFIED,
                ..
            }) => {
                trace!(id = %self.id, "Container was already stopped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, force: bool) -> Result<(), PlatformError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(&self.id, Some(options)).await?;
        Ok(())
    }
}

/// Picks the container's IP: the default bridge address first, then the first
/// attached network that has one.
fn network_address(response: &ContainerInspectResponse) -> Option<IpAddr> {
    let settings = response.network_settings.as_ref()?;

    let primary = settings
        .ip_address
        .as_deref()
        .and_then(|ip| ip.parse().ok());

    primary.or_else(|| {
        settings.networks.as_ref()?.values().find_map(|endpoint| {
            endpoint
                .ip_address
                .as_deref()
                .and_then(|ip| ip.parse().ok())
        })
    })
}
