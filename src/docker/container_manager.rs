// ABOUTME: Docker container control using Bollard for provisioning and tearing down REPL backend containers

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container already exists: {0}")]
    AlreadyExists(String),
}

/// What to run for one session backend.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub network: String,
    pub user: Option<String>,
}

impl ContainerSpec {
    pub fn new(image: String, name: String, network: String) -> Self {
        Self {
            image,
            name,
            network,
            user: None,
        }
    }

    pub fn with_user(mut self, user: String) -> Self {
        self.user = Some(user);
        self
    }
}

/// The slice of the container runtime this service depends on.
///
/// Kept narrow so tests can substitute a scripted runtime; the production
/// implementation is [`DockerRuntime`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container with an on-failure restart policy.
    async fn run_detached(&self, spec: ContainerSpec) -> Result<(), ContainerError>;

    /// Whether a container with this name exists, in any state.
    async fn exists(&self, name: &str) -> Result<bool, ContainerError>;

    /// Whether the container's process is currently running. Refreshes the
    /// runtime's view of the container on every call.
    async fn is_running(&self, name: &str) -> Result<bool, ContainerError>;

    async fn stop(&self, name: &str) -> Result<(), ContainerError>;

    /// Block until the container has stopped.
    async fn wait_stopped(&self, name: &str) -> Result<(), ContainerError>;

    async fn remove(&self, name: &str) -> Result<(), ContainerError>;

    /// Host:port authority at which the container serves traffic. Containers
    /// on a shared Docker network are addressed by name.
    fn endpoint(&self, name: &str, port: u16) -> String {
        format!("{name}:{port}")
    }
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub async fn new() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()?;

        // Test the connection
        docker.ping().await?;

        info!("Successfully connected to Docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run_detached(&self, spec: ContainerSpec) -> Result<(), ContainerError> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            user: spec.user.clone(),
            host_config: Some(host_config),
            labels: Some({
                let mut labels = HashMap::new();
                labels.insert("repl-box-managed".to_string(), "true".to_string());
                labels
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        match self.docker.create_container(Some(create_options), config).await {
            Ok(response) => {
                debug!("Created container {} with ID {}", spec.name, response.id);
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                return Err(ContainerError::AlreadyExists(spec.name));
            }
            Err(e) => return Err(ContainerError::Connection(e)),
        }

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await?;

        info!("Started container {}", spec.name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        match self.docker.inspect_container(name, None).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        let inspection = match self.docker.inspect_container(name, None).await {
            Ok(inspection) => inspection,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                return Err(ContainerError::NotFound(name.to_string()));
            }
            Err(e) => return Err(ContainerError::Connection(e)),
        };

        Ok(inspection
            .state
            .and_then(|state| state.running)
            .unwrap_or(false))
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        let stop_options = StopContainerOptions { t: 10 }; // 10 second grace period

        match self.docker.stop_container(name, Some(stop_options)).await {
            Ok(()) => {
                info!("Stopped container {}", name);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // Container was already stopped
                debug!("Container {} was already stopped", name);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} is already gone", name);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    async fn wait_stopped(&self, name: &str) -> Result<(), ContainerError> {
        let mut wait_stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);

        while let Some(result) = wait_stream.next().await {
            match result {
                Ok(_) => {}
                // A non-zero exit code, or a container that is already gone,
                // still counts as stopped for teardown purposes.
                Err(bollard::errors::Error::DockerContainerWaitError { .. }) => break,
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => break,
                Err(e) => return Err(ContainerError::Connection(e)),
            }
        }

        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        let remove_options = RemoveContainerOptions {
            force: true,
            v: true, // Remove associated volumes
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(remove_options)).await {
            Ok(()) => {
                info!("Removed container {}", name);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                // Container was already removed
                debug!("Container {} was already removed", name);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }
}
