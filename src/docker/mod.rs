// ABOUTME: Docker integration for managing REPL backend containers

pub mod container_manager;

pub use container_manager::{
    ContainerError, ContainerRuntime, ContainerSpec, DockerRuntime,
};
