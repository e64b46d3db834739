//! Per-battle isolated execution.
//!
//! Each battle may own one container, named after its battle id. Agent
//! logic runs shell commands inside it through [`SandboxBridge::execute`];
//! every command is appended to a per-battle history journal with its
//! output truncated.
//!
//! With the `docker` feature the Engine API backs the sandbox through
//! [`DockerEngine`]; otherwise [`DockerCli`] drives the `docker` binary.

pub mod bridge;
#[cfg(feature = "docker")]
pub mod engine;
pub mod error;
pub mod runtime;

pub use bridge::{ExecOutcome, SandboxBridge, SandboxSettings, HISTORY_KEY};
pub use error::{SandboxError, SandboxResult};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, DockerCli};

#[cfg(feature = "docker")]
pub use engine::DockerEngine;
