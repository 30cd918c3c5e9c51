//! Child process launching for managed services.

use crate::types::ApplicationDescriptor;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Launcher error types
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Service {0} has no launch path")]
    NotLaunchable(String),

    #[error("Invalid launch arguments for {name}: {source}")]
    InvalidArgs {
        name: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stop {name}: {source}")]
    Stop {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<LaunchError> for common::Error {
    fn from(err: LaunchError) -> Self {
        common::Error::launcher(err)
    }
}

/// Starts and stops the processes behind managed services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start the service unless it is already running
    async fn start(&self, descriptor: &ApplicationDescriptor) -> Result<(), LaunchError>;

    /// Stop the service; stopping an untracked service succeeds
    async fn stop(&self, name: &str) -> Result<(), LaunchError>;

    /// Stop then start the service
    async fn restart(&self, descriptor: &ApplicationDescriptor) -> Result<(), LaunchError>;

    async fn is_running(&self, name: &str) -> bool;

    /// Stop every tracked service, logging failures
    async fn stop_all(&self);
}

/// Launcher that spawns each service as a child process of the daemon
#[derive(Debug, Default)]
pub struct CommandLauncher {
    children: DashMap<String, Child>,
}

impl CommandLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked children, exited ones included
    pub fn tracked(&self) -> usize {
        self.children.len()
    }

    fn spawn(descriptor: &ApplicationDescriptor) -> Result<Child, LaunchError> {
        let mut command = build_command(descriptor)?;
        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            name: descriptor.name.clone(),
            source,
        })?;

        info!(
            name = %descriptor.name,
            pid = child.id(),
            path = %descriptor.launch_path,
            "Service started"
        );
        Ok(child)
    }
}

/// Build the command line for a launchable descriptor.
///
/// With a runtime the command is `runtime path args...`, otherwise
/// `path args...`. Arguments are split shell-style.
pub fn build_command(descriptor: &ApplicationDescriptor) -> Result<Command, LaunchError> {
    if !descriptor.is_launchable() {
        return Err(LaunchError::NotLaunchable(descriptor.name.clone()));
    }

    let args = shell_words::split(&descriptor.launch_args).map_err(|source| {
        LaunchError::InvalidArgs {
            name: descriptor.name.clone(),
            source,
        }
    })?;

    let path = descriptor.launch_path.trim();
    let runtime = descriptor.runtime.trim();

    let mut command = if runtime.is_empty() {
        Command::new(path)
    } else {
        let mut command = Command::new(runtime);
        command.arg(path);
        command
    };

    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    if descriptor.port != 0 {
        command.env("PORT", descriptor.port.to_string());
    }

    Ok(command)
}

fn is_alive(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn start(&self, descriptor: &ApplicationDescriptor) -> Result<(), LaunchError> {
        match self.children.entry(descriptor.name.clone()) {
            Entry::Occupied(mut entry) => {
                if is_alive(entry.get_mut()) {
                    debug!(name = %descriptor.name, "Service already running");
                    return Ok(());
                }
                entry.insert(Self::spawn(descriptor)?);
            }
            Entry::Vacant(entry) => {
                entry.insert(Self::spawn(descriptor)?);
            }
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LaunchError> {
        let Some((_, mut child)) = self.children.remove(name) else {
            return Ok(());
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(name, %status, "Service already exited");
                Ok(())
            }
            _ => {
                child.kill().await.map_err(|source| LaunchError::Stop {
                    name: name.to_string(),
                    source,
                })?;
                info!(name, "Service stopped");
                Ok(())
            }
        }
    }

    async fn restart(&self, descriptor: &ApplicationDescriptor) -> Result<(), LaunchError> {
        self.stop(&descriptor.name).await?;
        self.start(descriptor).await
    }

    async fn is_running(&self, name: &str) -> bool {
        self.children
            .get_mut(name)
            .map(|mut child| is_alive(child.value_mut()))
            .unwrap_or(false)
    }

    async fn stop_all(&self) {
        let names: Vec<String> = self.children.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(e) = self.stop(&name).await {
                warn!(error = %e, "Failed to stop service");
            }
        }
    }
}
