//! Container runtime collaborator.
//!
//! The testbed core never talks to the container engine directly; it goes
//! through this trait so the fabric can be deployed by containerlab in a
//! real run and scripted by a fake in tests.

use std::path::Path;
use std::process::{Command, Stdio};

use log::{debug, info, warn};

use crate::error::{Result, TestbedError};

/// Contract of the external runtime that materializes the fabric and
/// executes commands inside endpoints.
pub trait EndpointRuntime {
    /// Deploys the topology document; returns once every endpoint reports up.
    fn deploy(&self, topology: &Path) -> Result<()>;

    /// Best-effort teardown of a deployed topology.
    fn destroy(&self, topology: &Path) -> Result<()>;

    /// Runs a command inside an endpoint and returns its stdout.
    fn exec(&self, endpoint: &str, command: &str) -> Result<String>;

    /// Starts a command inside an endpoint without waiting for it.
    fn exec_background(&self, endpoint: &str, command: &str) -> Result<()>;
}

/// containerlab-backed runtime: deploy/destroy via the `containerlab` CLI,
/// in-endpoint execution via `docker exec` against the derived container
/// names (`<prefix>-<topology>-<endpoint>`).
pub struct ContainerlabRuntime {
    container_prefix: String,
}

impl ContainerlabRuntime {
    pub fn new(prefix: &str, topology_name: &str) -> Self {
        ContainerlabRuntime {
            container_prefix: format!("{prefix}-{topology_name}"),
        }
    }

    fn container_name(&self, endpoint: &str) -> String {
        format!("{}-{}", self.container_prefix, endpoint)
    }

    fn run_checked(mut command: Command, what: &str) -> Result<String> {
        debug!("running {what}");
        let output = command.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TestbedError::Config(format!(
                "{what} failed with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl EndpointRuntime for ContainerlabRuntime {
    fn deploy(&self, topology: &Path) -> Result<()> {
        info!("deploying fabric from {}", topology.display());
        let mut command = Command::new("containerlab");
        command.args(["deploy", "--reconfigure", "-t"]).arg(topology);
        Self::run_checked(command, "containerlab deploy")?;
        Ok(())
    }

    fn destroy(&self, topology: &Path) -> Result<()> {
        info!("destroying fabric from {}", topology.display());
        let mut command = Command::new("containerlab");
        command.args(["destroy", "-t"]).arg(topology);
        match Self::run_checked(command, "containerlab destroy") {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("teardown failed (continuing): {e}");
                Ok(())
            }
        }
    }

    fn exec(&self, endpoint: &str, command: &str) -> Result<String> {
        let container = self.container_name(endpoint);
        let mut docker = Command::new("docker");
        docker.args(["exec", &container, "/bin/sh", "-c", command]);
        Self::run_checked(docker, &format!("exec in {container}"))
    }

    fn exec_background(&self, endpoint: &str, command: &str) -> Result<()> {
        let container = self.container_name(endpoint);
        debug!("starting background command in {container}: {command}");
        Command::new("docker")
            .args(["exec", "-d", &container, "/bin/sh", "-c", command])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?
            .wait()?;
        Ok(())
    }
}
