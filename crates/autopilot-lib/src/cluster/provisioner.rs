//! Node lifecycle provisioning
//!
//! Joining or removing a machine is not an API-server operation; it is
//! delegated to an installer command. Success is decided from the exit
//! status, bounded by a timeout.

use crate::error::{ClusterError, ClusterResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Joins and removes machines
#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    async fn join(&self, ip: &str) -> ClusterResult<()>;
    async fn remove(&self, ip: &str) -> ClusterResult<()>;
}

/// Argument templates for the installer; `{ip}` is substituted
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub join_command: Vec<String>,
    pub remove_command: Vec<String>,
    pub timeout: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            join_command: ["sealos", "add", "--nodes", "{ip}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            remove_command: ["sealos", "delete", "--nodes", "{ip}", "--force"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Runs the configured installer command as a child process
pub struct CommandProvisioner {
    config: ProvisionerConfig,
}

impl CommandProvisioner {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self { config }
    }

    async fn run(&self, template: &[String], ip: &str) -> ClusterResult<()> {
        let argv = render_command(template, ip);
        let (program, args) = argv.split_first().ok_or_else(|| {
            ClusterError::InvalidObject("node lifecycle command is empty".to_string())
        })?;
        let rendered = argv.join(" ");

        debug!(command = %rendered, "Running node lifecycle command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClusterError::Command {
                command: rendered.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| ClusterError::Command {
                command: rendered.clone(),
                code: None,
                stderr: e.to_string(),
            })?,
            Err(_) => {
                return Err(ClusterError::Timeout {
                    operation: rendered,
                    secs: self.config.timeout.as_secs(),
                })
            }
        };

        if output.status.success() {
            info!(command = %rendered, "Node lifecycle command succeeded");
            Ok(())
        } else {
            Err(ClusterError::Command {
                command: rendered,
                code: output.status.code(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), 512),
            })
        }
    }
}

#[async_trait]
impl NodeProvisioner for CommandProvisioner {
    async fn join(&self, ip: &str) -> ClusterResult<()> {
        self.run(&self.config.join_command, ip).await
    }

    async fn remove(&self, ip: &str) -> ClusterResult<()> {
        self.run(&self.config.remove_command, ip).await
    }
}

fn render_command(template: &[String], ip: &str) -> Vec<String> {
    template.iter().map(|arg| arg.replace("{ip}", ip)).collect()
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(join: &[&str], timeout: Duration) -> CommandProvisioner {
        CommandProvisioner::new(ProvisionerConfig {
            join_command: join.iter().map(|s| s.to_string()).collect(),
            remove_command: vec!["false".to_string()],
            timeout,
        })
    }

    #[test]
    fn test_render_command_substitutes_ip() {
        let template = ProvisionerConfig::default().join_command;
        assert_eq!(
            render_command(&template, "10.0.0.9"),
            vec!["sealos", "add", "--nodes", "10.0.0.9"]
        );
    }

    #[tokio::test]
    async fn test_successful_command() {
        let p = provisioner(&["true"], Duration::from_secs(5));
        assert!(p.join("10.0.0.9").await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let p = provisioner(&["true"], Duration::from_secs(5));
        match p.remove("10.0.0.9").await {
            Err(ClusterError::Command { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let p = provisioner(&["sleep", "5"], Duration::from_millis(50));
        assert!(matches!(
            p.join("10.0.0.9").await,
            Err(ClusterError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let p = provisioner(&[], Duration::from_secs(1));
        assert!(matches!(
            p.join("10.0.0.9").await,
            Err(ClusterError::InvalidObject(_))
        ));
    }

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail("  abcdef  ", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
    }
}
