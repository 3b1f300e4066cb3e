//! Package manager adapter (`pip install` by default).

use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::io::config::DependencyConfig;
use crate::io::process::run_with_timeout;

const INSTALL_OUTPUT_LIMIT_BYTES: usize = 200_000;

/// Result of one install invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    /// Nothing was missing.
    NotNeeded,
    Installed,
    /// Non-zero exit, timeout or spawn failure, with the diagnostic text.
    Failed { message: String },
}

pub trait Installer {
    /// Install all `packages` in a single invocation. Never retries.
    fn install(&self, packages: &[String]) -> InstallStatus;
}

/// Installs packages by running the configured package-manager command.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    command: Vec<String>,
    timeout: Duration,
    upgrade: bool,
}

impl CommandInstaller {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            upgrade: false,
        }
    }

    pub fn from_config(cfg: &DependencyConfig) -> Self {
        Self {
            command: cfg.install_command.clone(),
            timeout: Duration::from_secs(cfg.install_timeout_secs),
            upgrade: cfg.upgrade,
        }
    }

    fn build_command(&self, packages: &[String]) -> Option<Command> {
        let (program, args) = self.command.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if self.upgrade {
            cmd.arg("--upgrade");
        }
        cmd.args(packages);
        Some(cmd)
    }
}

impl Installer for CommandInstaller {
    #[instrument(skip_all, fields(count = packages.len()))]
    fn install(&self, packages: &[String]) -> InstallStatus {
        if packages.is_empty() {
            return InstallStatus::NotNeeded;
        }
        let Some(cmd) = self.build_command(packages) else {
            return InstallStatus::Failed {
                message: "no install command configured".to_string(),
            };
        };
        info!(packages = %packages.join(", "), "installing packages");

        let output = match run_with_timeout(cmd, None, self.timeout, INSTALL_OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "package manager could not be started");
                return InstallStatus::Failed {
                    message: format!("{err:#}"),
                };
            }
        };

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "installation timed out");
            return InstallStatus::Failed {
                message: format!(
                    "installation timed out after {} seconds",
                    self.timeout.as_secs()
                ),
            };
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "installation failed");
            return InstallStatus::Failed {
                message: format!(
                    "installation failed with return code {}\n{}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            };
        }

        info!("installation successful");
        InstallStatus::Installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_not_needed() {
        let installer = CommandInstaller::new(
            vec!["definitely-not-a-real-binary-7f3a".to_string()],
            Duration::from_secs(1),
        );
        assert_eq!(installer.install(&[]), InstallStatus::NotNeeded);
    }

    #[test]
    fn spawn_failure_is_reported() {
        let installer = CommandInstaller::new(
            vec!["definitely-not-a-real-binary-7f3a".to_string()],
            Duration::from_secs(1),
        );
        let status = installer.install(&["numpy".to_string()]);
        assert!(matches!(status, InstallStatus::Failed { .. }));
    }

    #[test]
    fn upgrade_flag_precedes_packages() {
        let installer = CommandInstaller {
            command: vec!["pip".to_string(), "install".to_string()],
            timeout: Duration::from_secs(1),
            upgrade: true,
        };
        let cmd = installer
            .build_command(&["numpy".to_string(), "rich".to_string()])
            .expect("command");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["install", "--upgrade", "numpy", "rich"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_carries_diagnostics() {
        let installer = CommandInstaller::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo no matching distribution 1>&2; exit 1".to_string(),
            ],
            Duration::from_secs(10),
        );
        match installer.install(&["not-a-package".to_string()]) {
            InstallStatus::Failed { message } => {
                assert!(message.starts_with("installation failed with return code 1\n"));
                assert!(message.contains("no matching distribution"));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_is_installed() {
        let installer = CommandInstaller::new(vec!["true".to_string()], Duration::from_secs(10));
        assert_eq!(
            installer.install(&["numpy".to_string()]),
            InstallStatus::Installed
        );
    }
}
