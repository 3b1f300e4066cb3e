//! Dependency reconciliation: manifest diff, append, install.

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use crate::core::requirements::unique_missing;
use crate::io::installer::{InstallStatus, Installer};
use crate::io::manifest::Manifest;

/// What happened while reconciling one dependency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requested: usize,
    /// Entries handed to the installer.
    pub missing: Vec<String>,
    /// Lines appended to the manifest.
    pub committed: usize,
    /// Manifest I/O failure, if any; reconciliation continued without it.
    pub manifest_error: Option<String>,
    pub install: InstallStatus,
}

impl ReconcileReport {
    pub fn install_failed(&self) -> bool {
        matches!(self.install, InstallStatus::Failed { .. })
    }
}

/// Reconciles requested dependencies against a manifest and installs the gap.
#[derive(Debug, Clone)]
pub struct Reconciler<I> {
    manifest: Manifest,
    installer: I,
}

impl<I: Installer> Reconciler<I> {
    pub fn new(manifest: Manifest, installer: I) -> Self {
        Self {
            manifest,
            installer,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn installer(&self) -> &I {
        &self.installer
    }

    /// Diff and commit under the manifest lock, then install what was missing.
    ///
    /// Never fails: manifest problems degrade to installing the full request,
    /// and install failures are reported for the caller to log.
    #[instrument(skip_all, fields(requested = requested.len(), manifest = %self.manifest.path().display()))]
    pub fn reconcile(&self, requested: &[String]) -> ReconcileReport {
        if requested.is_empty() {
            return ReconcileReport {
                requested: 0,
                missing: Vec::new(),
                committed: 0,
                manifest_error: None,
                install: InstallStatus::NotNeeded,
            };
        }

        let (missing, committed, manifest_error) = match self.record(requested) {
            Ok((missing, committed)) => (missing, committed, None),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "manifest unavailable, installing full request");
                (requested.to_vec(), 0, Some(format!("{err:#}")))
            }
        };

        if missing.is_empty() {
            info!("all dependencies already in manifest");
        }
        let install = self.installer.install(&missing);
        if let InstallStatus::Failed { message } = &install {
            warn!(message = %message, "dependency installation failed, continuing");
        }

        ReconcileReport {
            requested: requested.len(),
            missing,
            committed,
            manifest_error,
            install,
        }
    }

    fn record(&self, requested: &[String]) -> anyhow::Result<(Vec<String>, usize)> {
        let _lock = self.manifest.lock()?;
        let missing = unique_missing(&self.manifest.diff(requested)?, &HashSet::new());
        let committed = self.manifest.commit(&missing)?;
        Ok((missing, committed))
    }
}
