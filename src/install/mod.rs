//! Installation of update files
//!
//! The [Installer] applies a set of [Update]s to the store of a [DataModel]. Every update is
//! applied once per [Lifecycle] step, in its own transaction: a file that fails is rolled back,
//! reported and left out of the remaining steps, files that succeed are committed. Once every
//! step ran, the caches of the data model are invalidated so that later reads see the
//! installed objects.

use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::ReloadError;
use crate::datamodel::{DataModel, Snapshot};
use crate::expr::VersionContext;
use crate::update::{Applied, Error, Kinds, Lifecycle, ParseError, Update};

mod opts;

pub use opts::*;

/// What happened to one file of an installation
#[derive(Debug)]
pub enum Status {
    /// The installation stopped before the file
    NotAttempted,
    Applied(Applied),
    /// No definition of the file is selected by the version context
    Skipped,
    /// The file was rolled back
    Failed(Error),
}

#[derive(Debug)]
pub struct FileOutcome {
    pub file: String,
    pub uuid: Uuid,
    pub status: Status,
}

impl FileOutcome {
    fn record(&mut self, applied: Applied) {
        match &mut self.status {
            Status::Applied(previous) => previous.absorb(applied),
            status => *status = Status::Applied(applied),
        }
    }
}

/// The outcome of every file of an installation, in the order of the updates
#[derive(Debug)]
pub struct InstallReport {
    files: Vec<FileOutcome>,
}

impl InstallReport {
    pub fn files(&self) -> &[FileOutcome] {
        &self.files
    }

    pub fn get(&self, file: &str) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.file == file)
    }

    /// Whether every file was applied or skipped
    pub fn is_success(&self) -> bool {
        self.files
            .iter()
            .all(|f| matches!(f.status, Status::Applied(_) | Status::Skipped))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&FileOutcome, &Error)> {
        self.files.iter().filter_map(|f| match &f.status {
            Status::Failed(err) => Some((f, err)),
            _ => None,
        })
    }
}

/// Applies update files to the store of a data model
pub struct Installer<'m> {
    model: &'m DataModel,
    kinds: Kinds,
    opts: Opts,
}

impl<'m> Installer<'m> {
    pub fn new(model: &'m DataModel) -> Self {
        Self {
            model,
            kinds: Kinds::default(),
            opts: Opts::default(),
        }
    }

    /// Use a custom set of update kinds
    pub fn with_kinds(self, kinds: Kinds) -> Self {
        let mut installer = self;
        installer.kinds = kinds;
        installer
    }

    pub fn with_opts(self, opts: Opts) -> Self {
        let mut installer = self;
        installer.opts = opts;
        installer
    }

    pub fn kinds(&self) -> &Kinds {
        &self.kinds
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Parse the content of an update file
    pub fn parse(&self, label: &str, xml: &str) -> Result<Update, ParseError> {
        Update::parse(label, xml, &self.kinds)
    }

    /// Read and parse an update file
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Update, ParseError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let xml = fs::read_to_string(path).map_err(|source| ParseError::Io {
            file: label.clone(),
            source,
        })?;
        self.parse(&label, &xml)
    }

    /// Apply the updates in order
    ///
    /// Failures of single files are part of the report, the call itself only fails if the
    /// data model cannot be loaded.
    #[instrument(name = "install", skip_all, fields(updates = updates.len()), err)]
    pub fn install(
        &self,
        updates: &[Update],
        ctx: &VersionContext,
    ) -> Result<InstallReport, ReloadError> {
        // load before taking the connection for the first transaction
        let snapshot = self.model.snapshot()?;

        let mut files: Vec<FileOutcome> = updates
            .iter()
            .map(|u| FileOutcome {
                file: u.label().to_string(),
                uuid: u.uuid(),
                status: Status::NotAttempted,
            })
            .collect();

        'steps: for step in Lifecycle::ALL {
            debug!(step = ?step, "install step");
            for (update, outcome) in updates.iter().zip(files.iter_mut()) {
                if matches!(outcome.status, Status::Failed(_)) {
                    continue;
                }
                match self.apply(update, step, &snapshot, ctx) {
                    Ok(Some(applied)) => outcome.record(applied),
                    Ok(None) => outcome.status = Status::Skipped,
                    Err(err) => {
                        warn!(file = update.label(), step = ?step, "update rolled back: {err}");
                        outcome.status = Status::Failed(err);
                        if self.opts.fail_fast {
                            break 'steps;
                        }
                    }
                }
            }
        }

        self.model.invalidate();

        let report = InstallReport { files };
        info!(
            files = report.files.len(),
            failed = report.failures().count(),
            "installation finished"
        );
        Ok(report)
    }

    fn apply(
        &self,
        update: &Update,
        step: Lifecycle,
        snapshot: &Snapshot,
        ctx: &VersionContext,
    ) -> Result<Option<Applied>, Error> {
        let conn = self.model.db().transaction()?;
        match update.apply(step, &conn, snapshot, ctx, &self.opts) {
            Ok(applied) => {
                conn.commit()?;
                Ok(applied)
            }
            Err(err) => {
                if let Err(abort) = conn.abort() {
                    warn!(file = update.label(), "failed to roll back: {abort}");
                }
                Err(err)
            }
        }
    }
}
