//! In-process record of every document's status and result.
//!
//! The registry is created once at startup and shared by `Arc` between the
//! pipelines and whoever answers status queries. Entries are never evicted, so
//! it grows by one entry per distinct filename for the life of the process.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use schemars::JsonSchema;

use crate::{prelude::*, storage::ExtractionResult};

/// Where a document is in the pipeline.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The pipeline is running.
    Processing,
    /// The result was stored and can be retrieved.
    Done,
    /// Some stage failed. Details are only in the logs.
    Failed,
}

impl JobStatus {
    /// Will this status ever change again?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Status and result maps, keyed by filename.
///
/// The two maps are independent: a status without a result is the normal state
/// of an unfinished or failed document.
#[derive(Debug, Default)]
pub struct Registry {
    statuses: Mutex<HashMap<String, JobStatus>>,
    results: Mutex<HashMap<String, Arc<ExtractionResult>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, filename: &str, status: JobStatus) {
        self.statuses
            .lock()
            .expect("lock poisoned")
            .insert(filename.to_owned(), status);
    }

    /// `None` means no pipeline for `filename` ever started.
    pub fn get_status(&self, filename: &str) -> Option<JobStatus> {
        self.statuses
            .lock()
            .expect("lock poisoned")
            .get(filename)
            .copied()
    }

    pub fn set_result(&self, filename: &str, result: ExtractionResult) {
        self.results
            .lock()
            .expect("lock poisoned")
            .insert(filename.to_owned(), Arc::new(result));
    }

    /// `None` covers every case where there is nothing to return yet.
    pub fn get_result(&self, filename: &str) -> Option<Arc<ExtractionResult>> {
        self.results
            .lock()
            .expect("lock poisoned")
            .get(filename)
            .cloned()
    }

    /// Mark `filename` as [`JobStatus::Processing`] and return the only handle
    /// allowed to finish it.
    pub fn begin(self: &Arc<Self>, filename: &str) -> RunningJob {
        self.set_status(filename, JobStatus::Processing);
        RunningJob {
            registry: self.clone(),
            filename: filename.to_owned(),
            finished: false,
        }
    }
}

/// One pipeline run's claim on a registry entry.
///
/// Finishing consumes the handle, so a run reaches a terminal status at most
/// once. A handle dropped without finishing (say, while unwinding from a
/// panic) marks the document as failed.
#[derive(Debug)]
pub struct RunningJob {
    registry: Arc<Registry>,
    filename: String,
    finished: bool,
}

impl RunningJob {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Publish the result, then mark the document [`JobStatus::Done`].
    ///
    /// The result goes in first so that `done` always implies retrievable.
    pub fn succeed(mut self, result: ExtractionResult) {
        self.registry.set_result(&self.filename, result);
        self.registry.set_status(&self.filename, JobStatus::Done);
        self.finished = true;
    }

    /// Mark the document [`JobStatus::Failed`].
    pub fn fail(mut self) {
        self.registry.set_status(&self.filename, JobStatus::Failed);
        self.finished = true;
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        if !self.finished {
            error!(filename = %self.filename, "pipeline ended without a status, marking failed");
            self.registry.set_status(&self.filename, JobStatus::Failed);
        }
    }
}
