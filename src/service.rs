//! The public face of the extractor: submit documents, then ask about them.
//!
//! [`ExtractionService::submit`] saves the upload and returns at once. The
//! pipeline runs in its own tokio task, and callers learn how it went only by
//! polling [`ExtractionService::status`] and [`ExtractionService::result`].

use std::{any::Any, ffi::OsStr, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use schemars::JsonSchema;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt as _};
use tracing::Instrument as _;

use crate::{
    error::{PipelineError, SubmitError},
    pipeline::DocumentPipeline,
    prelude::*,
    registry::{JobStatus, Registry},
    storage::ExtractionResult,
};

/// Returned to the caller when an upload is accepted.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    /// Always "File is being processed".
    pub message: String,
    /// The accepted filename, which is also the key for later queries.
    pub filename: String,
}

/// Accepts uploads and runs them through a [`DocumentPipeline`].
pub struct ExtractionService {
    registry: Arc<Registry>,
    pipeline: Arc<DocumentPipeline>,
    /// Where uploads wait for the pipeline. `None` for the system temp dir.
    upload_dir: Option<PathBuf>,
}

impl ExtractionService {
    pub fn new(pipeline: DocumentPipeline, upload_dir: Option<PathBuf>) -> Self {
        Self {
            registry: Registry::new(),
            pipeline: Arc::new(pipeline),
            upload_dir,
        }
    }

    /// Save `payload` and start processing it in the background.
    ///
    /// Only the save is awaited. Names rejected by [`check_filename`] fail
    /// before anything is written.
    #[instrument(level = "debug", skip_all, fields(filename = %filename))]
    pub async fn submit<R>(&self, filename: &str, payload: R) -> Result<SubmitReceipt, SubmitError>
    where
        R: AsyncRead + Unpin,
    {
        check_filename(filename)?;
        let upload = self
            .save_upload(payload)
            .await
            .map_err(|source| SubmitError::TempStorage {
                filename: filename.to_owned(),
                source,
            })?;
        debug!(path = %upload.display(), "Saved upload");

        tokio::spawn(
            process_document(
                self.registry.clone(),
                self.pipeline.clone(),
                filename.to_owned(),
                upload,
            )
            .in_current_span(),
        );

        Ok(SubmitReceipt {
            message: "File is being processed".to_owned(),
            filename: filename.to_owned(),
        })
    }

    /// Current status, or `None` if processing never started.
    pub fn status(&self, filename: &str) -> Option<JobStatus> {
        self.registry.get_status(filename)
    }

    /// The result, if `filename` finished successfully.
    pub fn result(&self, filename: &str) -> Option<Arc<ExtractionResult>> {
        self.registry.get_result(filename)
    }

    /// Stream `payload` into a new temporary file, deleted when the returned
    /// path is dropped.
    async fn save_upload<R>(&self, mut payload: R) -> std::io::Result<TempPath>
    where
        R: AsyncRead + Unpin,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-").suffix(".pdf");
        let file = match &self.upload_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = file.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        tokio::io::copy(&mut payload, &mut file).await?;
        file.flush().await?;
        Ok(path)
    }
}

/// Can a document be submitted under `filename`?
///
/// It must be a bare file name ending in `.pdf`, ignoring case. Names are
/// registry keys and storage keys, so directories are not allowed.
pub fn check_filename(filename: &str) -> Result<(), SubmitError> {
    let invalid = |reason| {
        Err(SubmitError::InvalidInput {
            filename: filename.to_owned(),
            reason,
        })
    };
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return invalid("only PDF files are allowed");
    }
    if Path::new(filename).file_name() != Some(OsStr::new(filename)) || filename.contains('\\') {
        return invalid("file names may not include directories");
    }
    Ok(())
}

/// The background half of [`ExtractionService::submit`].
///
/// The upload is deleted before the final status is published, so anyone who
/// sees `done` or `failed` can rely on it being gone.
async fn process_document(
    registry: Arc<Registry>,
    pipeline: Arc<DocumentPipeline>,
    filename: String,
    upload: TempPath,
) {
    let job = registry.begin(&filename);

    let outcome = AssertUnwindSafe(pipeline.run(&filename, &upload))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(PipelineError::Unexpected {
                detail: panic_message(panic.as_ref()),
            })
        });

    let upload_path = upload.to_path_buf();
    if let Err(err) = upload.close() {
        error!(
            filename = %job.filename(),
            path = %upload_path.display(),
            "failed to delete uploaded file: {}",
            err
        );
    }

    match outcome {
        Ok(result) => job.succeed(result),
        Err(err) => {
            error!(filename = %job.filename(), stage = err.stage(), "{}", err);
            job.fail();
        }
    }
}

/// Get something printable out of a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic with unknown payload".to_owned()
    }
}
