//! Service configuration, from command-line flags or the environment.

use std::sync::Arc;

use clap::Args;

use crate::{
    cpu_limit::CpuLimiter,
    keywords::{DEFAULT_THRESHOLD, KeywordMatcher},
    pipeline::DocumentPipeline,
    prelude::*,
    rasterize::{DEFAULT_DPI, PopplerRasterizer},
    recognize::tesseract::{DEFAULT_TESSERACT_CMD, TesseractRecognizer},
    service::ExtractionService,
    storage::{DirResultStore, ResultStore, S3ResultStore},
};

/// Options for building an [`ExtractionService`].
///
/// Every option can also be set through the environment variable named in
/// its help, including from a `.env` file.
#[derive(Clone, Debug, Args)]
pub struct ServiceOpts {
    /// S3 bucket to upload results to.
    #[clap(long, env = "BUCKET_NAME")]
    pub bucket: Option<String>,

    /// AWS region of the bucket. Defaults to the standard AWS lookup.
    #[clap(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Prefix to put in front of every result key in the bucket.
    #[clap(long, env = "STORAGE_PREFIX", default_value = "")]
    pub storage_prefix: String,

    /// Write results to this local directory instead of S3.
    #[clap(long, env = "OUTPUT_DIR", conflicts_with = "bucket")]
    pub output_dir: Option<PathBuf>,

    /// The `tesseract` executable.
    #[clap(long, env = "TESSERACT_CMD", default_value = DEFAULT_TESSERACT_CMD)]
    pub tesseract_cmd: PathBuf,

    /// Pages to OCR at once for each document.
    #[clap(long, env = "MAX_WORKERS", default_value_t = num_cpus::get())]
    pub max_workers: usize,

    /// Resolution to rasterize pages at.
    #[clap(long, env = "RASTERIZE_DPI", default_value_t = DEFAULT_DPI)]
    pub dpi: u32,

    /// Minimum keyword similarity score, from 0 to 100.
    #[clap(long, env = "MATCH_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,

    /// Directory to hold uploads while they are processed. Defaults to the
    /// system temporary directory.
    #[clap(long, env = "UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,
}

impl ServiceOpts {
    /// Connect to storage and assemble the service.
    #[instrument(level = "debug", skip_all)]
    pub async fn build_service(&self) -> Result<ExtractionService> {
        let store = self.build_store().await?;
        let pipeline = DocumentPipeline {
            rasterizer: Arc::new(PopplerRasterizer::new(self.dpi, CpuLimiter::per_cpu())),
            recognizer: Arc::new(TesseractRecognizer::new(&self.tesseract_cmd)),
            matcher: KeywordMatcher::with_default_keywords(self.threshold),
            store,
            concurrency: self.max_workers,
        };
        Ok(ExtractionService::new(pipeline, self.upload_dir.clone()))
    }

    async fn build_store(&self) -> Result<Arc<dyn ResultStore>> {
        match (&self.bucket, &self.output_dir) {
            (Some(bucket), _) => {
                debug!(%bucket, "Storing results in S3");
                let store = S3ResultStore::new(
                    bucket.clone(),
                    self.region.as_deref(),
                    self.storage_prefix.clone(),
                )
                .await?;
                Ok(Arc::new(store))
            }
            (None, Some(dir)) => {
                debug!(dir = %dir.display(), "Storing results locally");
                Ok(Arc::new(DirResultStore::new(dir)))
            }
            (None, None) => Err(anyhow!(
                "no result storage configured (set BUCKET_NAME or --output-dir)"
            )),
        }
    }
}
