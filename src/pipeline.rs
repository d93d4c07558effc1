//! The per-document pipeline: rasterize, recognize, match, store.

use std::sync::Arc;

use crate::{
    error::PipelineError,
    keywords::KeywordMatcher,
    prelude::*,
    rasterize::Rasterizer,
    recognize::{PageRecognizer, recognize_pages},
    storage::{ExtractionResult, ResultStore},
};

/// Everything needed to turn one uploaded PDF into a stored
/// [`ExtractionResult`]. Shared by all documents.
#[derive(Clone)]
pub struct DocumentPipeline {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub recognizer: Arc<dyn PageRecognizer>,
    pub matcher: KeywordMatcher,
    pub store: Arc<dyn ResultStore>,
    /// Pages recognized at once, per document.
    pub concurrency: usize,
}

impl DocumentPipeline {
    /// Run every stage for the PDF stored at `pdf_path`, which was uploaded as
    /// `filename`.
    ///
    /// Returns the result only once it has been durably stored. Page images
    /// are deleted before this returns, whatever the outcome. The uploaded file
    /// itself belongs to the caller.
    #[instrument(level = "debug", skip_all, fields(filename = %filename))]
    pub async fn run(
        &self,
        filename: &str,
        pdf_path: &Path,
    ) -> Result<ExtractionResult, PipelineError> {
        let pages = self.rasterizer.rasterize(pdf_path).await?;
        debug!(pages = pages.len(), "Rasterized");
        let texts = recognize_pages(self.recognizer.clone(), &pages, self.concurrency).await?;
        // Page images are not needed past this point.
        drop(pages);

        let pages = texts
            .iter()
            .map(|text| self.matcher.match_page(text))
            .collect::<Vec<_>>();
        debug!(
            matches = pages.iter().map(|page| page.len()).sum::<usize>(),
            "Matched keywords"
        );
        let result = ExtractionResult {
            filename: filename.to_owned(),
            pages,
        };

        let location = self.store.store(&result).await?;
        info!(%filename, %location, "Stored extraction result");
        Ok(result)
    }
}
