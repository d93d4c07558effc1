//! Text recognition for rasterized pages.
//!
//! A [`PageRecognizer`] handles a single page. [`recognize_pages`] fans a whole
//! document out across a fixed number of workers and puts the results back in
//! page order.

use std::sync::Arc;

use futures::{StreamExt as _, TryStreamExt as _, stream};
use tokio::task::JoinHandle;

use crate::{
    error::PipelineError,
    prelude::*,
    rasterize::{PageImage, PageImages},
};

pub mod tesseract;

/// Interface to an OCR engine.
///
/// Implementations must be stateless between calls, because pages of the same
/// document are recognized concurrently.
#[async_trait]
pub trait PageRecognizer: Send + Sync + 'static {
    /// Recognize the text on a single page.
    async fn recognize(&self, page: &PageImage) -> Result<String>;
}

/// Recognize every page of a document, running up to `concurrency` pages at a
/// time.
///
/// `texts[i]` always belongs to page `i`, whatever order the workers finish
/// in. The first failing page fails the whole document: the remaining workers
/// are aborted and nothing they produce is used.
#[instrument(level = "debug", skip_all, fields(pages = pages.len(), concurrency = concurrency))]
pub async fn recognize_pages(
    recognizer: Arc<dyn PageRecognizer>,
    pages: &PageImages,
    concurrency: usize,
) -> Result<Vec<String>, PipelineError> {
    let mut texts = stream::iter(pages.pages().iter().cloned())
        .map(|page| {
            let recognizer = recognizer.clone();
            async move {
                let index = page.index;
                // Spawn so CPU-bound engines run on separate worker threads.
                let mut worker = AbortOnDrop(tokio::spawn(async move {
                    recognizer.recognize(&page).await
                }));
                match (&mut worker.0).await {
                    Ok(Ok(text)) => {
                        trace!(page = index, chars = text.len(), "Recognized page");
                        Ok((index, text))
                    }
                    Ok(Err(err)) => Err(PipelineError::RecognitionFailure {
                        page: index,
                        detail: format!("{err:#}"),
                    }),
                    Err(err) => Err(PipelineError::RecognitionFailure {
                        page: index,
                        detail: format!("recognition worker died: {err}"),
                    }),
                }
            }
        })
        // Keep at most `concurrency` pages in flight. Results arrive in
        // completion order, so the first failure stops everything at once.
        .buffer_unordered(concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    texts.sort_by_key(|(index, _)| *index);
    Ok(texts.into_iter().map(|(_, text)| text).collect())
}

/// Aborts a spawned worker if we stop waiting for it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
