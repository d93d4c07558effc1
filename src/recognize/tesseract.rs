//! Tesseract OCR engine.

use std::io;

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, prelude::*, rasterize::PageImage,
};

use super::PageRecognizer;

/// Default executable name, looked up on `PATH`.
pub const DEFAULT_TESSERACT_CMD: &str = "tesseract";

/// OCR engine wrapping the `tesseract` CLI tool.
///
/// Each page runs in its own `tesseract` process, which is killed if the
/// document fails before the page finishes.
#[derive(Clone, Debug)]
pub struct TesseractRecognizer {
    command: PathBuf,
}

impl TesseractRecognizer {
    /// Create a new `tesseract` engine using the given executable.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl PageRecognizer for TesseractRecognizer {
    #[instrument(level = "debug", skip_all, fields(page = page.index))]
    async fn recognize(&self, page: &PageImage) -> Result<String> {
        // The output base `stdout` makes tesseract print the text instead of
        // writing `<base>.txt`.
        let output = Command::new(&self.command)
            .arg(&page.path)
            .arg("stdout")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    anyhow!("tesseract not found at {:?}", self.command.display())
                } else {
                    anyhow::Error::new(err).context("cannot run tesseract")
                }
            })?;
        check_for_command_failure("tesseract", &output, None)?;
        String::from_utf8(output.stdout).context("tesseract output was not valid UTF-8")
    }
}
