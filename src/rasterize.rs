//! Turn PDF documents into one image per page.

use std::{collections::BTreeMap, io, sync::LazyLock};

use regex::Regex;
use tempfile::TempDir;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, run_blocking},
    cpu_limit::CpuLimiter,
    error::PipelineError,
    prelude::*,
};

/// Default rasterization resolution.
pub const DEFAULT_DPI: u32 = 150;

/// Lines of `pdftocairo` output that mean the document is broken.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Errors that poppler reports for PDFs it can still render fine.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// `pdftocairo` names pages `<root>-<n>.jpg`, zero-padding `n` to the width
/// of the page count.
static PAGE_FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-(\d+)\.jpg$").expect("failed to compile regex")
});

/// One rasterized page on disk.
#[derive(Clone, Debug)]
pub struct PageImage {
    /// Zero-based position of the page in the document.
    pub index: usize,
    /// The image file.
    pub path: PathBuf,
}

/// The pages of a rasterized document, in document order.
///
/// Owns the temporary directory the images live in, which is deleted when this
/// value is dropped, on every exit path.
#[derive(Debug)]
pub struct PageImages {
    tmpdir: Option<TempDir>,
    pages: Vec<PageImage>,
}

impl PageImages {
    /// Wrap page image files stored in `tmpdir`. `paths` must already be in
    /// document order.
    pub fn new(tmpdir: TempDir, paths: Vec<PathBuf>) -> Self {
        let pages = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| PageImage { index, path })
            .collect();
        Self {
            tmpdir: Some(tmpdir),
            pages,
        }
    }

    /// The pages, in document order.
    pub fn pages(&self) -> &[PageImage] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }
}

impl Drop for PageImages {
    fn drop(&mut self) {
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = %tmpdir_path.display(),
                    "failed to delete page image directory: {}",
                    err
                );
            }
        }
    }
}

/// Converts a PDF into page images.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Rasterize the PDF at `pdf_path`.
    ///
    /// Any failure is reported as [`PipelineError::UnsupportedDocument`].
    async fn rasterize(&self, pdf_path: &Path) -> Result<PageImages, PipelineError>;
}

/// Rasterizer built on poppler's `pdfinfo` and `pdftocairo` command-line
/// tools, producing JPEG pages.
#[derive(Clone, Debug)]
pub struct PopplerRasterizer {
    dpi: u32,
    cpu_limiter: CpuLimiter,
}

impl PopplerRasterizer {
    pub fn new(dpi: u32, cpu_limiter: CpuLimiter) -> Self {
        Self { dpi, cpu_limiter }
    }

    #[instrument(level = "debug", skip_all, fields(path = %pdf_path.display(), dpi = self.dpi))]
    async fn rasterize_inner(&self, pdf_path: &Path) -> Result<PageImages> {
        let path = pdf_path.to_owned();
        run_blocking(move || ensure_pdf(&path)).await?;
        let total_pages = get_pdf_page_count(pdf_path).await?;

        let tmpdir = TempDir::with_prefix("pages-")
            .context("failed to create page image directory")?;
        let out_root = tmpdir.path().join("page");

        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-jpeg")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf_path)
            .arg(&out_root)
            .kill_on_drop(true);
        let output = self
            .cpu_limiter
            .run(move || async move {
                cmd.output()
                    .await
                    .map_err(|err| missing_tool_error("pdftocairo", err))
            })
            .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let dir = tmpdir.path().to_owned();
        let paths = run_blocking(move || {
            let names = dir
                .read_dir()
                .with_context(|| format!("failed to read {:?}", dir.display()))?
                .map(|entry| Ok(entry?.path()))
                .collect::<Result<Vec<_>>>()?;
            let paths = sort_page_files(names)?;
            for path in &paths {
                let (width, height) = image::image_dimensions(path)
                    .with_context(|| format!("unreadable page image {:?}", path.display()))?;
                trace!(path = %path.display(), width, height, "Rasterized page");
            }
            Ok(paths)
        })
        .await?;

        if paths.len() != total_pages {
            return Err(anyhow!(
                "expected {} pages from pdftocairo, found {}",
                total_pages,
                paths.len()
            ));
        }
        debug!(pages = total_pages, "Rasterized document");
        Ok(PageImages::new(tmpdir, paths))
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    async fn rasterize(&self, pdf_path: &Path) -> Result<PageImages, PipelineError> {
        self.rasterize_inner(pdf_path)
            .await
            .map_err(PipelineError::unsupported)
    }
}

/// Does this line of poppler output describe a real error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Check the file's magic bytes before handing it to poppler.
fn ensure_pdf(path: &Path) -> Result<()> {
    let kind = infer::get_from_path(path)
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    match kind {
        Some(kind) if kind.mime_type() == "application/pdf" => Ok(()),
        Some(kind) => Err(anyhow!("expected a PDF, found {}", kind.mime_type())),
        None => Err(anyhow!("expected a PDF, found unrecognized data")),
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .map_err(|err| missing_tool_error("pdfinfo", err))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let pages = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    let pages = pages
        .parse::<usize>()
        .with_context(|| format!("failed to parse page count {pages:?}"))?;
    if pages == 0 {
        return Err(anyhow!("document has no pages"));
    }
    Ok(pages)
}

/// Explain a failure to start one of the poppler tools.
fn missing_tool_error(tool: &str, err: io::Error) -> anyhow::Error {
    if err.kind() == io::ErrorKind::NotFound {
        anyhow!("{tool} is not installed (install poppler-utils)")
    } else {
        anyhow::Error::new(err).context(format!("failed to run {tool}"))
    }
}

/// Order `pdftocairo` output files by page number.
fn sort_page_files(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut numbered = paths
        .into_iter()
        .map(|path| {
            let name = path.to_string_lossy();
            let number = PAGE_FILE_REGEX
                .captures(&name)
                .and_then(|caps| caps[1].parse::<usize>().ok())
                .ok_or_else(|| anyhow!("unexpected file {:?} in page directory", name))?;
            Ok((number, path))
        })
        .collect::<Result<Vec<_>>>()?;
    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    static TEST_PDF_PATH: &str = "tests/fixtures/two_pages.pdf";

    fn rasterizer() -> PopplerRasterizer {
        PopplerRasterizer::new(DEFAULT_DPI, CpuLimiter::new(1))
    }

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("Syntax Error: Couldn't read xref table"));
        assert!(is_error_line("ERROR: something went wrong"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, try to reconstruct"
        ));
    }

    #[test]
    fn page_files_sort_numerically() {
        let paths = ["page-10.jpg", "page-2.jpg", "page-1.jpg"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let sorted = sort_page_files(paths).unwrap();
        assert_eq!(
            sorted,
            vec![
                PathBuf::from("page-1.jpg"),
                PathBuf::from("page-2.jpg"),
                PathBuf::from("page-10.jpg"),
            ]
        );
    }

    #[test]
    fn stray_files_are_rejected() {
        assert!(sort_page_files(vec![PathBuf::from("notes.txt")]).is_err());
    }

    #[test]
    fn page_images_delete_their_directory() -> Result<()> {
        let tmpdir = TempDir::with_prefix("pages-test-")?;
        let dir = tmpdir.path().to_owned();
        let page = dir.join("page-1.jpg");
        std::fs::write(&page, b"fake")?;
        let images = PageImages::new(tmpdir, vec![page.clone()]);
        assert_eq!(images.len(), 1);
        assert_eq!(images.pages()[0].index, 0);
        drop(images);
        assert!(!dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_payload_is_unsupported() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
        file.write_all(b"definitely not a PDF")?;
        file.flush()?;
        let err = rasterizer().rasterize(file.path()).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::UnsupportedDocument { .. }),
            "{err:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_payload_is_unsupported() -> Result<()> {
        let file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
        let err = rasterizer().rasterize(file.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedDocument { .. }));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn page_count_returns_correct_number_of_pages() -> Result<()> {
        let page_count = get_pdf_page_count(Path::new(TEST_PDF_PATH)).await?;
        assert_eq!(page_count, 2);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn rasterizes_every_page_in_order() -> Result<()> {
        let images = rasterizer().rasterize(Path::new(TEST_PDF_PATH)).await?;
        assert_eq!(images.len(), 2);
        for (i, page) in images.pages().iter().enumerate() {
            assert_eq!(page.index, i);
            assert!(page.path.exists());
        }
        Ok(())
    }
}
