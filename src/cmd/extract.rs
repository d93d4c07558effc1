//! The `extract` subcommand.

use std::{collections::HashSet, time::Duration};

use clap::Args;
use tokio::io::{AsyncWriteExt as _, BufWriter};

use crate::{
    async_utils::io::create_writer,
    config::ServiceOpts,
    prelude::*,
    registry::JobStatus,
    service::{ExtractionService, check_filename},
    ui::{ProgressConfig, Ui},
};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// PDF files to process.
    #[clap(value_name = "PDF", required = true)]
    pub input_paths: Vec<PathBuf>,

    /// Write results to this JSONL file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// How often to check on documents, in milliseconds.
    #[clap(long, default_value = "250")]
    pub poll_interval_ms: u64,

    #[clap(flatten)]
    pub service: ServiceOpts,
}

/// The `extract` subcommand.
///
/// Submits every input, waits for all of them, then writes one JSON line per
/// successful document in input order.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let filenames = upload_names(&opts.input_paths)?;

    let service = opts.service.build_service().await?;
    for (path, filename) in opts.input_paths.iter().zip(&filenames) {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        let receipt = service.submit(filename, file).await?;
        debug!(filename = %receipt.filename, "{}", receipt.message);
    }

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Extracting keywords",
            done_msg: "Extracted keywords",
        },
        filenames.len() as u64,
    );
    let statuses = wait_for_all(
        &service,
        &filenames,
        Duration::from_millis(opts.poll_interval_ms),
        || pb.inc(1),
    )
    .await;
    pb.finish_using_style();

    let mut wtr = BufWriter::new(create_writer(opts.output_path.as_deref()).await?);
    let mut failed = 0;
    for (filename, status) in filenames.iter().zip(statuses) {
        let result = match status {
            JobStatus::Done => service.result(filename),
            _ => None,
        };
        let Some(result) = result else {
            failed += 1;
            continue;
        };
        let mut line = result.to_json_bytes()?;
        line.push(b'\n');
        wtr.write_all(&line)
            .await
            .context("Failed to write result to output")?;
    }
    wtr.flush().await.context("Failed to flush output")?;

    if failed > 0 {
        return Err(anyhow!(
            "{} of {} documents failed (see log for details)",
            failed,
            filenames.len()
        ));
    }
    Ok(())
}

/// The names to submit `paths` under, checked up front so that a bad name
/// stops us before any document starts processing.
fn upload_names(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut filenames = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = upload_name(path)?;
        check_filename(&filename)?;
        if !seen.insert(filename.clone()) {
            return Err(anyhow!("{filename:?} was given more than once"));
        }
        filenames.push(filename);
    }
    Ok(filenames)
}

/// The name we submit a file under: its final path component.
fn upload_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("cannot get a UTF-8 file name from {:?}", path))
}

/// Poll until every document reaches a terminal status, calling `on_finish`
/// once per document as it does. Returns the statuses in `filenames` order.
async fn wait_for_all(
    service: &ExtractionService,
    filenames: &[String],
    poll_interval: Duration,
    on_finish: impl Fn(),
) -> Vec<JobStatus> {
    let mut statuses = vec![None; filenames.len()];
    let mut remaining = filenames.len();
    while remaining > 0 {
        for (filename, slot) in filenames.iter().zip(statuses.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            // Not registered yet means the task has not started.
            if let Some(status) = service.status(filename)
                && status.is_terminal()
            {
                trace!(%filename, %status, "Document finished");
                *slot = Some(status);
                remaining -= 1;
                on_finish();
            }
        }
        if remaining > 0 {
            tokio::time::sleep(poll_interval).await;
        }
    }
    statuses.into_iter().flatten().collect()
}
