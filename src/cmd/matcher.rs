//! The `match` subcommand.

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::{create_writer, read_text},
    keywords::{DEFAULT_THRESHOLD, KeywordMatcher},
    prelude::*,
};

/// Match command line arguments.
#[derive(Debug, Args)]
pub struct MatchOpts {
    /// Text to search, as if recognized from a single page. Defaults to
    /// standard input.
    #[clap(value_name = "TEXT")]
    pub input_path: Option<PathBuf>,

    /// Minimum keyword similarity score, from 0 to 100.
    #[clap(long, env = "MATCH_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,

    /// The output path to write the matches to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `match` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_match(opts: &MatchOpts) -> Result<()> {
    let text = read_text(opts.input_path.as_deref()).await?;
    let found = KeywordMatcher::with_default_keywords(opts.threshold).match_page(&text);
    debug!(matches = found.len(), "Matched keywords");

    let mut wtr = create_writer(opts.output_path.as_deref()).await?;
    let mut json =
        serde_json::to_string_pretty(&found).context("failed to serialize matches")?;
    json.push('\n');
    wtr.write_all(json.as_bytes())
        .await
        .context("failed to write matches")?;
    wtr.flush().await.context("failed to flush matches")?;
    Ok(())
}
