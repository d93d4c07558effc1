//! Input and output for the command-line tools.

use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncWrite},
};

use crate::prelude::*;

/// Create a writer for either a file or standard output.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Read all of a UTF-8 text file, or standard input if `path` is `None`.
pub async fn read_text(path: Option<&Path>) -> Result<String> {
    let mut text = String::new();
    match path {
        Some(path) => {
            File::open(path)
                .await
                .with_context(|| format!("Failed to open file at path: {:?}", path))?
                .read_to_string(&mut text)
                .await
                .with_context(|| format!("Failed to read text from {:?}", path))?;
        }
        None => {
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read text from stdin")?;
        }
    }
    Ok(text)
}
