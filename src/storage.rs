//! Extraction results and the durable stores they are written to.

use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream};
use schemars::JsonSchema;

use crate::{aws::load_aws_config, error::PipelineError, keywords::PageKeywords, prelude::*};

/// Content type of stored results.
const JSON_CONTENT_TYPE: &str = "application/json";

/// The keywords extracted from one document.
///
/// This is the durable artifact: it is what we upload, and what callers get
/// back when they ask for a result. Field order is part of the format.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionResult {
    /// The uploaded filename.
    pub filename: String,

    /// One entry per page, in page order. Each maps a keyword to the line of
    /// text it matched. Keywords that were not found are absent.
    pub pages: Vec<PageKeywords>,
}

impl ExtractionResult {
    /// Serialize to our canonical JSON encoding.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize extraction result")
    }
}

#[cfg(test)]
impl ExtractionResult {
    /// Parse our canonical JSON encoding.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to parse extraction result")
    }
}

/// The storage key for a document's result: the base name of `filename`, with
/// its extension replaced by `.json`. Any directories in `filename` are
/// dropped, so the key never points outside the store.
pub fn result_key(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(Path::new)
        .unwrap_or_else(|| Path::new("document"));
    base.with_extension("json").to_string_lossy().into_owned()
}

/// Somewhere durable to put extraction results.
#[async_trait]
pub trait ResultStore: Send + Sync + 'static {
    /// Write `result` under [`result_key`] of its filename, returning the full
    /// location it was written to.
    ///
    /// Any failure is reported as [`PipelineError::StorageUnavailable`].
    async fn store(&self, result: &ExtractionResult) -> Result<String, PipelineError>;
}

/// Serialize a result, reporting failures against `key`.
fn encode(result: &ExtractionResult, key: &str) -> Result<Vec<u8>, PipelineError> {
    result
        .to_json_bytes()
        .map_err(|err| storage_unavailable(key, err))
}

fn storage_unavailable(key: &str, err: impl Into<anyhow::Error>) -> PipelineError {
    PipelineError::StorageUnavailable {
        key: key.to_owned(),
        detail: format!("{:#}", err.into()),
    }
}

/// Stores results as objects in an S3 bucket.
pub struct S3ResultStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ResultStore {
    /// Connect using the standard AWS credential chain.
    pub async fn new(bucket: String, region: Option<&str>, prefix: String) -> Result<Self> {
        let config = load_aws_config(region).await?;
        Ok(Self::from_client(
            aws_sdk_s3::Client::new(&config),
            bucket,
            prefix,
        ))
    }

    /// Use an already-configured client.
    pub fn from_client(client: aws_sdk_s3::Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl ResultStore for S3ResultStore {
    #[instrument(level = "debug", skip_all, fields(filename = %result.filename, bucket = %self.bucket))]
    async fn store(&self, result: &ExtractionResult) -> Result<String, PipelineError> {
        let key = self.full_key(&result_key(&result.filename));
        let body = encode(result, &key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(JSON_CONTENT_TYPE)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                storage_unavailable(&key, anyhow!("{}", DisplayErrorContext(&err)))
            })?;
        Ok(self.location(&key))
    }
}

/// Stores results as files in a local directory.
///
/// Handy when there is no bucket, and in tests.
pub struct DirResultStore {
    dir: PathBuf,
}

impl DirResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ResultStore for DirResultStore {
    #[instrument(level = "debug", skip_all, fields(filename = %result.filename, dir = %self.dir.display()))]
    async fn store(&self, result: &ExtractionResult) -> Result<String, PipelineError> {
        let key = result_key(&result.filename);
        let path = self.dir.join(&key);
        let body = encode(result, &key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| storage_unavailable(&key, err))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|err| storage_unavailable(&key, err))?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ExtractionResult {
        let mut page = PageKeywords::new();
        page.insert("Capacity".to_owned(), "Capacity: 5000 persons".to_owned());
        page.insert("VIP Attending".to_owned(), "VlP Attending: Yes".to_owned());
        ExtractionResult {
            filename: "festival.pdf".to_owned(),
            pages: vec![page, PageKeywords::new()],
        }
    }

    #[test]
    fn result_key_replaces_extension() {
        assert_eq!(result_key("festival.pdf"), "festival.json");
        assert_eq!(result_key("Festival.PDF"), "Festival.json");
        assert_eq!(result_key("a.b.pdf"), "a.b.json");
        assert_eq!(result_key("no_extension"), "no_extension.json");
    }

    #[test]
    fn result_key_drops_directories() {
        assert_eq!(result_key("../escaped.pdf"), "escaped.json");
        assert_eq!(result_key("/etc/passwd.pdf"), "passwd.json");
        assert_eq!(result_key("a/b/c.pdf"), "c.json");
        assert_eq!(result_key(".."), "document.json");
    }

    #[test]
    fn serialized_form_puts_filename_before_pages() -> Result<()> {
        let json = String::from_utf8(sample_result().to_json_bytes()?)?;
        assert_eq!(
            json,
            r#"{"filename":"festival.pdf","pages":[{"Capacity":"Capacity: 5000 persons","VIP Attending":"VlP Attending: Yes"},{}]}"#
        );
        Ok(())
    }

    #[test]
    fn serialization_round_trips() -> Result<()> {
        let result = sample_result();
        let parsed = ExtractionResult::from_json_bytes(&result.to_json_bytes()?)?;
        assert_eq!(parsed, result);
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = br#"{"filename":"a.pdf","pages":[],"status":"done"}"#;
        assert!(ExtractionResult::from_json_bytes(json).is_err());
    }

    #[tokio::test]
    async fn dir_store_writes_json_file() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("results-")?;
        let store = DirResultStore::new(dir.path());
        let location = store.store(&sample_result()).await?;
        let path = dir.path().join("festival.json");
        assert_eq!(location, path.display().to_string());
        let stored = ExtractionResult::from_json_bytes(&std::fs::read(&path)?)?;
        assert_eq!(stored, sample_result());
        Ok(())
    }

    #[tokio::test]
    async fn dir_store_stays_inside_its_directory() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("results-root-")?;
        let out = root.path().join("out");
        let store = DirResultStore::new(&out);
        let mut result = sample_result();
        result.filename = "../escaped.pdf".to_owned();

        let location = store.store(&result).await?;

        assert_eq!(location, out.join("escaped.json").display().to_string());
        assert!(out.join("escaped.json").exists());
        assert!(!root.path().join("escaped.json").exists());
        Ok(())
    }

    /// An S3 store pointed at a port nothing listens on.
    fn unreachable_s3_store(prefix: &str) -> S3ResultStore {
        use aws_sdk_s3::config::{
            BehaviorVersion, Credentials, Region, retry::RetryConfig,
        };

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url("http://127.0.0.1:9")
            .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .build();
        S3ResultStore::from_client(
            aws_sdk_s3::Client::from_conf(config),
            "results-bucket".to_owned(),
            prefix.to_owned(),
        )
    }

    #[tokio::test]
    async fn s3_keys_and_locations_include_the_prefix() {
        let store = unreachable_s3_store("extractions/");
        let key = store.full_key(&result_key("festival.pdf"));
        assert_eq!(key, "extractions/festival.json");
        assert_eq!(
            store.location(&key),
            "s3://results-bucket/extractions/festival.json"
        );
    }

    #[tokio::test]
    async fn s3_transport_failure_is_storage_unavailable() {
        let store = unreachable_s3_store("p/");
        let err = store.store(&sample_result()).await.unwrap_err();
        match err {
            PipelineError::StorageUnavailable { key, detail } => {
                assert_eq!(key, "p/festival.json");
                assert!(!detail.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dir_store_failure_is_storage_unavailable() -> Result<()> {
        // A regular file where the directory should be.
        let file = tempfile::NamedTempFile::new()?;
        let store = DirResultStore::new(file.path());
        let err = store.store(&sample_result()).await.unwrap_err();
        assert!(
            matches!(&err, PipelineError::StorageUnavailable { key, .. } if key == "festival.json"),
            "{err:?}"
        );
        Ok(())
    }
}
