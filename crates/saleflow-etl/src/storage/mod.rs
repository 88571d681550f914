//! Object storage for source artifacts
//!
//! [`ArtifactStore`] is what the pipeline sees: a streaming read plus the copy
//! and delete used to relocate an artifact once its job is done. [`Storage`]
//! talks to S3 or any S3-compatible endpoint; [`MemoryStore`] keeps objects
//! in process for tests and dry runs.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::error::{EtlError, EtlResult};

pub mod config;

/// Raw artifact bytes, in whatever pieces the backend delivers them
pub type ByteChunkStream = BoxStream<'static, EtlResult<Bytes>>;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Open `key` for streaming. Failing to open is a storage error; failures
    /// while reading come through the stream as extraction errors.
    async fn open(&self, key: &str) -> EtlResult<ByteChunkStream>;

    async fn copy(&self, source_key: &str, dest_key: &str) -> EtlResult<()>;

    async fn delete(&self, key: &str) -> EtlResult<()>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(config: config::StorageConfig) -> EtlResult<Self> {
        debug!("Initializing storage with config: {:?}", config);

        let mut s3_config_builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "saleflow-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        s3_config_builder = s3_config_builder.force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

/// `CopySource` must be URL-encoded; `/` separators stay literal
fn copy_source(bucket: &str, key: &str) -> String {
    let key = key
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");
    format!("{bucket}/{key}")
}

fn body_stream(body: ByteStream) -> ByteChunkStream {
    stream::unfold(Some(body), |state| async move {
        let mut body = state?;
        match body.next().await {
            Some(Ok(bytes)) => Some((Ok(bytes), Some(body))),
            Some(Err(e)) => Some((
                Err(EtlError::extraction(format!("Failed to read S3 object body: {e}"))),
                None,
            )),
            None => None,
        }
    })
    .boxed()
}

#[async_trait]
impl ArtifactStore for Storage {
    #[instrument(skip(self))]
    async fn open(&self, key: &str) -> EtlResult<ByteChunkStream> {
        debug!("Getting stream from s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EtlError::storage(format!("Failed to open s3://{}/{}: {e}", self.bucket, key)))?;

        Ok(body_stream(response.body))
    }

    #[instrument(skip(self))]
    async fn copy(&self, source_key: &str, dest_key: &str) -> EtlResult<()> {
        let copy_source = copy_source(&self.bucket, source_key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&copy_source)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| EtlError::storage(format!("Failed to copy S3 object: {e}")))?;

        info!(
            "Copied s3://{}/{} to s3://{}/{}",
            self.bucket, source_key, self.bucket, dest_key
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> EtlResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EtlError::storage(format!("Failed to delete from S3: {key}: {e}")))?;

        info!("Deleted s3://{}/{}", self.bucket, key);

        Ok(())
    }
}

/// In-process object store.
///
/// Reads are delivered in pieces of `read_size` bytes so callers see the same
/// arbitrary chunk boundaries a network body produces. Copy failures can be
/// switched on to exercise relocation error paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    objects: BTreeMap<String, Bytes>,
    read_size: Option<usize>,
    fail_copies: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split reads into pieces of at most `read_size` bytes
    pub fn with_read_size(self, read_size: usize) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.read_size = Some(read_size.max(1));
        }
        self
    }

    pub fn fail_copies(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_copies = fail;
        }
    }

    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.objects.insert(key.into(), data.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().ok()?.objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> EtlResult<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| EtlError::storage("memory store lock poisoned"))
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn open(&self, key: &str) -> EtlResult<ByteChunkStream> {
        let inner = self.lock()?;
        let data = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| EtlError::storage(format!("Object not found: {key}")))?;
        let read_size = inner.read_size.unwrap_or(data.len().max(1));

        let pieces: Vec<EtlResult<Bytes>> = (0..data.len())
            .step_by(read_size)
            .map(|start| Ok(data.slice(start..(start + read_size).min(data.len()))))
            .collect();

        Ok(stream::iter(pieces).boxed())
    }

    async fn copy(&self, source_key: &str, dest_key: &str) -> EtlResult<()> {
        let mut inner = self.lock()?;
        if inner.fail_copies {
            return Err(EtlError::storage(format!("copy of {source_key} refused")));
        }
        let data = inner
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| EtlError::storage(format!("Object not found: {source_key}")))?;
        inner.objects.insert(dest_key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> EtlResult<()> {
        self.lock()?.objects.remove(key);
        Ok(())
    }
}
