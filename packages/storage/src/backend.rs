//! Backend selection and the `Storage` wrapper over `object_store`.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutMode, PutPayload};

const DEFAULT_FS_ROOT: &str = "./data/object_store";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where documents and artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// S3-compatible bucket. Credentials and region come from the usual
    /// `AWS_*` variables.
    S3 {
        bucket: String,
        endpoint: Option<String>,
    },
    Filesystem {
        root: PathBuf,
    },
    Memory,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::S3 { .. } => "s3",
            Backend::Filesystem { .. } => "filesystem",
            Backend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Key prefix applied to every object, e.g. `extraction`.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Read `STORAGE_BACKEND` (`s3`, `filesystem`, `memory`; default
    /// filesystem), `STORAGE_FS_ROOT`, `STORAGE_PREFIX`, `S3_BUCKET` and
    /// `S3_ENDPOINT`.
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |var: &str| lookup(var).and_then(non_empty);

        let backend = match read("STORAGE_BACKEND").as_deref() {
            None | Some("filesystem") | Some("fs") => Backend::Filesystem {
                root: read("STORAGE_FS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FS_ROOT)),
            },
            Some("memory") | Some("mem") => Backend::Memory,
            Some("s3") => Backend::S3 {
                bucket: read("S3_BUCKET").ok_or_else(|| {
                    StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
                })?,
                endpoint: read("S3_ENDPOINT"),
            },
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            backend,
            prefix: read("STORAGE_PREFIX"),
        })
    }
}

/// Object store handle shared by the document store and the result sink.
#[derive(Clone)]
pub struct Storage {
    backend: &'static str,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Storage {
    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let backend = cfg.backend.name();
        let store: Arc<dyn ObjectStore> = match cfg.backend {
            Backend::S3 { bucket, endpoint } => {
                let mut builder = object_store::aws::AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(endpoint) = endpoint {
                    // Local S3-compatible services (minio, localstack) run over plain http.
                    let plain_http = endpoint.starts_with("http://");
                    builder = builder.with_endpoint(endpoint).with_allow_http(plain_http);
                }
                Arc::new(builder.build()?)
            }
            Backend::Filesystem { root } => {
                tokio::fs::create_dir_all(&root).await?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&root)?)
            }
            Backend::Memory => Arc::new(object_store::memory::InMemory::new()),
        };

        Ok(Self {
            backend,
            store,
            prefix: cfg
                .prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    /// Backend name for logs.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    fn path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{key}")),
            None => Path::from(key),
        })
    }

    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.path(key)?;
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    /// Write only if no object exists at `key` yet.
    pub async fn put_if_absent(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.path(key)?;
        self.store
            .put_opts(&path, PutPayload::from(bytes), PutMode::Create.into())
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path(key)?;
        let res = self.store.get(&path).await.map_err(|e| classify(key, e))?;
        res.bytes().await.map_err(|e| classify(key, e))
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;
        self.store.delete(&path).await.map_err(|e| classify(key, e))?;
        Ok(())
    }
}

fn classify(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists(key.to_string()),
        other => StorageError::ObjectStore(other),
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
