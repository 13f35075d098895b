//! Object-storage collaborator: an opaque byte sink/source keyed by bucket
//! and object name.
//!
//! [`MemoryObjectStore`] is always available. [`S3ObjectStore`] (feature
//! `s3`) talks to AWS S3 or MinIO.

use crate::config::OutputFormat;
use crate::error::StorageError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// Put/get/presign over an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn get(&self, bucket: &str, object_name: &str) -> Result<Vec<u8>, StorageError>;

    /// Time-limited GET URL for an object.
    async fn presign_get(
        &self,
        bucket: &str,
        object_name: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

/// Object name for a persisted result: `ocr/{stem}-{8 hex}.{md|txt}`.
pub fn result_object_name(stem: &str, format: OutputFormat) -> String {
    let stem = if stem.is_empty() { "document" } else { stem };
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("ocr/{}-{}.{}", stem, &id[..8], format.extension())
}

// ── Memory ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    content_type: String,
}

/// Process-local store, used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredBlob>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded for an object.
    pub fn content_type(&self, bucket: &str, object_name: &str) -> Option<String> {
        self.objects
            .read()
            .get(&(bucket.to_string(), object_name.to_string()))
            .map(|b| b.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects.write().insert(
            (bucket.to_string(), object_name.to_string()),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, object_name: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(&(bucket.to_string(), object_name.to_string()))
            .map(|b| b.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                object: object_name.to_string(),
            })
    }

    async fn presign_get(
        &self,
        bucket: &str,
        object_name: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        if !self
            .objects
            .read()
            .contains_key(&(bucket.to_string(), object_name.to_string()))
        {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                object: object_name.to_string(),
            });
        }
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            object_name,
            expires_in.as_secs()
        ))
    }
}

// ── S3 / MinIO ───────────────────────────────────────────────────────────

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

#[cfg(feature = "s3")]
mod s3 {
    use super::ObjectStore;
    use crate::error::StorageError;
    use async_trait::async_trait;
    use aws_sdk_s3::{
        config::{Credentials, Region},
        presigning::PresigningConfig,
        primitives::ByteStream,
        Client,
    };
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Connection settings for S3 or MinIO.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct S3Config {
        /// Custom endpoint for MinIO, e.g. `http://minio:9000`. `None` for AWS.
        pub endpoint: Option<String>,
        pub region: String,
        pub access_key_id: String,
        pub secret_access_key: String,
    }

    impl Default for S3Config {
        fn default() -> Self {
            Self {
                endpoint: None,
                region: "us-east-1".to_string(),
                access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            }
        }
    }

    pub struct S3ObjectStore {
        client: Client,
    }

    impl S3ObjectStore {
        pub fn new(config: S3Config) -> Self {
            let credentials = Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "edgequake-ocr",
            );

            let mut builder = aws_sdk_s3::Config::builder()
                .credentials_provider(credentials)
                .region(Region::new(config.region.clone()))
                .behavior_version_latest();

            if let Some(endpoint) = config.endpoint {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }

            Self {
                client: Client::from_conf(builder.build()),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn put(
            &self,
            bucket: &str,
            object_name: &str,
            data: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StorageError> {
            self.client
                .put_object()
                .bucket(bucket)
                .key(object_name)
                .content_type(content_type)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        }

        async fn get(&self, bucket: &str, object_name: &str) -> Result<Vec<u8>, StorageError> {
            let response = self
                .client
                .get_object()
                .bucket(bucket)
                .key(object_name)
                .send()
                .await
                .map_err(|e| {
                    if e.to_string().contains("NoSuchKey") {
                        StorageError::NotFound {
                            bucket: bucket.to_string(),
                            object: object_name.to_string(),
                        }
                    } else {
                        StorageError::Backend(e.to_string())
                    }
                })?;

            let bytes = response
                .body
                .collect()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(bytes.to_vec())
        }

        async fn presign_get(
            &self,
            bucket: &str,
            object_name: &str,
            expires_in: Duration,
        ) -> Result<String, StorageError> {
            let presign = PresigningConfig::expires_in(expires_in)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let request = self
                .client
                .get_object()
                .bucket(bucket)
                .key(object_name)
                .presigned(presign)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(request.uri().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names() {
        let md = result_object_name("report", OutputFormat::Markdown);
        assert!(md.starts_with("ocr/report-"));
        assert!(md.ends_with(".md"));
        assert_eq!(md.len(), "ocr/report-".len() + 8 + ".md".len());

        let txt = result_object_name("", OutputFormat::PlainText);
        assert!(txt.starts_with("ocr/document-") && txt.ends_with(".txt"));
        assert_ne!(md, result_object_name("report", OutputFormat::Markdown));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .put("b", "ocr/x.md", b"# hi".to_vec(), "text/markdown")
            .await
            .unwrap();
        assert_eq!(store.get("b", "ocr/x.md").await.unwrap(), b"# hi");
        assert_eq!(store.content_type("b", "ocr/x.md").as_deref(), Some("text/markdown"));

        let url = store
            .presign_get("b", "ocr/x.md", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(url.contains("expires=600"));

        assert!(matches!(
            store.get("b", "missing").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(store.presign_get("b", "missing", Duration::from_secs(1)).await.is_err());
    }
}
