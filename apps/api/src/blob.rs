//! Content-addressed blob storage behind a small trait, generalizing the
//! direct `aws_sdk_s3::Client` usage the teacher wires up in `main.rs` and
//! `context/versioning.rs`'s upload-on-commit pattern. Used by the session
//! store for metadata offloading (§4.1) and by the wizard for PDF/photo
//! blobs (§4.5.2, session_tools.py's photo-blob flow).

use anyhow::Result;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::models::BlobPointer;

pub const CONTAINER_PHOTOS: &str = "cv-photos";
pub const CONTAINER_SESSIONS: &str = "cv-sessions";
pub const CONTAINER_PDFS: &str = "cv-pdfs";
pub const CONTAINER_ARTIFACTS: &str = "cv-artifacts";

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `bytes` to `container`, naming it by the sha256 of its
    /// content so repeated identical uploads dedupe. Returns the pointer.
    async fn put_content_addressed(&self, container: &str, bytes: &[u8]) -> Result<BlobPointer>;

    /// Uploads `bytes` under an explicit name (used for PDFs, whose name
    /// carries session/ref identity rather than pure content address).
    async fn put_named(&self, container: &str, name: &str, bytes: &[u8]) -> Result<BlobPointer>;

    async fn get(&self, container: &str, blob_name: &str) -> Result<Option<Bytes>>;
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket_prefix_map: fn(&str) -> String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self {
            client,
            bucket_prefix_map: |container| container.to_string(),
        }
    }

    fn key(&self, container: &str, blob_name: &str) -> String {
        format!("{}/{}", (self.bucket_prefix_map)(container), blob_name)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn put_content_addressed(&self, container: &str, bytes: &[u8]) -> Result<BlobPointer> {
        let sha256 = sha256_hex(bytes);
        let blob_name = format!("{sha256}.bin");
        self.put_named(container, &blob_name, bytes).await?;
        Ok(BlobPointer {
            container: container.to_string(),
            blob_name,
            sha256,
        })
    }

    async fn put_named(&self, container: &str, name: &str, bytes: &[u8]) -> Result<BlobPointer> {
        let sha256 = sha256_hex(bytes);
        let key = self.key(container, name);
        self.client
            .put_object()
            .bucket(container)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("blob upload failed: {e}"))?;
        info!("uploaded blob s3://{}/{}", container, key);
        Ok(BlobPointer {
            container: container.to_string(),
            blob_name: name.to_string(),
            sha256,
        })
    }

    async fn get(&self, container: &str, blob_name: &str) -> Result<Option<Bytes>> {
        let key = self.key(container, blob_name);
        match self.client.get_object().bucket(container).key(&key).send().await {
            Ok(out) => {
                let data = out
                    .body
                    .collect()
                    .await
                    .map_err(|e| anyhow::anyhow!("blob read failed: {e}"))?;
                Ok(Some(data.into_bytes()))
            }
            Err(aws_sdk_s3::error::SdkError::ServiceError(e))
                if e.err().is_no_such_key() =>
            {
                Ok(None)
            }
            Err(e) => Err(anyhow::anyhow!("blob read failed: {e}")),
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryBlobStore {
        data: Mutex<HashMap<(String, String), Bytes>>,
    }

    #[async_trait::async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn put_content_addressed(&self, container: &str, bytes: &[u8]) -> Result<BlobPointer> {
            let sha256 = sha256_hex(bytes);
            let blob_name = format!("{sha256}.bin");
            self.put_named(container, &blob_name, bytes).await?;
            Ok(BlobPointer {
                container: container.to_string(),
                blob_name,
                sha256,
            })
        }

        async fn put_named(&self, container: &str, name: &str, bytes: &[u8]) -> Result<BlobPointer> {
            let sha256 = sha256_hex(bytes);
            self.data
                .lock()
                .await
                .insert((container.to_string(), name.to_string()), Bytes::copy_from_slice(bytes));
            Ok(BlobPointer {
                container: container.to_string(),
                blob_name: name.to_string(),
                sha256,
            })
        }

        async fn get(&self, container: &str, blob_name: &str) -> Result<Option<Bytes>> {
            Ok(self
                .data
                .lock()
                .await
                .get(&(container.to_string(), blob_name.to_string()))
                .cloned())
        }
    }

    #[tokio::test]
    async fn dedupes_identical_content() {
        let store = InMemoryBlobStore::default();
        let a = store.put_content_addressed("cv-artifacts", b"hello").await.unwrap();
        let b = store.put_content_addressed("cv-artifacts", b"hello").await.unwrap();
        assert_eq!(a.blob_name, b.blob_name);
        assert_eq!(a.sha256, b.sha256);
    }
}
