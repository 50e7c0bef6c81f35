// volumetool/src/storage/mod.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use s3::types::{ObjectCannedAcl, ServerSideEncryption, StorageClass};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Handle on the bucket that holds the configuration document and every
/// archive. Credentials and region come from the ambient AWS configuration
/// chain (environment, shared profile, instance metadata).
pub struct Bucket {
    client: s3::Client,
    name: String,
}

impl Bucket {
    pub async fn connect(bucket_name: &str) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .load()
            .await;
        Bucket {
            client: s3::Client::new(&sdk_config),
            name: bucket_name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches a whole object as UTF-8 text. Used once, for the
    /// configuration document.
    pub async fn get_object_string(&self, key: &str) -> Result<String> {
        let object = self
            .client
            .get_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", self.name, key))?;

        let body = object
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.name, key))?;

        String::from_utf8(body.into_bytes().to_vec())
            .with_context(|| format!("Object s3://{}/{} is not valid UTF-8", self.name, key))
    }

    /// Uploads a local file under `key`, applying the set's store
    /// parameters. The parameters the SDK can represent map onto the
    /// put-object request; anything else is logged and left out rather than
    /// dropped silently.
    pub async fn put_file(
        &self,
        key: &str,
        file_path: &Path,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        debug!(
            "Uploading {} to s3://{}/{}",
            file_path.display(),
            self.name,
            key
        );

        let body = ByteStream::from_path(file_path).await.with_context(|| {
            format!(
                "Failed to create ByteStream from file: {}",
                file_path.display()
            )
        })?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.name)
            .key(key)
            .body(body);
        for (param, value) in params {
            request = match param.as_str() {
                "StorageClass" => request.storage_class(StorageClass::from(value.as_str())),
                "ServerSideEncryption" => {
                    request.server_side_encryption(ServerSideEncryption::from(value.as_str()))
                }
                "ACL" => request.acl(ObjectCannedAcl::from(value.as_str())),
                "SSEKMSKeyId" => request.ssekms_key_id(value.as_str()),
                "ContentType" => request.content_type(value.as_str()),
                "ContentEncoding" => request.content_encoding(value.as_str()),
                "ContentDisposition" => request.content_disposition(value.as_str()),
                "ContentLanguage" => request.content_language(value.as_str()),
                "CacheControl" => request.cache_control(value.as_str()),
                "Tagging" => request.tagging(value.as_str()),
                "WebsiteRedirectLocation" => request.website_redirect_location(value.as_str()),
                _ => {
                    warn!("Ignoring unsupported s3 parameter {} for key {}", param, key);
                    request
                }
            };
        }

        request.send().await.with_context(|| {
            format!(
                "Failed to upload file {} to S3 bucket {} with key {}",
                file_path.display(),
                self.name,
                key
            )
        })?;
        Ok(())
    }

    /// Lists every key under `prefix`, following continuation tokens so
    /// long backup histories are not cut off at one page.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.name)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{}/{}*", self.name, prefix))?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    /// The most recent archive under `prefix`, or `None` when the set has
    /// no backup history yet. Keys embed a fixed-width timestamp, so the
    /// lexical maximum is the newest archive.
    pub async fn latest_key(&self, prefix: &str) -> Result<Option<String>> {
        Ok(max_key(self.list_keys(prefix).await?))
    }

    /// Streams an object into a local file.
    pub async fn download_to_file(&self, key: &str, destination_path: &Path) -> Result<()> {
        debug!(
            "Downloading s3://{}/{} to {}",
            self.name,
            key,
            destination_path.display()
        );

        if let Some(parent_dir) = destination_path.parent() {
            if !parent_dir.exists() {
                tokio::fs::create_dir_all(parent_dir).await.with_context(|| {
                    format!(
                        "Failed to create directory for download: {}",
                        parent_dir.display()
                    )
                })?;
            }
        }

        let mut output_file = File::create(destination_path).await.with_context(|| {
            format!(
                "Failed to create destination file: {}",
                destination_path.display()
            )
        })?;

        let mut object = self
            .client
            .get_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", self.name, key))?;

        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.name, key))?
        {
            output_file.write_all(&bytes_chunk).await.with_context(|| {
                format!(
                    "Failed to write to destination file: {}",
                    destination_path.display()
                )
            })?;
        }
        Ok(())
    }
}

pub(crate) fn max_key(keys: Vec<String>) -> Option<String> {
    keys.into_iter().max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_selection_prefers_the_newest_timestamp() {
        let keys = vec![
            "backup-20230101-000000.tar.gz".to_string(),
            "backup-20230601-120000.tar.gz".to_string(),
            "backup-20230301-093000.tar.gz".to_string(),
        ];
        assert_eq!(
            max_key(keys),
            Some("backup-20230601-120000.tar.gz".to_string())
        );
    }

    #[test]
    fn test_empty_backup_history_has_no_latest() {
        assert_eq!(max_key(Vec::new()), None);
    }
}
