use anyhow::Result;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{env_or, optional_env};
use crate::media::UploadKind;

pub mod migrate;

const UPLOADS_ROUTE: &str = "/api/uploads/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid filename")]
    InvalidFilename,
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object storage error: {0}")]
    S3(String),
    #[error("object storage is not configured")]
    S3NotConfigured,
}

#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub public_url: Option<String>,
}

impl S3Settings {
    /// S3 is enabled only when bucket, region and both keys are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            bucket: optional_env("S3_BUCKET")?,
            region: optional_env("S3_REGION")?,
            access_key_id: optional_env("S3_ACCESS_KEY_ID")?,
            secret_access_key: optional_env("S3_SECRET_ACCESS_KEY")?,
            endpoint: optional_env("S3_ENDPOINT"),
            public_url: optional_env("S3_PUBLIC_URL"),
        })
    }

    pub fn public_base(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub public_url: String,
    pub upload_dir: PathBuf,
    pub s3: Option<S3Settings>,
}

impl StorageSettings {
    pub fn from_env() -> Self {
        Self {
            public_url: env_or("PUBLIC_URL", "http://localhost:3000"),
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "./upload")),
            s3: S3Settings::from_env(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub relative_path: String,
}

struct S3Backend {
    client: aws_sdk_s3::Client,
    settings: S3Settings,
}

/// Stores uploads on the local filesystem or in S3 and builds their public URLs.
///
/// Local files are always readable through [`MediaStore::local_path`] so that objects
/// written before S3 was enabled keep being served.
pub struct MediaStore {
    public_url: String,
    upload_dir: PathBuf,
    s3: Option<S3Backend>,
}

impl MediaStore {
    pub fn local(public_url: impl Into<String>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            public_url: public_url.into().trim_end_matches('/').to_string(),
            upload_dir: upload_dir.into(),
            s3: None,
        }
    }

    pub async fn from_settings(settings: StorageSettings) -> Result<Self> {
        let mut store = Self::local(settings.public_url, settings.upload_dir);
        if let Some(s3) = settings.s3 {
            let client = build_s3_client(&s3).await;
            tracing::info!(bucket = %s3.bucket, region = %s3.region, "object storage: s3");
            store.s3 = Some(S3Backend {
                client,
                settings: s3,
            });
        } else {
            tracing::info!(dir = %store.upload_dir.display(), "object storage: local");
        }
        Ok(store)
    }

    pub fn is_s3(&self) -> bool {
        self.s3.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        if self.is_s3() {
            "s3"
        } else {
            "local"
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn public_url(&self, key: &str) -> String {
        match &self.s3 {
            Some(s3) => format!("{}/{key}", s3.settings.public_base()),
            None => format!("{}{UPLOADS_ROUTE}{key}", self.public_url),
        }
    }

    /// Writes `content` under `<kind>/<uuid><ext>` and returns its public URL.
    pub async fn save(
        &self,
        kind: UploadKind,
        ext: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        let relative_path = format!("{}/{}{ext}", kind.as_str(), Uuid::new_v4());
        match &self.s3 {
            Some(_) => self.put_s3(&relative_path, content, content_type).await?,
            None => {
                let path = self.upload_dir.join(&relative_path);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await?;
            }
        }
        Ok(StoredObject {
            url: self.public_url(&relative_path),
            relative_path,
        })
    }

    /// Resolves a served upload to a file path, rejecting traversal attempts.
    pub fn local_path(&self, kind: UploadKind, filename: &str) -> Result<PathBuf, StorageError> {
        if filename.is_empty()
            || filename.contains("..")
            || filename.contains('/')
            || filename.contains('\\')
        {
            return Err(StorageError::InvalidFilename);
        }
        Ok(self.upload_dir.join(kind.as_str()).join(filename))
    }

    pub async fn read_local(
        &self,
        kind: UploadKind,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.local_path(kind, filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(tokio::fs::read(&path).await?)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn s3_object_exists(&self, key: &str) -> Result<bool, StorageError> {
        let s3 = self.s3.as_ref().ok_or(StorageError::S3NotConfigured)?;
        match s3
            .client
            .head_object()
            .bucket(&s3.settings.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StorageError::S3(DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    pub async fn put_s3(
        &self,
        key: &str,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let s3 = self.s3.as_ref().ok_or(StorageError::S3NotConfigured)?;
        s3.client
            .put_object()
            .bucket(&s3.settings.bucket)
            .key(key)
            .body(ByteStream::from(content))
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|err| StorageError::S3(DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }
}

async fn build_s3_client(settings: &S3Settings) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        settings.access_key_id.clone(),
        settings.secret_access_key.clone(),
        None,
        None,
        "heirlink",
    );
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint.as_str());
    }
    let shared = loader.load().await;
    let config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(settings.endpoint.is_some())
        .build();
    aws_sdk_s3::Client::from_conf(config)
}

/// Extracts the `<kind>/<file>` key from a local upload URL or a bare relative path.
pub fn relative_path_from_url(url: &str) -> Option<String> {
    if let Some(idx) = url.find(UPLOADS_ROUTE) {
        let rest = &url[idx + UPLOADS_ROUTE.len()..];
        return (!rest.is_empty()).then(|| rest.to_string());
    }
    let (kind, rest) = url.split_once('/')?;
    if kind.parse::<UploadKind>().is_ok() && !rest.is_empty() {
        return Some(url.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_save_writes_file_and_builds_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::local("https://api.test.com/", dir.path());

        let stored = store
            .save(UploadKind::Posts, ".jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF])
            .await
            .unwrap();

        assert!(stored.relative_path.starts_with("posts/"));
        assert!(stored.relative_path.ends_with(".jpg"));
        assert_eq!(
            stored.url,
            format!("https://api.test.com/api/uploads/{}", stored.relative_path)
        );
        let filename = stored.relative_path.trim_start_matches("posts/");
        let content = store
            .read_local(UploadKind::Posts, filename)
            .await
            .unwrap()
            .expect("stored file");
        assert_eq!(content, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn missing_local_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::local("http://localhost:3000", dir.path());
        assert!(store
            .read_local(UploadKind::Avatars, "nope.png")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn local_path_rejects_traversal() {
        let store = MediaStore::local("http://localhost:3000", "/tmp/uploads");
        assert!(matches!(
            store.local_path(UploadKind::Posts, "../secret"),
            Err(StorageError::InvalidFilename)
        ));
        assert!(store.local_path(UploadKind::Posts, "a/b.jpg").is_err());
        assert!(store.local_path(UploadKind::Posts, "").is_err());
        assert_eq!(
            store.local_path(UploadKind::Posts, "a.jpg").unwrap(),
            PathBuf::from("/tmp/uploads/posts/a.jpg")
        );
    }

    #[test]
    fn s3_public_base_prefers_configured_url() {
        let mut settings = S3Settings {
            bucket: "media".into(),
            region: "eu-west-1".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            endpoint: None,
            public_url: None,
        };
        assert_eq!(
            settings.public_base(),
            "https://media.s3.eu-west-1.amazonaws.com"
        );
        settings.public_url = Some("https://cdn.example.com/".into());
        assert_eq!(settings.public_base(), "https://cdn.example.com");
    }

    #[tokio::test]
    async fn s3_operations_require_configuration() {
        let store = MediaStore::local("http://localhost:3000", "/tmp/uploads");
        assert!(matches!(
            store.s3_object_exists("posts/a.jpg").await,
            Err(StorageError::S3NotConfigured)
        ));
    }

    #[test]
    fn relative_path_is_extracted_from_urls() {
        assert_eq!(
            relative_path_from_url("http://localhost:3000/api/uploads/posts/a.jpg").as_deref(),
            Some("posts/a.jpg")
        );
        assert_eq!(
            relative_path_from_url("avatars/b.png").as_deref(),
            Some("avatars/b.png")
        );
        assert_eq!(relative_path_from_url("https://cdn.example.com/x.png"), None);
    }
}
