// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{Certificate, ClientOptions, ObjectStore, RetryConfig};
use tracing::{debug, info};

use crate::StorageError;

/// Resolves a bucket name to an object store client.
pub trait BucketProvider: Send + Sync {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Endpoint URL, e.g. `http://minio.local:9000`
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Verify TLS certificates. `false` accepts self-signed endpoints.
    pub verify: bool,
    /// PEM bundle of extra trusted roots, for endpoints behind a private CA.
    pub ca_cert: Option<PathBuf>,
    pub signature_version: String,
}

impl S3Settings {
    pub fn new(
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: "us-east-1".to_string(),
            verify: true,
            ca_cert: None,
            signature_version: "s3v4".to_string(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    pub fn with_signature_version(mut self, version: impl Into<String>) -> Self {
        self.signature_version = version.into();
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(StorageError::Config(format!(
                "Unsupported endpoint URL: {}. Must use http:// or https://",
                self.endpoint
            )));
        }
        if self.signature_version != "s3v4" {
            return Err(StorageError::Config(format!(
                "Unsupported signature version: {} (only s3v4 is supported)",
                self.signature_version
            )));
        }
        Ok(())
    }
}

/// Read every certificate in a PEM bundle.
fn load_root_certificates(path: &Path) -> Result<Vec<Certificate>, StorageError> {
    let pem = std::fs::read(path).map_err(|e| {
        StorageError::Config(format!("Cannot read CA certificate {}: {}", path.display(), e))
    })?;
    let certificates = Certificate::from_pem_bundle(&pem).map_err(|e| {
        StorageError::Config(format!("Invalid CA certificate {}: {}", path.display(), e))
    })?;
    if certificates.is_empty() {
        return Err(StorageError::Config(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certificates)
}

/// Buckets on an S3-compatible endpoint. Clients are built lazily and cached.
pub struct S3Buckets {
    settings: S3Settings,
    roots: Vec<Certificate>,
    clients: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl std::fmt::Debug for S3Buckets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Buckets")
            .field("endpoint", &self.settings.endpoint)
            .field("region", &self.settings.region)
            .field("verify", &self.settings.verify)
            .field("ca_cert", &self.settings.ca_cert)
            .finish()
    }
}

impl S3Buckets {
    pub fn new(settings: S3Settings) -> Result<Self, StorageError> {
        settings.validate()?;
        let roots = match &settings.ca_cert {
            Some(path) => load_root_certificates(path)?,
            None => Vec::new(),
        };
        info!(
            "S3 endpoint {} (region {}, verify TLS: {}, extra CA roots: {})",
            settings.endpoint,
            settings.region,
            settings.verify,
            roots.len()
        );
        Ok(Self {
            settings,
            roots,
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn build(&self, name: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let client_options = self.roots.iter().fold(
            ClientOptions::new().with_allow_invalid_certificates(!self.settings.verify),
            |options, root| options.with_root_certificate(root.clone()),
        );

        // RetryPolicy owns retries; keep the client from stacking its own on top.
        let retry = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };

        let store = AmazonS3Builder::new()
            .with_bucket_name(name)
            .with_endpoint(&self.settings.endpoint)
            .with_region(&self.settings.region)
            .with_access_key_id(&self.settings.access_key_id)
            .with_secret_access_key(&self.settings.secret_access_key)
            .with_allow_http(self.settings.endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false)
            .with_client_options(client_options)
            .with_retry(retry)
            .build()?;

        Ok(Arc::new(store))
    }
}

impl BucketProvider for S3Buckets {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| StorageError::Config("S3 client cache poisoned".to_string()))?;
        if let Some(store) = clients.get(name) {
            return Ok(Arc::clone(store));
        }
        debug!("Creating S3 client for bucket {}", name);
        let store = self.build(name)?;
        clients.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

/// Buckets as directories under a local root: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBuckets {
    root: PathBuf,
}

impl LocalBuckets {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

}

impl BucketProvider for LocalBuckets {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        let store = LocalFileSystem::new_with_prefix(&dir)?;
        Ok(Arc::new(store))
    }
}

/// In-process buckets, one `InMemory` store per name.
#[derive(Debug, Default)]
pub struct MemoryBuckets {
    buckets: Mutex<HashMap<String, Arc<InMemory>>>,
}

impl MemoryBuckets {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketProvider for MemoryBuckets {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| StorageError::Config("memory bucket map poisoned".to_string()))?;
        let store = buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemory::new()));
        Ok(Arc::clone(store) as Arc<dyn ObjectStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_and_validation() {
        let settings = S3Settings::new("http://127.0.0.1:9000", "admin", "password");
        assert_eq!(settings.region, "us-east-1");
        assert_eq!(settings.signature_version, "s3v4");
        assert!(settings.verify);
        assert!(settings.validate().is_ok());

        let bad_scheme = S3Settings::new("ftp://127.0.0.1", "a", "b");
        assert!(bad_scheme.validate().is_err());

        let bad_sig = S3Settings::new("https://s3.local", "a", "b").with_signature_version("s3v2");
        assert!(matches!(bad_sig.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_s3_clients_are_cached() {
        let buckets = S3Buckets::new(
            S3Settings::new("http://127.0.0.1:9000", "admin", "password").with_verify(false),
        )
        .unwrap();
        let a = buckets.bucket("models").unwrap();
        let b = buckets.bucket("models").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_ca_certificate_must_be_readable_pem() {
        let dir = tempfile::tempdir().unwrap();
        let settings = S3Settings::new("https://s3.local", "admin", "password");

        let missing = settings.clone().with_ca_cert(dir.path().join("absent.crt"));
        let err = S3Buckets::new(missing).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
        assert!(err.to_string().contains("absent.crt"));

        let garbage = dir.path().join("garbage.crt");
        std::fs::write(&garbage, b"not a certificate").unwrap();
        let err = S3Buckets::new(settings.with_ca_cert(&garbage)).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_memory_buckets_are_isolated() {
        let buckets = MemoryBuckets::new();
        let a = buckets.bucket("a").unwrap();
        let a_again = buckets.bucket("a").unwrap();
        let b = buckets.bucket("b").unwrap();
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_local_buckets_create_directories() {
        let dir = tempfile::tempdir().unwrap();
        let buckets = LocalBuckets::new(dir.path());
        buckets.bucket("public-data").unwrap();
        assert!(dir.path().join("public-data").is_dir());
    }
}
