// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Object-storage backend for `s3://` targets (AWS S3, MinIO, Ceph, ...).
//!
//! Target syntax: `s3://[access:secret@]host[:port]/bucket[/prefix][?region=..&scheme=http]`.
//! For `<bucket>.s3.amazonaws.com` hosts the bucket comes from the host and the
//! whole path is the prefix.
//!
//! `insecure-skip-verify=<anything>` turns off TLS certificate checks for
//! self-signed endpoints. It needs the `insecure-tls` cargo feature, and the
//! parameter is removed before the rest of the target is read.
//!
//! Layout under the prefix:
//! ```text
//! <prefix><guid>              one object per non-persistent incident
//! <prefix>persistents.json    JSON array of persistent incidents
//! <prefix>subscribers.json    JSON array of emails
//! ```
//!
//! The client is built without `fail-on-err`, so non-2xx responses come back
//! as `Ok` and are classified here by status code.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{StorageError, Store, StoreKind};
use super::{select_by_date, validate_guid, PERSISTENTS_KEY, SUBSCRIBERS_KEY};
use crate::incident::{find, sort_by_created, without, Incident};

const AWS_SUFFIX: &str = ".s3.amazonaws.com";
const DEFAULT_REGION: &str = "us-east-1";
const SKIP_VERIFY_PARAM: &str = "insecure-skip-verify";

/// Connection details parsed from an `s3://` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Target {
    pub bucket: String,
    /// Empty, or ends with `/`
    pub prefix: String,
    pub region: String,
    /// Custom endpoint (`http[s]://host[:port]`); `None` means AWS
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Accept any server certificate
    pub insecure_skip_verify: bool,
}

/// Remove `insecure-skip-verify` from the query. True if it carried a value.
fn take_skip_verify(target: &mut Url) -> bool {
    let mut skip = false;
    let kept: Vec<(String, String)> = target
        .query_pairs()
        .filter(|(k, v)| {
            if k == SKIP_VERIFY_PARAM {
                skip |= !v.is_empty();
                return false;
            }
            true
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        target.set_query(None);
    } else {
        target.query_pairs_mut().clear().extend_pairs(kept);
    }
    skip
}

impl S3Target {
    pub fn parse(target: &Url) -> Result<Self, StorageError> {
        let mut target = target.clone();
        let insecure_skip_verify = take_skip_verify(&mut target);
        let target = &target;

        let host = target
            .host_str()
            .ok_or_else(|| StorageError::Config(format!("no host in s3 target '{}'", target)))?;

        let query = |name: &str| {
            target
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let region = query("region").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let scheme = match query("scheme").as_deref() {
            Some("http") => "http",
            _ => "https",
        };

        let path = target.path().trim_matches('/');
        let (bucket, prefix, endpoint) = if let Some(bucket) = host.strip_suffix(AWS_SUFFIX) {
            (bucket.to_string(), path.to_string(), None)
        } else {
            let (bucket, prefix) = path.split_once('/').unwrap_or((path, ""));
            let endpoint = if host.ends_with("amazonaws.com") {
                None
            } else {
                let port = target.port().map(|p| format!(":{}", p)).unwrap_or_default();
                Some(format!("{}://{}{}", scheme, host, port))
            };
            (bucket.to_string(), prefix.to_string(), endpoint)
        };

        if bucket.is_empty() {
            return Err(StorageError::Config(format!("no bucket in s3 target '{}'", host)));
        }

        let prefix = match prefix.trim_matches('/') {
            "" => String::new(),
            p => format!("{}/", p),
        };

        let decode = |raw: &str| {
            urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .map_err(|e| StorageError::Config(format!("bad s3 credentials: {}", e)))
        };
        let access_key = match target.username() {
            "" => None,
            user => Some(decode(user)?),
        };
        let secret_key = target.password().map(decode).transpose()?;

        Ok(Self {
            bucket,
            prefix,
            region,
            endpoint,
            access_key,
            secret_key,
            insecure_skip_verify,
        })
    }

    fn bucket(&self) -> Result<Box<Bucket>, StorageError> {
        let region = match &self.endpoint {
            Some(ep) => Region::Custom {
                region: self.region.clone(),
                endpoint: ep.clone(),
            },
            None => self
                .region
                .parse()
                .map_err(|e| StorageError::Config(format!("Invalid region: {}", e)))?,
        };
        let creds = match &self.access_key {
            Some(access) => Credentials::new(
                Some(access.as_str()),
                self.secret_key.as_deref(),
                None,
                None,
                None,
            ),
            None => Credentials::default(),
        }
        .map_err(|e| StorageError::Config(format!("S3 credentials: {}", e)))?;

        let bucket = Bucket::new(&self.bucket, region, creds)
            .map_err(|e| StorageError::Config(format!("S3 bucket: {}", e)))?;
        // Self-hosted endpoints rarely support virtual-hosted buckets
        Ok(if self.endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn check_status(status: u16, key: &str, op: &str) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        other => Err(StorageError::Backend(format!("S3 {} {}: HTTP {}", op, key, other))),
    }
}

pub struct S3Store {
    bucket: Box<Bucket>,
    prefix: String,
    /// Serialises read-modify-write cycles on the shared JSON objects
    meta_lock: Mutex<()>,
}

impl S3Store {
    pub fn new(target: &S3Target) -> Result<Self, StorageError> {
        if target.insecure_skip_verify {
            if !cfg!(feature = "insecure-tls") {
                return Err(StorageError::Config(format!(
                    "{} on bucket '{}' requires the `insecure-tls` feature",
                    SKIP_VERIFY_PARAM, target.bucket
                )));
            }
            warn!(bucket = %target.bucket, "TLS certificate verification disabled for S3");
        }
        let bucket = target.bucket()?;
        info!(
            bucket = %target.bucket,
            prefix = %target.prefix,
            endpoint = target.endpoint.as_deref().unwrap_or("aws"),
            "S3 store ready"
        );
        Ok(Self {
            bucket,
            prefix: target.prefix.clone(),
            meta_lock: Mutex::new(()),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// `Ok(None)` on 404.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| StorageError::Backend(format!("S3 get {}: {}", key, e)))?;
        match check_status(response.status_code(), key, "get") {
            Ok(()) => Ok(Some(response.to_vec())),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object(key, bytes)
            .await
            .map_err(|e| StorageError::Backend(format!("S3 put {}: {}", key, e)))?;
        check_status(response.status_code(), key, "put")
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| StorageError::Backend(format!("S3 delete {}: {}", key, e)))?;
        check_status(response.status_code(), key, "delete")
    }

    async fn load_persistents(&self) -> Result<Vec<Incident>, StorageError> {
        match self.get(&self.key(PERSISTENTS_KEY)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store_persistents(&self, mut incidents: Vec<Incident>) -> Result<(), StorageError> {
        sort_by_created(&mut incidents);
        let bytes = serde_json::to_vec(&incidents)?;
        self.put(&self.key(PERSISTENTS_KEY), &bytes).await
    }

    async fn load_subscribers(&self) -> Result<Vec<String>, StorageError> {
        match self.get(&self.key(SUBSCRIBERS_KEY)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store_subscribers(&self, subscribers: &[String]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(subscribers)?;
        self.put(&self.key(SUBSCRIBERS_KEY), &bytes).await
    }

    /// Write `incident` to the location matching its `persistent` flag and
    /// clear any copy left at the other location.
    async fn write(&self, incident: &Incident) -> Result<(), StorageError> {
        validate_guid(&incident.guid)?;
        let object_key = self.key(&incident.guid);

        let _guard = self.meta_lock.lock().await;
        let persistents = self.load_persistents().await?;
        let was_persistent = find(&persistents, &incident.guid).is_some();

        if incident.persistent {
            let mut updated = without(persistents, &incident.guid);
            updated.push(incident.clone());
            self.store_persistents(updated).await?;
            if !was_persistent {
                // A plain copy may exist from before the flag was set
                self.remove(&object_key).await?;
            }
        } else {
            let bytes = serde_json::to_vec(incident)?;
            self.put(&object_key, &bytes).await?;
            if was_persistent {
                self.store_persistents(without(persistents, &incident.guid)).await?;
            }
        }
        Ok(())
    }

    /// Incident object names directly under the prefix.
    async fn list_incident_keys(&self) -> Result<Vec<String>, StorageError> {
        let results = self
            .bucket
            .list(self.prefix.clone(), None)
            .await
            .map_err(|e| StorageError::Backend(format!("S3 list: {}", e)))?;

        Ok(results
            .into_iter()
            .flat_map(|r| r.contents)
            .filter_map(|obj| {
                let name = obj.key.strip_prefix(&self.prefix)?.to_string();
                let reserved = name == SUBSCRIBERS_KEY || name == PERSISTENTS_KEY;
                (!reserved && !name.is_empty() && !name.contains('/')).then_some(obj.key)
            })
            .collect())
    }
}

#[async_trait]
impl Store for S3Store {
    async fn create(&self, incident: &Incident) -> Result<Incident, StorageError> {
        self.write(incident).await?;
        Ok(incident.clone())
    }

    async fn update(&self, guid: &str, incident: &Incident) -> Result<Incident, StorageError> {
        let mut stored = incident.clone();
        stored.guid = guid.to_string();
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn delete(&self, guid: &str) -> Result<(), StorageError> {
        validate_guid(guid)?;
        let object_key = self.key(guid);

        let _guard = self.meta_lock.lock().await;
        let persistents = self.load_persistents().await?;
        if find(&persistents, guid).is_some() {
            return self.store_persistents(without(persistents, guid)).await;
        }

        // DELETE on a missing key succeeds in S3, so check first
        if self.get(&object_key).await?.is_none() {
            return Err(StorageError::NotFound(guid.to_string()));
        }
        self.remove(&object_key).await
    }

    async fn read(&self, guid: &str) -> Result<Incident, StorageError> {
        validate_guid(guid)?;
        let mut incident = match self.get(&self.key(guid)).await? {
            Some(bytes) => serde_json::from_slice::<Incident>(&bytes)?,
            None => {
                debug!(guid, "Not a plain object, checking persistents");
                let persistents = self.load_persistents().await?;
                find(&persistents, guid)
                    .cloned()
                    .ok_or_else(|| StorageError::NotFound(guid.to_string()))?
            }
        };
        incident.sort_messages();
        Ok(incident)
    }

    async fn by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        let mut incidents = Vec::new();
        for key in self.list_incident_keys().await? {
            // Deleted between listing and reading
            if let Some(bytes) = self.get(&key).await? {
                incidents.push(serde_json::from_slice::<Incident>(&bytes)?);
            }
        }
        Ok(select_by_date(incidents, from, to))
    }

    async fn subscribe(&self, email: &str) -> Result<(), StorageError> {
        let _guard = self.meta_lock.lock().await;
        let mut subs = self.load_subscribers().await?;
        if subs.iter().any(|s| s == email) {
            return Ok(());
        }
        subs.push(email.to_string());
        self.store_subscribers(&subs).await
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), StorageError> {
        let _guard = self.meta_lock.lock().await;
        let mut subs = self.load_subscribers().await?;
        let before = subs.len();
        subs.retain(|s| s != email);
        if subs.len() == before {
            return Ok(());
        }
        self.store_subscribers(&subs).await
    }

    async fn subscribers(&self) -> Result<Vec<String>, StorageError> {
        self.load_subscribers().await
    }

    async fn persistents(&self) -> Result<Vec<Incident>, StorageError> {
        let mut incidents = self.load_persistents().await?;
        for incident in incidents.iter_mut() {
            incident.sort_messages();
        }
        sort_by_created(&mut incidents);
        Ok(incidents)
    }

    /// Any answer about the persistents object (found or 404) proves the
    /// bucket is reachable and readable.
    async fn ping(&self) -> Result<(), StorageError> {
        self.get(&self.key(PERSISTENTS_KEY)).await.map(|_| ())
    }
}

/// Kind for `s3://` targets.
pub struct S3Kind;

#[async_trait]
impl StoreKind for S3Kind {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn detect(&self, target: &Url) -> bool {
        target.scheme() == "s3"
    }

    async fn open(&self, target: &Url) -> Result<Arc<dyn Store>, StorageError> {
        let parsed = S3Target::parse(target)?;
        Ok(Arc::new(S3Store::new(&parsed)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> S3Target {
        S3Target::parse(&Url::parse(raw).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_custom_endpoint() {
        let t = parse("s3://minio:9000/status/prod/incidents?region=eu-west-1&scheme=http");
        assert_eq!(t.bucket, "status");
        assert_eq!(t.prefix, "prod/incidents/");
        assert_eq!(t.region, "eu-west-1");
        assert_eq!(t.endpoint.as_deref(), Some("http://minio:9000"));
        assert!(t.access_key.is_none());
    }

    #[test]
    fn test_parse_aws_virtual_host() {
        let t = parse("s3://status-bucket.s3.amazonaws.com/feeds");
        assert_eq!(t.bucket, "status-bucket");
        assert_eq!(t.prefix, "feeds/");
        assert_eq!(t.region, "us-east-1");
        assert!(t.endpoint.is_none());
    }

    #[test]
    fn test_parse_aws_path_style() {
        let t = parse("s3://s3.amazonaws.com/status-bucket");
        assert_eq!(t.bucket, "status-bucket");
        assert_eq!(t.prefix, "");
        assert!(t.endpoint.is_none());
    }

    #[test]
    fn test_parse_credentials_are_decoded() {
        let t = parse("s3://AKIAEXAMPLE:se%2Fcr%2Bet@storage.example.com/bucket");
        assert_eq!(t.access_key.as_deref(), Some("AKIAEXAMPLE"));
        assert_eq!(t.secret_key.as_deref(), Some("se/cr+et"));
        assert_eq!(t.endpoint.as_deref(), Some("https://storage.example.com"));
    }

    #[test]
    fn test_parse_requires_bucket() {
        let err = S3Target::parse(&Url::parse("s3://minio:9000/").unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_parse_strips_skip_verify() {
        let t = parse("s3://minio:9000/status?insecure-skip-verify=true&region=eu-west-1");
        assert!(t.insecure_skip_verify);
        assert_eq!(t.region, "eu-west-1");
        assert_eq!(t.endpoint.as_deref(), Some("https://minio:9000"));
        assert!(!parse("s3://minio:9000/status").insecure_skip_verify);

        // Any value counts, an empty one doesn't
        assert!(parse("s3://minio/status?insecure-skip-verify=0").insecure_skip_verify);
        assert!(!parse("s3://minio/status?insecure-skip-verify=").insecure_skip_verify);

        let mut url = Url::parse("s3://minio/status?region=eu-west-1&insecure-skip-verify=1&scheme=http").unwrap();
        assert!(take_skip_verify(&mut url));
        assert_eq!(url.query(), Some("region=eu-west-1&scheme=http"));

        let mut url = Url::parse("s3://minio/status?insecure-skip-verify=1").unwrap();
        assert!(take_skip_verify(&mut url));
        assert_eq!(url.as_str(), "s3://minio/status");
    }

    #[cfg(not(feature = "insecure-tls"))]
    #[test]
    fn test_skip_verify_needs_feature() {
        let t = parse("s3://key:secret@minio:9000/status?insecure-skip-verify=1");
        let err = S3Store::new(&t).err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
        assert!(err.to_string().contains("insecure-tls"));
    }

    #[cfg(feature = "insecure-tls")]
    #[test]
    fn test_skip_verify_with_feature() {
        let t = parse("s3://key:secret@minio:9000/status?insecure-skip-verify=1");
        assert!(S3Store::new(&t).is_ok());
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(200, "k", "get").is_ok());
        assert!(check_status(204, "k", "delete").is_ok());
        assert!(matches!(check_status(404, "k", "get"), Err(StorageError::NotFound(_))));
        assert!(matches!(check_status(503, "k", "put"), Err(StorageError::Backend(_))));
    }

    #[test]
    fn test_kind_detects_scheme() {
        assert!(S3Kind.detect(&Url::parse("s3://minio/bucket").unwrap()));
        assert!(!S3Kind.detect(&Url::parse("file:///tmp").unwrap()));
    }
}
