//! 🪣📡 S3ObjectSource: listing and streaming `.snz` objects straight out of a bucket.
//!
//! COLD OPEN: EXT. DATA CENTER, 3:47 AM
//!
//! The on-call engineer stared at the terminal. "We need the taxi trips," they whispered.
//! "All of them. Out of the public bucket. Decompressed. By morning." The cursor blinked.
//! The S3ObjectSource blinked back, and began paging through `ListObjectsV2`.
//!
//! 🧠 Knowledge graph:
//! - Transport: `GetObject` → `ByteStream::into_async_read()` → boxed `AsyncRead`.
//! - The per-object budget is pushed *into* the SDK as the operation timeout, so an
//!   in-flight request actually stops instead of being politely ignored by a flag.
//! - Anonymous (unsigned) by default: the corpus lives in a public bucket.
//! - `NoSuchKey` (or a bare 404) → `ObjectFailure::NotFound`. Everything else → `Transport`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{FetchedObject, ObjectSource};
use crate::common::SourceObject;
use crate::errors::ObjectFailure;

/// 📄 ListObjectsV2 never returns more than this per page anyway.
const LIST_PAGE_SIZE: i32 = 1000;

/// 🔧 Configuration for the S3 object source. Co-located with the backend that uses it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct S3SourceConfig {
    /// 🪣 The bucket, where the data lives, sleeps, and waits for us
    pub bucket: String,
    /// 🗝️ Only keys starting with this get listed
    #[serde(default)]
    pub prefix: String,
    /// 🌎 Defaults to us-east-1, the Florida of AWS regions
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// 🕶️ Skip request signing entirely. Public buckets don't want your credentials.
    #[serde(default = "default_anonymous")]
    pub anonymous: bool,
    /// 🔁 Total attempts per request, first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 🏠 Custom endpoint (MinIO, LocalStack, a mock). Switches on path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 🏷️ Only keys ending in this get listed. Empty lists everything.
    #[serde(default = "default_key_suffix")]
    pub key_suffix: String,
}

pub(crate) fn default_key_suffix() -> String {
    ".snz".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_anonymous() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

/// 🪣 Lists and fetches objects from one bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectSource {
    client: Client,
    bucket: String,
    key_suffix: String,
}

impl S3ObjectSource {
    /// 🚀 Build the SDK client from the environment plus our overrides.
    ///
    /// `object_timeout` becomes both the operation timeout and the socket read timeout.
    pub async fn new(config: &S3SourceConfig, object_timeout: Duration) -> Self {
        let mut the_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(object_timeout)
                    .read_timeout(object_timeout)
                    .build(),
            );
        if config.anonymous {
            the_loader = the_loader.no_credentials();
        }
        let the_sdk_config = the_loader.load().await;

        let mut the_builder = aws_sdk_s3::config::Builder::from(&the_sdk_config);
        if let Some(the_url) = &config.endpoint_url {
            the_builder = the_builder.endpoint_url(the_url).force_path_style(true);
        }
        Self::from_client(Client::from_conf(the_builder.build()), config.bucket.clone())
            .with_key_suffix(config.key_suffix.clone())
    }

    /// 🔌 Wrap a ready-made client. Lists every key until told otherwise.
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key_suffix: String::new(),
        }
    }

    pub fn with_key_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.key_suffix = suffix.into();
        self
    }
}

fn classify_get_error(err: SdkError<GetObjectError>, label: &str) -> ObjectFailure {
    let the_is_missing = err
        .as_service_error()
        .is_some_and(|e| e.is_no_such_key())
        || err
            .raw_response()
            .is_some_and(|r| r.status().as_u16() == 404);
    if the_is_missing {
        ObjectFailure::NotFound(label.to_string())
    } else {
        ObjectFailure::Transport(format!("{label}: {}", DisplayErrorContext(&err)))
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    /// 📜 Page through `ListObjectsV2` until `max_count` keys or the end of the prefix.
    ///
    /// "Directory" placeholder keys (ending in `/`) are skipped; they hold no trips.
    async fn list(&self, prefix: &str, max_count: usize) -> Result<Vec<SourceObject>> {
        let mut the_objects = Vec::new();
        let mut the_token: Option<String> = None;
        while the_objects.len() < max_count {
            let the_page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(LIST_PAGE_SIZE)
                .set_continuation_token(the_token.take())
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
                .with_context(|| {
                    format!(
                        "💀 ListObjectsV2 failed for s3://{}/{prefix}. The bucket ghosted us. \
                         Check: bucket name, region, and whether it really is public.",
                        self.bucket
                    )
                })?;

            for the_entry in the_page.contents() {
                let Some(the_key) = the_entry.key() else {
                    continue;
                };
                if the_key.ends_with('/') || !the_key.ends_with(&self.key_suffix) {
                    continue;
                }
                let the_size = the_entry.size().unwrap_or(0).max(0) as u64;
                the_objects.push(SourceObject::new(&self.bucket, the_key, the_size));
                if the_objects.len() >= max_count {
                    break;
                }
            }
            trace!(bucket = %self.bucket, so_far = the_objects.len(), "📜 listed a page");

            match the_page.next_continuation_token() {
                Some(t) if the_page.is_truncated().unwrap_or(false) => {
                    the_token = Some(t.to_string());
                }
                _ => break,
            }
        }
        debug!(bucket = %self.bucket, prefix, count = the_objects.len(), "🪣 bucket listed");
        Ok(the_objects)
    }

    async fn fetch(&self, object: &SourceObject) -> Result<FetchedObject, ObjectFailure> {
        let the_label = format!("s3://{}/{}", object.container, object.key);
        let the_response = self
            .client
            .get_object()
            .bucket(&object.container)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| classify_get_error(e, &the_label))?;
        let the_size = the_response
            .content_length()
            .filter(|n| *n >= 0)
            .map_or(object.size_bytes, |n| n as u64);
        // -- ByteStream → tokio AsyncRead. boxed, because struct fields can't hold `impl Trait`
        let the_body = the_response.body.into_async_read();
        Ok(FetchedObject::new(Box::new(the_body), the_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const THE_LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>trips</Name>
  <Prefix>2016/</Prefix>
  <KeyCount>4</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>2016/</Key><Size>0</Size></Contents>
  <Contents><Key>2016/part-0001.snz</Key><Size>123</Size></Contents>
  <Contents><Key>2016/part-0002.snz</Key><Size>456</Size></Contents>
  <Contents><Key>2016/_manifest.json</Key><Size>78</Size></Contents>
</ListBucketResult>"#;

    const THE_MISSING_KEY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message><Key>2016/ghost.snz</Key></Error>"#;

    async fn source_for(server: &MockServer) -> S3ObjectSource {
        let the_config = S3SourceConfig {
            bucket: "trips".to_string(),
            prefix: "2016/".to_string(),
            region: default_s3_region(),
            anonymous: true,
            max_attempts: 1,
            endpoint_url: Some(server.uri()),
            key_suffix: default_key_suffix(),
        };
        S3ObjectSource::new(&the_config, Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn the_one_where_the_listing_skips_directory_keys() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trips"))
            .and(query_param("list-type", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(THE_LISTING),
            )
            .mount(&the_server)
            .await;

        let the_source = source_for(&the_server).await;
        let the_listing = the_source.list("2016/", 10).await.expect("💀 listing should work");
        assert_eq!(the_listing.len(), 2);
        assert_eq!(the_listing[0], SourceObject::new("trips", "2016/part-0001.snz", 123));

        assert!(the_listing.iter().all(|o| o.key.ends_with(".snz")));

        let the_capped = the_source.list("2016/", 1).await.expect("💀 capped listing");
        assert_eq!(the_capped.len(), 1);

        let the_everything = the_source
            .with_key_suffix("")
            .list("2016/", 10)
            .await
            .expect("💀 unfiltered listing");
        assert_eq!(the_everything.len(), 3);
        assert_eq!(the_everything[2].key, "2016/_manifest.json");
    }

    #[tokio::test]
    async fn the_one_where_get_object_streams_the_body() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trips/2016/part-0001.snz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"sNaPpY-ish bytes".to_vec()))
            .mount(&the_server)
            .await;

        let the_source = source_for(&the_server).await;
        let mut the_fetched = the_source
            .fetch(&SourceObject::new("trips", "2016/part-0001.snz", 0))
            .await
            .expect("💀 fetch should work");
        let mut the_body = Vec::new();
        the_fetched
            .body
            .read_to_end(&mut the_body)
            .await
            .expect("💀 body read");
        assert_eq!(the_body, b"sNaPpY-ish bytes");
        assert_eq!(the_fetched.size_bytes, 16);
    }

    #[tokio::test]
    async fn the_one_where_a_missing_key_is_not_found_not_transport() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trips/2016/ghost.snz"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(THE_MISSING_KEY),
            )
            .mount(&the_server)
            .await;

        let the_source = source_for(&the_server).await;
        let the_verdict = the_source
            .fetch(&SourceObject::new("trips", "2016/ghost.snz", 0))
            .await;
        assert!(
            matches!(the_verdict, Err(ObjectFailure::NotFound(_))),
            "{:?}",
            the_verdict.err()
        );
    }
}
