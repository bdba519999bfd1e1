//! HTTP object gateway client (`GET|PUT|DELETE {base}/{bucket}/{key}`).

use super::{
    BlobLocation, BlobStore, DeleteFailure, DeleteOutcome, StorageError, codes, ensure_batch_size,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};

/// Blob store talking to a plain object gateway over HTTP.
pub struct HttpBlobStore {
    pub(crate) client: Client,
    pub(crate) base_url: Url,
}

impl HttpBlobStore {
    /// Construct a client for the gateway rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(concat!("docsplit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| StorageError::new(codes::NETWORK_ERROR, err.to_string()))?;
        let base_url = normalize_base_url(base_url)
            .map_err(|err| StorageError::new(codes::NETWORK_ERROR, err))?;
        tracing::debug!(url = %base_url, "Initialized HTTP blob store");
        Ok(Self { client, base_url })
    }

    /// `{base}/{bucket}/{key}` with every segment percent-encoded; `/` in keys separates
    /// segments.
    fn object_url(&self, location: &BlobLocation) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                StorageError::new(codes::NETWORK_ERROR, "Gateway URL cannot take a path")
                    .at(location)
            })?
            .pop_if_empty()
            .push(&location.bucket)
            .extend(location.key.split('/'));
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        location: &BlobLocation,
    ) -> Result<reqwest::RequestBuilder, StorageError> {
        Ok(self.client.request(method, self.object_url(location)?))
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        location: &BlobLocation,
    ) -> Result<reqwest::Response, StorageError> {
        builder
            .send()
            .await
            .map_err(|err| StorageError::new(codes::NETWORK_ERROR, err.to_string()).at(location))
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
        location: &BlobLocation,
    ) -> Result<reqwest::Response, StorageError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = StorageError::new(status_code(status, &body), body_message(status, &body))
            .at(location);
        tracing::debug!(error = %error, "Blob gateway request failed");
        Err(error)
    }
}

/// Map a gateway status (and error body) onto an object-store error code.
fn status_code(status: StatusCode, body: &str) -> String {
    let code = match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => codes::ACCESS_DENIED,
        StatusCode::NOT_FOUND if body.contains(codes::NO_SUCH_BUCKET) => codes::NO_SUCH_BUCKET,
        StatusCode::NOT_FOUND => codes::NO_SUCH_KEY,
        StatusCode::BAD_REQUEST if body.contains(codes::INVALID_BUCKET_NAME) => {
            codes::INVALID_BUCKET_NAME
        }
        StatusCode::TOO_MANY_REQUESTS => codes::SLOW_DOWN,
        StatusCode::INTERNAL_SERVER_ERROR => codes::INTERNAL_ERROR,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            codes::SERVICE_UNAVAILABLE
        }
        other => return other.as_u16().to_string(),
    };
    code.to_string()
}

fn body_message(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn read(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        let response = self
            .send(self.request(Method::GET, location)?, location)
            .await?;
        let response = self.ensure_success(response, location).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| StorageError::new(codes::NETWORK_ERROR, err.to_string()).at(location))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, location: &BlobLocation, bytes: Vec<u8>) -> Result<(), StorageError> {
        let builder = self
            .request(Method::PUT, location)?
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes);
        let response = self.send(builder, location).await?;
        self.ensure_success(response, location).await?;
        Ok(())
    }

    async fn delete(&self, locations: &[BlobLocation]) -> Result<DeleteOutcome, StorageError> {
        ensure_batch_size(locations)?;
        let mut outcome = DeleteOutcome::default();
        for location in locations {
            // Transport failures abort the batch; status failures are per key.
            let response = self
                .send(self.request(Method::DELETE, location)?, location)
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                outcome.deleted.push(location.clone());
                continue;
            }
            match self.ensure_success(response, location).await {
                Ok(_) => outcome.deleted.push(location.clone()),
                Err(err) => outcome.errors.push(DeleteFailure {
                    key: location.key.clone(),
                    code: err.code,
                    message: err.message,
                }),
            }
        }
        Ok(outcome)
    }
}

fn normalize_base_url(url: &str) -> Result<Url, String> {
    let mut parsed = Url::parse(url).map_err(|err| err.to_string())?;
    if parsed.cannot_be_a_base() {
        return Err(format!("{url} cannot be used as a gateway base URL"));
    }
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{DELETE, GET, PUT},
        MockServer,
    };

    fn store_for(server: &MockServer) -> HttpBlobStore {
        HttpBlobStore::new(&server.base_url()).expect("store")
    }

    #[tokio::test]
    async fn read_fetches_bucket_and_key_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/input/report.pdf");
                then.status(200).body("%PDF-1.7 body");
            })
            .await;

        let bytes = store_for(&server)
            .read(&BlobLocation::new("docs", "input/report.pdf"))
            .await
            .expect("read");
        mock.assert_async().await;
        assert_eq!(bytes, b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn write_puts_body_and_maps_throttling() {
        let server = MockServer::start_async().await;
        let ok = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/docs/chunks/a/a_chunk_0.pdf")
                    .body("chunk-bytes");
                then.status(200);
            })
            .await;
        let throttled = server
            .mock_async(|when, then| {
                when.method(PUT).path("/docs/chunks/a/a_chunk_1.pdf");
                then.status(429).body("SlowDown");
            })
            .await;

        let store = store_for(&server);
        store
            .write(
                &BlobLocation::new("docs", "chunks/a/a_chunk_0.pdf"),
                b"chunk-bytes".to_vec(),
            )
            .await
            .expect("write");
        let err = store
            .write(&BlobLocation::new("docs", "chunks/a/a_chunk_1.pdf"), vec![])
            .await
            .expect_err("throttled");

        ok.assert_async().await;
        throttled.assert_async().await;
        assert_eq!(err.code, codes::SLOW_DOWN);
        assert_eq!(
            err.location,
            Some(BlobLocation::new("docs", "chunks/a/a_chunk_1.pdf"))
        );
    }

    #[tokio::test]
    async fn not_found_distinguishes_missing_bucket() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone/key.pdf");
                then.status(404).body("NoSuchBucket");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/docs/missing.pdf");
                then.status(404);
            })
            .await;

        let store = store_for(&server);
        let bucket_err = store
            .read(&BlobLocation::new("gone", "key.pdf"))
            .await
            .expect_err("bucket");
        let key_err = store
            .read(&BlobLocation::new("docs", "missing.pdf"))
            .await
            .expect_err("key");
        assert_eq!(bucket_err.code, codes::NO_SUCH_BUCKET);
        assert_eq!(key_err.code, codes::NO_SUCH_KEY);
    }

    #[tokio::test]
    async fn delete_collects_per_key_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/docs/a.pdf");
                then.status(204);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/docs/b.pdf");
                then.status(403).body("denied");
            })
            .await;

        let outcome = store_for(&server)
            .delete(&[
                BlobLocation::new("docs", "a.pdf"),
                BlobLocation::new("docs", "b.pdf"),
            ])
            .await
            .expect("batch");
        assert_eq!(outcome.deleted, vec![BlobLocation::new("docs", "a.pdf")]);
        assert_eq!(
            outcome.errors,
            vec![DeleteFailure {
                key: "b.pdf".into(),
                code: codes::ACCESS_DENIED.into(),
                message: "denied".into(),
            }]
        );
    }

    #[tokio::test]
    async fn keys_are_percent_encoded_per_segment() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/scans/2024%20q3/invoice%3Fdraft%23v2.pdf");
                then.status(200).body("%PDF-1.7 scan");
            })
            .await;

        let bytes = store_for(&server)
            .read(&BlobLocation::new("scans", "2024 q3/invoice?draft#v2.pdf"))
            .await
            .expect("read");
        mock.assert_async().await;
        assert_eq!(bytes, b"%PDF-1.7 scan");
    }

    #[test]
    fn base_url_keeps_its_path_prefix() {
        let store = HttpBlobStore::new("http://gateway.local/objects/?token=1").expect("store");
        let url = store
            .object_url(&BlobLocation::new("docs", "a/b.pdf"))
            .expect("url");
        assert_eq!(url.as_str(), "http://gateway.local/objects/docs/a/b.pdf");
        assert!(HttpBlobStore::new("mailto:ops@example.com").is_err());
    }

    #[test]
    fn status_mapping_covers_transient_codes() {
        assert_eq!(
            status_code(StatusCode::SERVICE_UNAVAILABLE, ""),
            codes::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_code(StatusCode::INTERNAL_SERVER_ERROR, ""),
            codes::INTERNAL_ERROR
        );
        assert_eq!(
            status_code(StatusCode::BAD_REQUEST, "<Code>InvalidBucketName</Code>"),
            codes::INVALID_BUCKET_NAME
        );
        assert_eq!(status_code(StatusCode::CONFLICT, ""), "409");
    }
}
