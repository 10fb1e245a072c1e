//! Blob transport abstraction.
//!
//! The fetcher only needs "GET this URL, optionally a byte range, as a
//! stream". Keeping that behind a trait lets tests serve blobs from memory.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt};

use super::error::{TransferError, TransferResult};

/// Streamed response body.
pub type ByteStream = BoxStream<'static, TransferResult<Bytes>>;

/// Inclusive byte range for a ranged GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end offset.
    pub end: u64,
}

impl ByteRange {
    /// Range covering `len` bytes starting at `start`.
    pub fn from_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start + len.saturating_sub(1),
        }
    }

    /// Number of bytes covered.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` header value.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Transport for content blobs.
pub trait BlobTransport: Send + Sync {
    /// Start a GET and return the body as a stream.
    ///
    /// Non-2xx responses are errors. Errors while reading the body surface as
    /// stream items.
    fn get<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
    ) -> BoxFuture<'a, TransferResult<ByteStream>>;

    /// GET and collect the whole body.
    fn get_bytes<'a>(&'a self, url: &'a str) -> BoxFuture<'a, TransferResult<Bytes>> {
        async move {
            let mut stream = self.get(url, None).await?;
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk?);
            }
            Ok(Bytes::from(body))
        }
        .boxed()
    }
}

/// HTTP transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given connect/read timeout.
    pub fn new(timeout: Duration) -> TransferResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!("modlayer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransferError::Http {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> TransferError {
    if err.is_timeout() {
        TransferError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransferError::Http {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

impl BlobTransport for HttpTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
    ) -> BoxFuture<'a, TransferResult<ByteStream>> {
        async move {
            let mut request = self.client.get(url);
            if let Some(range) = range {
                request = request.header(reqwest::header::RANGE, range.header_value());
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_reqwest_error(url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransferError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let owned_url = url.to_string();
            let stream = response
                .bytes_stream()
                .map_err(move |e| map_reqwest_error(&owned_url, e))
                .boxed();
            Ok(stream)
        }
        .boxed()
    }
}

/// Join a base URI and a path segment with exactly one slash.
///
/// # Examples
///
/// ```
/// use modlayer::fetch::join_url;
///
/// assert_eq!(join_url("https://cdn.example/v/", "abc"), "https://cdn.example/v/abc");
/// assert_eq!(join_url("https://cdn.example/v", "abc"), "https://cdn.example/v/abc");
/// ```
pub fn join_url(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}

/// URL of a named batch, which lives beside the per-file blob directory:
/// `<base>/../batches/<name>`.
///
/// # Examples
///
/// ```
/// use modlayer::fetch::batch_url;
///
/// assert_eq!(
///     batch_url("https://cdn.example/files/ab12/", "b0"),
///     "https://cdn.example/files/batches/b0"
/// );
/// ```
pub fn batch_url(base: &str, batch: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    let parent = match trimmed.rfind('/') {
        Some(idx) if !trimmed[..idx].ends_with('/') => &trimmed[..idx],
        _ => trimmed,
    };
    join_url(parent, &format!("batches/{}", batch))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    /// In-memory transport serving fixed bodies, with per-URL failure counts.
    #[derive(Default)]
    pub struct MockTransport {
        pub bodies: HashMap<String, Vec<u8>>,
        pub failures: Mutex<HashMap<String, usize>>,
        pub requests: Mutex<Vec<(String, Option<ByteRange>)>>,
        pub calls: AtomicUsize,
    }

    impl MockTransport {
        pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
            self.bodies.insert(url.to_string(), body);
            self
        }

        pub fn fail_times(self, url: &str, times: usize) -> Self {
            self.failures.lock().insert(url.to_string(), times);
            self
        }
    }

    impl BlobTransport for MockTransport {
        fn get<'a>(
            &'a self,
            url: &'a str,
            range: Option<ByteRange>,
        ) -> BoxFuture<'a, TransferResult<ByteStream>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requests.lock().push((url.to_string(), range));
                {
                    let mut failures = self.failures.lock();
                    if let Some(left) = failures.get_mut(url) {
                        if *left > 0 {
                            *left -= 1;
                            return Err(TransferError::Status {
                                url: url.to_string(),
                                status: 503,
                            });
                        }
                    }
                }
                let body = self.bodies.get(url).ok_or_else(|| TransferError::Status {
                    url: url.to_string(),
                    status: 404,
                })?;
                let body = match range {
                    Some(r) => body[r.start as usize..=r.end as usize].to_vec(),
                    None => body.clone(),
                };
                // Split into small chunks so readers see chunk boundaries.
                let chunks: Vec<TransferResult<Bytes>> = body
                    .chunks(7)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            .boxed()
        }
    }

    #[test]
    fn test_byte_range_header() {
        let range = ByteRange::from_len(10, 5);
        assert_eq!(range.end, 14);
        assert_eq!(range.byte_count(), 5);
        assert_eq!(range.header_value(), "bytes=10-14");
    }

    #[test]
    fn test_batch_url_without_trailing_slash() {
        assert_eq!(
            batch_url("https://cdn.example/files/ab12", "b1"),
            "https://cdn.example/files/batches/b1"
        );
    }

    #[tokio::test]
    async fn test_mock_get_bytes_and_failures() {
        let mock = MockTransport::default()
            .with_body("u", b"hello world".to_vec())
            .fail_times("u", 1);

        assert!(mock.get_bytes("u").await.is_err());
        assert_eq!(mock.get_bytes("u").await.unwrap(), Bytes::from("hello world"));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }
}
