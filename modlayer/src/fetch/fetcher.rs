//! Content blob fetcher.
//!
//! Streams compressed blobs from the transport through the shared rate
//! limiter and a zstd decoder into `files/.<hash>.partial`, hashing on the
//! way. Only a file whose hash matches its address is moved to the canonical
//! path, so a failed or interrupted transfer never leaves bad data where the
//! store would trust it.
//!
//! The network side runs on the async runtime. Decoding, hashing and disk
//! writes run on the blocking pool, fed through a bounded channel.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::BatchTable;
use crate::content::{self, ContentError, ContentStore, HashingWriter};
use crate::progress::Progress;

use super::batch::{plan_batches, BatchSpan};
use super::error::{TransferError, TransferResult};
use super::limiter::RateLimiter;
use super::policy::RetryPolicy;
use super::transport::{batch_url, join_url, BlobTransport, ByteStream};

/// One needed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub hash: String,
    /// Extensions the blob is needed under; the first is the primary file.
    pub extensions: Vec<String>,
    /// Decompressed size, when the catalog reports it.
    pub expected_size: Option<u64>,
}

impl FetchJob {
    pub fn new(hash: impl Into<String>, extensions: Vec<String>) -> Self {
        Self {
            hash: hash.into(),
            extensions: if extensions.is_empty() {
                vec![String::new()]
            } else {
                extensions
            },
            expected_size: None,
        }
    }

    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }
}

/// Totals for a [`FileFetcher::fetch_all`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Blobs transferred over the network.
    pub downloaded: usize,
    /// Blobs already present and verified.
    pub reused: usize,
    /// Decompressed bytes written.
    pub bytes_written: u64,
}

/// Body chunks buffered between the network reader and the blocking writer.
const SINK_QUEUE_DEPTH: usize = 16;

type BlobDecoder = zstd::stream::write::Decoder<'static, HashingWriter<BufWriter<File>>>;

/// Message from the network reader to a blocking content writer.
enum SinkMessage {
    Data(Bytes),
    /// The body ended cleanly; the writer may finish and commit.
    End,
}

/// Why the network reader stopped before the end of the body.
enum PumpStop {
    /// The writer hung up, which it only does after failing.
    WriterGone,
    Failed(TransferError),
}

/// Hand every chunk from `rx` to `consume` until `End` arrives. A channel
/// closed without `End` means the reader gave up.
fn drain_blocking<F>(rx: &mut mpsc::Receiver<SinkMessage>, mut consume: F) -> TransferResult<()>
where
    F: FnMut(&[u8]) -> TransferResult<()>,
{
    while let Some(message) = rx.blocking_recv() {
        match message {
            SinkMessage::Data(data) => consume(&data)?,
            SinkMessage::End => return Ok(()),
        }
    }
    Err(TransferError::Cancelled)
}

/// Decompressing, hashing writer for one blob.
struct BlobSink {
    hash: String,
    partial: PathBuf,
    decoder: BlobDecoder,
}

impl BlobSink {
    fn create(store: &ContentStore, hash: &str) -> TransferResult<Self> {
        let partial = store.partial_path(hash)?;
        let file = File::create(&partial).map_err(|e| TransferError::Io {
            path: partial.clone(),
            source: e,
        })?;
        let decoder = zstd::stream::write::Decoder::new(HashingWriter::new(BufWriter::new(file)))
            .map_err(|e| decompress_error(hash, e))?;

        Ok(Self {
            hash: hash.to_string(),
            partial,
            decoder,
        })
    }

    fn write(&mut self, data: &[u8]) -> TransferResult<()> {
        self.decoder
            .write_all(data)
            .map_err(|e| decompress_error(&self.hash, e))
    }

    /// Flush, check the hash, and move the file into place.
    fn finish(mut self, store: &ContentStore, extensions: &[String]) -> TransferResult<u64> {
        self.decoder
            .flush()
            .map_err(|e| decompress_error(&self.hash, e))?;
        let (mut file, actual, written) = self.decoder.into_inner().finish();
        file.flush().map_err(|e| TransferError::Io {
            path: self.partial.clone(),
            source: e,
        })?;
        drop(file);

        if actual != self.hash {
            let _ = fs::remove_file(&self.partial);
            return Err(TransferError::Integrity {
                expected: self.hash,
                actual,
            });
        }

        let primary_ext = extensions.first().map(String::as_str).unwrap_or("");
        let primary = store.path_for(&self.hash, primary_ext)?;
        content::fs::rename(&self.partial, &primary).map_err(ContentError::from)?;
        store.materialize(&self.hash, extensions, &primary)?;
        Ok(written)
    }
}

fn decompress_error(hash: &str, err: std::io::Error) -> TransferError {
    TransferError::Decompress {
        hash: hash.to_string(),
        reason: err.to_string(),
    }
}

/// Splits a batch response body across the blobs it contains.
struct SpanWriter {
    span: BatchSpan,
    jobs: Arc<HashMap<String, FetchJob>>,
    store: ContentStore,
    done: Arc<Mutex<HashSet<String>>>,
    progress: Arc<Progress>,
    index: usize,
    remaining: u64,
    started: bool,
    sink: Option<BlobSink>,
    written: u64,
}

impl SpanWriter {
    fn feed(&mut self, mut data: &[u8]) -> TransferResult<()> {
        while !data.is_empty() && self.index < self.span.entries.len() {
            let entry = &self.span.entries[self.index];
            if !self.started {
                self.remaining = entry.file.size_compressed;
                self.sink = if self.done.lock().contains(&entry.hash) {
                    None
                } else {
                    Some(BlobSink::create(&self.store, &entry.hash)?)
                };
                self.started = true;
            }

            let take = self.remaining.min(data.len() as u64) as usize;
            if let Some(sink) = self.sink.as_mut() {
                sink.write(&data[..take])?;
            }
            data = &data[take..];
            self.remaining -= take as u64;

            if self.remaining == 0 {
                self.complete_current()?;
            }
        }
        Ok(())
    }

    fn complete_current(&mut self) -> TransferResult<()> {
        let entry = &self.span.entries[self.index];
        if let Some(sink) = self.sink.take() {
            let extensions = self
                .jobs
                .get(&entry.hash)
                .map(|job| job.extensions.clone())
                .unwrap_or_else(|| vec![String::new()]);
            self.written += sink.finish(&self.store, &extensions)?;
            self.done.lock().insert(entry.hash.clone());
            self.progress.advance();
        }
        self.index += 1;
        self.started = false;
        Ok(())
    }

    fn close(self, url: &str, received: u64) -> TransferResult<u64> {
        if self.index < self.span.entries.len() {
            return Err(TransferError::ShortBody {
                url: url.to_string(),
                expected: self.span.range.byte_count(),
                actual: received,
            });
        }
        Ok(self.written)
    }
}

/// Downloads content blobs into a [`ContentStore`].
#[derive(Clone)]
pub struct FileFetcher {
    transport: Arc<dyn BlobTransport>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl FileFetcher {
    pub fn new(
        transport: Arc<dyn BlobTransport>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            retry,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn transport(&self) -> &Arc<dyn BlobTransport> {
        &self.transport
    }

    /// Fetch one blob from `<base_uri>/<hash>` with retries.
    ///
    /// Returns the decompressed size. On final failure the partial file is
    /// removed; on cancellation it is left in place.
    pub async fn fetch(
        &self,
        base_uri: &str,
        job: &FetchJob,
        store: &ContentStore,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let url = join_url(base_uri, &job.hash);
        let result = self
            .with_retries(&job.hash, cancel, || {
                self.attempt_file(&url, job, store, cancel)
            })
            .await;

        if let Err(e) = &result {
            if !e.is_cancelled() {
                discard_partial(store, &job.hash);
            }
        }
        result
    }

    /// Fetch every blob of one batch span with retries. The whole span is
    /// re-requested on failure; blobs already finished are skipped.
    pub async fn fetch_span(
        &self,
        base_uri: &str,
        span: &BatchSpan,
        jobs: &Arc<HashMap<String, FetchJob>>,
        store: &ContentStore,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let url = batch_url(base_uri, &span.batch);
        let label = format!("{} {}", span.batch, span.range.header_value());
        let done = Arc::new(Mutex::new(HashSet::new()));

        let result = self
            .with_retries(&label, cancel, || {
                self.attempt_span(&url, span, jobs, store, &done, progress, cancel)
            })
            .await;

        if let Err(e) = &result {
            if !e.is_cancelled() {
                let done = done.lock();
                for entry in span.entries.iter().filter(|e| !done.contains(&e.hash)) {
                    discard_partial(store, &entry.hash);
                }
            }
        }
        result
    }

    /// Ensure every job's blob is present and verified.
    ///
    /// Existing files are verified first (and their extension links
    /// repaired); the rest are downloaded. Both phases run at most
    /// `concurrency` workers. The first failure cancels outstanding work.
    pub async fn fetch_all(
        &self,
        base_uri: &str,
        jobs: Vec<FetchJob>,
        batches: Option<&BatchTable>,
        store: &ContentStore,
        concurrency: usize,
        progress: Arc<Progress>,
        cancel: &CancellationToken,
    ) -> TransferResult<FetchReport> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut report = FetchReport::default();

        let missing = self
            .verify_existing(jobs, store, &semaphore, &progress, cancel, &mut report)
            .await?;
        if missing.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            missing = missing.len(),
            reused = report.reused,
            "Downloading content files"
        );

        let wanted: HashSet<String> = missing.iter().map(|j| j.hash.clone()).collect();
        let jobs: Arc<HashMap<String, FetchJob>> =
            Arc::new(missing.into_iter().map(|j| (j.hash.clone(), j)).collect());

        let (spans, singles) = match batches {
            Some(table) => {
                let plan = plan_batches(table, &wanted);
                (plan.spans, plan.unbatched)
            }
            None => {
                let mut singles: Vec<String> = wanted.into_iter().collect();
                singles.sort();
                (Vec::new(), singles)
            }
        };

        let local = cancel.child_token();
        let base_uri = base_uri.to_string();
        let mut tasks: JoinSet<TransferResult<(usize, u64)>> = JoinSet::new();

        for span in spans {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let jobs = Arc::clone(&jobs);
            let store = store.clone();
            let progress = Arc::clone(&progress);
            let cancel = local.clone();
            let base_uri = base_uri.clone();
            tasks.spawn(async move {
                let _permit = acquire(semaphore, &cancel).await?;
                let bytes = this
                    .fetch_span(&base_uri, &span, &jobs, &store, &progress, &cancel)
                    .await?;
                Ok((span.entries.len(), bytes))
            });
        }

        for hash in singles {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let jobs = Arc::clone(&jobs);
            let store = store.clone();
            let progress = Arc::clone(&progress);
            let cancel = local.clone();
            let base_uri = base_uri.clone();
            tasks.spawn(async move {
                let _permit = acquire(semaphore, &cancel).await?;
                let Some(job) = jobs.get(&hash) else {
                    return Ok((0, 0));
                };
                let bytes = this.fetch(&base_uri, job, &store, &cancel).await?;
                progress.advance();
                Ok((1, bytes))
            });
        }

        let mut failure: Option<TransferError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(TransferError::Task(e.to_string())));
            match result {
                Ok((files, bytes)) => {
                    report.downloaded += files;
                    report.bytes_written += bytes;
                }
                Err(e) if e.is_cancelled() => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Content transfer failed");
                    local.cancel();
                    if failure.as_ref().map_or(true, TransferError::is_cancelled) {
                        failure = Some(e);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn verify_existing(
        &self,
        jobs: Vec<FetchJob>,
        store: &ContentStore,
        semaphore: &Arc<Semaphore>,
        progress: &Progress,
        cancel: &CancellationToken,
        report: &mut FetchReport,
    ) -> TransferResult<Vec<FetchJob>> {
        let mut checks: JoinSet<TransferResult<(FetchJob, bool)>> = JoinSet::new();
        for job in jobs {
            let permit = acquire(Arc::clone(semaphore), cancel).await?;
            let store = store.clone();
            checks.spawn_blocking(move || {
                let _permit = permit;
                let found = store.locate_verified(&job.hash, &job.extensions, job.expected_size)?;
                if let Some(source) = &found {
                    store.materialize(&job.hash, &job.extensions, source)?;
                }
                Ok((job, found.is_some()))
            });
        }

        let mut missing = Vec::new();
        while let Some(joined) = checks.join_next().await {
            let (job, present) =
                joined.map_err(|e| TransferError::Task(e.to_string()))??;
            if present {
                report.reused += 1;
                progress.advance();
            } else {
                missing.push(job);
            }
        }

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        missing.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(missing)
    }

    async fn attempt_file(
        &self,
        url: &str,
        job: &FetchJob,
        store: &ContentStore,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let stream = self.open(url, None, cancel).await?;
        let store = store.clone();
        let job = job.clone();
        let (_, written) = self
            .stream_to_writer(stream, cancel, move |mut rx| {
                let mut sink = BlobSink::create(&store, &job.hash)?;
                drain_blocking(&mut rx, |data| sink.write(data))?;
                sink.finish(&store, &job.extensions)
            })
            .await?;
        Ok(written)
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_span(
        &self,
        url: &str,
        span: &BatchSpan,
        jobs: &Arc<HashMap<String, FetchJob>>,
        store: &ContentStore,
        done: &Arc<Mutex<HashSet<String>>>,
        progress: &Arc<Progress>,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let stream = self.open(url, span.request_range(), cancel).await?;
        let mut writer = SpanWriter {
            span: span.clone(),
            jobs: Arc::clone(jobs),
            store: store.clone(),
            done: Arc::clone(done),
            progress: Arc::clone(progress),
            index: 0,
            remaining: 0,
            started: false,
            sink: None,
            written: 0,
        };
        let (received, writer) = self
            .stream_to_writer(stream, cancel, move |mut rx| {
                drain_blocking(&mut rx, |data| writer.feed(data))?;
                Ok(writer)
            })
            .await?;
        writer.close(url, received)
    }

    async fn open(
        &self,
        url: &str,
        range: Option<super::transport::ByteRange>,
        cancel: &CancellationToken,
    ) -> TransferResult<ByteStream> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.transport.get(url, range) => result,
        }
    }

    /// Run `consume` on the blocking pool and feed it the body of `stream`.
    ///
    /// Returns the number of body bytes read along with what `consume`
    /// produced. A writer failure wins over the reader noticing the writer
    /// is gone; a reader failure (network, cancellation) wins otherwise.
    async fn stream_to_writer<T, F>(
        &self,
        stream: ByteStream,
        cancel: &CancellationToken,
        consume: F,
    ) -> TransferResult<(u64, T)>
    where
        F: FnOnce(mpsc::Receiver<SinkMessage>) -> TransferResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SINK_QUEUE_DEPTH);
        let writer = tokio::task::spawn_blocking(move || consume(rx));

        let pumped = self.pump(stream, cancel, &tx).await;
        if pumped.is_ok() {
            // Fails only when the writer already stopped with an error.
            let _ = tx.send(SinkMessage::End).await;
        }
        drop(tx);

        let written = writer
            .await
            .map_err(|e| TransferError::Task(e.to_string()))?;
        match pumped {
            Ok(received) => written.map(|value| (received, value)),
            Err(PumpStop::Failed(e)) => Err(e),
            Err(PumpStop::WriterGone) => match written {
                Err(e) => Err(e),
                Ok(_) => Err(TransferError::Task("content writer stopped early".to_string())),
            },
        }
    }

    /// Drain `stream` into `tx`, reserving limiter capacity before every
    /// slice handed over. Returns the number of body bytes read.
    async fn pump(
        &self,
        mut stream: ByteStream,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<SinkMessage>,
    ) -> Result<u64, PumpStop> {
        let mut total = 0u64;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(PumpStop::Failed(TransferError::Cancelled)),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let mut rest = chunk.map_err(PumpStop::Failed)?;
            let len = rest.len() as u64;

            while !rest.is_empty() {
                let granted = self
                    .limiter
                    .reserve(rest.len(), cancel)
                    .await
                    .map_err(|_| PumpStop::Failed(TransferError::Cancelled))?;
                let slice = rest.split_to(granted.min(rest.len()));
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PumpStop::Failed(TransferError::Cancelled)),
                    sent = tx.send(SinkMessage::Data(slice)) => {
                        sent.map_err(|_| PumpStop::WriterGone)?;
                    }
                }
            }

            self.limiter.record(len);
            total += len;
        }
        Ok(total)
    }

    async fn with_retries<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> TransferResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransferResult<T>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt_no = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt_no < max_attempts => {
                    tracing::warn!(
                        blob = %label,
                        attempt = attempt_no,
                        max_attempts,
                        error = %e,
                        "Transfer failed, retrying"
                    );
                    attempt_no += 1;
                    let delay = self.retry.delay_before(attempt_no);
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    return Err(TransferError::Exhausted {
                        target: label.to_string(),
                        attempts: attempt_no,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn acquire(
    semaphore: Arc<Semaphore>,
    cancel: &CancellationToken,
) -> TransferResult<OwnedSemaphorePermit> {
    tokio::select! {
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        permit = semaphore.acquire_owned() => permit.map_err(|_| TransferError::Cancelled),
    }
}

fn discard_partial(store: &ContentStore, hash: &str) {
    if let Ok(partial) = store.partial_path(hash) {
        if let Ok(true) = content::fs::remove_file_if_exists(&partial) {
            tracing::debug!(hash = %hash, "Removed partial download");
        }
    }
}
