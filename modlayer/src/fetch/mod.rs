//! Blob transfer: transport, rate limiting, retries and batch planning.
//!
//! # Architecture
//!
//! ```text
//! FileFetcher::fetch_all
//!   ├── verify existing files (blocking pool, bounded)
//!   ├── plan_batches (batched mode) ──► one ranged GET per contiguous span
//!   └── per-file GET <base>/<hash>
//!         └── BlobTransport ─► RateLimiter ─► zstd ─► .partial ─► verify ─► files/<hash>.<ext>
//! ```

mod batch;
mod error;
mod fetcher;
mod limiter;
mod policy;
pub(crate) mod transport;

pub use batch::{plan_batches, BatchEntry, BatchPlan, BatchSpan};
pub use error::{TransferError, TransferResult};
pub use fetcher::{FetchJob, FetchReport, FileFetcher};
pub use limiter::{RateLimiter, ReserveCancelled, MAX_THRESHOLD, POLL_INTERVAL};
pub use policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use transport::{batch_url, join_url, BlobTransport, ByteRange, ByteStream, HttpTransport};
