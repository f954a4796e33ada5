//! Injected byte-range transport seam
//!
//! The engine never talks to the network itself. Applications supply a
//! [`Transport`] that resolves a [`SourceLocator`] into a byte stream,
//! ideally honoring a resume offset via byte-range requests. Failures are
//! tagged transient vs permanent via [`TransferError`] so the engine knows
//! which to retry.

use crate::error::TransferError;
use crate::types::SourceLocator;
use async_trait::async_trait;
use bytes::Bytes;

/// Byte-range-capable content source
///
/// Implementations are typically thin wrappers over an HTTP client issuing
/// `Range` requests against CDN media URLs, but the engine only requires the
/// contract below.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a byte stream for `locator`, requesting it start at `range_start`.
    ///
    /// A transport that cannot honor the offset must still succeed and return
    /// a stream whose [`TransferStream::resume_offset`] is 0; the engine then
    /// restarts the job's content from zero.
    async fn open(
        &self,
        locator: &SourceLocator,
        range_start: u64,
    ) -> Result<Box<dyn TransferStream>, TransferError>;
}

/// One open transfer, yielding content in chunks
#[async_trait]
pub trait TransferStream: Send {
    /// Offset this stream actually starts at
    ///
    /// Equal to the requested `range_start` when the source supports ranged
    /// resume, 0 otherwise.
    fn resume_offset(&self) -> u64;

    /// Total size of the content in bytes, when the source reports one
    ///
    /// This is the size of the whole content, not of the remaining range.
    fn content_length(&self) -> Option<u64>;

    /// Fetch the next chunk; `Ok(None)` signals end of stream
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError>;
}
