//! Incremental content hashing over re-openable byte streams.
//!
//! Sources are opened fresh for every pass, so the digest and the size
//! measurement each see the complete content without the file ever being
//! held in memory.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use sha2::{Digest, Sha256};
use std::io;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::models::file::FileSource;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Anything that can hand out a new stream over the same bytes on demand.
#[async_trait]
pub trait ReopenableSource: Send + Sync {
    async fn open(&self) -> io::Result<ByteStream>;
}

#[async_trait]
impl ReopenableSource for FileSource {
    async fn open(&self) -> io::Result<ByteStream> {
        let file = File::open(self.path()).await?;
        Ok(ReaderStream::new(file).boxed())
    }
}

/// SHA-256 of the source, URL-safe base64 without padding.
///
/// Reads exactly one stream; chunks are hashed as they arrive.
pub async fn content_digest<S>(source: &S) -> io::Result<String>
where
    S: ReopenableSource + ?Sized,
{
    let mut stream = source.open().await?;
    let mut hasher = Sha256::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// Byte length of the source, measured on its own fresh stream.
pub async fn measure_size<S>(source: &S) -> io::Result<u64>
where
    S: ReopenableSource + ?Sized,
{
    let mut stream = source.open().await?;
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        total += chunk?.len() as u64;
    }
    Ok(total)
}

/// Bytes to kilobytes, rounded to two decimals.
pub fn to_kb(bytes: u64) -> f64 {
    (bytes as f64 / 10.0).round() / 100.0
}
