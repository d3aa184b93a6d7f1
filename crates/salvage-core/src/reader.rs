//! Retry-bounded chunk reader

use crate::config::RetryPolicy;
use crate::error::ReadFailed;
use crate::report::CopyStatistics;
use crate::volume::DataStream;

/// Reads chunks from a data stream, retrying transient failures
#[derive(Debug, Clone, Copy)]
pub struct ResilientReader {
    policy: RetryPolicy,
    chunk_size: usize,
}

impl ResilientReader {
    pub fn new(policy: RetryPolicy, chunk_size: usize) -> Self {
        Self { policy, chunk_size }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Nominal chunk length for `stream`: its record size when it has one
    pub fn chunk_len<S: DataStream + ?Sized>(&self, stream: &S) -> usize {
        stream
            .block_size()
            .filter(|size| *size > 0)
            .unwrap_or(self.chunk_size)
    }

    /// Read into `buf` at `offset`.
    ///
    /// `Ok(0)` is end of stream and is never retried. Each attempt after the
    /// first counts one retry; giving up counts one error.
    pub fn read_chunk<S: DataStream + ?Sized>(
        &self,
        stream: &mut S,
        offset: u64,
        buf: &mut [u8],
        stats: &mut CopyStatistics,
    ) -> Result<usize, ReadFailed> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match stream.read_at(offset, buf) {
                Ok(count) => return Ok(count),
                Err(source) => {
                    if attempts > self.policy.max_retries {
                        stats.errors += 1;
                        tracing::warn!(
                            "Giving up on {} bytes at offset {} after {} attempts: {}",
                            buf.len(),
                            offset,
                            attempts,
                            source
                        );
                        return Err(ReadFailed {
                            offset,
                            len: buf.len(),
                            attempts,
                            source,
                        });
                    }
                    stats.retries += 1;
                    tracing::debug!("Retrying read at offset {} (attempt {}): {}", offset, attempts + 1, source);
                }
            }
        }
    }
}
