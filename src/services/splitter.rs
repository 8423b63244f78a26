//! Slicing a file into fixed-size byte ranges.

use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SplitError {
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("{file_size} bytes in chunks of {chunk_size} exceeds {max} chunks", max = u32::MAX)]
    TooManyChunks { file_size: u64, chunk_size: u64 },
}

/// One contiguous slice of the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Number of chunks a file of `file_size` bytes splits into.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> Result<u32, SplitError> {
    if chunk_size == 0 {
        return Err(SplitError::ZeroChunkSize);
    }
    u32::try_from(file_size.div_ceil(chunk_size)).map_err(|_| SplitError::TooManyChunks {
        file_size,
        chunk_size,
    })
}

/// Splits `file_size` bytes into ordered ranges of `chunk_size`.
///
/// Every range except possibly the last is exactly `chunk_size` long. A
/// zero-byte file yields no ranges.
pub fn split(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkRange>, SplitError> {
    let count = chunk_count(file_size, chunk_size)?;

    Ok((0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            ChunkRange {
                index,
                start,
                end: (start + chunk_size).min(file_size),
            }
        })
        .collect())
}
