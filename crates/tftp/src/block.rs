//! Block Segmentation and Reassembly
//!
//! [`BlockReader`] cuts a byte source into numbered DATA blocks on demand;
//! [`BlockWriter`] appends an in-order block sequence to a sink. Both treat the
//! first block shorter than [`BLOCK_SIZE`] as the end of the stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::BLOCK_SIZE;

/// One numbered DATA block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u16,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(number: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            payload: payload.into(),
        }
    }

    /// A block shorter than [`BLOCK_SIZE`] ends the transfer.
    ///
    /// # Examples
    /// ```
    /// use tftp::Block;
    ///
    /// assert!(Block::new(1, vec![0; 100]).is_final());
    /// assert!(Block::new(2, Vec::new()).is_final());
    /// assert!(!Block::new(1, vec![0; 512]).is_final());
    /// ```
    pub fn is_final(&self) -> bool {
        self.payload.len() < BLOCK_SIZE
    }
}

/// Lazily splits a byte source into blocks numbered from 1.
///
/// A source of `F` bytes yields `F / 512` full blocks followed by exactly one
/// final block of `F % 512` bytes, so an empty source still yields one empty
/// block. The reader cannot be rewound.
#[derive(Debug)]
pub struct BlockReader<R> {
    source: R,
    next_number: u16,
    finished: bool,
}

impl<R: AsyncRead + Unpin> BlockReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            next_number: 1,
            finished: false,
        }
    }

    /// Read the next block, or `None` once the final block has been handed out.
    pub async fn next_block(&mut self) -> io::Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }

        let mut payload = vec![0u8; BLOCK_SIZE];
        let mut filled = 0;
        // A single read may come back short without the source being exhausted.
        while filled < BLOCK_SIZE {
            let n = self.source.read(&mut payload[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        payload.truncate(filled);

        let block = Block::new(self.next_number, payload);
        self.next_number = self.next_number.wrapping_add(1);
        self.finished = block.is_final();
        Ok(Some(block))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Outcome of appending one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// More blocks are expected.
    Continue,
    /// This was the final block; the stream is closed.
    Finished,
}

/// Reassembles an in-order block sequence into a sink.
#[derive(Debug)]
pub struct BlockWriter<W> {
    sink: W,
    expected: u16,
    closed: bool,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> BlockWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            expected: 1,
            closed: false,
            bytes_written: 0,
        }
    }

    /// Append `block`, which must be the next block in sequence.
    ///
    /// Out-of-order blocks and blocks arriving after the final one are
    /// rejected with [`io::ErrorKind::InvalidInput`] and leave the sink untouched.
    pub async fn write_block(&mut self, block: &Block) -> io::Result<WriteProgress> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {} arrived after the final block", block.number),
            ));
        }
        if block.number != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("expected block {}, got {}", self.expected, block.number),
            ));
        }

        self.sink.write_all(&block.payload).await?;
        self.bytes_written += block.payload.len() as u64;
        self.expected = self.expected.wrapping_add(1);

        if block.is_final() {
            self.closed = true;
            Ok(WriteProgress::Finished)
        } else {
            Ok(WriteProgress::Continue)
        }
    }

    /// Flush buffered bytes to the sink.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.sink.flush().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
