//! Error types for DMA memory and buffer pools.

use thiserror::Error;

use crate::dma::ChunkId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("dma budget exhausted: {requested} bytes requested, {in_use} of {budget} in use")]
    Exhausted {
        requested: usize,
        in_use: usize,
        budget: usize,
    },
    #[error("dma offset space exhausted")]
    OffsetSpace,
    #[error("zero-length dma allocation")]
    ZeroLength,
    #[error("unknown dma chunk {0}")]
    UnknownChunk(ChunkId),
    #[error("dma access out of bounds: offset {offset:#x}, {len} bytes")]
    OutOfBounds { offset: u32, len: usize },
}

#[derive(Debug, Error)]
pub enum BufError {
    /// The DMA collaborator could not supply a new chunk for the pool.
    #[error("pool {pool}: out of dma memory allocating {bytes} bytes")]
    OutOfMemory {
        pool: String,
        bytes: usize,
        #[source]
        source: DmaError,
    },
    #[error(transparent)]
    Dma(#[from] DmaError),
    #[error("output holds {len} refs; {want} refs at stride {stride} need {need}")]
    ShortOutput {
        want: usize,
        stride: usize,
        need: usize,
        len: usize,
    },
    #[error("{len} bytes of data do not fit in {room} bytes")]
    DataTooLong { len: usize, room: usize },
    #[error("buffer size {0} is too large")]
    SizeTooLarge(usize),
}

pub type Result<T, E = BufError> = std::result::Result<T, E>;
