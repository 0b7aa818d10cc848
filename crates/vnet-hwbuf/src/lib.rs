//! # vnet-hwbuf
//!
//! Packet buffers for the forwarding pipeline.
//!
//! A [`BufferPool`] hands out [`Ref`]s to fixed-size buffers carved from DMA
//! chunks, takes them back in bulk, and follows `NEXT_VALID` links to free
//! whole multi-segment packets. Pools live in a [`BufferMain`] registry that
//! owns the [`DmaMemory`] and reports every pool grow, alloc and free to a
//! `vnet_elog` event buffer.
//!
//! Allocation-state tracing is compiled in when [`VALIDATE`] is true (debug
//! builds, or the `validate` feature): a double free or an allocation of a
//! buffer the pool does not own panics with that buffer's trail.
//!
//! ```
//! use std::sync::Arc;
//! use vnet_hwbuf::{BufferMain, BufferTemplate, HeapDma, PoolConfig, Ref};
//!
//! let main = BufferMain::new(Arc::new(HeapDma::default()), Arc::new(vnet_elog::Buffer::new(256)));
//! let pool = main.add_buffer_pool(PoolConfig::new("rx", BufferTemplate::new(1000))).unwrap();
//! let mut refs = [Ref::default(); 8];
//! pool.alloc_refs(&mut refs).unwrap();
//! pool.free_refs(&refs, true).unwrap();
//! assert_eq!(pool.free_len(), 256);
//! ```

#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
pub mod dma;
pub mod error;
pub mod events;
pub mod header;
pub mod pool;
pub mod refs;
pub mod registry;
pub mod template;
pub mod trace;

/// Allocation-state tracing and chain validation are compiled in.
pub const VALIDATE: bool = cfg!(any(debug_assertions, feature = "validate"));

pub use chain::{RefChain, link_refs};
pub use config::HeapDmaConfig;
pub use dma::{ChunkId, DmaChunk, DmaMemory, HeapDma};
pub use error::{BufError, DmaError, Result};
pub use events::{PoolEvent, PoolEventKind};
pub use header::{BufferHeader, BufferSave, OVERHEAD_BYTES};
pub use pool::BufferPool;
pub use refs::{BufferFlags, Ref, RefHeader, ref_flag1, ref_flag2, ref_flag4};
pub use registry::{BufferMain, PoolConfig};
pub use template::{BufferTemplate, InitRefs};
pub use trace::{BufferState, TraceEntry};
