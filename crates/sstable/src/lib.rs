//! # SSTable - Sorted String Table
//!
//! Immutable, block-structured on-disk tables.
//!
//! Memtables are flushed into SSTables and compaction rewrites them. Once a
//! table is renamed into place it is never modified, only replaced.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (offset 0)                                        │
//! │   one block per buffer's worth of prefix-compressed records   │
//! │   [shared i32][suffix_len i32][value_len i32][suffix][value]  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK (records, one per data block)                    │
//! │   key = block offset (i32 BE), value = m/8 bloom bytes        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (records, one per data block)                     │
//! │   key = last key of the block                                 │
//! │   value = block offset (i32 BE) | block size (i32 BE)         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (16 bytes)                                             │
//! │   filter offset | filter size | index offset | index size     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Prefix compression restarts at every data
//! block, so each block decodes on its own.
//!
//! ## Module Responsibilities
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | [`pool`]   | `BlockBufferPool`, optional RAM pinning               |
//! | [`block`]  | record codec, data and extendable blocks              |
//! | [`format`] | footer, index entries, filter keys                    |
//! | [`writer`] | `SstWriter`                                           |
//! | [`reader`] | `SstReader` over a memory map                         |
//! | [`node`]   | `Node`: a live table with filters, index, key range   |
//! | [`merge`]  | block-wise k-way `MergeIterator` for compaction       |

pub mod block;
pub mod format;
pub mod merge;
pub mod node;
pub mod pool;
pub mod reader;
pub mod writer;

pub use block::{decode_records, separator_between, shared_prefix_len, Block, BlockKind};
pub use format::{search_index, Footer, Index, FOOTER_BYTES};
pub use merge::{MergeIterator, Recency};
pub use node::Node;
pub use pool::{default_locker, BlockBuffer, BlockBufferPool, MemoryLocker, NoopLocker};
pub use reader::SstReader;
pub use writer::{FinishResult, SstWriter};

#[cfg(test)]
mod tests;
