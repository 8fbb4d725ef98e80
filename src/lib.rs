//! # rballoc - A Size-Classed Arena Allocator
//!
//! This crate provides a general-purpose heap allocator that carves every
//! allocation out of a single fixed-size buffer supplied once at startup.
//! It is built to be dropped in as a benchmark's "subject" allocator,
//! standing in for the system malloc/free/realloc/calloc/malloc_size
//! family while a host measures the effect of the allocation strategy
//! itself.
//!
//! ## Overview
//!
//! Two free structures cover two very different shapes of request:
//!
//! ```text
//!   Allocate(n)
//!       │
//!       ▼
//!   round up to A = 16
//!       │
//!   s ≤ S_MAX? ───── yes ──►  small-class free list  ──► Pop(slot)
//!       │                          (singly-linked,
//!       no                          LIFO, O(1))
//!       │
//!       ▼
//!   size-indexed tree  ──► RetrieveBlock(s)
//!   (red-black, keyed          │
//!    by payload size)          ▼
//!                        split tail back into
//!                        the tree if worthwhile
//!
//!   Both miss ──► carve a fresh block off the arena frontier
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rballoc
//!   ├── align     - alignment constants, the align! macro, slot indexing
//!   ├── header    - the fixed-size prefix in front of every payload
//!   ├── freelist  - small-class singly-linked free lists (internal)
//!   ├── tree      - size-indexed red-black tree (internal)
//!   ├── engine    - Engine: Init/Allocate/Deallocate/Reallocate/Size
//!   └── shim      - process-wide benchmark/system allocator switch,
//!                   C entry points, and a GlobalAlloc front end
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rballoc::engine::Engine;
//!
//! fn main() {
//!     let mut buffer = vec![0u8; 1024 * 1024];
//!     let mut engine = Engine::new();
//!
//!     unsafe {
//!         assert!(engine.init(buffer.as_mut_ptr(), buffer.len()));
//!
//!         let p = engine.allocate(100);
//!         assert!(!p.is_null());
//!         assert_eq!(engine.size(p) % 16, 0);
//!
//!         engine.deallocate(p);
//!     }
//! }
//! ```
//!
//! Or, to stand in for the system allocator under a benchmark harness:
//!
//! ```rust,ignore
//! use rballoc::shim;
//!
//! shim::enable_default_benchmark_allocator(true);
//! // every malloc/free/realloc/calloc routed through `shim` now serves
//! // out of a 1 GiB arena instead of the system heap.
//! shim::disable_benchmark_allocator();
//! ```
//!
//! ## How It Works
//!
//! The arena is a triple `(begin, end, frontier)` of byte pointers. Fresh
//! space is carved off `frontier`, which only ever advances — except when
//! the block being freed or shrunk happens to sit exactly at the
//! frontier, in which case it retreats and the bytes become virgin again:
//!
//! ```text
//!   Arena:
//!   ┌──────────────┬──────────────┬───────────────────────────┐
//!   │  carved /     │   carved /   │   untouched virgin bytes  │
//!   │  free-list    │   tree-free  │                           │
//!   └──────────────┴──────────────┴───────────────────────────┘
//!   begin                                frontier            end
//!
//!   Deallocate of the right-most block walks frontier left;
//!   Deallocate of anything else hands the block to a free list
//!   or the tree instead.
//! ```
//!
//! Every block is preceded by a [`header::Header`] carrying its payload
//! size; when a block is free, its payload is overlaid with either a
//! [`freelist`] link word or a [`tree`] node record, so no bookkeeping
//! memory is ever drawn from outside the arena itself.
//!
//! ## Features
//!
//! - **Two free structures, one per size regime**: O(1) list reuse for
//!   small, frequent sizes; a balanced tree with best-fit splitting for
//!   large, rarer ones.
//! - **Intrusive storage**: free-block bookkeeping lives inside the freed
//!   bytes, never in a side allocation.
//! - **Frontier discipline**: the common allocate/free-immediately case at
//!   the tail of the arena costs no list or tree traffic at all.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `Engine` carries no internal
//!   synchronization; [`shim`] is the layer that adds a mutex around it.
//! - **No coalescing** beyond the frontier: two adjacent free blocks deeper
//!   in the arena are never merged back into one.
//! - **No fragmentation reclaim**: freed bytes stay inside the arena for
//!   the allocator's lifetime; they're never returned to the OS.
//!
//! ## Safety
//!
//! This crate manages memory through raw pointers over a caller-supplied
//! buffer. Every public entry point below `align` documents the
//! preconditions its `unsafe` carries; none of it can be made safe without
//! giving up the intrusive storage the design depends on.

pub mod align;
pub mod engine;
pub mod header;
pub mod shim;

mod freelist;
mod tree;
