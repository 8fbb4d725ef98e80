//! The allocator engine: ties the small-class free-list array and the
//! size-indexed tree to a single caller-supplied arena.
//!
//! The engine never allocates memory of its own — every byte it touches,
//! including its own bookkeeping, comes out of the buffer handed to
//! [`Engine::init`].

use std::ptr;

use crate::align::{self, ALIGNMENT, MAX_SLOT_SIZE};
use crate::freelist::SlotArray;
use crate::header::Header;
use crate::tree::SizeTree;

/// A single-threaded arena allocator over a caller-owned buffer.
///
/// Not reentrant and not `Send`/`Sync` — see the crate-level docs for the
/// locking this wants above it when shared across threads.
pub struct Engine {
  begin: *mut u8,
  end: *mut u8,
  frontier: *mut u8,
  slots: SlotArray,
  tree: SizeTree,
}

impl Engine {
  /// An engine with no arena; every operation is a no-op until [`Self::init`]
  /// succeeds.
  pub const fn new() -> Self {
    Self {
      begin: ptr::null_mut(),
      end: ptr::null_mut(),
      frontier: ptr::null_mut(),
      slots: SlotArray::new(),
      tree: SizeTree::new(),
    }
  }

  /// Carves the arena out of `buffer`, aligning `begin` up and `end` down
  /// to `ALIGNMENT`. Returns `false` (and leaves the engine untouched) if
  /// the aligned range is empty or if `init` already succeeded once.
  ///
  /// # Safety
  /// `buffer` must be valid for reads and writes of `buffer_len` bytes for
  /// as long as this engine is used afterward, and must not be accessed by
  /// anything else for that duration.
  pub unsafe fn init(&mut self, buffer: *mut u8, buffer_len: usize) -> bool {
    if !self.begin.is_null() {
      return false;
    }

    let raw_begin = buffer as usize;
    let raw_end = raw_begin.saturating_add(buffer_len);
    let aligned_begin = align::align_up(raw_begin);
    let aligned_end = raw_end & !(ALIGNMENT - 1);

    if aligned_begin >= aligned_end {
      return false;
    }

    self.begin = aligned_begin as *mut u8;
    self.end = aligned_end as *mut u8;
    self.frontier = self.begin;
    true
  }

  /// Serves `n` bytes, or null on out-of-space (`n == 0` also returns null).
  ///
  /// # Safety
  /// `init` must have returned `true` on this engine already.
  pub unsafe fn allocate(&mut self, n: usize) -> *mut u8 {
    if n == 0 {
      return ptr::null_mut();
    }

    let size = align::align_up(n);

    unsafe {
      if let Some(index) = align::slot_index(size) {
        let header = self.slots.pop(index);
        if !header.is_null() {
          return Header::payload_begin(header);
        }
      } else {
        let header = self.tree.retrieve_block(size);
        if !header.is_null() {
          return self.split_or_return(header, size);
        }
      }

      self.carve(size)
    }
  }

  /// Returns `p`'s recorded capacity, or its free bytes back to the arena.
  ///
  /// # Safety
  /// `p` must be null or a live pointer previously returned by this engine.
  pub unsafe fn deallocate(&mut self, p: *mut u8) {
    if p.is_null() {
      return;
    }

    unsafe {
      let header = Header::of(p);
      if Header::payload_end(header) == self.frontier {
        self.frontier = header as *mut u8;
        return;
      }

      let size = Header::size(header);
      match align::slot_index(size) {
        Some(index) => self.slots.push(index, header),
        None => self.tree.insert(header),
      }
    }
  }

  /// Resizes `p` to `new_n` bytes, preferring to do so in place when `p`
  /// sits at the arena frontier. Falls back to allocate-copy-deallocate
  /// otherwise. `p == null` behaves as `allocate(new_n)`; `new_n == 0`
  /// behaves as `deallocate(p)` and returns null.
  ///
  /// # Safety
  /// `p` must be null or a live pointer previously returned by this engine.
  pub unsafe fn reallocate(&mut self, p: *mut u8, new_n: usize) -> *mut u8 {
    unsafe {
      if p.is_null() {
        return self.allocate(new_n);
      }
      if new_n == 0 {
        self.deallocate(p);
        return ptr::null_mut();
      }

      let header = Header::of(p);
      let old_size = Header::size(header);
      let size = align::align_up(new_n);

      if size == old_size {
        return p;
      }

      if Header::payload_end(header) == self.frontier {
        if size < old_size {
          self.frontier = self.frontier.sub(old_size - size);
          Header::set_size(header, size);
          return p;
        }

        let grow = size - old_size;
        if self.frontier.add(grow) <= self.end {
          self.frontier = self.frontier.add(grow);
          Header::set_size(header, size);
          return p;
        }
        // falls through to the copying path: frontier can't grow far enough
      }

      let new_p = self.allocate(size);
      if new_p.is_null() {
        return ptr::null_mut();
      }

      let copy_len = old_size.min(size);
      ptr::copy_nonoverlapping(p, new_p, copy_len);
      self.deallocate(p);
      new_p
    }
  }

  /// The payload capacity recorded for `p`, or 0 if `p` is null.
  ///
  /// # Safety
  /// `p` must be null or a live pointer previously returned by this engine.
  pub unsafe fn size(&self, p: *mut u8) -> usize {
    if p.is_null() {
      return 0;
    }
    unsafe { Header::size(Header::of(p)) }
  }

  /// Given a tree hit of capacity `>= s`, either splits off a tree-sized
  /// residual and returns a block of exactly `s`, or hands back the whole
  /// block unsplit when the residual wouldn't be worth keeping.
  unsafe fn split_or_return(&mut self, header: *mut Header, s: usize) -> *mut u8 {
    unsafe {
      let capacity = Header::size(header);
      let leftover = capacity - s;

      if leftover > Header::SIZE {
        let residual_size = leftover - Header::SIZE;
        if align::slot_index(residual_size).is_none() {
          Header::set_size(header, s);
          let residual_header = Header::payload_end(header) as *mut Header;
          Header::write_new(residual_header as *mut u8, residual_size);
          self.tree.insert(residual_header);
        }
      }

      Header::payload_begin(header)
    }
  }

  /// Carves a fresh block of `size` bytes off the frontier, or null if the
  /// arena has no room left.
  unsafe fn carve(&mut self, size: usize) -> *mut u8 {
    unsafe {
      let needed = Header::SIZE + size;
      if self.end.offset_from(self.frontier) < needed as isize {
        return ptr::null_mut();
      }

      let header = Header::write_new(self.frontier, size);
      self.frontier = self.frontier.add(needed);
      Header::payload_begin(header)
    }
  }
}

// The engine holds raw pointers into a caller-owned buffer rather than a
// reference, so auto traits don't derive; this module's callers are
// expected to serialize access themselves (see the shim's mutex).
unsafe impl Send for Engine {}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(align(16))]
  struct Arena<const N: usize>([u8; N]);

  fn new_engine<const N: usize>(buf: &mut Arena<N>) -> Engine {
    let mut engine = Engine::new();
    unsafe {
      assert!(engine.init(buf.0.as_mut_ptr(), N));
    }
    engine
  }

  #[test]
  fn allocate_zero_is_null() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      assert!(engine.allocate(0).is_null());
    }
  }

  #[test]
  fn allocate_rounds_up_and_reports_honest_capacity() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let p = engine.allocate(1);
      assert!(!p.is_null());
      assert_eq!(p as usize % ALIGNMENT, 0);
      assert_eq!(engine.size(p), ALIGNMENT);

      let q = engine.allocate(10);
      assert_eq!(engine.size(q), ALIGNMENT);
    }
  }

  #[test]
  fn frontier_advances_by_header_plus_payload() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let begin = engine.begin as usize;
      let p = engine.allocate(10);
      assert_eq!(p as usize, begin + Header::SIZE);
      assert_eq!(engine.frontier as usize, begin + Header::SIZE + ALIGNMENT);
    }
  }

  #[test]
  fn lifo_reuse_after_deallocate_away_from_frontier() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let first = engine.allocate(10);
      let _second = engine.allocate(10);
      engine.deallocate(first);

      let reused = engine.allocate(10);
      assert_eq!(reused, first);
    }
  }

  #[test]
  fn deallocate_at_frontier_retreats_it() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let begin = engine.begin as usize;
      let p = engine.allocate(40);
      engine.deallocate(p);
      assert_eq!(engine.frontier as usize, begin);

      // the bytes are back: a fresh allocate reuses the same address
      let reused = engine.allocate(40);
      assert_eq!(reused as usize, begin + Header::SIZE);
    }
  }

  #[test]
  fn reallocate_in_place_shrink_at_frontier() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let p = engine.allocate(40);
      let frontier_before = engine.frontier as usize;

      let shrunk = engine.reallocate(p, 20);
      assert_eq!(shrunk, p);
      assert_eq!(engine.size(p), 32);
      assert_eq!(engine.frontier as usize, frontier_before - 16);
    }
  }

  #[test]
  fn reallocate_in_place_grow_at_frontier() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let p = engine.allocate(16);
      let grown = engine.reallocate(p, 64);
      assert_eq!(grown, p);
      assert_eq!(engine.size(p), 64);
    }
  }

  #[test]
  fn reallocate_same_size_is_identity() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let p = engine.allocate(16);
      assert_eq!(engine.reallocate(p, engine.size(p)), p);
    }
  }

  #[test]
  fn reallocate_null_is_allocate() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let p = engine.reallocate(ptr::null_mut(), 16);
      assert!(!p.is_null());
    }
  }

  #[test]
  fn reallocate_to_zero_deallocates() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let begin = engine.begin as usize;
      let p = engine.allocate(16);
      let result = engine.reallocate(p, 0);
      assert!(result.is_null());
      assert_eq!(engine.frontier as usize, begin);
    }
  }

  #[test]
  fn reallocate_not_at_frontier_copies_content() {
    let mut buf = Arena([0u8; 1024]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let p = engine.allocate(16);
      let pinning = engine.allocate(16); // keeps p off the frontier
      let _ = pinning;

      *p = 0xAB;
      *p.add(1) = 0xCD;

      let moved = engine.reallocate(p, 64);
      assert_ne!(moved, p);
      assert_eq!(*moved, 0xAB);
      assert_eq!(*moved.add(1), 0xCD);
      assert_eq!(engine.size(moved), 64);
    }
  }

  #[test]
  fn arena_exhaustion_then_recovery() {
    let mut buf = Arena([0u8; 512]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let mut pointers = Vec::new();
      loop {
        let p = engine.allocate(32);
        if p.is_null() {
          break;
        }
        pointers.push(p);
      }
      assert!(!pointers.is_empty());
      assert!(engine.allocate(32).is_null());

      let freed = pointers.pop().unwrap();
      engine.deallocate(freed);
      assert!(!engine.allocate(32).is_null());
    }
  }

  #[test]
  fn tree_split_keeps_residual_available() {
    let mut buf = Arena([0u8; 1 << 20]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      let big = engine.allocate((1 << 20) - 8192);
      assert!(!big.is_null());
      let pinning = engine.allocate(16); // keeps big off the frontier once freed
      let _ = pinning;
      engine.deallocate(big);

      let small_from_tree = engine.allocate(MAX_SLOT_SIZE + 16);
      assert!(!small_from_tree.is_null());
      assert_eq!(engine.size(small_from_tree), align::align_up(MAX_SLOT_SIZE + 16));

      // the residual should still be retrievable for a further big request
      let residual = engine.allocate(MAX_SLOT_SIZE + 32);
      assert!(!residual.is_null());
    }
  }

  #[test]
  fn no_split_when_residual_fits_a_slot() {
    let mut buf = Arena([0u8; 1 << 16]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      // carve a tree-sized block, then free it so retrieve_block finds it
      let requested = MAX_SLOT_SIZE + Header::SIZE + ALIGNMENT;
      let big = engine.allocate(requested);
      assert!(!big.is_null());
      let original_capacity = engine.size(big);
      engine.deallocate(big);

      // ask for just enough less that the residual would fall into slot range
      let reused = engine.allocate(requested - ALIGNMENT);
      assert!(!reused.is_null());
      assert_eq!(reused, big);
      assert_eq!(engine.size(reused), original_capacity);
    }
  }

  #[test]
  fn init_twice_fails() {
    let mut buf = Arena([0u8; 256]);
    let mut engine = new_engine(&mut buf);
    unsafe {
      assert!(!engine.init(buf.0.as_mut_ptr(), 256));
    }
  }

  #[test]
  fn init_on_too_small_buffer_fails() {
    let mut buf = Arena([0u8; 4]);
    let mut engine = Engine::new();
    unsafe {
      assert!(!engine.init(buf.0.as_mut_ptr(), buf.0.len()));
      assert!(engine.allocate(1).is_null());
    }
  }

  #[test]
  fn size_of_null_is_zero() {
    let mut buf = Arena([0u8; 64]);
    let engine = new_engine(&mut buf);
    unsafe {
      assert_eq!(engine.size(ptr::null_mut()), 0);
    }
  }

  #[test]
  fn smoke_mix_preserves_sentinel_bytes() {
    let mut buf = Arena([0u8; 1 << 18]);
    let mut engine = new_engine(&mut buf);

    struct Live {
      ptr: *mut u8,
      sentinel: u8,
      size: usize,
    }

    let mut live: Vec<Live> = Vec::new();
    let mut rng_state: u64 = 0x1234_5678_9abc_def0;
    let mut next = || {
      rng_state ^= rng_state << 13;
      rng_state ^= rng_state >> 7;
      rng_state ^= rng_state << 17;
      rng_state
    };

    unsafe {
      for _ in 0..20_000 {
        let choice = next() % 3;
        if choice == 0 && !live.is_empty() {
          let index = (next() as usize) % live.len();
          let item = live.swap_remove(index);
          assert_eq!(*item.ptr, item.sentinel);
          engine.deallocate(item.ptr);
        } else if choice == 1 && !live.is_empty() {
          let index = (next() as usize) % live.len();
          let new_size = (next() as usize % (MAX_SLOT_SIZE * 2)) + 1;
          let mut item = live.swap_remove(index);
          let moved = engine.reallocate(item.ptr, new_size);
          if !moved.is_null() {
            assert_eq!(*moved, item.sentinel);
            item.ptr = moved;
            item.size = new_size;
            live.push(item);
          }
        } else {
          let size = (next() as usize % (MAX_SLOT_SIZE * 2)) + 1;
          let p = engine.allocate(size);
          if !p.is_null() {
            let sentinel = (next() & 0xff) as u8;
            *p = sentinel;
            live.push(Live { ptr: p, sentinel, size });
          }
        }
      }

      for item in &live {
        assert_eq!(*item.ptr, item.sentinel);
      }
    }
  }
}
