//! Small-class free lists: a dense array of singly-linked, intrusive LIFO
//! stacks, one per `ALIGNMENT`-sized class up to `MAX_SLOT_SIZE`.
//!
//! ```text
//!   slots[i]  ──►  [payload] ──► [payload] ──► null
//!                     ▲
//!                     └── link word overlaid on the freed payload itself,
//!                         nothing is allocated to track these lists
//! ```

use std::ptr;

use crate::align::SLOT_COUNT;
use crate::header::Header;

/// The link word overlaid on a freed small-class payload's first bytes.
struct Link {
  next: *mut Link,
}

/// Head of one size class's free list.
#[derive(Clone, Copy)]
struct SlotList {
  head: *mut Link,
}

impl SlotList {
  const fn new() -> Self {
    Self { head: ptr::null_mut() }
  }

  /// Detaches and returns the head of the list, or null if empty. The
  /// contents of the popped payload are indeterminate afterward.
  ///
  /// # Safety
  /// Every live link in this list must precede a valid `Header`.
  unsafe fn pop(&mut self) -> *mut Header {
    if self.head.is_null() {
      return ptr::null_mut();
    }
    unsafe {
      let link = self.head;
      self.head = (*link).next;
      Header::of(link as *mut u8)
    }
  }

  /// Overlays a link onto `header`'s payload and pushes it onto the list.
  ///
  /// # Safety
  /// The payload must be at least `size_of::<Link>()` bytes (true for
  /// every size class admitted here, since `ALIGNMENT` covers one pointer)
  /// and must not be read as a live allocation afterward.
  unsafe fn push(&mut self, header: *mut Header) {
    unsafe {
      let slot = Header::payload_begin(header) as *mut Link;
      slot.write(Link { next: self.head });
      self.head = slot;
    }
  }
}

/// The dense array of small-class free lists, indexed by
/// [`crate::align::slot_index`].
pub struct SlotArray {
  slots: [SlotList; SLOT_COUNT],
}

impl SlotArray {
  pub const fn new() -> Self {
    Self { slots: [SlotList::new(); SLOT_COUNT] }
  }

  /// # Safety
  /// See [`SlotList::pop`].
  #[inline]
  pub unsafe fn pop(&mut self, index: usize) -> *mut Header {
    unsafe { self.slots[index].pop() }
  }

  /// # Safety
  /// See [`SlotList::push`].
  #[inline]
  pub unsafe fn push(&mut self, index: usize, header: *mut Header) {
    unsafe { self.slots[index].push(header) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[repr(align(16))]
  struct Aligned([u8; 256]);

  #[test]
  fn lifo_reuse() {
    let mut buf = Aligned([0u8; 256]);
    let base = buf.0.as_mut_ptr();
    let mut slots = SlotArray::new();

    unsafe {
      let h1 = Header::write_new(base, 16);
      let h2 = Header::write_new(base.add(32), 16);

      slots.push(0, h1);
      slots.push(0, h2);

      // last pushed (h2) pops first
      assert_eq!(slots.pop(0), h2);
      assert_eq!(slots.pop(0), h1);
      assert!(slots.pop(0).is_null());
    }
  }

  #[test]
  fn empty_slot_pops_null() {
    let mut slots = SlotArray::new();
    unsafe {
      assert!(slots.pop(5).is_null());
    }
  }
}
