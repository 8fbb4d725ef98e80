//! Alignment constants and the rounding helper shared by every other module.
//!
//! Every user pointer this crate ever hands out, and the header that
//! precedes it, is aligned to [`ALIGNMENT`] bytes. The size-class split
//! point and the free-list slot count fall directly out of that constant.

/// Alignment of every user pointer and of the block header, in bytes.
///
/// Must be a power of two; enforced by construction rather than a runtime
/// check, since it is a compile-time constant.
pub const ALIGNMENT: usize = 16;

/// Largest payload size served by the small-class free-list array.
/// Sizes strictly greater than this are routed to the size-indexed tree.
pub const MAX_SLOT_SIZE: usize = 16 * 1024;

/// Number of small-class free lists; slot index for a size `s` is
/// `(s / ALIGNMENT) - 1`.
pub const SLOT_COUNT: usize = MAX_SLOT_SIZE / ALIGNMENT;

/// Rounds `value` up to the next multiple of `ALIGNMENT`.
///
/// # Examples
///
/// ```rust
/// use rballoc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// `const fn` form of [`align!`], for use where a macro can't appear (const
/// generics, array lengths, default trait impls).
#[inline]
pub const fn align_up(value: usize) -> usize {
  align!(value)
}

/// Slot index for a positive multiple of `ALIGNMENT`, or `None` if `size`
/// falls in the tree's range (`size > MAX_SLOT_SIZE`).
///
/// `size` must already be `ALIGNMENT`-aligned; this is only ever called
/// with sizes produced by [`align_up`].
#[inline]
pub const fn slot_index(size: usize) -> Option<usize> {
  let index = (size / ALIGNMENT) - 1;
  if index < SLOT_COUNT { Some(index) } else { None }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align_up() {
    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));
      let expected = ALIGNMENT * (i + 1);
      for size in sizes {
        assert_eq!(expected, align_up(size));
      }
    }
    assert_eq!(align_up(0), 0);
  }

  #[test]
  fn test_slot_index() {
    assert_eq!(slot_index(ALIGNMENT), Some(0));
    assert_eq!(slot_index(2 * ALIGNMENT), Some(1));
    assert_eq!(slot_index(MAX_SLOT_SIZE), Some(SLOT_COUNT - 1));
    assert_eq!(slot_index(MAX_SLOT_SIZE + ALIGNMENT), None);
  }
}
