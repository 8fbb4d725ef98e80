//! The interposition shim: a process-wide switch between the system
//! allocator and a benchmark-backed [`Engine`], plus the C entry points a
//! benchmark harness actually links against.
//!
//! ```text
//!   malloc/calloc/realloc/free/malloc_size
//!                  │
//!                  ▼
//!         Replacer::instance()
//!                  │
//!        ┌─────────┴─────────┐
//!        ▼                   ▼
//!   passthrough          BenchmarkAllocator
//!   (libc::malloc &c.)   (Engine over a 1 GiB
//!                         libc-backed buffer)
//! ```
//!
//! Only one benchmark allocator may exist at a time; `enable`/`disable`
//! are a paired, non-reentrant contract exactly like the teacher's
//! `Enable`/`DisableBenchmarkAllocator` — calling them out of order is a
//! programmer error, not a recoverable one, so it panics rather than
//! returning a `Result`.

use std::alloc::{GlobalAlloc, Layout};
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::align::ALIGNMENT;
use crate::engine::Engine;

/// Default size of the libc-backed buffer handed to a freshly enabled
/// benchmark allocator.
pub const DEFAULT_ARENA_BYTES: usize = 1024 * 1024 * 1024;

/// An [`Engine`] plus the raw buffer it was carved out of, freed together.
struct BenchmarkAllocator {
  engine: Engine,
  buffer: *mut u8,
}

impl BenchmarkAllocator {
  fn new(arena_bytes: usize) -> Self {
    let buffer = unsafe { libc::malloc(arena_bytes) as *mut u8 };
    assert!(!buffer.is_null(), "backing allocation for the benchmark arena failed");

    let mut engine = Engine::new();
    let ok = unsafe { engine.init(buffer, arena_bytes) };
    assert!(ok, "benchmark arena too small to initialize");

    Self { engine, buffer }
  }
}

impl Drop for BenchmarkAllocator {
  fn drop(&mut self) {
    unsafe { libc::free(self.buffer as *mut libc::c_void) };
  }
}

// The buffer is exclusively owned by this struct for its lifetime; nothing
// else ever touches it, so moving the whole thing across threads is sound.
unsafe impl Send for BenchmarkAllocator {}

enum Active {
  /// Calls fall through to the platform's own malloc family.
  System,
  Benchmark(BenchmarkAllocator),
}

struct Replacer {
  active: Mutex<Active>,
}

impl Replacer {
  fn instance() -> &'static Replacer {
    static INSTANCE: OnceLock<Replacer> = OnceLock::new();
    INSTANCE.get_or_init(|| Replacer { active: Mutex::new(Active::System) })
  }
}

/// Routes subsequent `malloc`/`free`/`realloc`/`calloc`/`malloc_size` calls
/// to a fresh [`Engine`] over a `arena_bytes`-byte buffer, or back to the
/// system allocator if `use_subject` is false.
///
/// # Panics
/// If a benchmark allocator is already active. Mirrors the teacher's
/// fatal-assertion reentrancy contract: enable/disable are paired and the
/// caller is responsible for not nesting them.
pub fn enable_benchmark_allocator(use_subject: bool, arena_bytes: usize) {
  let replacer = Replacer::instance();
  let mut active = replacer.active.lock().unwrap_or_else(PoisonError::into_inner);
  if !matches!(*active, Active::System) {
    drop(active);
    panic!("a benchmark allocator is already active");
  }

  *active = if use_subject {
    Active::Benchmark(BenchmarkAllocator::new(arena_bytes))
  } else {
    Active::System
  };
}

/// [`enable_benchmark_allocator`] with the teacher's default 1 GiB arena.
pub fn enable_default_benchmark_allocator(use_subject: bool) {
  enable_benchmark_allocator(use_subject, DEFAULT_ARENA_BYTES);
}

/// Tears down the active benchmark allocator, if any, and routes calls
/// back to the system allocator.
pub fn disable_benchmark_allocator() {
  let replacer = Replacer::instance();
  let mut active = replacer.active.lock().unwrap_or_else(PoisonError::into_inner);
  *active = Active::System;
}

/// Runs `f` with exclusive access to the active [`Engine`], or not at all
/// if the system allocator is currently selected.
fn with_active_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Option<R> {
  let replacer = Replacer::instance();
  let mut active = replacer.active.lock().unwrap_or_else(PoisonError::into_inner);
  match &mut *active {
    Active::System => None,
    Active::Benchmark(benchmark) => Some(f(&mut benchmark.engine)),
  }
}

/// # Safety
/// See [`Engine::allocate`]; additionally, `n` is assumed to already be a
/// legal `Layout` size for the caller's purposes (this entry point performs
/// no `Layout` validation of its own, matching `malloc`'s C contract).
pub unsafe fn malloc(n: usize) -> *mut u8 {
  match with_active_engine(|engine| unsafe { engine.allocate(n) }) {
    Some(p) => p,
    None => unsafe { libc::malloc(n) as *mut u8 },
  }
}

/// `count * size` is checked for overflow; an overflow is treated as an
/// allocation failure (null) rather than the original's silent wraparound.
///
/// # Safety
/// See [`Engine::allocate`].
pub unsafe fn calloc(count: usize, size: usize) -> *mut u8 {
  let Some(total) = count.checked_mul(size) else {
    return std::ptr::null_mut();
  };

  match with_active_engine(|engine| unsafe { engine.allocate(total) }) {
    Some(p) => {
      if !p.is_null() {
        unsafe { std::ptr::write_bytes(p, 0, total) };
      }
      p
    }
    None => unsafe { libc::calloc(count, size) as *mut u8 },
  }
}

/// # Safety
/// See [`Engine::reallocate`].
pub unsafe fn realloc(p: *mut u8, n: usize) -> *mut u8 {
  match with_active_engine(|engine| unsafe { engine.reallocate(p, n) }) {
    Some(new_p) => new_p,
    None => unsafe { libc::realloc(p as *mut libc::c_void, n) as *mut u8 },
  }
}

/// # Safety
/// See [`Engine::deallocate`].
pub unsafe fn free(p: *mut u8) {
  match with_active_engine(|engine| unsafe { engine.deallocate(p) }) {
    Some(()) => {}
    None => unsafe { libc::free(p as *mut libc::c_void) },
  }
}

/// # Safety
/// See [`Engine::size`].
pub unsafe fn malloc_size(p: *mut u8) -> usize {
  match with_active_engine(|engine| unsafe { engine.size(p) }) {
    Some(size) => size,
    None => unsafe { libc::malloc_usable_size(p as *mut libc::c_void) },
  }
}

/// `extern "C"` entry points matching the `malloc`/`calloc`/`realloc`/
/// `free`/`malloc_size` free functions above one-to-one, for callers that
/// want to interpose at the FFI boundary themselves rather than embed
/// [`ReplacerGlobalAlloc`].
///
/// # Safety
/// Each mirrors the safety contract of its [`Engine`] counterpart.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rallocator_malloc(n: usize) -> *mut u8 {
  unsafe { malloc(n) }
}

/// # Safety
/// See [`calloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rallocator_calloc(count: usize, size: usize) -> *mut u8 {
  unsafe { calloc(count, size) }
}

/// # Safety
/// See [`realloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rallocator_realloc(p: *mut u8, n: usize) -> *mut u8 {
  unsafe { realloc(p, n) }
}

/// # Safety
/// See [`free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rallocator_free(p: *mut u8) {
  unsafe { free(p) }
}

/// # Safety
/// See [`malloc_size`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rallocator_malloc_size(p: *mut u8) -> usize {
  unsafe { malloc_size(p) }
}

/// Rounds `ptr` up to the next multiple of `align`.
///
/// # Safety
/// `align` must be a power of two and `ptr` must point far enough inside
/// its allocation that the rounded-up address is still in bounds.
unsafe fn align_ptr_up(ptr: *mut u8, align: usize) -> *mut u8 {
  let addr = ptr as usize;
  let aligned = (addr + align - 1) & !(align - 1);
  aligned as *mut u8
}

/// Size, in bytes, of the stash slot `alloc` tucks just before an
/// over-aligned pointer so `dealloc`/`realloc` can recover the real
/// allocation.
const STASH_SIZE: usize = std::mem::size_of::<*mut u8>();

/// A [`GlobalAlloc`] front end over the same [`Replacer`] singleton, for
/// embedding this crate as `#[global_allocator]` directly rather than
/// linking it in as a C symbol interposer.
///
/// `malloc`/`free`/`realloc` only guarantee [`ALIGNMENT`]-byte alignment
/// (the engine's own `A`), so a `layout.align()` beyond that is handled by
/// over-allocating and stashing the real pointer just before the aligned
/// one handed back to the caller — the same trick
/// `examples/Dylan-DPC-emballoc/src/lib.rs`'s `Allocator::alloc` uses,
/// adapted to a header-relative engine (this allocator's `free` can only
/// recover a block from the exact pointer `allocate` returned, unlike
/// emballoc's entry list, which can locate a block from any pointer inside
/// it — hence stashing the original pointer rather than just forwarding
/// the shifted one).
pub struct ReplacerGlobalAlloc;

unsafe impl GlobalAlloc for ReplacerGlobalAlloc {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    let align = layout.align();
    if align <= ALIGNMENT {
      return unsafe { malloc(layout.size()) };
    }

    unsafe {
      let raw = malloc(layout.size() + align + STASH_SIZE);
      if raw.is_null() {
        return std::ptr::null_mut();
      }
      let aligned = align_ptr_up(raw.add(STASH_SIZE), align);
      (aligned as *mut *mut u8).sub(1).write(raw);
      aligned
    }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
    if layout.align() <= ALIGNMENT {
      return unsafe { free(ptr) };
    }
    unsafe {
      let raw = (ptr as *mut *mut u8).sub(1).read();
      free(raw)
    }
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    let align = layout.align();
    if align <= ALIGNMENT {
      return unsafe { realloc(ptr, new_size) };
    }

    // The over-aligned path has no in-place engine block to grow or
    // shrink (the pointer handed to the caller isn't the one `allocate`
    // returned), so fall back to the default GlobalAlloc::realloc shape:
    // allocate the new layout, copy, free the old block.
    unsafe {
      let Ok(new_layout) = Layout::from_size_align(new_size, align) else {
        return std::ptr::null_mut();
      };
      let new_ptr = self.alloc(new_layout);
      if !new_ptr.is_null() {
        let copy_len = layout.size().min(new_size);
        std::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
        self.dealloc(ptr, layout);
      }
      new_ptr
    }
  }
}

const _: () = assert!(ALIGNMENT >= std::mem::align_of::<usize>());
