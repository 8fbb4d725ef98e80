use std::io::Read;

use rballoc::align::{ALIGNMENT, MAX_SLOT_SIZE};
use rballoc::engine::Engine;

/// Waits until the user presses ENTER.
/// Useful when you want to pause between steps and eyeball the printed
/// state before the next allocation happens.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_alloc(label: &str, n: usize, p: *mut u8, engine: &Engine) {
  unsafe {
    println!(
      "[{label}] requested = {n}, ptr = {:?}, Size() = {}, ptr % {ALIGNMENT} = {}",
      p,
      engine.size(p),
      p as usize % ALIGNMENT,
    );
  }
}

fn main() {
  // The arena is just a byte buffer the caller owns; the engine never
  // allocates memory of its own.
  let mut buffer = vec![0u8; 1024 * 1024];
  let mut engine = Engine::new();

  unsafe {
    let ok = engine.init(buffer.as_mut_ptr(), buffer.len());
    println!("[init] 1 MiB arena, Init() = {ok}");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate a small block. This routes to the small-class free list
    //    array, carved fresh off the frontier on a first ask.
    // --------------------------------------------------------------------
    let first = engine.allocate(10);
    println!("\n[1] Allocate(10) — small class, carved at the frontier");
    print_alloc("1", 10, first, &engine);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate a second block of the same rounded size, then free the
    //    first one. It isn't at the frontier anymore, so it goes onto the
    //    size-16 free list instead of retreating the frontier.
    // --------------------------------------------------------------------
    let second = engine.allocate(10);
    println!("\n[2] Allocate(10) again — pins `first` away from the frontier");
    print_alloc("2", 10, second, &engine);

    engine.deallocate(first);
    println!("[2] Deallocated `first` — it's not at the frontier, so it joins the free list");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate the same size again: LIFO reuse hands back `first`'s
    //    address without touching the frontier at all.
    // --------------------------------------------------------------------
    let third = engine.allocate(10);
    println!("\n[3] Allocate(10) — reuses the free list (LIFO)");
    print_alloc("3", 10, third, &engine);
    println!("[3] third == first? {}", third == first);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Allocate something past the small-class ceiling. This routes to
    //    the red-black tree instead — empty right now, so it's a carve.
    // --------------------------------------------------------------------
    let big = engine.allocate(MAX_SLOT_SIZE + 64);
    println!("\n[4] Allocate(S_MAX + 64) — tree class, carved (tree is empty)");
    print_alloc("4", MAX_SLOT_SIZE + 64, big, &engine);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Free the big block away from the frontier (pin it with another
    //    allocation first), then ask for a smaller tree-class size. The
    //    engine should split the recovered block and keep the residual
    //    in the tree for a future big request.
    // --------------------------------------------------------------------
    let _pin = engine.allocate(32);
    engine.deallocate(big);
    println!("\n[5] Freed the tree block (pinned by a small allocation first)");

    let smaller = engine.allocate(MAX_SLOT_SIZE + 16);
    println!("[5] Allocate(S_MAX + 16) — tree hit, split off a residual");
    print_alloc("5", MAX_SLOT_SIZE + 16, smaller, &engine);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Reallocate the small allocation from step 1's slot while it's at
    //    the frontier — shrinking and growing in place, no copy.
    // --------------------------------------------------------------------
    let at_frontier = engine.allocate(64);
    println!("\n[6] Allocate(64) at the frontier, then grow/shrink it in place");
    print_alloc("6 (before)", 64, at_frontier, &engine);

    let grown = engine.reallocate(at_frontier, 256);
    println!("[6] Reallocate(_, 256) — frontier has room, grows in place");
    print_alloc("6 (grown)", 256, grown, &engine);
    assert_eq!(grown, at_frontier);

    let shrunk = engine.reallocate(grown, 32);
    println!("[6] Reallocate(_, 32) — shrinks in place, frontier retreats");
    print_alloc("6 (shrunk)", 32, shrunk, &engine);
    assert_eq!(shrunk, grown);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Reallocate something NOT at the frontier: this falls back to
    //    allocate-copy-deallocate, preserving the original bytes.
    // --------------------------------------------------------------------
    *third = 0xAB;
    let moved = engine.reallocate(third, 512);
    println!("\n[7] Reallocate(third, 512) — not at the frontier, copies");
    print_alloc("7", 512, moved, &engine);
    println!("[7] moved == third? {} (expect false)", moved == third);
    println!("[7] sentinel byte preserved? {}", *moved == 0xAB);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 8) Drive the arena to exhaustion with fixed-size allocations, then
    //    free one and show the space becomes available again.
    // --------------------------------------------------------------------
    let mut filled = Vec::new();
    loop {
      let p = engine.allocate(4096);
      if p.is_null() {
        break;
      }
      filled.push(p);
    }
    println!("\n[8] Filled the arena with {} 4 KiB blocks until Allocate() returned null", filled.len());

    let freed = filled.pop().unwrap();
    engine.deallocate(freed);
    let reused = engine.allocate(4096);
    println!("[8] Freed one block back; next Allocate(4096) succeeded: {}", !reused.is_null());

    println!("\n[9] End of walkthrough.");
  }
}
