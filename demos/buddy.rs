use std::{alloc::Layout, io::Read, ptr};

use rbuddy::{BuddyHeap, HeapConfig};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the mapping with tools like `pmap` or
/// `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_stats(
  label: &str,
  heap: &BuddyHeap,
) {
  let stats = heap.stats();

  println!(
    "[{}] PID = {}, used = {} bytes in {} blocks, free = {} bytes in {} blocks, largest free = {}",
    label,
    std::process::id(),
    stats.used_bytes,
    stats.used_blocks,
    stats.free_bytes,
    stats.free_blocks,
    stats.largest_free,
  );
}

fn main() {
  env_logger::init();

  // A small heap keeps the block dumps readable.
  let mut heap = BuddyHeap::new(HeapConfig::new(1024).with_min_chunk_size(32));

  // Nothing is mapped yet; the first allocation maps the region.
  println!("initialized before first alloc? {}", heap.is_initialized());

  // --------------------------------------------------------------------
  // 1) Allocate 40 bytes. The request rounds up to 64, and the single
  //    1024 byte block is halved four times to get there.
  // --------------------------------------------------------------------
  let first_block = heap.alloc(40);
  println!("\n[1] alloc(40) = {:?}, region base = {:?}", first_block, heap.base());
  heap.print_blocks();

  unsafe {
    let first_ptr = first_block as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_ptr.read());
  }

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 64 bytes. The buddy left over from step 1 fits exactly,
  //    so no split happens.
  // --------------------------------------------------------------------
  let second_block = heap.alloc(64);
  println!("\n[2] alloc(64) = {:?}", second_block);
  println!(
    "[2] buddy of first_block? {}",
    second_block as usize == first_block as usize ^ 64
  );

  unsafe { ptr::write_bytes(second_block, 0xAB, 64) };
  heap.print_blocks();

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Allocate with a layout. Blocks are aligned to their own size, so an
  //    alignment of 256 is served by a 256 byte block.
  // --------------------------------------------------------------------
  let layout = Layout::from_size_align(16, 256).unwrap();
  let third_block = heap.allocate(layout);
  println!(
    "\n[3] allocate(size = 16, align = 256) = {:?}, offset from base = {:#x}",
    third_block,
    third_block as usize - heap.base() as usize
  );
  print_stats("3", &heap);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Ask for more than is left.
  // --------------------------------------------------------------------
  let too_big = heap.alloc(1024);
  println!("\n[4] alloc(1024) while blocks are live = {:?}", too_big);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Free everything. Each free merges with the buddy as far as it can,
  //    ending with a single free block of 1024 bytes.
  // --------------------------------------------------------------------
  unsafe {
    heap.free(first_block);
    println!("\n[5] freed first_block (its buddy is still in use, no merge)");
    heap.print_blocks();

    heap.free(second_block);
    heap.deallocate(third_block);
  }

  println!("\n[5] freed everything");
  heap.print_blocks();
  print_stats("5", &heap);

  // --------------------------------------------------------------------
  // 6) Return the region to the OS.
  // --------------------------------------------------------------------
  heap.teardown();
  println!("\n[6] initialized after teardown? {}", heap.is_initialized());
}
