//! The size-indexed red-black tree that backs every free block too large
//! for the small-class array.
//!
//! Nodes are intrusively overlaid onto the free payload itself — nothing
//! outside the arena is allocated to track them. Blocks that share a key
//! (payload size) never create a second tree node: they're chained off a
//! `same_size` pointer hanging from the representative node, which keeps
//! inserts and detaches on equal sizes O(1) and avoids needless rebalances.
//!
//! The rotation and fix-up logic below is the classical textbook
//! red-black tree, adapted to the intrusive, parent-pointer-carrying,
//! pure-pointer style this arena requires.

use std::mem;
use std::ptr;

use crate::header::Header;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
  Red,
  Black,
}

/// A free block's tree bookkeeping, overlaid onto its payload.
#[repr(C)]
struct TreeNode {
  left: *mut TreeNode,
  right: *mut TreeNode,
  parent: *mut TreeNode,
  color: Color,
  size: usize,
  same_size: *mut TreeNode,
}

impl TreeNode {
  fn new(size: usize) -> Self {
    Self {
      left: ptr::null_mut(),
      right: ptr::null_mut(),
      parent: ptr::null_mut(),
      color: Color::Red,
      size,
      same_size: ptr::null_mut(),
    }
  }
}

/// # Safety
/// `node` must be non-null and have a non-null parent.
unsafe fn is_left(node: *mut TreeNode) -> bool {
  unsafe { node == (*(*node).parent).left }
}

/// # Safety
/// `node` must be non-null.
unsafe fn sibling(node: *mut TreeNode) -> *mut TreeNode {
  unsafe {
    let parent = (*node).parent;
    if parent.is_null() {
      return ptr::null_mut();
    }
    if is_left(node) { (*parent).right } else { (*parent).left }
  }
}

/// # Safety
/// `node` must be non-null.
unsafe fn uncle(node: *mut TreeNode) -> *mut TreeNode {
  unsafe {
    let parent = (*node).parent;
    if parent.is_null() || (*parent).parent.is_null() {
      return ptr::null_mut();
    }
    let grandparent = (*parent).parent;
    if is_left(parent) { (*grandparent).right } else { (*grandparent).left }
  }
}

/// # Safety
/// `node` must be non-null and have a non-null parent.
unsafe fn replace_self_on_parent(node: *mut TreeNode, replacer: *mut TreeNode) {
  unsafe {
    let parent = (*node).parent;
    if is_left(node) {
      (*parent).left = replacer;
    } else {
      (*parent).right = replacer;
    }
  }
}

/// # Safety
/// `node` and `new_parent` must be non-null.
unsafe fn move_down(node: *mut TreeNode, new_parent: *mut TreeNode) {
  unsafe {
    if !(*node).parent.is_null() {
      replace_self_on_parent(node, new_parent);
    }
    (*new_parent).parent = (*node).parent;
    (*node).parent = new_parent;
  }
}

/// # Safety
/// `node` must be non-null.
unsafe fn has_red_child(node: *mut TreeNode) -> bool {
  unsafe {
    let left_red = !(*node).left.is_null() && (*(*node).left).color == Color::Red;
    let right_red = !(*node).right.is_null() && (*(*node).right).color == Color::Red;
    left_red || right_red
  }
}

/// A red-black tree of free blocks, keyed by payload size.
pub struct SizeTree {
  root: *mut TreeNode,
}

impl SizeTree {
  pub const fn new() -> Self {
    Self { root: ptr::null_mut() }
  }

  /// Inserts a freed block, either as a new node or onto an existing
  /// node's same-size chain.
  ///
  /// # Safety
  /// `header`'s payload must be at least `size_of::<TreeNode>()` bytes
  /// (guaranteed for every size routed here, since the tree only ever
  /// sees sizes above `MAX_SLOT_SIZE`) and must not be read as a live
  /// allocation afterward.
  pub unsafe fn insert(&mut self, header: *mut Header) {
    unsafe {
      let size = Header::size(header);
      let new_node = Header::payload_begin(header) as *mut TreeNode;
      new_node.write(TreeNode::new(size));

      if self.root.is_null() {
        (*new_node).color = Color::Black;
        self.root = new_node;
        return;
      }

      let parent = self.lookup_node(size, false);
      if (*parent).size == size {
        (*new_node).same_size = (*parent).same_size;
        (*parent).same_size = new_node;
        return;
      }

      (*new_node).parent = parent;
      if size < (*parent).size {
        (*parent).left = new_node;
      } else {
        (*parent).right = new_node;
      }

      self.fix_red_red(new_node);
    }
  }

  /// Lower-bound lookup: detaches and returns the header of the smallest
  /// free block with capacity at least `size`, or null if none exists.
  ///
  /// # Safety
  /// The tree must only contain nodes written by [`Self::insert`].
  pub unsafe fn retrieve_block(&mut self, size: usize) -> *mut Header {
    unsafe {
      let node = self.lookup_node(size, true);
      if node.is_null() {
        return ptr::null_mut();
      }
      if !(*node).same_size.is_null() {
        let same_size_node = (*node).same_size;
        (*node).same_size = (*same_size_node).same_size;
        return Header::of(same_size_node as *mut u8);
      }
      self.detach_node(node);
      Header::of(node as *mut u8)
    }
  }

  unsafe fn lookup_node(&self, size: usize, lower_bound: bool) -> *mut TreeNode {
    unsafe {
      let mut node = self.root;
      let mut lower_bound_node: *mut TreeNode = ptr::null_mut();
      while !node.is_null() && size != (*node).size {
        if size < (*node).size {
          lower_bound_node = node;
          if (*node).left.is_null() {
            break;
          }
          node = (*node).left;
        } else {
          if (*node).right.is_null() {
            break;
          }
          node = (*node).right;
        }
      }
      if !node.is_null() && (*node).size == size {
        lower_bound_node = node;
      }
      if lower_bound { lower_bound_node } else { node }
    }
  }

  unsafe fn find_replacer(&self, node: *mut TreeNode) -> *mut TreeNode {
    unsafe {
      if !(*node).left.is_null() && !(*node).right.is_null() {
        let mut replacer = (*node).right;
        while !(*replacer).left.is_null() {
          replacer = (*replacer).left;
        }
        return replacer;
      }
      if !(*node).left.is_null() { (*node).left } else { (*node).right }
    }
  }

  unsafe fn detach_leaf(&mut self, detaching_node: *mut TreeNode) {
    unsafe {
      if detaching_node == self.root {
        self.root = ptr::null_mut();
        return;
      }

      if (*detaching_node).color == Color::Black {
        self.fix_double_black(detaching_node);
      } else {
        let sib = sibling(detaching_node);
        if !sib.is_null() {
          (*sib).color = Color::Red;
        }
      }

      replace_self_on_parent(detaching_node, ptr::null_mut());
    }
  }

  unsafe fn detach_node_with_one_child(&mut self, detaching_node: *mut TreeNode, replacer: *mut TreeNode) {
    unsafe {
      if detaching_node == self.root {
        (*replacer).parent = ptr::null_mut();
        (*replacer).color = (*detaching_node).color;
        self.root = replacer;
        return;
      }

      replace_self_on_parent(detaching_node, replacer);
      (*replacer).parent = (*detaching_node).parent;
      if (*replacer).color == Color::Black && (*detaching_node).color == Color::Black {
        self.fix_double_black(replacer);
      } else {
        (*replacer).color = Color::Black;
      }
    }
  }

  unsafe fn swap_detaching_node_with_replacer(&mut self, detaching_node: *mut TreeNode, replacer: *mut TreeNode) {
    unsafe {
      if !(*detaching_node).parent.is_null() {
        replace_self_on_parent(detaching_node, replacer);
      } else {
        self.root = replacer;
      }

      if !(*detaching_node).left.is_null() && (*detaching_node).left != replacer {
        (*(*detaching_node).left).parent = replacer;
      }
      if !(*detaching_node).right.is_null() && (*detaching_node).right != replacer {
        (*(*detaching_node).right).parent = replacer;
      }

      if !(*replacer).left.is_null() {
        (*(*replacer).left).parent = detaching_node;
      }
      if !(*replacer).right.is_null() {
        (*(*replacer).right).parent = detaching_node;
      }

      if (*replacer).parent == detaching_node {
        (*replacer).parent = (*detaching_node).parent;
        (*detaching_node).parent = replacer;
      } else {
        replace_self_on_parent(replacer, detaching_node);
        mem::swap(&mut (*replacer).parent, &mut (*detaching_node).parent);
      }
      mem::swap(&mut (*replacer).left, &mut (*detaching_node).left);
      mem::swap(&mut (*replacer).right, &mut (*detaching_node).right);
      mem::swap(&mut (*replacer).color, &mut (*detaching_node).color);
    }
  }

  unsafe fn detach_node(&mut self, detaching_node: *mut TreeNode) {
    unsafe {
      let replacer = self.find_replacer(detaching_node);
      if replacer.is_null() {
        self.detach_leaf(detaching_node);
        return;
      }

      if (*detaching_node).left.is_null() || (*detaching_node).right.is_null() {
        self.detach_node_with_one_child(detaching_node, replacer);
        return;
      }

      self.swap_detaching_node_with_replacer(detaching_node, replacer);
      self.detach_node(detaching_node);
    }
  }

  unsafe fn fix_red_red(&mut self, node: *mut TreeNode) {
    unsafe {
      if node == self.root {
        (*node).color = Color::Black;
        return;
      }

      let parent = (*node).parent;
      if (*parent).color == Color::Black {
        return;
      }

      let grandparent = (*parent).parent;
      let unc = uncle(node);

      if !unc.is_null() && (*unc).color == Color::Red {
        (*parent).color = Color::Black;
        (*unc).color = Color::Black;
        (*grandparent).color = Color::Red;
        self.fix_red_red(grandparent);
      } else if is_left(parent) {
        if is_left(node) {
          mem::swap(&mut (*parent).color, &mut (*grandparent).color);
        } else {
          self.left_rotate(parent);
          mem::swap(&mut (*node).color, &mut (*grandparent).color);
        }
        self.right_rotate(grandparent);
      } else {
        if is_left(node) {
          self.right_rotate(parent);
          mem::swap(&mut (*node).color, &mut (*grandparent).color);
        } else {
          mem::swap(&mut (*parent).color, &mut (*grandparent).color);
        }
        self.left_rotate(grandparent);
      }
    }
  }

  unsafe fn fix_double_black(&mut self, node: *mut TreeNode) {
    unsafe {
      if node == self.root {
        return;
      }

      let parent = (*node).parent;
      let sib = sibling(node);
      if sib.is_null() {
        self.fix_double_black(parent);
        return;
      }

      if (*sib).color == Color::Red {
        (*parent).color = Color::Red;
        (*sib).color = Color::Black;
        if is_left(sib) {
          self.right_rotate(parent);
        } else {
          self.left_rotate(parent);
        }
        self.fix_double_black(node);
        return;
      }

      if has_red_child(sib) {
        let sib_left_red = !(*sib).left.is_null() && (*(*sib).left).color == Color::Red;
        if sib_left_red {
          if is_left(sib) {
            (*(*sib).left).color = (*sib).color;
            (*sib).color = (*parent).color;
            self.right_rotate(parent);
          } else {
            (*(*sib).left).color = (*parent).color;
            self.right_rotate(sib);
            self.left_rotate(parent);
          }
        } else if is_left(sib) {
          (*(*sib).right).color = (*parent).color;
          self.left_rotate(sib);
          self.right_rotate(parent);
        } else {
          (*(*sib).right).color = (*sib).color;
          (*sib).color = (*parent).color;
          self.left_rotate(parent);
        }
        (*parent).color = Color::Black;
        return;
      }

      (*sib).color = Color::Red;
      if (*parent).color == Color::Black {
        self.fix_double_black(parent);
      } else {
        (*parent).color = Color::Black;
      }
    }
  }

  unsafe fn right_rotate(&mut self, node: *mut TreeNode) {
    unsafe {
      let new_parent = (*node).left;
      if node == self.root {
        self.root = new_parent;
      }

      move_down(node, new_parent);
      (*node).left = (*new_parent).right;
      if !(*new_parent).right.is_null() {
        (*(*new_parent).right).parent = node;
      }

      (*new_parent).right = node;
    }
  }

  unsafe fn left_rotate(&mut self, node: *mut TreeNode) {
    unsafe {
      let new_parent = (*node).right;
      if node == self.root {
        self.root = new_parent;
      }

      move_down(node, new_parent);
      (*node).right = (*new_parent).left;
      if !(*new_parent).left.is_null() {
        (*(*new_parent).left).parent = node;
      }

      (*new_parent).left = node;
    }
  }

  #[cfg(test)]
  unsafe fn black_height(&self, node: *mut TreeNode) -> Result<usize, &'static str> {
    unsafe {
      if node.is_null() {
        return Ok(1);
      }
      if (*node).color == Color::Red {
        let left_red = !(*node).left.is_null() && (*(*node).left).color == Color::Red;
        let right_red = !(*node).right.is_null() && (*(*node).right).color == Color::Red;
        if left_red || right_red {
          return Err("red node with red child");
        }
      }
      let left = self.black_height((*node).left)?;
      let right = self.black_height((*node).right)?;
      if left != right {
        return Err("unbalanced black height");
      }
      Ok(left + if (*node).color == Color::Black { 1 } else { 0 })
    }
  }

  #[cfg(test)]
  fn check_invariants(&self) {
    unsafe {
      if self.root.is_null() {
        return;
      }
      assert!((*self.root).color == Color::Black, "root must be black");
      self.black_height(self.root).expect("red-black invariants hold");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::header::Header;

  #[repr(align(16))]
  struct Aligned([u8; 8192]);

  unsafe fn block(base: *mut u8, offset: usize, size: usize) -> *mut Header {
    unsafe { Header::write_new(base.add(offset), size) }
  }

  #[test]
  fn insert_and_retrieve_exact_match() {
    let mut buf = Aligned([0u8; 8192]);
    let base = buf.0.as_mut_ptr();
    let mut tree = SizeTree::new();

    unsafe {
      tree.insert(block(base, 0, 64));
      tree.insert(block(base, 128, 128));
      tree.insert(block(base, 512, 256));
      tree.check_invariants();

      let retrieved = tree.retrieve_block(128);
      assert_eq!(Header::size(retrieved), 128);
    }
  }

  #[test]
  fn lower_bound_returns_smallest_sufficient_block() {
    let mut buf = Aligned([0u8; 8192]);
    let base = buf.0.as_mut_ptr();
    let mut tree = SizeTree::new();

    unsafe {
      tree.insert(block(base, 0, 64));
      tree.insert(block(base, 128, 256));
      tree.insert(block(base, 512, 1024));

      let retrieved = tree.retrieve_block(100);
      assert_eq!(Header::size(retrieved), 256);
    }
  }

  #[test]
  fn same_size_chain_is_lifo_and_keeps_tree_shape() {
    let mut buf = Aligned([0u8; 8192]);
    let base = buf.0.as_mut_ptr();
    let mut tree = SizeTree::new();

    unsafe {
      let first = block(base, 0, 64);
      let second = block(base, 128, 64);
      tree.insert(first);
      tree.insert(second);

      // most recently inserted same-size block comes back first
      assert_eq!(tree.retrieve_block(64), second);
      assert_eq!(tree.retrieve_block(64), first);
      assert!(tree.retrieve_block(64).is_null());
    }
  }

  #[test]
  fn many_insertions_keep_red_black_invariants() {
    let mut buf = Aligned([0u8; 8192]);
    let base = buf.0.as_mut_ptr();
    let mut tree = SizeTree::new();

    let sizes: Vec<usize> = (1..=64).map(|i| i * 16).collect();
    let mut offset = 0usize;
    unsafe {
      for &size in &sizes {
        tree.insert(block(base, offset, size));
        offset += size + Header::SIZE;
        tree.check_invariants();
      }

      for &size in sizes.iter().rev() {
        let retrieved = tree.retrieve_block(size);
        assert_eq!(Header::size(retrieved), size);
        tree.check_invariants();
      }
    }
  }
}
