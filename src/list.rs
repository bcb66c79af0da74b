//! Intrusive circular doubly-linked list.
//!
//! A [`ListNode`] is embedded inside a parent record; the list head is a
//! node whose `prev`/`next` point at itself when empty. Parent recovery
//! goes through [`list_entry!`] with the field offset, so one record can
//! sit on several lists at once.
//!
//! All operations are `unsafe`: the caller guarantees that every linked
//! node stays pinned in memory while it is on a list and that a node is
//! never pushed onto two lists at the same time.

use std::ptr;

#[repr(C)]
pub struct ListNode {
    pub prev: *mut ListNode,
    pub next: *mut ListNode,
}

impl ListNode {
    /// A detached node. Push it or initialize it as a head before use.
    pub const fn new() -> Self {
        ListNode {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Turns `self` into an empty list head (prev/next pointing at itself).
    ///
    /// # Safety
    /// `head` must stay pinned for as long as any node is linked to it.
    pub unsafe fn init_head(head: *mut ListNode) {
        (*head).prev = head;
        (*head).next = head;
    }

    /// True when the head has no linked nodes.
    ///
    /// # Safety
    /// `head` must have been initialized with [`ListNode::init_head`].
    #[inline]
    pub unsafe fn is_empty(head: *const ListNode) -> bool {
        (*head).next as *const ListNode == head
    }

    /// True when at least one node is linked.
    ///
    /// # Safety
    /// Same contract as [`ListNode::is_empty`].
    #[inline]
    pub unsafe fn any(head: *const ListNode) -> bool {
        !Self::is_empty(head)
    }

    /// True when this node is currently linked into some list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        !self.next.is_null()
    }

    /// Links `node` at the tail (before the head sentinel).
    ///
    /// # Safety
    /// `head` is an initialized head; `node` is detached and pinned.
    pub unsafe fn push(head: *mut ListNode, node: *mut ListNode) {
        let tail = (*head).prev;
        (*node).prev = tail;
        (*node).next = head;
        (*tail).next = node;
        (*head).prev = node;
    }

    /// Links `node` at the front (right after the head sentinel).
    ///
    /// # Safety
    /// Same contract as [`ListNode::push`].
    pub unsafe fn unshift(head: *mut ListNode, node: *mut ListNode) {
        let first = (*head).next;
        (*node).prev = head;
        (*node).next = first;
        (*first).prev = node;
        (*head).next = node;
    }

    /// Unlinks and returns the tail node, or null when empty.
    ///
    /// # Safety
    /// `head` is an initialized head.
    pub unsafe fn pop(head: *mut ListNode) -> *mut ListNode {
        if Self::is_empty(head) {
            return ptr::null_mut();
        }
        let node = (*head).prev;
        Self::remove(node);
        node
    }

    /// Unlinks and returns the front node, or null when empty.
    ///
    /// # Safety
    /// `head` is an initialized head.
    pub unsafe fn shift(head: *mut ListNode) -> *mut ListNode {
        if Self::is_empty(head) {
            return ptr::null_mut();
        }
        let node = (*head).next;
        Self::remove(node);
        node
    }

    /// Unlinks `node` from whatever list holds it. Detached nodes are left
    /// untouched, so removal is idempotent.
    ///
    /// # Safety
    /// `node` is pinned; if linked, its neighbors are valid.
    pub unsafe fn remove(node: *mut ListNode) {
        if (*node).next.is_null() {
            return;
        }
        let prev = (*node).prev;
        let next = (*node).next;
        (*prev).next = next;
        (*next).prev = prev;
        (*node).prev = ptr::null_mut();
        (*node).next = ptr::null_mut();
    }

    /// Visits every linked node in order, tolerating removal of the node
    /// currently being visited (the next pointer is saved before the call).
    ///
    /// # Safety
    /// `head` is an initialized head; `f` may unlink the visited node but
    /// must not unlink its successor.
    pub unsafe fn each(head: *mut ListNode, mut f: impl FnMut(*mut ListNode)) {
        let mut node = (*head).next;
        while node != head {
            let next = (*node).next;
            f(node);
            node = next;
        }
    }
}

/// Recovers the parent record from an embedded [`ListNode`] pointer.
///
/// `list_entry!(node_ptr, Parent, field)` mirrors the classic
/// `container_of` arithmetic through `core::mem::offset_of!`.
#[macro_export]
macro_rules! list_entry {
    ($node:expr, $parent:ty, $field:ident) => {
        ($node as *mut u8).sub(core::mem::offset_of!($parent, $field)) as *mut $parent
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Item {
        value: u32,
        node: ListNode,
    }

    impl Item {
        fn new(value: u32) -> Box<Item> {
            Box::new(Item {
                value,
                node: ListNode::new(),
            })
        }
    }

    unsafe fn collect(head: *mut ListNode) -> Vec<u32> {
        let mut out = Vec::new();
        ListNode::each(head, |n| {
            let item = list_entry!(n, Item, node);
            out.push((*item).value);
        });
        out
    }

    #[test]
    fn push_pop_shift_ordering() {
        unsafe {
            let mut head = ListNode::new();
            ListNode::init_head(&mut head);
            assert!(ListNode::is_empty(&head));

            let mut a = Item::new(1);
            let mut b = Item::new(2);
            let mut c = Item::new(3);
            ListNode::push(&mut head, &mut a.node);
            ListNode::push(&mut head, &mut b.node);
            ListNode::unshift(&mut head, &mut c.node);

            assert!(ListNode::any(&head));
            assert_eq!(collect(&mut head), vec![3, 1, 2]);

            let front = ListNode::shift(&mut head);
            assert_eq!((*list_entry!(front, Item, node)).value, 3);
            let back = ListNode::pop(&mut head);
            assert_eq!((*list_entry!(back, Item, node)).value, 2);
            assert_eq!(collect(&mut head), vec![1]);
        }
    }

    #[test]
    fn ring_invariant_holds_for_linked_nodes() {
        unsafe {
            let mut head = ListNode::new();
            ListNode::init_head(&mut head);
            let mut items: Vec<Box<Item>> = (0..8).map(Item::new).collect();
            for item in items.iter_mut() {
                ListNode::push(&mut head, &mut item.node);
            }
            ListNode::each(&mut head, |n| {
                assert_eq!((*(*n).prev).next, n);
                assert_eq!((*(*n).next).prev, n);
            });
        }
    }

    #[test]
    fn removal_during_iteration_is_tolerated() {
        unsafe {
            let mut head = ListNode::new();
            ListNode::init_head(&mut head);
            let mut items: Vec<Box<Item>> = (0..6).map(Item::new).collect();
            for item in items.iter_mut() {
                ListNode::push(&mut head, &mut item.node);
            }
            ListNode::each(&mut head, |n| {
                let item = list_entry!(n, Item, node);
                if (*item).value % 2 == 0 {
                    ListNode::remove(n);
                }
            });
            assert_eq!(collect(&mut head), vec![1, 3, 5]);
        }
    }

    #[test]
    fn remove_is_idempotent() {
        unsafe {
            let mut head = ListNode::new();
            ListNode::init_head(&mut head);
            let mut a = Item::new(7);
            ListNode::push(&mut head, &mut a.node);
            ListNode::remove(&mut a.node);
            ListNode::remove(&mut a.node);
            assert!(ListNode::is_empty(&head));
            assert!(!a.node.is_linked());
        }
    }
}
