use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchContext, PageWriteGuard, PathEntry};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{decode_node, encode_node};
use super::base::{BPlusTree, WriteOp};

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    /// Delete a key. Missing keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let root_latch = self.root_page_id.write();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ctx = self.descend_for_write(key, WriteOp::Delete, root_latch)?;
        let PathEntry {
            page_id: leaf_id,
            guard,
            node: leaf,
        } = ctx.path.pop().expect("descent ends at a leaf");

        self.delete_entry(&mut ctx, leaf_id, leaf, guard, key.clone())
    }

    /// Remove `key` from a node and restore the tree invariants.
    ///
    /// On a leaf `key` is the user key; on an internal node it is the
    /// separator left behind by a child merge, and the child to its right
    /// goes with it. Underflow merges into or borrows from a sibling,
    /// preferring the left one; merges recurse into the parent.
    fn delete_entry(
        &self,
        ctx: &mut LatchContext<'_, K>,
        node_id: PageId,
        mut node: BTreeNode<K>,
        mut guard: PageWriteGuard,
        key: K,
    ) -> Result<(), BTreeError> {
        if node.is_leaf {
            if !node.leaf_remove(&key) {
                drop(guard);
                self.buffer_pool.unpin_page(node_id, false)?;
                return Ok(());
            }
        } else {
            let slot = node
                .keys
                .iter()
                .position(|k| *k == key)
                .expect("merge separator present in parent");
            node.keys.remove(slot);
            node.children.remove(slot + 1);
        }

        if node.is_root() {
            return self.shrink_root(ctx, node_id, node, guard);
        }

        let min_size = if node.is_leaf {
            self.leaf_min_size()
        } else {
            self.internal_min_size()
        };
        if node.size() >= min_size {
            encode_node(&node, &mut guard)?;
            drop(guard);
            self.buffer_pool.unpin_page(node_id, true)?;
            return Ok(());
        }

        // Underflow: rebalance with a sibling through the latched parent.
        let PathEntry {
            page_id: parent_id,
            guard: mut parent_guard,
            node: mut parent,
        } = ctx
            .path
            .pop()
            .expect("an unsafe child keeps its parent latched");

        let pos = parent
            .position_of_child(node_id)
            .expect("underfull child is linked under its parent");
        // Prefer the left sibling; the leftmost child borrows from the right.
        let (sibling_on_left, sibling_pos, separator_slot) = if pos == 0 {
            (false, 1, 0)
        } else {
            (true, pos - 1, pos - 1)
        };
        let sibling_id = parent.children[sibling_pos];
        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        let mut sibling_guard: PageWriteGuard = sibling_page.write_arc();
        let mut sibling = decode_node::<K>(&sibling_guard)?;
        let separator = parent.keys[separator_slot].clone();

        let fits_in_one = if node.is_leaf {
            node.keys.len() + sibling.keys.len() <= self.leaf_max_size - 1
        } else {
            node.children.len() + sibling.children.len() <= self.internal_max_size
        };

        if fits_in_one {
            // Merge the right node into the left, then drop the separator
            // from the parent.
            let (left_id, mut left, mut left_guard, right_id, mut right, right_guard) =
                if sibling_on_left {
                    (sibling_id, sibling, sibling_guard, node_id, node, guard)
                } else {
                    (node_id, node, guard, sibling_id, sibling, sibling_guard)
                };

            if left.is_leaf {
                left.keys.append(&mut right.keys);
                left.values.append(&mut right.values);
                left.next_leaf = right.next_leaf;
            } else {
                left.keys.push(separator.clone());
                left.keys.append(&mut right.keys);
                let moved = std::mem::take(&mut right.children);
                for &child in &moved {
                    self.set_parent_pointer(child, left_id)?;
                }
                left.children.extend(moved);
            }

            encode_node(&left, &mut left_guard)?;
            drop(left_guard);
            self.buffer_pool.unpin_page(left_id, true)?;
            drop(right_guard);
            self.buffer_pool.unpin_page(right_id, true)?;
            self.buffer_pool.delete_page(right_id)?;

            return self.delete_entry(ctx, parent_id, parent, parent_guard, separator);
        }

        // Redistribute one entry across the boundary.
        if sibling_on_left {
            if node.is_leaf {
                let moved_key = sibling.keys.pop().expect("donor sibling is above minimum");
                let moved_value = sibling.values.pop().expect("donor sibling is above minimum");
                node.keys.insert(0, moved_key.clone());
                node.values.insert(0, moved_value);
                parent.keys[separator_slot] = moved_key;
            } else {
                let moved_child = sibling.children.pop().expect("donor sibling is above minimum");
                let moved_key = sibling.keys.pop().expect("donor sibling is above minimum");
                node.children.insert(0, moved_child);
                node.keys.insert(0, separator);
                parent.keys[separator_slot] = moved_key;
                self.set_parent_pointer(moved_child, node_id)?;
            }
        } else if node.is_leaf {
            let moved_key = sibling.keys.remove(0);
            let moved_value = sibling.values.remove(0);
            node.keys.push(moved_key);
            node.values.push(moved_value);
            parent.keys[separator_slot] = sibling.keys[0].clone();
        } else {
            let moved_child = sibling.children.remove(0);
            let moved_key = sibling.keys.remove(0);
            node.children.push(moved_child);
            node.keys.push(separator);
            parent.keys[separator_slot] = moved_key;
            self.set_parent_pointer(moved_child, node_id)?;
        }

        encode_node(&node, &mut guard)?;
        encode_node(&sibling, &mut sibling_guard)?;
        encode_node(&parent, &mut parent_guard)?;
        drop(guard);
        drop(sibling_guard);
        drop(parent_guard);
        self.buffer_pool.unpin_page(node_id, true)?;
        self.buffer_pool.unpin_page(sibling_id, true)?;
        self.buffer_pool.unpin_page(parent_id, true)?;
        Ok(())
    }

    /// Handle a root that lost an entry: free an empty leaf root, promote
    /// the single child of a collapsed internal root, or just write back.
    fn shrink_root(
        &self,
        ctx: &mut LatchContext<'_, K>,
        root_id: PageId,
        node: BTreeNode<K>,
        mut guard: PageWriteGuard,
    ) -> Result<(), BTreeError> {
        if node.is_leaf && node.keys.is_empty() {
            drop(guard);
            self.buffer_pool.unpin_page(root_id, true)?;
            self.buffer_pool.delete_page(root_id)?;
            let root_latch = ctx
                .root_guard
                .as_mut()
                .expect("an unsafe root keeps the root latch");
            **root_latch = INVALID_PAGE_ID;
            self.update_root_record(INVALID_PAGE_ID)?;
            return Ok(());
        }

        if !node.is_leaf && node.children.len() == 1 {
            let child_id = node.children[0];
            drop(guard);
            self.buffer_pool.unpin_page(root_id, true)?;
            self.buffer_pool.delete_page(root_id)?;
            self.set_parent_pointer(child_id, INVALID_PAGE_ID)?;
            let root_latch = ctx
                .root_guard
                .as_mut()
                .expect("an unsafe root keeps the root latch");
            **root_latch = child_id;
            self.update_root_record(child_id)?;
            return Ok(());
        }

        encode_node(&node, &mut guard)?;
        drop(guard);
        self.buffer_pool.unpin_page(root_id, true)?;
        Ok(())
    }
}
