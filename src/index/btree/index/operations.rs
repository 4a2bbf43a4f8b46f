use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchContext, PageWriteGuard, PathEntry};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::encode_node;
use super::base::{BPlusTree, WriteOp};

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    /// Insert a unique key.
    ///
    /// Returns `DuplicateKey` if the key is already present. Splits
    /// propagate upward only through nodes the crab descent kept latched.
    pub fn insert(&self, key: K, rid: Rid) -> Result<(), BTreeError> {
        let mut root_latch = self.root_page_id.write();

        // Empty tree: the first insert starts a new root leaf.
        if *root_latch == INVALID_PAGE_ID {
            let (page, page_id) = self.buffer_pool.new_page()?;
            {
                let mut guard = page.write();
                let mut leaf: BTreeNode<K> = BTreeNode::new_leaf();
                leaf.leaf_insert(key, rid);
                encode_node(&leaf, &mut guard)?;
            }
            self.buffer_pool.unpin_page(page_id, true)?;
            *root_latch = page_id;
            self.update_root_record(page_id)?;
            return Ok(());
        }

        let mut ctx = self.descend_for_write(&key, WriteOp::Insert, root_latch)?;
        let PathEntry {
            page_id: leaf_id,
            mut guard,
            node: mut leaf,
        } = ctx.path.pop().expect("descent ends at a leaf");

        if !leaf.leaf_insert(key, rid) {
            drop(guard);
            self.buffer_pool.unpin_page(leaf_id, false)?;
            return Err(BTreeError::DuplicateKey);
        }

        if leaf.keys.len() < self.leaf_max_size {
            encode_node(&leaf, &mut guard)?;
            drop(guard);
            self.buffer_pool.unpin_page(leaf_id, true)?;
            return Ok(());
        }

        // The leaf reached its capacity: split it and push the right
        // sibling's low key into the parent.
        let (right_page, right_id) = self.buffer_pool.new_page()?;
        let right_guard: PageWriteGuard = right_page.write_arc();

        let left_count = (self.leaf_max_size + 1) / 2;
        let mut right: BTreeNode<K> = BTreeNode::new_leaf();
        right.parent = leaf.parent;
        right.keys = leaf.keys.split_off(left_count);
        right.values = leaf.values.split_off(left_count);
        right.next_leaf = leaf.next_leaf;
        leaf.next_leaf = right_id;

        let separator = right.keys[0].clone();
        self.insert_in_parent(
            &mut ctx,
            (leaf_id, leaf, guard),
            (right_id, right, right_guard),
            separator,
        )
    }

    /// Link a freshly split (left, right) pair under their parent.
    ///
    /// Both halves arrive latched and owned; this call fixes their parent
    /// pointers, writes them out, and recurses when the parent itself
    /// overflows. The latch context supplies each parent in turn; an
    /// unsafe child is guaranteed to have kept it latched.
    pub(crate) fn insert_in_parent(
        &self,
        ctx: &mut LatchContext<'_, K>,
        left: (PageId, BTreeNode<K>, PageWriteGuard),
        right: (PageId, BTreeNode<K>, PageWriteGuard),
        separator: K,
    ) -> Result<(), BTreeError> {
        let (left_id, mut left_node, mut left_guard) = left;
        let (right_id, mut right_node, mut right_guard) = right;

        // The split node was the root: grow the tree by one level.
        if left_node.is_root() {
            let (root_page, new_root_id) = self.buffer_pool.new_page()?;

            left_node.parent = new_root_id;
            right_node.parent = new_root_id;
            encode_node(&left_node, &mut left_guard)?;
            encode_node(&right_node, &mut right_guard)?;
            drop(left_guard);
            drop(right_guard);
            self.buffer_pool.unpin_page(left_id, true)?;
            self.buffer_pool.unpin_page(right_id, true)?;

            let mut root: BTreeNode<K> = BTreeNode::new_internal();
            root.children = vec![left_id, right_id];
            root.keys = vec![separator];
            {
                let mut guard = root_page.write();
                encode_node(&root, &mut guard)?;
            }
            self.buffer_pool.unpin_page(new_root_id, true)?;

            let root_latch = ctx
                .root_guard
                .as_mut()
                .expect("a root split still holds the root latch");
            **root_latch = new_root_id;
            self.update_root_record(new_root_id)?;
            return Ok(());
        }

        let PathEntry {
            page_id: parent_id,
            guard: mut parent_guard,
            node: mut parent,
        } = ctx
            .path
            .pop()
            .expect("an unsafe child keeps its parent latched");

        let pos = parent
            .position_of_child(left_id)
            .expect("split child is linked under its parent");
        parent.keys.insert(pos, separator);
        parent.children.insert(pos + 1, right_id);

        if parent.children.len() <= self.internal_max_size {
            right_node.parent = parent_id;
            encode_node(&left_node, &mut left_guard)?;
            encode_node(&right_node, &mut right_guard)?;
            encode_node(&parent, &mut parent_guard)?;
            drop(left_guard);
            drop(right_guard);
            drop(parent_guard);
            self.buffer_pool.unpin_page(left_id, true)?;
            self.buffer_pool.unpin_page(right_id, true)?;
            self.buffer_pool.unpin_page(parent_id, true)?;
            return Ok(());
        }

        // Parent overflow: split it and promote the middle separator.
        let left_count = (self.internal_max_size + 2) / 2;
        let (new_page, new_parent_id) = self.buffer_pool.new_page()?;
        let new_parent_guard: PageWriteGuard = new_page.write_arc();

        let mut new_parent: BTreeNode<K> = BTreeNode::new_internal();
        new_parent.parent = parent.parent;
        new_parent.children = parent.children.split_off(left_count);
        let mut upper_keys = parent.keys.split_off(left_count - 1);
        let promoted = upper_keys.remove(0);
        new_parent.keys = upper_keys;

        left_node.parent = if pos < left_count { parent_id } else { new_parent_id };
        right_node.parent = if pos + 1 < left_count { parent_id } else { new_parent_id };
        encode_node(&left_node, &mut left_guard)?;
        encode_node(&right_node, &mut right_guard)?;
        drop(left_guard);
        drop(right_guard);
        self.buffer_pool.unpin_page(left_id, true)?;
        self.buffer_pool.unpin_page(right_id, true)?;

        // Children carried into the new right internal node point at it now.
        for &child in &new_parent.children {
            if child != left_id && child != right_id {
                self.set_parent_pointer(child, new_parent_id)?;
            }
        }

        self.insert_in_parent(
            ctx,
            (parent_id, parent, parent_guard),
            (new_parent_id, new_parent, new_parent_guard),
            promoted,
        )
    }
}
