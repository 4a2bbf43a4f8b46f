use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use silodb::common::types::Rid;
use silodb::index::btree::serialization::decode_node;
use silodb::index::btree::{BPlusTree, BTreeError, BTreeNode};

mod common;
use common::create_index_buffer_pool;

fn rid_for(key: i64) -> Rid {
    Rid::new(key as u32, 0)
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 4)?;

    assert!(tree.is_empty());
    for key in 1..=10 {
        tree.insert(key, rid_for(key))?;
    }
    assert!(!tree.is_empty());

    for key in 1..=10 {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)), "key {}", key);
    }
    assert_eq!(tree.get(&0)?, None);
    assert_eq!(tree.get(&11)?, None);

    Ok(())
}

#[test]
fn test_duplicate_insert_rejected() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 4)?;

    tree.insert(42, rid_for(42))?;
    assert!(matches!(
        tree.insert(42, Rid::new(99, 99)),
        Err(BTreeError::DuplicateKey)
    ));
    // The original mapping is untouched.
    assert_eq!(tree.get(&42)?, Some(rid_for(42)));

    Ok(())
}

// With an odd leaf capacity the split is asymmetric: the left leaf keeps
// one more entry than the right.
#[test]
fn test_split_keeps_left_heavy() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", Arc::clone(&pool), 5, 4)?;

    for key in 1..=5 {
        tree.insert(key, rid_for(key))?;
    }

    // The root is now internal with two leaves under it.
    let root_id = tree.root_page_id();
    let root_page = pool.fetch_page(root_id)?;
    let root: BTreeNode<i64> = {
        let guard = root_page.read();
        decode_node(&guard)?
    };
    pool.unpin_page(root_id, false)?;
    assert!(!root.is_leaf);
    assert_eq!(root.children.len(), 2);
    assert_eq!(root.keys, vec![4]);

    let left_page = pool.fetch_page(root.children[0])?;
    let left: BTreeNode<i64> = {
        let guard = left_page.read();
        decode_node(&guard)?
    };
    pool.unpin_page(root.children[0], false)?;
    assert_eq!(left.keys, vec![1, 2, 3]);
    assert_eq!(left.next_leaf, root.children[1]);

    let right_page = pool.fetch_page(root.children[1])?;
    let right: BTreeNode<i64> = {
        let guard = right_page.read();
        decode_node(&guard)?
    };
    pool.unpin_page(root.children[1], false)?;
    assert_eq!(right.keys, vec![4, 5]);

    Ok(())
}

#[test]
fn test_ordered_iteration() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 4)?;

    let mut keys: Vec<i64> = (0..200).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(7));
    for &key in &keys {
        tree.insert(key, rid_for(key))?;
    }

    let collected: Vec<(i64, Rid)> = tree.iter()?.collect();
    assert_eq!(collected.len(), 200);
    for (i, (key, rid)) in collected.iter().enumerate() {
        assert_eq!(*key, i as i64);
        assert_eq!(*rid, rid_for(i as i64));
    }

    Ok(())
}

#[test]
fn test_iter_from() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 4)?;

    for key in (0..100).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    // Present start key.
    let from_forty: Vec<i64> = tree.iter_from(&40)?.map(|(k, _)| k).collect();
    assert_eq!(from_forty[0], 40);
    assert_eq!(from_forty.len(), 30);

    // Absent start key positions at the next larger key.
    let from_odd: Vec<i64> = tree.iter_from(&41)?.map(|(k, _)| k).collect();
    assert_eq!(from_odd[0], 42);

    // Start past the largest key: immediately the end sentinel.
    let mut past_end = tree.iter_from(&1000)?;
    assert!(past_end.is_end());
    assert_eq!(past_end.next(), None);

    // An empty tree begins at the end.
    let (pool2, _temp2) = create_index_buffer_pool(16)?;
    let empty: BPlusTree<i64> = BPlusTree::new("none", pool2, 4, 4)?;
    assert!(empty.iter()?.is_end());
    assert!(empty.iter()? == empty.end());

    Ok(())
}

#[test]
fn test_remove_all_collapses_tree() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 4)?;

    for key in 0..50 {
        tree.insert(key, rid_for(key))?;
    }
    // Delete in an order that exercises both siblings.
    for key in (0..50).step_by(2) {
        tree.remove(&key)?;
    }
    for key in (1..50).step_by(2).collect::<Vec<_>>().into_iter().rev() {
        tree.remove(&key)?;
    }

    assert!(tree.is_empty());
    for key in 0..50 {
        assert_eq!(tree.get(&key)?, None);
    }

    Ok(())
}

#[test]
fn test_remove_missing_is_noop() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 4)?;

    tree.remove(&5)?;
    tree.insert(1, rid_for(1))?;
    tree.remove(&5)?;
    assert_eq!(tree.get(&1)?, Some(rid_for(1)));

    Ok(())
}

// After an arbitrary interleaving of inserts and deletes, the visible pairs
// are exactly the inserts that were not subsequently deleted.
#[test]
fn test_mixed_workload_matches_reference() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", pool, 4, 5)?;

    let mut rng = StdRng::seed_from_u64(42);
    let mut reference: BTreeMap<i64, Rid> = BTreeMap::new();

    for _ in 0..2000 {
        let key = rng.gen_range(0..300);
        if rng.gen_bool(0.6) {
            let rid = rid_for(key);
            match tree.insert(key, rid) {
                Ok(()) => {
                    assert!(reference.insert(key, rid).is_none());
                }
                Err(BTreeError::DuplicateKey) => {
                    assert!(reference.contains_key(&key));
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            tree.remove(&key)?;
            reference.remove(&key);
        }
    }

    let collected: Vec<(i64, Rid)> = tree.iter()?.collect();
    let expected: Vec<(i64, Rid)> = reference.into_iter().collect();
    assert_eq!(collected, expected);

    Ok(())
}

// The root pointer is mirrored into the header page, so reopening the index
// by name finds the same tree.
#[test]
fn test_reopen_from_header_page() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;

    {
        let tree: BPlusTree<i64> = BPlusTree::new("orders_pk", Arc::clone(&pool), 4, 4)?;
        for key in 0..100 {
            tree.insert(key, rid_for(key))?;
        }
    }

    let reopened: BPlusTree<i64> = BPlusTree::new("orders_pk", pool, 4, 4)?;
    assert!(!reopened.is_empty());
    for key in 0..100 {
        assert_eq!(reopened.get(&key)?, Some(rid_for(key)));
    }

    Ok(())
}

// Walk the whole tree and check the structural invariants: sorted keys,
// size bounds on non-root nodes, separators bounding their subtrees (above
// everything on the left, at or below everything on the right), parent
// pointers, and a leaf chain that visits every key in order.
fn audit_tree(
    pool: &Arc<silodb::BufferPoolManager>,
    tree: &BPlusTree<i64>,
    leaf_max: usize,
    internal_max: usize,
) -> Result<Vec<i64>> {
    fn load(pool: &Arc<silodb::BufferPoolManager>, id: u32) -> Result<BTreeNode<i64>> {
        let page = pool.fetch_page(id)?;
        let node = {
            let guard = page.read();
            decode_node(&guard)?
        };
        pool.unpin_page(id, false)?;
        Ok(node)
    }

    // Returns (smallest key, largest key, depth) of the subtree.
    fn audit_node(
        pool: &Arc<silodb::BufferPoolManager>,
        id: u32,
        expected_parent: u32,
        is_root: bool,
        leaf_max: usize,
        internal_max: usize,
    ) -> Result<(i64, i64, usize)> {
        let node = load(pool, id)?;
        assert_eq!(node.parent, expected_parent, "parent pointer of page {}", id);
        assert!(
            node.keys.windows(2).all(|w| w[0] < w[1]),
            "keys out of order in page {}",
            id
        );

        if node.is_leaf {
            assert!(node.keys.len() <= leaf_max - 1, "oversized leaf {}", id);
            if !is_root {
                assert!(node.keys.len() >= leaf_max / 2, "underfull leaf {}", id);
            }
            return Ok((node.keys[0], *node.keys.last().unwrap(), 1));
        }

        assert!(node.children.len() <= internal_max, "oversized internal {}", id);
        let min_children = if is_root { 2 } else { (internal_max + 1) / 2 };
        assert!(node.children.len() >= min_children, "underfull internal {}", id);
        assert_eq!(node.keys.len() + 1, node.children.len());

        let mut depth = None;
        let mut smallest = None;
        let mut largest = None;
        for (i, &child) in node.children.iter().enumerate() {
            let (child_smallest, child_largest, child_depth) =
                audit_node(pool, child, id, false, leaf_max, internal_max)?;
            match depth {
                None => depth = Some(child_depth),
                Some(d) => assert_eq!(d, child_depth, "leaves at unequal depth under {}", id),
            }
            if i == 0 {
                smallest = Some(child_smallest);
            } else {
                // keys[i - 1] separates children i - 1 and i: strictly above
                // everything left of it, a lower bound for everything right.
                assert!(
                    node.keys[i - 1] > largest.unwrap(),
                    "separator {} of page {} overlaps its left subtree",
                    i - 1,
                    id
                );
                assert!(
                    node.keys[i - 1] <= child_smallest,
                    "separator {} of page {} exceeds its right subtree",
                    i - 1,
                    id
                );
            }
            largest = Some(child_largest);
        }
        Ok((smallest.unwrap(), largest.unwrap(), depth.unwrap() + 1))
    }

    let root_id = tree.root_page_id();
    if root_id == silodb::common::types::INVALID_PAGE_ID {
        return Ok(Vec::new());
    }
    audit_node(pool, root_id, silodb::common::types::INVALID_PAGE_ID, true, leaf_max, internal_max)?;

    // Follow the leaf chain from the leftmost leaf.
    let mut current = root_id;
    loop {
        let node = load(pool, current)?;
        if node.is_leaf {
            break;
        }
        current = node.children[0];
    }
    let mut chained = Vec::new();
    loop {
        let node = load(pool, current)?;
        chained.extend_from_slice(&node.keys);
        if node.next_leaf == silodb::common::types::INVALID_PAGE_ID {
            break;
        }
        current = node.next_leaf;
    }
    Ok(chained)
}

#[test]
fn test_structural_invariants_under_churn() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new("pk", Arc::clone(&pool), 4, 4)?;

    let mut rng = StdRng::seed_from_u64(9);
    let mut live: Vec<i64> = Vec::new();
    for round in 0..20 {
        for _ in 0..40 {
            let key = rng.gen_range(0..500);
            match tree.insert(key, rid_for(key)) {
                Ok(()) => live.push(key),
                Err(BTreeError::DuplicateKey) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for _ in 0..25 {
            if live.is_empty() {
                break;
            }
            let at = rng.gen_range(0..live.len());
            let key = live.swap_remove(at);
            tree.remove(&key)?;
        }

        let chained = audit_tree(&pool, &tree, 4, 4)?;
        let mut expected = live.clone();
        expected.sort_unstable();
        assert_eq!(chained, expected, "round {}", round);
    }

    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(128)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new("pk", pool, 4, 4)?);

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let tree = Arc::clone(&tree);
        handles.push(std::thread::spawn(move || -> Result<()> {
            let mut keys: Vec<i64> = (0..200).map(|i| t + i * 4).collect();
            keys.shuffle(&mut StdRng::seed_from_u64(t as u64));
            for key in keys {
                tree.insert(key, rid_for(key))?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    for key in 0..800 {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)), "key {}", key);
    }
    let collected: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(collected, (0..800).collect::<Vec<_>>());

    Ok(())
}

#[test]
fn test_concurrent_readers_during_inserts() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(128)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new("pk", pool, 4, 4)?);

    for key in 0..100 {
        tree.insert(key, rid_for(key))?;
    }

    let writer = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || -> Result<()> {
            for key in 100..400 {
                tree.insert(key, rid_for(key))?;
            }
            Ok(())
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || -> Result<()> {
                for _ in 0..10 {
                    // Keys inserted before the writer started are always
                    // visible, whatever the writer is doing.
                    for key in 0..100 {
                        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
                    }
                }
                Ok(())
            })
        })
        .collect();

    writer.join().unwrap()?;
    for reader in readers {
        reader.join().unwrap()?;
    }

    for key in 0..400 {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }

    Ok(())
}
