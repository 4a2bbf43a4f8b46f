use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Per-frame access history: the last K access timestamps, oldest first
struct FrameRecord {
    history: VecDeque<u64>,
    evictable: bool,
}

struct LruKCore {
    records: HashMap<FrameId, FrameRecord>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K page replacement policy.
///
/// The victim is the evictable frame with the largest backward K-distance:
/// the gap between the current logical time and its K-th most recent access.
/// Frames with fewer than K recorded accesses have infinite distance and are
/// evicted first, ties broken by earliest recorded access, then by smallest
/// frame id.
pub struct LruKReplacer {
    core: Mutex<LruKCore>,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            core: Mutex::new(LruKCore {
                records: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            replacer_size: num_frames,
            k,
        }
    }

    /// Record an access to a frame at the current logical time.
    ///
    /// A first access starts tracking the frame; it stays non-evictable
    /// until `set_evictable` marks it.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );
        let mut core = self.core.lock();
        core.current_timestamp += 1;
        let now = core.current_timestamp;
        let k = self.k;

        let record = core.records.entry(frame_id).or_insert_with(|| FrameRecord {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        record.history.push_back(now);
        if record.history.len() > k {
            record.history.pop_front();
        }
    }

    /// Toggle whether a frame may be chosen as a victim. Idempotent.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut core = self.core.lock();
        let record = core
            .records
            .get_mut(&frame_id)
            .expect("set_evictable on untracked frame");
        if evictable && !record.evictable {
            record.evictable = true;
            core.evictable_count += 1;
        } else if !evictable && record.evictable {
            record.evictable = false;
            core.evictable_count -= 1;
        }
    }

    /// Choose and remove the victim frame, or `None` if nothing is evictable
    pub fn evict(&self) -> Option<FrameId> {
        let mut core = self.core.lock();
        let now = core.current_timestamp;

        // Frames are scanned in id order so equal-distance ties resolve to
        // the smallest frame id.
        let mut frame_ids: Vec<FrameId> = core.records.keys().copied().collect();
        frame_ids.sort_unstable();

        let mut victim: Option<(FrameId, u64, u64)> = None; // (id, distance, oldest)
        for frame_id in frame_ids {
            let record = &core.records[&frame_id];
            if !record.evictable {
                continue;
            }
            let oldest = *record.history.front().expect("tracked frame has history");
            let distance = if record.history.len() < self.k {
                u64::MAX
            } else {
                now - oldest
            };
            let better = match victim {
                None => true,
                Some((_, best_distance, best_oldest)) => {
                    distance > best_distance
                        || (distance == best_distance && oldest < best_oldest)
                }
            };
            if better {
                victim = Some((frame_id, distance, oldest));
            }
        }

        let (frame_id, _, _) = victim?;
        core.records.remove(&frame_id);
        core.evictable_count -= 1;
        log::debug!("lru-k evicts frame {}", frame_id);
        Some(frame_id)
    }

    /// Drop a frame's record entirely. The frame must be evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut core = self.core.lock();
        if let Some(record) = core.records.get(&frame_id) {
            assert!(record.evictable, "removed frame must be evictable");
            core.records.remove(&frame_id);
            core.evictable_count -= 1;
        }
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.core.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_prefers_infinite_distance() {
        // Four frames (ids 1..=4), k=2: access 1,2,3,4,1,2,3. Frame 4 is
        // the only one with fewer than k accesses, so it goes first.
        let replacer = LruKReplacer::new(5, 2);
        for frame in [1, 2, 3, 4, 1, 2, 3] {
            replacer.record_access(frame);
        }
        for frame in 1..=4 {
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.size(), 4);
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.size(), 3);
    }

    #[test]
    fn test_evict_by_backward_k_distance() {
        // All frames fully sampled; the largest gap to the k-th most recent
        // access loses its spot.
        let replacer = LruKReplacer::new(3, 2);
        for frame in [0, 1, 2, 0, 1, 2, 0] {
            replacer.record_access(frame);
        }
        for frame in 0..3 {
            replacer.set_evictable(frame, true);
        }
        // histories: 0 -> [4,7], 1 -> [2,5], 2 -> [3,6]; frame 1 has the
        // oldest k-th access.
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_under_sampled_ties_break_on_first_access() {
        let replacer = LruKReplacer::new(4, 3);
        replacer.record_access(2);
        replacer.record_access(1);
        replacer.record_access(3);
        for frame in 1..=3 {
            replacer.set_evictable(frame, true);
        }
        // All have infinite distance; frame 2 was seen earliest.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(3));
    }

    #[test]
    fn test_non_evictable_frames_are_skipped() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_set_evictable_is_idempotent() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(0, false);
        replacer.set_evictable(0, false);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "must be evictable")]
    fn test_remove_pinned_frame_panics() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0);
        replacer.remove(0);
    }
}
