//! Victim selection for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Orders eviction candidates.
///
/// The replacer never looks at pin counts. Each candidate is offered to the
/// `try_evict` callback, which claims the frame only if it is unpinned.
pub trait Replacer: Send + Sync {
    /// Notes that `frame_id` holds a page that was just used.
    fn record_access(&self, frame_id: FrameId);

    /// Returns the first candidate `try_evict` accepts, or None if none was.
    fn victim(&self, try_evict: &mut dyn FnMut(FrameId) -> bool) -> Option<FrameId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Holds no page the replacer knows of.
    Empty,
    /// Used since the hand last passed.
    Hot,
    /// Passed once by the hand without being used.
    Cold,
}

/// Second-chance clock.
///
/// The hand turns Hot slots Cold and offers Cold ones for eviction. Two
/// full turns are enough to reach every slot as Cold, so a sweep stops
/// there.
pub struct ClockReplacer {
    state: Mutex<Clock>,
}

struct Clock {
    slots: Vec<Slot>,
    hand: usize,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: Mutex::new(Clock {
                slots: vec![Slot::Empty; num_frames],
                hand: 0,
            }),
        }
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&self, frame_id: FrameId) {
        if let Some(slot) = self.state.lock().slots.get_mut(frame_id.0 as usize) {
            *slot = Slot::Hot;
        }
    }

    fn victim(&self, try_evict: &mut dyn FnMut(FrameId) -> bool) -> Option<FrameId> {
        let mut clock = self.state.lock();
        let n = clock.slots.len();

        for _ in 0..2 * n {
            let at = clock.hand;
            clock.hand = (at + 1) % n;

            match clock.slots[at] {
                Slot::Empty => {}
                Slot::Hot => clock.slots[at] = Slot::Cold,
                Slot::Cold => {
                    let frame_id = FrameId(at as u32);
                    if try_evict(frame_id) {
                        clock.slots[at] = Slot::Empty;
                        return Some(frame_id);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_all(_: FrameId) -> bool {
        true
    }

    #[test]
    fn test_victim_from_empty_clock() {
        assert!(ClockReplacer::new(10).victim(&mut accept_all).is_none());
        assert!(ClockReplacer::new(0).victim(&mut accept_all).is_none());
    }

    #[test]
    fn test_single_frame_needs_second_sweep() {
        let replacer = ClockReplacer::new(10);
        replacer.record_access(FrameId(5));

        assert_eq!(replacer.victim(&mut accept_all), Some(FrameId(5)));
        // Evicted slots are no longer candidates
        assert!(replacer.victim(&mut accept_all).is_none());
    }

    #[test]
    fn test_second_chance() {
        let replacer = ClockReplacer::new(3);
        for i in 0..3 {
            replacer.record_access(FrameId(i));
        }

        // First sweep cools every slot; frame 0 is the first cold one reached
        assert_eq!(replacer.victim(&mut accept_all), Some(FrameId(0)));

        // Touch frame 1 again, so frame 2 goes next
        replacer.record_access(FrameId(1));
        assert_eq!(replacer.victim(&mut accept_all), Some(FrameId(2)));
    }

    #[test]
    fn test_rejected_candidates_stay_tracked() {
        let replacer = ClockReplacer::new(3);
        for i in 0..3 {
            replacer.record_access(FrameId(i));
        }

        // Frames 0 and 1 are pinned
        let mut only_two = |fid: FrameId| fid == FrameId(2);
        assert_eq!(replacer.victim(&mut only_two), Some(FrameId(2)));

        let mut reject_all = |_: FrameId| false;
        assert!(replacer.victim(&mut reject_all).is_none());

        let mut seen = Vec::new();
        while let Some(fid) = replacer.victim(&mut accept_all) {
            seen.push(fid);
        }
        seen.sort_by_key(|fid| fid.0);
        assert_eq!(seen, vec![FrameId(0), FrameId(1)]);
    }

    #[test]
    fn test_out_of_range_access_is_ignored() {
        let replacer = ClockReplacer::new(5);
        replacer.record_access(FrameId(100));
        assert!(replacer.victim(&mut accept_all).is_none());
    }
}
