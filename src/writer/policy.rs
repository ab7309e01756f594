//! Ping reassembly and flush ordering.
//!
//! Channel pages of one ping arrive interleaved and out of order. The
//! [`Policy`] buffers them per [`Ping`] in a bounded [`PingQueue`] and decides
//! which pings are written, and in which order:
//!
//! - a ping is Ready once every channel of its mask is present
//! - when a ping becomes Ready, every unwritten ping with a number at or below
//!   it is released, Ready or not, in ascending ping order
//! - when the queue is full, the oldest entry is released (with everything
//!   at or below it) and evicted before the new ping is inserted
//! - a released ping is Written; it is never released twice unless the writer
//!   hands it back with [`Policy::restore`]
//!
//! The policy never touches the file. It hands the released pings back to the
//! writer, which splices and writes them in the order given.

use crate::device::ChannelType;
use crate::page::{ChannelMask, WRITE_ORDER};
use std::collections::VecDeque;

/// Lifecycle of a [`Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingState {
    /// Some channels of the mask are still missing.
    Pending,
    /// Every channel of the mask is present.
    Ready,
    /// Released to the writer.
    Written,
}

fn slot(channel: ChannelType) -> usize {
    match channel {
        ChannelType::LowFrequency => 0,
        ChannelType::RawBathy => 1,
        ChannelType::ProcessedBathy => 2,
        ChannelType::HighFrequency => 3,
    }
}

/// All pages received so far for one ping number.
#[derive(Debug)]
pub struct Ping {
    ping_number: u32,
    mask: ChannelMask,
    written: bool,
    pages: [Option<Vec<u8>>; 4],
}

impl Ping {
    /// Empty ping expecting the channels of `mask`. The mask never changes.
    pub fn new(ping_number: u32, mask: ChannelMask) -> Self {
        Self {
            ping_number,
            mask,
            written: false,
            pages: Default::default(),
        }
    }

    pub fn ping_number(&self) -> u32 {
        self.ping_number
    }

    pub fn mask(&self) -> ChannelMask {
        self.mask
    }

    pub fn state(&self) -> PingState {
        if self.written {
            PingState::Written
        } else if WRITE_ORDER
            .iter()
            .all(|c| !self.mask.contains(*c) || self.pages[slot(*c)].is_some())
        {
            PingState::Ready
        } else {
            PingState::Pending
        }
    }

    /// Store `page` for `channel`; returns `true` if it replaced a page.
    pub fn store(&mut self, channel: ChannelType, page: Vec<u8>) -> bool {
        self.pages[slot(channel)].replace(page).is_some()
    }

    /// Mark Written and hand out the pages present, in write order.
    ///
    /// Returns `None` if the ping was already Written.
    pub fn release(&mut self) -> Option<ReleasedPing> {
        let complete = match self.state() {
            PingState::Written => return None,
            state => state == PingState::Ready,
        };
        self.written = true;
        let pages = WRITE_ORDER
            .iter()
            .filter_map(|c| self.pages[slot(*c)].take().map(|p| (*c, p)))
            .collect();
        Some(ReleasedPing {
            ping_number: self.ping_number,
            mask: self.mask,
            complete,
            pages,
        })
    }

    /// Undo [`Ping::release`]: put the pages back and clear Written.
    ///
    /// A page stored since the release wins over the returned one.
    fn restore(&mut self, released: ReleasedPing) {
        self.written = false;
        for (channel, page) in released.pages {
            let slot = &mut self.pages[slot(channel)];
            if slot.is_none() {
                *slot = Some(page);
            }
        }
    }
}

/// A ping released for writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedPing {
    pub ping_number: u32,
    pub mask: ChannelMask,
    /// Whether every channel of the mask was present.
    pub complete: bool,
    /// Pages in write order: LF, raw bathy, processed bathy, HF.
    pub pages: Vec<(ChannelType, Vec<u8>)>,
}

/// Fixed-capacity arrival-ordered ping buffer.
#[derive(Debug)]
pub struct PingQueue {
    entries: VecDeque<Ping>,
    capacity: usize,
}

impl PingQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn find_mut(&mut self, ping_number: u32) -> Option<&mut Ping> {
        self.entries
            .iter_mut()
            .find(|p| p.ping_number == ping_number)
    }

    pub fn get(&self, ping_number: u32) -> Option<&Ping> {
        self.entries.iter().find(|p| p.ping_number == ping_number)
    }

    pub fn front(&self) -> Option<&Ping> {
        self.entries.front()
    }

    fn push_back(&mut self, ping: Ping) {
        self.entries.push_back(ping);
    }

    fn push_front(&mut self, ping: Ping) {
        self.entries.push_front(ping);
    }

    fn pop_front(&mut self) -> Option<Ping> {
        self.entries.pop_front()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ping> {
        self.entries.iter_mut()
    }
}

/// What happened to a page handed to [`Policy::push`].
#[derive(Debug, Default)]
pub struct PushOutcome {
    /// Pings to write now, in file order.
    pub released: Vec<ReleasedPing>,
    /// Ping number forced out of a full queue, if any.
    pub evicted: Option<u32>,
    /// The page belonged to an already Written ping and was dropped.
    pub late: bool,
    /// The page replaced one already stored for the same channel.
    pub duplicate: bool,
}

/// Reassembly policy over a [`PingQueue`].
#[derive(Debug)]
pub struct Policy {
    queue: PingQueue,
    /// Highest ping number released so far.
    high_water: Option<u32>,
}

impl Policy {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: PingQueue::with_capacity(capacity),
            high_water: None,
        }
    }

    /// A page for an evicted ping that was already released.
    ///
    /// Numbers more than a queue length behind the high-water mark are taken
    /// as a restarted ping counter and accepted.
    fn is_behind(&self, ping_number: u32) -> bool {
        match self.high_water {
            Some(hw) => ping_number <= hw && hw - ping_number < self.queue.capacity() as u32,
            None => false,
        }
    }

    pub fn queue(&self) -> &PingQueue {
        &self.queue
    }

    /// Add the page of `channel` for `ping_number`.
    ///
    /// `mask` is only used when this page opens a new ping.
    pub fn push(
        &mut self,
        ping_number: u32,
        channel: ChannelType,
        page: Vec<u8>,
        mask: ChannelMask,
    ) -> PushOutcome {
        let mut outcome = PushOutcome::default();

        if self.queue.get(ping_number).is_none() {
            if self.is_behind(ping_number) {
                outcome.late = true;
                return outcome;
            }
            if self.high_water.is_some_and(|hw| ping_number < hw) {
                // ping counter restarted
                self.high_water = None;
            }
            // a restored ping can leave the queue one over capacity
            while self.queue.is_full() {
                let Some(oldest) = self.queue.front().map(Ping::ping_number) else {
                    break;
                };
                outcome.released.extend(self.release_through(oldest));
                self.queue.pop_front();
                outcome.evicted = Some(oldest);
            }
            self.queue.push_back(Ping::new(ping_number, mask));
        }

        let Some(ping) = self.queue.find_mut(ping_number) else {
            return outcome;
        };
        if ping.state() == PingState::Written {
            outcome.late = true;
            return outcome;
        }
        outcome.duplicate = ping.store(channel, page);

        if ping.state() == PingState::Ready {
            outcome.released.extend(self.release_through(ping_number));
        }
        outcome
    }

    /// Release every unwritten ping numbered at or below `target`.
    ///
    /// Already Written entries are skipped, so releasing twice is a no-op.
    pub fn release_through(&mut self, target: u32) -> Vec<ReleasedPing> {
        let mut released: Vec<ReleasedPing> = self
            .queue
            .iter_mut()
            .filter(|p| p.ping_number <= target)
            .filter_map(Ping::release)
            .collect();
        released.sort_by_key(|r| r.ping_number);
        if let Some(last) = released.last() {
            self.high_water = Some(self.high_water.map_or(last.ping_number, |hw| hw.max(last.ping_number)));
        }
        released
    }

    /// Return released pings the writer could not write.
    ///
    /// Each ping goes back to Pending or Ready with its pages, so a later
    /// release writes it. A ping already evicted is put back at the front.
    pub fn restore(&mut self, pings: Vec<ReleasedPing>) {
        for released in pings.into_iter().rev() {
            match self.queue.find_mut(released.ping_number) {
                Some(ping) => ping.restore(released),
                None => {
                    let mut ping = Ping::new(released.ping_number, released.mask);
                    ping.restore(released);
                    self.queue.push_front(ping);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LF: ChannelType = ChannelType::LowFrequency;
    const HF: ChannelType = ChannelType::HighFrequency;
    const RAW: ChannelType = ChannelType::RawBathy;
    const PROC: ChannelType = ChannelType::ProcessedBathy;

    fn mask(channels: &[ChannelType]) -> ChannelMask {
        ChannelMask::from_channels(channels)
    }

    fn order(released: &ReleasedPing) -> Vec<ChannelType> {
        released.pages.iter().map(|(c, _)| *c).collect()
    }

    #[test]
    fn test_ping_states() {
        let mut ping = Ping::new(1, mask(&[LF, RAW]));
        assert_eq!(ping.state(), PingState::Pending);
        ping.store(RAW, vec![2]);
        assert_eq!(ping.state(), PingState::Pending);
        ping.store(LF, vec![1]);
        assert_eq!(ping.state(), PingState::Ready);
        assert!(ping.release().is_some());
        assert_eq!(ping.state(), PingState::Written);
        assert!(ping.release().is_none());
    }

    #[test]
    fn test_write_order_is_fixed_for_every_arrival_order() {
        let all = [LF, RAW, PROC, HF];
        // every permutation of the four channels
        let mut perms = vec![vec![]];
        for _ in 0..4 {
            let mut next = Vec::new();
            for p in &perms {
                for c in all {
                    if !p.contains(&c) {
                        let mut q = p.clone();
                        q.push(c);
                        next.push(q);
                    }
                }
            }
            perms = next;
        }
        assert_eq!(perms.len(), 24);

        for perm in perms {
            let mut policy = Policy::new(50);
            let mut released = Vec::new();
            for c in &perm {
                released.extend(policy.push(7, *c, vec![c.mask_bit()], mask(&all)).released);
            }
            assert_eq!(released.len(), 1, "arrival {:?}", perm);
            assert_eq!(order(&released[0]), vec![LF, RAW, PROC, HF]);
            assert!(released[0].complete);
        }
    }

    #[test]
    fn test_scenario_ping_100_without_hf() {
        let mut policy = Policy::new(50);
        let m = mask(&[LF, RAW, PROC]);

        let out = policy.push(100, RAW, vec![3], m);
        assert!(out.released.is_empty());
        let out = policy.push(100, PROC, vec![4], m);
        assert!(out.released.is_empty());
        assert_eq!(policy.queue().get(100).map(Ping::state), Some(PingState::Pending));

        let out = policy.push(100, LF, vec![1], m);
        assert_eq!(out.released.len(), 1);
        assert_eq!(order(&out.released[0]), vec![LF, RAW, PROC]);
    }

    #[test]
    fn test_ready_ping_releases_older_pending_in_order() {
        let mut policy = Policy::new(50);
        let m = mask(&[LF, RAW]);
        policy.push(12, LF, vec![], m);
        policy.push(10, LF, vec![], m);
        policy.push(14, LF, vec![], m);

        let out = policy.push(12, RAW, vec![], m);
        let numbers: Vec<u32> = out.released.iter().map(|r| r.ping_number).collect();
        assert_eq!(numbers, vec![10, 12]);
        assert!(!out.released[0].complete);
        assert!(out.released[1].complete);
        assert_eq!(policy.queue().get(14).map(Ping::state), Some(PingState::Pending));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut policy = Policy::new(50);
        let m = mask(&[LF]);
        assert_eq!(policy.push(1, LF, vec![1], m).released.len(), 1);
        assert!(policy.release_through(1).is_empty());
        assert!(policy.release_through(u32::MAX).is_empty());
    }

    #[test]
    fn test_late_page_for_written_ping_is_dropped() {
        let mut policy = Policy::new(50);
        let m = mask(&[LF]);
        policy.push(1, LF, vec![1], m);
        let out = policy.push(1, HF, vec![2], m);
        assert!(out.late);
        assert!(out.released.is_empty());
    }

    #[test]
    fn test_overflow_forces_oldest_exactly_once() {
        let mut policy = Policy::new(50);
        let m = mask(&[LF, RAW]);
        for ping in 1..=50 {
            assert!(policy.push(ping, LF, vec![ping as u8], m).released.is_empty());
        }
        assert!(policy.queue().is_full());

        let out = policy.push(51, LF, vec![51], m);
        assert_eq!(out.evicted, Some(1));
        assert_eq!(out.released.len(), 1);
        assert_eq!(out.released[0].ping_number, 1);
        assert!(!out.released[0].complete);
        assert_eq!(out.released[0].pages, vec![(LF, vec![1])]);
        assert_eq!(policy.queue().len(), 50);
        assert!(policy.queue().get(1).is_none());

        let out = policy.push(52, LF, vec![52], m);
        assert_eq!(out.evicted, Some(2));
        assert_eq!(out.released.len(), 1);
        assert_eq!(out.released[0].ping_number, 2);
    }

    #[test]
    fn test_eviction_of_written_front_releases_nothing() {
        let mut policy = Policy::new(2);
        let m = mask(&[LF]);
        policy.push(1, LF, vec![], m);
        policy.push(2, LF, vec![], m);
        let out = policy.push(3, LF, vec![], m);
        assert_eq!(out.evicted, Some(1));
        // ping 1 was already written by its own flush; ping 3 flushes itself
        let numbers: Vec<u32> = out.released.iter().map(|r| r.ping_number).collect();
        assert_eq!(numbers, vec![3]);
    }

    #[test]
    fn test_page_for_evicted_ping_is_late() {
        let mut policy = Policy::new(3);
        let m = mask(&[LF, RAW]);
        for ping in 1..=4 {
            policy.push(ping, LF, vec![], m);
        }
        // ping 1 was forced out; its raw bathy page must not reopen it
        let out = policy.push(1, RAW, vec![], m);
        assert!(out.late);
        assert!(policy.queue().get(1).is_none());

        // a number far behind is a restarted counter
        let mut policy = Policy::new(3);
        policy.push(100, LF, vec![], mask(&[LF]));
        let out = policy.push(1, LF, vec![], mask(&[LF]));
        assert!(!out.late);
        assert_eq!(out.released.len(), 1);
    }

    #[test]
    fn test_restored_ping_is_released_again() {
        let mut policy = Policy::new(50);
        let m = mask(&[LF, RAW]);
        policy.push(1, LF, vec![1], m);
        policy.push(2, LF, vec![3], m);
        let out = policy.push(2, RAW, vec![4], m);
        assert_eq!(out.released.len(), 2);

        policy.restore(out.released);
        assert_eq!(policy.queue().get(1).map(Ping::state), Some(PingState::Pending));
        assert_eq!(policy.queue().get(2).map(Ping::state), Some(PingState::Ready));

        // the refetched page is not late and releases both again
        let out = policy.push(2, LF, vec![5], m);
        assert!(!out.late);
        assert!(out.duplicate);
        let numbers: Vec<u32> = out.released.iter().map(|r| r.ping_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(out.released[1].pages, vec![(LF, vec![5]), (RAW, vec![4])]);
    }

    #[test]
    fn test_restored_evicted_ping_returns_to_front() {
        let mut policy = Policy::new(2);
        let m = mask(&[LF, RAW]);
        policy.push(1, LF, vec![1], m);
        policy.push(2, LF, vec![2], m);
        let out = policy.push(3, LF, vec![3], m);
        assert_eq!(out.evicted, Some(1));

        policy.restore(out.released);
        assert_eq!(policy.queue().front().map(Ping::ping_number), Some(1));
        assert_eq!(policy.queue().len(), 3);

        // the next new ping brings the queue back to capacity
        let out = policy.push(4, LF, vec![4], m);
        let numbers: Vec<u32> = out.released.iter().map(|r| r.ping_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(out.evicted, Some(2));
        assert_eq!(policy.queue().len(), 2);
    }

    #[test]
    fn test_duplicate_page_replaces_slot() {
        let mut policy = Policy::new(4);
        let m = mask(&[LF, RAW]);
        policy.push(5, RAW, vec![1], m);
        let out = policy.push(5, RAW, vec![2], m);
        assert!(out.duplicate);
        let out = policy.push(5, LF, vec![0], m);
        assert_eq!(out.released[0].pages[1], (RAW, vec![2]));
    }
}
