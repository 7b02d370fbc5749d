//! Bookkeeping of the RDM discovery binary search.
//!
//! The search is split into single steps so it can be run inside the gaps between frames. It keeps
//! a depth first stack of uid ranges that still have to be queried with DISC_UNIQUE_BRANCH. Refer
//! to section 7 of ANSI E1.20 for the algorithm.

use crate::consts::{MAX_DEVICE_UID, RDM_UID_BITS};
use crate::dmx_port::DiscoveryOption;
use crate::unique_identifier::UniqueIdentifier;

/// A range can be split 48 times, the stack never holds more than one range per level.
const DISCOVERY_STACK_SIZE: usize = 64;

/// Inclusive range of uids that is queried by one DISC_UNIQUE_BRANCH request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UidRange {
    pub lower: u64,
    pub upper: u64,
    /// How often the full range has been split to get this range.
    pub depth: u8,
}

impl UidRange {
    /// Every uid a device may have.
    pub const fn full() -> Self {
        Self {
            lower: 0,
            upper: MAX_DEVICE_UID,
            depth: 0,
        }
    }

    pub fn contains(&self, uid: UniqueIdentifier) -> bool {
        (self.lower..=self.upper).contains(&u64::from(uid))
    }

    pub fn is_single(&self) -> bool {
        self.lower >= self.upper
    }

    /// Returns the lower and the upper half.
    pub fn split(&self) -> (UidRange, UidRange) {
        let middle = self.lower + (self.upper - self.lower) / 2;

        (
            UidRange {
                lower: self.lower,
                upper: middle,
                depth: self.depth + 1,
            },
            UidRange {
                lower: middle + 1,
                upper: self.upper,
                depth: self.depth + 1,
            },
        )
    }

    /// Parameter data of the DISC_UNIQUE_BRANCH request.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buffer = [0u8; 12];
        buffer[..6].copy_from_slice(&self.lower.to_be_bytes()[2..8]);
        buffer[6..].copy_from_slice(&self.upper.to_be_bytes()[2..8]);

        buffer
    }
}

/// What a single branch request resulted in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BranchOutcome {
    /// Nobody answered, the range is done.
    Empty,
    /// Several devices answered, both halves are queued.
    Split,
    /// The collision can't be resolved any further, the range is given up.
    Unresolvable,
    /// Exactly one device answered. It has to be muted before the search continues.
    Candidate(UniqueIdentifier),
}

#[derive(Debug)]
pub struct DiscoverySearch {
    stack: heapless::Vec<UidRange, DISCOVERY_STACK_SIZE>,
    candidate: Option<(UniqueIdentifier, UidRange)>,
    branch_requests: u32,
}

impl Default for DiscoverySearch {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoverySearch {
    pub const fn new() -> Self {
        Self {
            stack: heapless::Vec::new(),
            candidate: None,
            branch_requests: 0,
        }
    }

    /// Starts a new search over all uids, a running search is discarded.
    pub fn start(&mut self) {
        self.stack.clear();
        self.candidate = None;
        self.branch_requests = 0;
        let _ = self.stack.push(UidRange::full());
    }

    /// Returns true while ranges are left or a candidate waits for its mute.
    pub fn is_active(&self) -> bool {
        !self.stack.is_empty() || self.candidate.is_some()
    }

    /// Number of DISC_UNIQUE_BRANCH requests of the current search.
    pub fn branch_requests(&self) -> u32 {
        self.branch_requests
    }

    /// The device that answered the last branch request and still has to be muted.
    pub fn candidate(&self) -> Option<UniqueIdentifier> {
        self.candidate.map(|(uid, _)| uid)
    }

    /// Takes the next range to query.
    pub fn next_range(&mut self) -> Option<UidRange> {
        if self.candidate.is_some() {
            return None;
        }

        self.stack.pop()
    }

    /// Puts a range back that could not be queried.
    pub fn restore_range(&mut self, range: UidRange) {
        self.push(range);
    }

    /// Feeds the answer to the branch request for `range` into the search.
    pub fn branch_result(&mut self, range: UidRange, option: DiscoveryOption) -> BranchOutcome {
        self.branch_requests += 1;

        match option {
            DiscoveryOption::NoDevice => BranchOutcome::Empty,
            DiscoveryOption::Found(uid) if range.contains(uid) => {
                self.candidate = Some((uid, range));
                BranchOutcome::Candidate(uid)
            },
            // a uid from outside of the range can only be the result of overlapping responses
            DiscoveryOption::Found(_) | DiscoveryOption::Collision => {
                if range.is_single() || range.depth >= RDM_UID_BITS {
                    warn!(
                        "giving up colliding range {} to {}",
                        range.lower, range.upper
                    );
                    return BranchOutcome::Unresolvable;
                }

                let (lower_half, upper_half) = range.split();
                self.push(upper_half);
                self.push(lower_half);

                BranchOutcome::Split
            },
        }
    }

    /// The candidate acknowledged its mute. Its range is searched again for further devices.
    pub fn candidate_muted(&mut self) -> Option<UniqueIdentifier> {
        let (uid, range) = self.candidate.take()?;
        self.push(range);

        Some(uid)
    }

    /// The candidate never acknowledged its mute. The range is dropped since the device would
    /// keep answering.
    pub fn candidate_lost(&mut self) -> Option<UniqueIdentifier> {
        self.candidate.take().map(|(uid, _)| uid)
    }

    fn push(&mut self, range: UidRange) {
        if self.stack.push(range).is_err() {
            warn!("discovery stack full, dropping range {} to {}", range.lower, range.upper);
        }
    }
}
