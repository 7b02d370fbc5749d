//! Counters and flags of a port that are shared between the signal and the network context.

use crate::rdm_controller::RdmState;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Last fault a port ran into.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PortFault {
    None = 0,
    /// The driver failed to write a frame.
    FrameWrite = 1,
    /// The driver wrote fewer bytes than requested.
    UartOverflow = 2,
    /// The line was turned around for longer than allowed and got reclaimed.
    TurnaroundTimeout = 3,
    /// An rdm exchange failed on the driver level.
    RdmDriver = 4,
    /// A response did not fit in before the next frame.
    WindowExceeded = 5,
}

impl PortFault {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::FrameWrite,
            2 => Self::UartOverflow,
            3 => Self::TurnaroundTimeout,
            4 => Self::RdmDriver,
            5 => Self::WindowExceeded,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PortStatus {
    frames_sent: AtomicU32,
    frame_faults: AtomicU32,
    turnaround_timeouts: AtomicU32,
    deferrals: AtomicU32,
    rdm_timeouts: AtomicU32,
    discarded_responses: AtomicU32,
    last_fault: AtomicU8,
    rdm_state: AtomicU8,
    discovery_requested: AtomicBool,
}

/// Copy of a [PortStatus] at one point in time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortStatusSnapshot {
    pub frames_sent: u32,
    pub frame_faults: u32,
    pub turnaround_timeouts: u32,
    pub deferrals: u32,
    pub rdm_timeouts: u32,
    /// Responses dropped because they answered another transaction.
    pub discarded_responses: u32,
    pub last_fault: PortFault,
    pub rdm_state: RdmState,
}

impl PortStatus {
    pub const fn new() -> Self {
        Self {
            frames_sent: AtomicU32::new(0),
            frame_faults: AtomicU32::new(0),
            turnaround_timeouts: AtomicU32::new(0),
            deferrals: AtomicU32::new(0),
            rdm_timeouts: AtomicU32::new(0),
            discarded_responses: AtomicU32::new(0),
            last_fault: AtomicU8::new(PortFault::None as u8),
            rdm_state: AtomicU8::new(RdmState::Idle as u8),
            discovery_requested: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> PortStatusSnapshot {
        PortStatusSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frame_faults: self.frame_faults.load(Ordering::Relaxed),
            turnaround_timeouts: self.turnaround_timeouts.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
            rdm_timeouts: self.rdm_timeouts.load(Ordering::Relaxed),
            discarded_responses: self.discarded_responses.load(Ordering::Relaxed),
            last_fault: PortFault::from_u8(self.last_fault.load(Ordering::Relaxed)),
            rdm_state: RdmState::from_u8(self.rdm_state.load(Ordering::Relaxed)),
        }
    }

    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self, fault: PortFault) {
        if fault != PortFault::TurnaroundTimeout {
            self.frame_faults.fetch_add(1, Ordering::Relaxed);
        }
        self.last_fault.store(fault as u8, Ordering::Relaxed);
    }

    pub(crate) fn turnaround_timed_out(&self) {
        self.turnaround_timeouts.fetch_add(1, Ordering::Relaxed);
        self.record_fault(PortFault::TurnaroundTimeout);
    }

    pub(crate) fn rdm_deferred(&self) {
        self.deferrals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rdm_timed_out(&self) {
        self.rdm_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn response_discarded(&self) {
        self.discarded_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_rdm_state(&self, state: RdmState) {
        self.rdm_state.store(state as u8, Ordering::Relaxed);
    }

    /// Asks the signal context to run a new discovery on this port.
    pub fn request_discovery(&self) {
        self.discovery_requested.store(true, Ordering::Release);
    }

    /// Returns and clears the discovery request flag.
    pub fn take_discovery_request(&self) -> bool {
        self.discovery_requested.swap(false, Ordering::Acquire)
    }
}
