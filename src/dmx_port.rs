//! A single DMX512 output with an optional turnaround for RDM.
//!
//! The port generates frames from universe snapshots at a fixed period. After every frame the
//! line idles for the inter frame time plus the rdm window before the next break is due, the rdm
//! controller may turn the line around inside that gap. While turned around no frames are sent.
//! If the line isn't released before its deadline, [DmxPort::poll] takes it back.

use crate::clock::Clock;
use crate::consts::{
    BREAK_MICROS, DMX_MAX_PACKAGE_SIZE, INTER_FRAME_IDLE_MICROS, MAB_MICROS, MAX_REFRESH_HZ,
    MIN_BREAK_MICROS, MIN_MAB_MICROS, RDM_MAX_DISCOVERY_RESPONSE_SIZE, RDM_MAX_PACKAGE_SIZE,
    RDM_RESPONSE_TIMEOUT_MICROS, RDM_WINDOW_MICROS, SLOT_MICROS,
};
use crate::dmx_uart_driver::{
    BreakTiming, DmxRecvUartDriver, DmxRespUartDriver, DmxUartDriverError,
};
use crate::rdm_data::{deserialize_discovery_response, RdmData, RdmDeserializationError};
use crate::status::{PortFault, PortStatus};
use crate::unique_identifier::UniqueIdentifier;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxError<E> {
    /// There were fewer bytes written to the uart then there should have been.
    UartOverflow,
    /// The request timed out.
    TimeoutError,
    /// Raised when an RDM package could not be deserialized.
    DeserializationError(RdmDeserializationError),
    /// The line is turned around, frames can't be sent.
    LineBusy,
    /// Rdm traffic requires the line to be turned around first.
    NotTurnedAround,
    /// The response announced more slots than fit in before the next frame.
    WindowExceeded,
    /// An error raised by the uart driver.
    DriverError(E),
}

impl<E: core::fmt::Display> core::fmt::Display for DmxError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DmxError::UartOverflow => write!(f, "uart overflowed"),
            DmxError::TimeoutError => write!(f, "request timed out"),
            DmxError::DeserializationError(error) => write!(f, "{}", error),
            DmxError::LineBusy => write!(f, "line is turned around"),
            DmxError::NotTurnedAround => write!(f, "line is not turned around"),
            DmxError::WindowExceeded => write!(f, "response does not fit before the next frame"),
            DmxError::DriverError(error) => write!(f, "{}", error),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Display + core::fmt::Debug> std::error::Error for DmxError<E> {}

impl<E> From<DmxUartDriverError<E>> for DmxError<E> {
    fn from(value: DmxUartDriverError<E>) -> Self {
        match value {
            DmxUartDriverError::TimeoutError => Self::TimeoutError,
            DmxUartDriverError::DriverError(driver_error) => Self::DriverError(driver_error),
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryOption {
    /// No device responded to the discovery request.
    /// There aren't any devices in the specified unique id range.
    NoDevice,
    /// The response to the discovery request couldn't be deserialized.
    /// There are multiple devices in the specified unique id range.
    Collision,
    /// The discovery response was successfully deserialized.
    /// There is only one device in the specified unique id range.
    Found(UniqueIdentifier),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimingError {
    /// Break is shorter than 88µs.
    BreakTooShort,
    /// Mark after break is shorter than 8µs.
    MarkAfterBreakTooShort,
    /// Refresh rate must be between 1 and 44 Hz.
    RefreshRateOutOfRange,
}

impl core::fmt::Display for TimingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TimingError::BreakTooShort => write!(f, "break must be at least {MIN_BREAK_MICROS}µs"),
            TimingError::MarkAfterBreakTooShort => {
                write!(f, "mark after break must be at least {MIN_MAB_MICROS}µs")
            },
            TimingError::RefreshRateOutOfRange => {
                write!(f, "refresh rate must be between 1 and {MAX_REFRESH_HZ}Hz")
            },
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TimingError {}

/// Timing profile of a port. All values are in microseconds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmxTiming {
    break_us: u64,
    mark_after_break_us: u64,
    inter_frame_idle_us: u64,
    rdm_window_us: u64,
    turnaround_timeout_us: u64,
    refresh_hz: u64,
}

impl Default for DmxTiming {
    fn default() -> Self {
        Self {
            break_us: BREAK_MICROS,
            mark_after_break_us: MAB_MICROS,
            inter_frame_idle_us: INTER_FRAME_IDLE_MICROS,
            rdm_window_us: RDM_WINDOW_MICROS,
            turnaround_timeout_us: RDM_RESPONSE_TIMEOUT_MICROS,
            refresh_hz: MAX_REFRESH_HZ,
        }
    }
}

/// Describes a frame the port put on the line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameReport {
    pub break_us: u64,
    pub mark_after_break_us: u64,
    /// Slots including the start code.
    pub slots: usize,
    pub duration_us: u64,
}

impl DmxTiming {
    pub fn new(
        break_us: u64,
        mark_after_break_us: u64,
        inter_frame_idle_us: u64,
        rdm_window_us: u64,
        turnaround_timeout_us: u64,
    ) -> Result<Self, TimingError> {
        if break_us < MIN_BREAK_MICROS {
            return Err(TimingError::BreakTooShort);
        }

        if mark_after_break_us < MIN_MAB_MICROS {
            return Err(TimingError::MarkAfterBreakTooShort);
        }

        Ok(Self {
            break_us,
            mark_after_break_us,
            inter_frame_idle_us,
            rdm_window_us,
            turnaround_timeout_us,
            refresh_hz: MAX_REFRESH_HZ,
        })
    }

    /// Lowers the refresh rate ceiling. Rates above 44Hz are rejected.
    pub fn with_refresh_rate(mut self, refresh_hz: u64) -> Result<Self, TimingError> {
        if !(1..=MAX_REFRESH_HZ).contains(&refresh_hz) {
            return Err(TimingError::RefreshRateOutOfRange);
        }

        self.refresh_hz = refresh_hz;
        Ok(self)
    }

    pub fn break_us(&self) -> u64 {
        self.break_us
    }

    pub fn mark_after_break_us(&self) -> u64 {
        self.mark_after_break_us
    }

    pub fn rdm_window_us(&self) -> u64 {
        self.rdm_window_us
    }

    pub fn turnaround_timeout_us(&self) -> u64 {
        self.turnaround_timeout_us
    }

    pub fn break_timing(&self) -> BreakTiming {
        BreakTiming {
            break_us: self.break_us as u32,
            mark_after_break_us: self.mark_after_break_us as u32,
        }
    }

    /// Time on the line for a break followed by `slots` slots.
    pub fn frame_duration_us(&self, slots: usize) -> u64 {
        self.break_us + self.mark_after_break_us + slots as u64 * SLOT_MICROS
    }

    /// Time between two breaks.
    pub fn frame_period_us(&self, slots: usize) -> u64 {
        let period = self.frame_duration_us(slots) + self.inter_frame_idle_us + self.rdm_window_us;

        period.max(1_000_000 / self.refresh_hz)
    }

    pub fn frame_report(&self, slots: usize) -> FrameReport {
        FrameReport {
            break_us: self.break_us,
            mark_after_break_us: self.mark_after_break_us,
            slots,
            duration_us: self.frame_duration_us(slots),
        }
    }

    /// Time needed to send a request of `request_len` bytes and receive a response of up to
    /// `response_len` bytes.
    pub fn exchange_budget_us(&self, request_len: usize, response_len: usize) -> u64 {
        self.frame_duration_us(request_len)
            + self.turnaround_timeout_us
            + response_len as u64 * SLOT_MICROS
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortDirection {
    /// The port transmits frames.
    Framing,
    /// The port listens for rdm responses until the deadline.
    TurnedAround { deadline_us: u64 },
}

pub struct DmxPort<'a, D, C> {
    driver: D,
    clock: C,
    timing: DmxTiming,
    direction: PortDirection,
    next_frame_us: u64,
    status: &'a PortStatus,
}

impl<'a, D: DmxRespUartDriver + DmxRecvUartDriver, C: Clock> DmxPort<'a, D, C> {
    /// Creates a port, the first frame is due immediately.
    pub fn new(driver: D, clock: C, timing: DmxTiming, status: &'a PortStatus) -> Self {
        let next_frame_us = clock.now_us();

        Self {
            driver,
            clock,
            timing,
            direction: PortDirection::Framing,
            next_frame_us,
            status,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn timing(&self) -> &DmxTiming {
        &self.timing
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn status(&self) -> &'a PortStatus {
        self.status
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Sends `frame` (start code included) right away. The next frame is scheduled one period
    /// after this one started, even if the driver failed.
    pub fn transmit_frame(&mut self, frame: &[u8]) -> Result<FrameReport, DmxError<D::DriverError>> {
        if matches!(self.direction, PortDirection::TurnedAround { .. }) {
            return Err(DmxError::LineBusy);
        }

        let frame = &frame[..frame.len().min(DMX_MAX_PACKAGE_SIZE)];
        let started_us = self.clock.now_us();
        self.next_frame_us = started_us + self.timing.frame_period_us(frame.len());

        match self.driver.write_frames(frame, &self.timing.break_timing()) {
            Ok(written) if written == frame.len() => {
                self.status.frame_sent();
                Ok(self.timing.frame_report(frame.len()))
            },
            Ok(written) => {
                warn!("frame truncated, {} of {} slots written", written, frame.len());
                self.status.record_fault(PortFault::UartOverflow);
                Err(DmxError::UartOverflow)
            },
            Err(error) => {
                warn!("frame write failed, frame abandoned");
                self.status.record_fault(PortFault::FrameWrite);
                Err(error.into())
            },
        }
    }

    /// Sends the next frame if it is due and reclaims the line if a turnaround overran its
    /// deadline. Faults are counted in the [PortStatus].
    pub fn poll(&mut self, frame: &[u8]) -> Option<FrameReport> {
        let now_us = self.clock.now_us();

        if let PortDirection::TurnedAround { deadline_us } = self.direction {
            if now_us < deadline_us {
                return None;
            }

            warn!("turnaround deadline passed, reclaiming line");
            self.status.turnaround_timed_out();
            self.release_turnaround();
        }

        if now_us < self.next_frame_us {
            return None;
        }

        self.transmit_frame(frame).ok()
    }

    /// Microseconds until the next frame is due or the turnaround deadline passes.
    pub fn time_until_next_event_us(&self) -> u64 {
        let now_us = self.clock.now_us();

        match self.direction {
            PortDirection::Framing => self.next_frame_us.saturating_sub(now_us),
            PortDirection::TurnedAround { deadline_us } => deadline_us.saturating_sub(now_us),
        }
    }

    /// Idle time left until the next frame is due. Zero while turned around.
    pub fn turnaround_window_us(&self) -> u64 {
        match self.direction {
            PortDirection::Framing => self.next_frame_us.saturating_sub(self.clock.now_us()),
            PortDirection::TurnedAround { .. } => 0,
        }
    }

    /// Suspends framing so rdm requests can be exchanged.
    pub fn request_turnaround(&mut self) -> Result<(), DmxError<D::DriverError>> {
        if matches!(self.direction, PortDirection::TurnedAround { .. }) {
            return Err(DmxError::LineBusy);
        }

        self.direction = PortDirection::TurnedAround {
            deadline_us: self.clock.now_us() + self.timing.turnaround_timeout_us,
        };

        Ok(())
    }

    /// Hands the line back to framing. The next frame keeps its schedule but waits at least the
    /// inter frame idle time.
    pub fn release_turnaround(&mut self) {
        if matches!(self.direction, PortDirection::Framing) {
            return;
        }

        self.direction = PortDirection::Framing;
        self.next_frame_us = self
            .next_frame_us
            .max(self.clock.now_us() + self.timing.inter_frame_idle_us);
    }

    fn remaining_turnaround_us(&self) -> Result<u64, DmxError<D::DriverError>> {
        match self.direction {
            PortDirection::Framing => Err(DmxError::NotTurnedAround),
            PortDirection::TurnedAround { deadline_us } => {
                match deadline_us.checked_sub(self.clock.now_us()) {
                    Some(remaining) if remaining > 0 => Ok(remaining),
                    _ => Err(DmxError::TimeoutError),
                }
            },
        }
    }

    /// Time left until the line has to idle before the next frame.
    fn frame_window_us(&self) -> u64 {
        self.next_frame_us
            .saturating_sub(self.clock.now_us() + self.timing.inter_frame_idle_us)
    }

    /// Sends an rdm package. The turnaround deadline restarts once the package is out.
    pub fn rdm_send(&mut self, package: &RdmData) -> Result<(), DmxError<D::DriverError>> {
        if matches!(self.direction, PortDirection::Framing) {
            return Err(DmxError::NotTurnedAround);
        }

        let serialized_package = package.serialize();
        let written_bytes = count_driver_fault(
            self.status,
            self.driver
                .write_frames(&serialized_package, &self.timing.break_timing()),
        )?;

        self.direction = PortDirection::TurnedAround {
            deadline_us: self.clock.now_us() + self.timing.turnaround_timeout_us,
        };

        if serialized_package.len() != written_bytes {
            self.status.record_fault(PortFault::UartOverflow);
            return Err(DmxError::UartOverflow);
        }

        Ok(())
    }

    /// Receives an rdm response within the remaining turnaround time.
    pub fn rdm_receive(&mut self) -> Result<RdmData, DmxError<D::DriverError>> {
        let remaining_us = self.remaining_turnaround_us()?;

        let mut receive_buffer = [0u8; RDM_MAX_PACKAGE_SIZE];
        let mut bytes_read = count_driver_fault(
            self.status,
            self.driver
                .read_frames(&mut receive_buffer[0..3], remaining_us as u32),
        )?;
        if bytes_read < 3 {
            return Err(DmxError::DeserializationError(
                RdmDeserializationError::BufferTooSmall,
            ));
        }

        // plus two checksum bytes
        let message_length = receive_buffer[2] as usize + 2;
        if !(3..=RDM_MAX_PACKAGE_SIZE).contains(&message_length) {
            return Err(DmxError::DeserializationError(
                RdmDeserializationError::WrongMessageLength(message_length),
            ));
        }

        // the responder is already sending, give it the time the remaining slots need but never
        // more than what is left before the next frame
        let rest_us = (message_length - 3) as u64 * SLOT_MICROS;
        let window_us = self.frame_window_us();
        if rest_us > window_us {
            warn!("rdm response of {} slots overruns the frame window", message_length);
            self.status.record_fault(PortFault::WindowExceeded);
            let _ = self
                .driver
                .read_frames_no_break(&mut receive_buffer[3..message_length], window_us as u32);
            return Err(DmxError::WindowExceeded);
        }

        let rest_timeout_us = (rest_us + self.timing.turnaround_timeout_us).min(window_us);
        bytes_read += count_driver_fault(
            self.status,
            self.driver.read_frames_no_break(
                &mut receive_buffer[3..message_length],
                rest_timeout_us as u32,
            ),
        )?;

        RdmData::deserialize(&receive_buffer[..bytes_read]).map_err(DmxError::DeserializationError)
    }

    /// Receives the answer to a discovery unique branch request.
    pub fn rdm_receive_discovery(&mut self) -> Result<DiscoveryOption, DmxError<D::DriverError>> {
        let remaining_us = self.remaining_turnaround_us()?;

        let mut receive_buffer = [0u8; RDM_MAX_DISCOVERY_RESPONSE_SIZE];
        let bytes_read = match self
            .driver
            .read_frames_no_break(&mut receive_buffer, remaining_us as u32)
        {
            Err(DmxUartDriverError::TimeoutError) => return Ok(DiscoveryOption::NoDevice),
            result => count_driver_fault(self.status, result)?,
        };

        if bytes_read == 0 {
            return Ok(DiscoveryOption::NoDevice);
        }

        // anything that doesn't decode cleanly is the sum of several responders
        Ok(
            deserialize_discovery_response(&receive_buffer[..bytes_read])
                .map_or(DiscoveryOption::Collision, DiscoveryOption::Found),
        )
    }
}

fn count_driver_fault<T, E>(
    status: &PortStatus,
    result: Result<T, DmxUartDriverError<E>>,
) -> Result<T, DmxError<E>> {
    result.map_err(|error| {
        if let DmxUartDriverError::DriverError(_) = error {
            warn!("rdm exchange failed on driver level");
            status.record_fault(PortFault::RdmDriver);
        }
        error.into()
    })
}
