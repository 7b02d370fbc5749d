use crate::consts::{BREAK_MICROS, MAB_MICROS};

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxUartDriverError<E> {
    /// The request timed out.
    /// IMPORTANT: If you implement a driver make sure this error gets raised instead
    /// of a driver specific error.
    TimeoutError,
    /// A driver specific error.
    DriverError(E),
}

impl<E: core::fmt::Display> core::fmt::Display for DmxUartDriverError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DmxUartDriverError::TimeoutError => write!(f, "timeout error occurred"),
            DmxUartDriverError::DriverError(error) => error.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Display + core::fmt::Debug> std::error::Error for DmxUartDriverError<E> {}

impl<E> From<E> for DmxUartDriverError<E> {
    fn from(value: E) -> Self {
        Self::DriverError(value)
    }
}

/// Line timing a driver has to generate in front of a frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BreakTiming {
    /// Duration the line is held low.
    pub break_us: u32,
    /// Duration of the mark after break.
    pub mark_after_break_us: u32,
}

impl Default for BreakTiming {
    fn default() -> Self {
        Self {
            break_us: BREAK_MICROS as u32,
            mark_after_break_us: MAB_MICROS as u32,
        }
    }
}

pub trait DmxUartDriver {
    type DriverError;
}

/// Object to implement access to the uart.
/// It can read frames.
/// It has to communicate at 250000 baud.
pub trait DmxRecvUartDriver: DmxUartDriver {
    /// Read frames preceded by a break (rdm responses).
    /// Returns the number of bytes actually read.
    fn read_frames(
        &mut self,
        buffer: &mut [u8],
        timeout_us: u32,
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>>;

    /// Read frames without waiting for break (rdm discovery responses).
    /// Returns the number of bytes actually read.
    fn read_frames_no_break(
        &mut self,
        buffer: &mut [u8],
        timeout_us: u32,
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>>;
}

/// Object to implement access to the uart.
/// It can write frames.
/// It has to communicate at 250000 baud, 8N2.
pub trait DmxRespUartDriver: DmxUartDriver {
    /// Write a break and mark after break as described by `timing`, then the frame.
    /// Returns the number of bytes actually written.
    fn write_frames(
        &mut self,
        buffer: &[u8],
        timing: &BreakTiming,
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>>;

    /// Write frames without break.
    /// Returns the number of bytes actually written.
    fn write_frames_no_break(
        &mut self,
        buffer: &[u8],
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>>;
}
