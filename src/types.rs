use crate::consts::RDM_MAX_PARAMETER_DATA_LENGTH;

/// Parameter data of a single rdm package.
pub type DataPack = heapless::Vec<u8, RDM_MAX_PARAMETER_DATA_LENGTH>;

/// Raised when a wire value does not map onto a known enum variant. Contains the value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnknownValue(pub u16);

impl core::fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "unknown value {:#06X}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for UnknownValue {}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RequestCommandClass {
    DiscoveryCommand = 0x10,
    GetCommand = 0x20,
    SetCommand = 0x30,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseCommandClass {
    DiscoveryCommandResponse = 0x11,
    GetCommandResponse = 0x21,
    SetCommandResponse = 0x31,
}

impl RequestCommandClass {
    /// Returns the command class a responder answers this request with.
    pub fn response_class(&self) -> ResponseCommandClass {
        match self {
            Self::DiscoveryCommand => ResponseCommandClass::DiscoveryCommandResponse,
            Self::GetCommand => ResponseCommandClass::GetCommandResponse,
            Self::SetCommand => ResponseCommandClass::SetCommandResponse,
        }
    }
}

impl TryFrom<u8> for RequestCommandClass {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::DiscoveryCommand),
            0x20 => Ok(Self::GetCommand),
            0x30 => Ok(Self::SetCommand),
            _ => Err(UnknownValue(value as u16)),
        }
    }
}

impl TryFrom<u8> for ResponseCommandClass {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x11 => Ok(Self::DiscoveryCommandResponse),
            0x21 => Ok(Self::GetCommandResponse),
            0x31 => Ok(Self::SetCommandResponse),
            _ => Err(UnknownValue(value as u16)),
        }
    }
}

/// Response status of a rdm package
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseType {
    /// The request was acknowledged.
    ResponseTypeAck = 0x00,
    /// The request was acknowledged but the result isn't ready yet.
    ResponseTypeAckTimer = 0x01,
    /// The request was not acknowledged.
    ResponseTypeNackReason = 0x02,
    /// The request was acknowledged but the response does not fit into a single response.
    ResponseTypeAckOverflow = 0x03,
}

impl TryFrom<u8> for ResponseType {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::ResponseTypeAck,
            0x01 => Self::ResponseTypeAckTimer,
            0x02 => Self::ResponseTypeNackReason,
            0x03 => Self::ResponseTypeAckOverflow,
            _ => return Err(UnknownValue(value as u16)),
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum NackReason {
    UnknownPid = 0x0000,
    FormatError = 0x0001,
    HardwareFault = 0x0002,
    ProxyReject = 0x0003,
    WriteProtect = 0x0004,
    UnsupportedCommandClass = 0x0005,
    DataOutOfRange = 0x0006,
    BufferFull = 0x0007,
    PacketSizeUnsupported = 0x0008,
    SubDeviceOutOfRange = 0x0009,
    ProxyBufferFull = 0x000A,
}

impl TryFrom<u16> for NackReason {
    type Error = UnknownValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0000 => Self::UnknownPid,
            0x0001 => Self::FormatError,
            0x0002 => Self::HardwareFault,
            0x0003 => Self::ProxyReject,
            0x0004 => Self::WriteProtect,
            0x0005 => Self::UnsupportedCommandClass,
            0x0006 => Self::DataOutOfRange,
            0x0007 => Self::BufferFull,
            0x0008 => Self::PacketSizeUnsupported,
            0x0009 => Self::SubDeviceOutOfRange,
            0x000A => Self::ProxyBufferFull,
            _ => return Err(UnknownValue(value)),
        })
    }
}
