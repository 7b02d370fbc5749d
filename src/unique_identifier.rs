use crate::consts::{BROADCAST_UID, MAX_DEVICE_UID};

/// Raised when a uid would collide with one of the broadcast addresses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidUid;

impl core::fmt::Display for InvalidUid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "uid is reserved for broadcasts")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidUid {}

/// The 48 bit unique id of an rdm device, 16 bit manufacturer id followed by 32 bit device id.
/// The manufacturer ids are assigned by the esta.
/// [more information](https://tsp.esta.org/tsp/working_groups/CP/mfctrIDs.php)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UniqueIdentifier {
    manufacturer_id: u16,
    device_id: u32,
}

impl core::fmt::Display for UniqueIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04X}:{:08X}", self.manufacturer_id, self.device_id)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for UniqueIdentifier {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{:04X}:{:08X}", self.manufacturer_id, self.device_id);
    }
}

impl UniqueIdentifier {
    /// First uid of the manufacturer id reserved for prototyping.
    pub const PROTOTYPE: Self = Self {
        manufacturer_id: 0x7FF0,
        device_id: 0,
    };

    pub fn new(manufacturer_id: u16, device_id: u32) -> Result<Self, InvalidUid> {
        if device_id == u32::MAX {
            return Err(InvalidUid);
        }

        Ok(UniqueIdentifier {
            manufacturer_id,
            device_id,
        })
    }

    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn to_bytes(&self) -> [u8; 6] {
        let mut buffer = [0u8; 6];

        buffer[..2].copy_from_slice(&self.manufacturer_id.to_be_bytes());
        buffer[2..].copy_from_slice(&self.device_id.to_be_bytes());

        buffer
    }

    /// Reads a uid from its wire representation. Fails for broadcast addresses.
    pub fn from_bytes(buffer: &[u8; 6]) -> Result<Self, InvalidUid> {
        match PackageAddress::from_bytes(buffer) {
            PackageAddress::Device(uid) => Ok(uid),
            _ => Err(InvalidUid),
        }
    }
}

impl TryFrom<u64> for UniqueIdentifier {
    type Error = InvalidUid;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > MAX_DEVICE_UID {
            return Err(InvalidUid);
        }

        Self::new((value >> u32::BITS) as u16, value as u32)
    }
}

impl From<UniqueIdentifier> for u64 {
    fn from(value: UniqueIdentifier) -> Self {
        ((value.manufacturer_id as u64) << u32::BITS) | value.device_id as u64
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PackageAddress {
    /// Broadcast to all devices.
    Broadcast,
    /// Broadcast to all devices from a specific manufacturer identified by the manufacturer id
    /// in the u16.
    ManufacturerBroadcast(u16),
    /// Send package to a specific device.
    Device(UniqueIdentifier),
}

impl PackageAddress {
    pub fn from_bytes(buffer: &[u8; 6]) -> Self {
        let manufacturer_id = u16::from_be_bytes([buffer[0], buffer[1]]);
        let device_id = u32::from_be_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]);

        if device_id != u32::MAX {
            return Self::Device(UniqueIdentifier {
                manufacturer_id,
                device_id,
            });
        }

        if manufacturer_id == u16::MAX {
            Self::Broadcast
        } else {
            Self::ManufacturerBroadcast(manufacturer_id)
        }
    }

    pub fn to_bytes(&self) -> [u8; 6] {
        match self {
            Self::Broadcast => [0xFFu8; 6],
            Self::ManufacturerBroadcast(manufacturer_id) => {
                let mut buffer = [0xFFu8; 6];
                buffer[..2].copy_from_slice(&manufacturer_id.to_be_bytes());

                buffer
            },
            Self::Device(uid) => uid.to_bytes(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        !matches!(self, PackageAddress::Device(_))
    }
}

impl From<UniqueIdentifier> for PackageAddress {
    fn from(value: UniqueIdentifier) -> Self {
        Self::Device(value)
    }
}

impl From<PackageAddress> for u64 {
    fn from(value: PackageAddress) -> Self {
        match value {
            PackageAddress::Broadcast => BROADCAST_UID,
            PackageAddress::ManufacturerBroadcast(manufacturer_id) => {
                ((manufacturer_id as u64) << u32::BITS) | u32::MAX as u64
            },
            PackageAddress::Device(uid) => uid.into(),
        }
    }
}
