pub const DMX_NULL_START: u8 = 0x00;
/// start code + 512 byte package
pub const DMX_MAX_PACKAGE_SIZE: usize = 513;
pub const DMX_MAX_SLOTS: usize = 512;
pub const SC_RDM: u8 = 0xCC;
pub const SC_SUB_MESSAGE: u8 = 0x01;

pub const PREAMBLE_BYTE: u8 = 0xFE;
pub const SEPARATOR_BYTE: u8 = 0xAA;

pub const BROADCAST_UID: u64 = 0xFFFF_FFFFFFFF;
/// Highest uid a device may use, everything above is a broadcast.
pub const MAX_DEVICE_UID: u64 = 0xFFFF_FFFFFFFE;

pub const DMX_BAUD: u32 = 250_000;
/// Bits of one slot: 1 start bit, 8 data bits and 2 stop bits.
pub const SLOT_BITS: u64 = 11;
/// Time one slot takes on the line.
pub const SLOT_MICROS: u64 = SLOT_BITS * 1_000_000 / DMX_BAUD as u64;

/// Minimum break length of ANSI E1.11 for a transmitter.
pub const MIN_BREAK_MICROS: u64 = 88;
/// Minimum mark after break of ANSI E1.11 for a transmitter.
pub const MIN_MAB_MICROS: u64 = 8;
/// Break length that also satisfies the RDM controller requirements.
pub const BREAK_MICROS: u64 = 176;
pub const MAB_MICROS: u64 = 12;
pub const INTER_FRAME_IDLE_MICROS: u64 = 100;
/// Fastest refresh rate of a full universe.
pub const MAX_REFRESH_HZ: u64 = 44;
/// Time reserved after every frame for one rdm exchange.
pub const RDM_WINDOW_MICROS: u64 = 8_000;
/// How long the controller waits for a responder after its request went out.
pub const RDM_RESPONSE_TIMEOUT_MICROS: u64 = 2_800;

pub const RDM_MIN_PACKAGE_SIZE: usize = 26;
pub const RDM_MAX_PACKAGE_SIZE: usize = 257;
/// Excluding preamble and separator
pub const RDM_DISCOVERY_RESPONSE_SIZE: usize = 16;
/// Including 7 bytes preamble + 1 byte separator
pub const RDM_MAX_DISCOVERY_RESPONSE_SIZE: usize = RDM_DISCOVERY_RESPONSE_SIZE + 8;

pub const RDM_MAX_PARAMETER_DATA_LENGTH: usize = 231;
pub const RDM_DEVICE_INFO_SIZE: usize = 0x13;
/// Uid bits, bounds the depth of the discovery binary search.
pub const RDM_UID_BITS: u8 = 48;

/// Maximum amount of devices tracked per port.
pub const MAX_DEVICES_PER_PORT: usize = 64;
pub const MAX_PORTS: usize = 2;

pub const ARTNET_PORT: u16 = 0x1936;
pub const ARTNET_ID: [u8; 8] = *b"Art-Net\0";
pub const ARTNET_PROTOCOL_VERSION: u16 = 14;
pub const ARTNET_RDM_VERSION: u8 = 0x01;
pub const ARTNET_HEADER_SIZE: usize = 12;
pub const ARTNET_MAX_PACKET_SIZE: usize = 1_024;
pub const ARTNET_POLL_REPLY_SIZE: usize = 239;
pub const ARTNET_MAX_TOD_UIDS: usize = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_time_follows_baud_rate() {
        assert_eq!(SLOT_MICROS, 44);
        assert_eq!(SLOT_MICROS * 513, 22_572);
    }
}
