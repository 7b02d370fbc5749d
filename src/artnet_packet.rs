//! Art-Net 4 packets the node understands, parsed without copying the receive buffer.

use crate::config::{
    AddressChange, AddressCommand, NodeIdentity, PortAddress, PortConfig, SwitchProgram,
};
use crate::consts::{
    ARTNET_HEADER_SIZE, ARTNET_ID, ARTNET_MAX_TOD_UIDS, ARTNET_PORT, ARTNET_POLL_REPLY_SIZE,
    ARTNET_PROTOCOL_VERSION, ARTNET_RDM_VERSION, DMX_MAX_SLOTS, MAX_REFRESH_HZ,
};
use crate::layouts::{
    art_address_layout, art_dmx_layout, art_header_layout, art_poll_layout,
    art_poll_reply_layout, art_rdm_layout, art_tod_control_layout, art_tod_data_layout,
    art_tod_request_layout,
};
use crate::unique_identifier::UniqueIdentifier;
use core::fmt::Write;
use core::net::Ipv4Addr;
use modular_bitfield::bitfield;
use modular_bitfield::prelude::{B1, B2};

pub const OP_POLL: u16 = 0x2000;
pub const OP_POLL_REPLY: u16 = 0x2100;
pub const OP_DMX: u16 = 0x5000;
pub const OP_ADDRESS: u16 = 0x6000;
pub const OP_TOD_REQUEST: u16 = 0x8000;
pub const OP_TOD_DATA: u16 = 0x8100;
pub const OP_TOD_CONTROL: u16 = 0x8200;
pub const OP_RDM: u16 = 0x8300;

/// ArtRdm command ArProcess.
const AR_PROCESS: u8 = 0x00;
/// ArtTodRequest command TodFull.
pub const TOD_FULL: u8 = 0x00;
/// ArtTodControl command AtcFlush.
pub const ATC_FLUSH: u8 = 0x01;

const ART_POLL_LEGACY_SIZE: usize = 14;
const ART_POLL_SIZE: usize = 18;
const ART_DMX_HEADER_SIZE: usize = 18;
const ART_ADDRESS_SIZE: usize = 107;
const ART_RDM_HEADER_SIZE: usize = 24;
const ART_TOD_REQUEST_HEADER_SIZE: usize = 24;
const ART_TOD_CONTROL_SIZE: usize = 24;
const ART_TOD_DATA_HEADER_SIZE: usize = 28;
const MAX_TOD_REQUEST_ADDRESSES: usize = 32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArtNetParseError {
    /// The packet is shorter than its opcode requires.
    TooShort,
    /// The packet doesn't start with "Art-Net".
    InvalidId,
    /// The protocol version is older than 14; contains the version.
    UnsupportedVersion(u16),
    /// The ArtDmx length field is out of range; contains the length.
    InvalidLength(u16),
    /// Net, sub-net or universe are out of range.
    InvalidAddress,
    /// The ArtRdm version isn't supported; contains the version.
    UnsupportedRdmVersion(u8),
}

impl core::fmt::Display for ArtNetParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArtNetParseError::TooShort => write!(f, "packet too short"),
            ArtNetParseError::InvalidId => write!(f, "packet id is not Art-Net"),
            ArtNetParseError::UnsupportedVersion(version) => {
                write!(f, "protocol version {} is not supported", version)
            },
            ArtNetParseError::InvalidLength(length) => write!(f, "dmx length {} is invalid", length),
            ArtNetParseError::InvalidAddress => write!(f, "port address is invalid"),
            ArtNetParseError::UnsupportedRdmVersion(version) => {
                write!(f, "rdm version {} is not supported", version)
            },
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ArtNetParseError {}

#[bitfield]
struct ArtPollFlags {
    #[skip]
    reserved_low: B1,
    reply_on_change: bool,
    diagnostics: bool,
    diagnostics_unicast: bool,
    vlc_disabled: bool,
    targeted: bool,
    #[skip]
    reserved_high: B2,
}

#[bitfield]
struct Status1 {
    ubea_present: bool,
    rdm_capable: bool,
    rom_boot: bool,
    #[skip]
    reserved: B1,
    address_authority: B2,
    indicator_state: B2,
}

#[bitfield]
struct Status2 {
    web_config: bool,
    dhcp_configured: bool,
    dhcp_capable: bool,
    port_address_15bit: bool,
    sacn_capable: bool,
    squawking: bool,
    output_style_switch: bool,
    rdm_art_command: bool,
}

#[bitfield]
struct GoodOutput {
    sacn: bool,
    merge_ltp: bool,
    short_detected: bool,
    merging: bool,
    text_packets: bool,
    sip_packets: bool,
    test_packets: bool,
    transmitting: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArtPoll {
    /// Send a reply whenever the configuration changes.
    pub reply_on_change: bool,
    pub diagnostics: bool,
    /// Replies and diagnostics go to the poller instead of the broadcast address.
    pub diagnostics_unicast: bool,
    pub diag_priority: u8,
    /// Only ports in this inclusive Port-Address range are asked to reply.
    pub target: Option<(u16, u16)>,
}

impl ArtPoll {
    pub fn is_targeted_at(&self, address: PortAddress) -> bool {
        match self.target {
            None => true,
            Some((bottom, top)) => (bottom..=top).contains(&address.as_u16()),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArtDmx<'a> {
    pub sequence: u8,
    pub physical: u8,
    pub address: PortAddress,
    pub data: &'a [u8],
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArtRdm<'a> {
    pub net: u8,
    pub command: u8,
    /// Sub-net and universe of the addressed port.
    pub address: u8,
    /// The rdm package without start code.
    pub rdm_package: &'a [u8],
}

impl ArtRdm<'_> {
    pub fn port_address(&self) -> Result<PortAddress, ArtNetParseError> {
        PortAddress::from_net_sub_uni(self.net, self.address)
            .map_err(|_| ArtNetParseError::InvalidAddress)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArtTodRequest {
    pub net: u8,
    pub command: u8,
    /// Sub-net and universe of every requested port.
    pub addresses: heapless::Vec<u8, MAX_TOD_REQUEST_ADDRESSES>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArtTodControl {
    pub net: u8,
    pub command: u8,
    pub address: u8,
}

/// An inbound packet, classified by its opcode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ArtNetPacket<'a> {
    Poll(ArtPoll),
    /// Replies of other nodes, they are ignored.
    PollReply,
    Dmx(ArtDmx<'a>),
    Address(AddressChange),
    TodRequest(ArtTodRequest),
    TodControl(ArtTodControl),
    Rdm(ArtRdm<'a>),
    Unknown(u16),
}

impl<'a> ArtNetPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self, ArtNetParseError> {
        parse_packet(buffer)
    }
}

/// Parses a datagram. Packets with an unknown opcode are returned as [ArtNetPacket::Unknown].
pub fn parse_packet(buffer: &[u8]) -> Result<ArtNetPacket<'_>, ArtNetParseError> {
    if buffer.len() < 10 {
        return Err(ArtNetParseError::TooShort);
    }

    let header_view = art_header_layout::View::new(buffer);
    if *header_view.id() != ARTNET_ID {
        return Err(ArtNetParseError::InvalidId);
    }

    let op_code = header_view.op_code().read();
    // poll replies don't carry a protocol version
    if op_code == OP_POLL_REPLY {
        return Ok(ArtNetPacket::PollReply);
    }

    if buffer.len() < ARTNET_HEADER_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    let version = u16::from_be_bytes(*header_view.protocol_version());
    if version < ARTNET_PROTOCOL_VERSION {
        return Err(ArtNetParseError::UnsupportedVersion(version));
    }

    Ok(match op_code {
        OP_POLL => ArtNetPacket::Poll(parse_poll(buffer)?),
        OP_DMX => ArtNetPacket::Dmx(parse_dmx(buffer)?),
        OP_ADDRESS => ArtNetPacket::Address(parse_address(buffer)?),
        OP_TOD_REQUEST => ArtNetPacket::TodRequest(parse_tod_request(buffer)?),
        OP_TOD_CONTROL => ArtNetPacket::TodControl(parse_tod_control(buffer)?),
        OP_RDM => ArtNetPacket::Rdm(parse_rdm(buffer)?),
        op_code => ArtNetPacket::Unknown(op_code),
    })
}

fn parse_poll(buffer: &[u8]) -> Result<ArtPoll, ArtNetParseError> {
    if buffer.len() < ART_POLL_LEGACY_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    // older controllers omit the target fields
    let mut padded = [0u8; ART_POLL_SIZE];
    let length = buffer.len().min(ART_POLL_SIZE);
    padded[..length].copy_from_slice(&buffer[..length]);

    let poll_view = art_poll_layout::View::new(&padded[..]);
    let flags = ArtPollFlags::from_bytes([poll_view.flags().read()]);

    Ok(ArtPoll {
        reply_on_change: flags.reply_on_change(),
        diagnostics: flags.diagnostics(),
        diagnostics_unicast: flags.diagnostics_unicast(),
        diag_priority: poll_view.diag_priority().read(),
        target: flags.targeted().then(|| {
            (
                u16::from_be_bytes(*poll_view.target_bottom()),
                u16::from_be_bytes(*poll_view.target_top()),
            )
        }),
    })
}

fn parse_dmx(buffer: &[u8]) -> Result<ArtDmx<'_>, ArtNetParseError> {
    if buffer.len() < ART_DMX_HEADER_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    let dmx_view = art_dmx_layout::View::new(buffer);
    let length = u16::from_be_bytes(*dmx_view.length());
    if length == 0 || length as usize > DMX_MAX_SLOTS {
        return Err(ArtNetParseError::InvalidLength(length));
    }

    let address = PortAddress::from_net_sub_uni(dmx_view.net().read(), dmx_view.sub_uni().read())
        .map_err(|_| ArtNetParseError::InvalidAddress)?;

    // the payload is clipped to what actually arrived
    let data = &buffer[ART_DMX_HEADER_SIZE..];
    let data = &data[..data.len().min(length as usize)];

    Ok(ArtDmx {
        sequence: dmx_view.sequence().read(),
        physical: dmx_view.physical().read(),
        address,
        data,
    })
}

fn parse_name<const N: usize>(raw: &[u8]) -> Option<heapless::String<N>> {
    let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
    let name = core::str::from_utf8(&raw[..end]).ok()?;
    if name.is_empty() {
        return None;
    }

    let mut string = heapless::String::new();
    for character in name.chars() {
        if string.push(character).is_err() {
            break;
        }
    }

    Some(string)
}

fn parse_address(buffer: &[u8]) -> Result<AddressChange, ArtNetParseError> {
    if buffer.len() < ART_ADDRESS_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    let address_view = art_address_layout::View::new(buffer);

    Ok(AddressChange {
        port: address_view.bind_index().read().saturating_sub(1) as usize,
        net: SwitchProgram::decode(address_view.net_switch().read(), 0x7F),
        sub_net: SwitchProgram::decode(address_view.sub_switch().read(), 0x0F),
        universe: SwitchProgram::decode(address_view.sw_out()[0], 0x0F),
        short_name: parse_name::<18>(address_view.short_name()),
        long_name: parse_name::<64>(address_view.long_name()),
        command: AddressCommand::from(address_view.command().read()),
    })
}

fn parse_tod_request(buffer: &[u8]) -> Result<ArtTodRequest, ArtNetParseError> {
    if buffer.len() < ART_TOD_REQUEST_HEADER_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    let request_view = art_tod_request_layout::View::new(buffer);
    let address_count = (request_view.address_count().read() as usize)
        .min(MAX_TOD_REQUEST_ADDRESSES)
        .min(request_view.addresses().len());

    let mut addresses = heapless::Vec::new();
    let _ = addresses.extend_from_slice(&request_view.addresses()[..address_count]);

    Ok(ArtTodRequest {
        net: request_view.net().read(),
        command: request_view.command().read(),
        addresses,
    })
}

fn parse_tod_control(buffer: &[u8]) -> Result<ArtTodControl, ArtNetParseError> {
    if buffer.len() < ART_TOD_CONTROL_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    let control_view = art_tod_control_layout::View::new(buffer);

    Ok(ArtTodControl {
        net: control_view.net().read(),
        command: control_view.command().read(),
        address: control_view.address().read(),
    })
}

fn parse_rdm(buffer: &[u8]) -> Result<ArtRdm<'_>, ArtNetParseError> {
    if buffer.len() < ART_RDM_HEADER_SIZE {
        return Err(ArtNetParseError::TooShort);
    }

    let rdm_view = art_rdm_layout::View::new(buffer);
    let rdm_version = rdm_view.rdm_version().read();
    if rdm_version != ARTNET_RDM_VERSION {
        return Err(ArtNetParseError::UnsupportedRdmVersion(rdm_version));
    }

    Ok(ArtRdm {
        net: rdm_view.net().read(),
        command: rdm_view.command().read(),
        address: rdm_view.address().read(),
        rdm_package: &buffer[ART_RDM_HEADER_SIZE..],
    })
}

impl ArtRdm<'_> {
    /// ArProcess is the only command defined for ArtRdm.
    pub fn is_process(&self) -> bool {
        self.command == AR_PROCESS
    }
}

fn write_header(buffer: &mut [u8], op_code: u16) {
    let mut header_view = art_header_layout::View::new(buffer);
    header_view.id_mut().copy_from_slice(&ARTNET_ID);
    header_view.op_code_mut().write(op_code);
    header_view
        .protocol_version_mut()
        .copy_from_slice(&ARTNET_PROTOCOL_VERSION.to_be_bytes());
}

fn copy_name(destination: &mut [u8], name: &str) {
    destination.fill(0);
    let length = name.len().min(destination.len() - 1);
    destination[..length].copy_from_slice(&name.as_bytes()[..length]);
}

/// State of a port reported in its poll reply.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollReplyPort {
    /// Zero based index of the port, the BindIndex is one higher.
    pub index: u8,
    pub config: PortConfig,
    /// The port output frames since the last reply.
    pub transmitting: bool,
    /// Replies sent so far, reported in the node report.
    pub reply_count: u16,
}

/// Writes the ArtPollReply for one port. Returns the packet size.
pub fn serialize_poll_reply(
    identity: &NodeIdentity,
    port: &PollReplyPort,
    buffer: &mut [u8; ARTNET_POLL_REPLY_SIZE],
) -> usize {
    buffer.fill(0);

    let mut reply_view = art_poll_reply_layout::View::new(&mut buffer[..]);
    reply_view.id_mut().copy_from_slice(&ARTNET_ID);
    reply_view.op_code_mut().write(OP_POLL_REPLY);
    reply_view
        .ip_address_mut()
        .copy_from_slice(&identity.ip.octets());
    reply_view.port_mut().write(ARTNET_PORT);
    reply_view
        .version_info_mut()
        .copy_from_slice(&identity.firmware_version.to_be_bytes());
    reply_view.net_switch_mut().write(port.config.address.net());
    reply_view
        .sub_switch_mut()
        .write(port.config.address.sub_net());
    reply_view
        .oem_mut()
        .copy_from_slice(&identity.oem.to_be_bytes());

    let status1 = Status1::new()
        .with_rdm_capable(port.config.rdm_enabled)
        // addresses are programmed over the network
        .with_address_authority(0b10)
        .with_indicator_state(0b11);
    reply_view.status1_mut().write(status1.into_bytes()[0]);
    reply_view
        .esta_manufacturer_mut()
        .write(identity.esta_manufacturer);

    copy_name(reply_view.short_name_mut(), &identity.short_name);
    copy_name(reply_view.long_name_mut(), &identity.long_name);

    let mut node_report: heapless::String<64> = heapless::String::new();
    let _ = write!(node_report, "#0001 [{:04}] Power On Tests successful", port.reply_count);
    copy_name(reply_view.node_report_mut(), &node_report);

    reply_view.num_ports_mut().copy_from_slice(&[0, 1]);
    // dmx512 output
    reply_view.port_types_mut()[0] = 0x80;
    // input disabled
    reply_view.good_input_mut()[0] = 0x08;
    let good_output = GoodOutput::new().with_transmitting(port.transmitting);
    reply_view.good_output_a_mut()[0] = good_output.into_bytes()[0];
    reply_view.sw_out_mut()[0] = port.config.address.universe();

    reply_view
        .mac_address_mut()
        .copy_from_slice(&identity.mac);
    reply_view
        .bind_ip_mut()
        .copy_from_slice(&identity.ip.octets());
    reply_view.bind_index_mut().write(port.index + 1);

    let status2 = Status2::new()
        .with_web_config(true)
        .with_dhcp_configured(identity.dhcp)
        .with_dhcp_capable(true)
        .with_port_address_15bit(true);
    reply_view.status2_mut().write(status2.into_bytes()[0]);

    // bit 7 disables rdm, bit 6 marks continuous output
    reply_view.good_output_b_mut()[0] = if port.config.rdm_enabled { 0x40 } else { 0xC0 };
    reply_view
        .refresh_rate_mut()
        .copy_from_slice(&(MAX_REFRESH_HZ as u16).to_be_bytes());

    ARTNET_POLL_REPLY_SIZE
}

/// Wraps an rdm package (without start code) into an ArtRdm packet. Returns the packet size.
pub fn serialize_rdm(
    address: PortAddress,
    rdm_package: &[u8],
    buffer: &mut [u8],
) -> Result<usize, ArtNetParseError> {
    let size = ART_RDM_HEADER_SIZE + rdm_package.len();
    if buffer.len() < size {
        return Err(ArtNetParseError::TooShort);
    }

    let buffer = &mut buffer[..size];
    buffer.fill(0);
    write_header(buffer, OP_RDM);

    let mut rdm_view = art_rdm_layout::View::new(buffer);
    rdm_view.rdm_version_mut().write(ARTNET_RDM_VERSION);
    rdm_view.net_mut().write(address.net());
    rdm_view.command_mut().write(AR_PROCESS);
    rdm_view.address_mut().write(address.sub_uni());
    rdm_view.rdm_package_mut().copy_from_slice(rdm_package);

    Ok(size)
}

/// Writes one ArtTodData block. At most 200 uids fit into a block, the rest is ignored.
pub fn serialize_tod_data(
    address: PortAddress,
    bind_index: u8,
    uid_total: usize,
    block_count: u8,
    uids: &[UniqueIdentifier],
    buffer: &mut [u8],
) -> Result<usize, ArtNetParseError> {
    let uids = &uids[..uids.len().min(ARTNET_MAX_TOD_UIDS)];
    let size = ART_TOD_DATA_HEADER_SIZE + uids.len() * 6;
    if buffer.len() < size {
        return Err(ArtNetParseError::TooShort);
    }

    let buffer = &mut buffer[..size];
    buffer.fill(0);
    write_header(buffer, OP_TOD_DATA);

    let mut tod_view = art_tod_data_layout::View::new(buffer);
    tod_view.rdm_version_mut().write(ARTNET_RDM_VERSION);
    tod_view.port_mut().write(1);
    tod_view.bind_index_mut().write(bind_index);
    tod_view.net_mut().write(address.net());
    // TodFull
    tod_view.command_response_mut().write(0x00);
    tod_view.address_mut().write(address.sub_uni());
    tod_view
        .uid_total_mut()
        .copy_from_slice(&(uid_total as u16).to_be_bytes());
    tod_view.block_count_mut().write(block_count);
    tod_view.uid_count_mut().write(uids.len() as u8);

    for (uid, chunk) in uids.iter().zip(tod_view.tod_mut().chunks_mut(6)) {
        chunk.copy_from_slice(&uid.to_bytes());
    }

    Ok(size)
}

/// Writes an ArtDmx packet. Returns the packet size.
pub fn serialize_dmx(
    sequence: u8,
    address: PortAddress,
    data: &[u8],
    buffer: &mut [u8],
) -> Result<usize, ArtNetParseError> {
    let data = &data[..data.len().min(DMX_MAX_SLOTS)];
    let size = ART_DMX_HEADER_SIZE + data.len();
    if buffer.len() < size {
        return Err(ArtNetParseError::TooShort);
    }

    let buffer = &mut buffer[..size];
    write_header(buffer, OP_DMX);

    let mut dmx_view = art_dmx_layout::View::new(buffer);
    dmx_view.sequence_mut().write(sequence);
    dmx_view.physical_mut().write(0);
    dmx_view.sub_uni_mut().write(address.sub_uni());
    dmx_view.net_mut().write(address.net());
    dmx_view
        .length_mut()
        .copy_from_slice(&(data.len() as u16).to_be_bytes());
    dmx_view.data_mut().copy_from_slice(data);

    Ok(size)
}

/// Writes an ArtPoll packet. Returns the packet size.
pub fn serialize_poll(poll: &ArtPoll, buffer: &mut [u8; ART_POLL_SIZE]) -> usize {
    buffer.fill(0);
    write_header(&mut buffer[..], OP_POLL);

    let flags = ArtPollFlags::new()
        .with_reply_on_change(poll.reply_on_change)
        .with_diagnostics(poll.diagnostics)
        .with_diagnostics_unicast(poll.diagnostics_unicast)
        .with_targeted(poll.target.is_some());

    let mut poll_view = art_poll_layout::View::new(&mut buffer[..]);
    poll_view.flags_mut().write(flags.into_bytes()[0]);
    poll_view.diag_priority_mut().write(poll.diag_priority);
    if let Some((bottom, top)) = poll.target {
        poll_view
            .target_bottom_mut()
            .copy_from_slice(&bottom.to_be_bytes());
        poll_view.target_top_mut().copy_from_slice(&top.to_be_bytes());
    }

    ART_POLL_SIZE
}

/// Reads the ip address a poll reply advertises.
pub fn poll_reply_ip(buffer: &[u8]) -> Option<Ipv4Addr> {
    if buffer.len() < ARTNET_POLL_REPLY_SIZE {
        return None;
    }

    let reply_view = art_poll_reply_layout::View::new(buffer);
    Some(Ipv4Addr::from(*reply_view.ip_address()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(op_code: u16, size: usize) -> std::vec::Vec<u8> {
        let mut buffer = std::vec![0u8; size];
        write_header(&mut buffer, op_code);
        buffer
    }

    #[test]
    fn test_parse_rejects_foreign_packets() {
        assert_eq!(parse_packet(&[0u8; 4]), Err(ArtNetParseError::TooShort));

        let mut buffer = header(OP_DMX, 20);
        buffer[0] = b'X';
        assert_eq!(parse_packet(&buffer), Err(ArtNetParseError::InvalidId));

        let mut buffer = header(OP_DMX, 20);
        buffer[11] = 13;
        assert_eq!(
            parse_packet(&buffer),
            Err(ArtNetParseError::UnsupportedVersion(13))
        );

        let buffer = header(0x9900, 20);
        assert_eq!(parse_packet(&buffer), Ok(ArtNetPacket::Unknown(0x9900)));
    }

    #[test]
    fn test_parse_dmx() {
        let mut buffer = [0u8; 600];
        let address = PortAddress::new(1, 2, 3).unwrap();
        let size = serialize_dmx(7, address, &[1, 2, 3, 4], &mut buffer).unwrap();

        assert_eq!(size, 22);
        assert_eq!(&buffer[8..10], &[0x00, 0x50]);
        assert_eq!(buffer[14], 0x23);
        assert_eq!(buffer[15], 1);
        assert_eq!(&buffer[16..18], &[0, 4]);

        match parse_packet(&buffer[..size]).unwrap() {
            ArtNetPacket::Dmx(dmx) => {
                assert_eq!(dmx.sequence, 7);
                assert_eq!(dmx.address, address);
                assert_eq!(dmx.data, &[1, 2, 3, 4]);
            },
            packet => panic!("unexpected packet {packet:?}"),
        }

        // a truncated datagram only yields what arrived
        match parse_packet(&buffer[..20]).unwrap() {
            ArtNetPacket::Dmx(dmx) => assert_eq!(dmx.data, &[1, 2]),
            packet => panic!("unexpected packet {packet:?}"),
        }
    }

    #[test]
    fn test_parse_dmx_invalid_length() {
        let mut buffer = header(OP_DMX, 18);
        buffer[16] = 0x02;
        buffer[17] = 0x01;
        assert_eq!(
            parse_packet(&buffer),
            Err(ArtNetParseError::InvalidLength(513))
        );
    }

    #[test]
    fn test_parse_legacy_poll() {
        let mut buffer = header(OP_POLL, ART_POLL_LEGACY_SIZE);
        buffer[12] = 0b0000_1010;

        match parse_packet(&buffer).unwrap() {
            ArtNetPacket::Poll(poll) => {
                assert!(poll.reply_on_change);
                assert!(poll.diagnostics_unicast);
                assert!(!poll.diagnostics);
                assert_eq!(poll.target, None);
            },
            packet => panic!("unexpected packet {packet:?}"),
        }
    }

    #[test]
    fn test_targeted_poll() {
        let poll = ArtPoll {
            reply_on_change: false,
            diagnostics: false,
            diagnostics_unicast: false,
            diag_priority: 0x10,
            target: Some((0x0001, 0x0010)),
        };
        let mut buffer = [0u8; ART_POLL_SIZE];
        serialize_poll(&poll, &mut buffer);
        assert_eq!(buffer[12], 0b0010_0000);

        let parsed = match parse_packet(&buffer).unwrap() {
            ArtNetPacket::Poll(parsed) => parsed,
            packet => panic!("unexpected packet {packet:?}"),
        };
        assert_eq!(parsed, poll);
        assert!(!parsed.is_targeted_at(PortAddress::new(0, 0, 0).unwrap()));
        assert!(parsed.is_targeted_at(PortAddress::new(0, 0, 1).unwrap()));
        assert!(!parsed.is_targeted_at(PortAddress::new(0, 1, 1).unwrap()));
    }

    #[test]
    fn test_poll_reply_layout() {
        let identity = NodeIdentity::default();
        let port = PollReplyPort {
            index: 1,
            config: PortConfig::new(PortAddress::new(2, 3, 4).unwrap(), 1, false).unwrap(),
            transmitting: true,
            reply_count: 3,
        };
        let mut buffer = [0u8; ARTNET_POLL_REPLY_SIZE];

        assert_eq!(serialize_poll_reply(&identity, &port, &mut buffer), 239);
        assert_eq!(&buffer[..8], b"Art-Net\0");
        assert_eq!(&buffer[8..10], &[0x00, 0x21]);
        assert_eq!(&buffer[10..14], &[192, 168, 4, 1]);
        assert_eq!(&buffer[14..16], &[0x36, 0x19]);
        assert_eq!(buffer[18], 2);
        assert_eq!(buffer[19], 3);
        assert_eq!(&buffer[26..38], b"dmx-rdm-node");
        assert_eq!(&buffer[108..113], b"#0001");
        assert_eq!(&buffer[172..174], &[0, 1]);
        assert_eq!(buffer[174], 0x80);
        assert_eq!(buffer[182] & 0x80, 0x80);
        assert_eq!(buffer[190], 4);
        assert_eq!(buffer[211], 2);
        assert_eq!(buffer[213] & 0x80, 0x80);
        assert_eq!(poll_reply_ip(&buffer), Some(identity.ip));
        assert_eq!(parse_packet(&buffer), Ok(ArtNetPacket::PollReply));
    }

    #[test]
    fn test_parse_address() {
        let mut buffer = header(OP_ADDRESS, ART_ADDRESS_SIZE);
        buffer[12] = 0x81;
        buffer[13] = 2;
        buffer[14..18].copy_from_slice(b"test");
        buffer[100] = 0x85;
        buffer[104] = 0x7F;
        buffer[106] = 0x90;

        match parse_packet(&buffer).unwrap() {
            ArtNetPacket::Address(change) => {
                assert_eq!(change.port, 1);
                assert_eq!(change.net, SwitchProgram::Set(1));
                assert_eq!(change.sub_net, SwitchProgram::NoChange);
                assert_eq!(change.universe, SwitchProgram::Set(5));
                assert_eq!(change.short_name.as_deref(), Some("test"));
                assert_eq!(change.long_name, None);
                assert_eq!(change.command, AddressCommand::ClearOutput(0));
            },
            packet => panic!("unexpected packet {packet:?}"),
        }
    }

    #[test]
    fn test_rdm_and_tod_data() {
        let address = PortAddress::new(0, 1, 2).unwrap();
        let mut buffer = [0u8; 1024];
        let size = serialize_rdm(address, &[0x01, 0x18, 0xAA], &mut buffer).unwrap();

        match parse_packet(&buffer[..size]).unwrap() {
            ArtNetPacket::Rdm(rdm) => {
                assert!(rdm.is_process());
                assert_eq!(rdm.port_address().unwrap(), address);
                assert_eq!(rdm.rdm_package, &[0x01, 0x18, 0xAA]);
            },
            packet => panic!("unexpected packet {packet:?}"),
        }

        let uids = [
            UniqueIdentifier::new(1, 2).unwrap(),
            UniqueIdentifier::new(3, 4).unwrap(),
        ];
        let size = serialize_tod_data(address, 1, 2, 0, &uids, &mut buffer).unwrap();
        assert_eq!(size, 28 + 12);
        assert_eq!(&buffer[8..10], &[0x00, 0x81]);
        assert_eq!(buffer[23], 0x12);
        assert_eq!(&buffer[24..26], &[0, 2]);
        assert_eq!(buffer[27], 2);
        assert_eq!(&buffer[28..34], &uids[0].to_bytes());
    }
}
