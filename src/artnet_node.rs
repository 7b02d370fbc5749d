//! The network side of the node.
//!
//! [ArtNetNode::poll] drains the transport, writes ArtDmx payloads into the universes of the
//! matching ports, answers ArtPoll, forwards ArtAddress to the [ConfigStore] and bridges ArtRdm
//! and the ArtTod packets to the rdm controllers of the signal context. It never touches the bus
//! itself, everything crosses over through universes, device table buffers, spsc queues and the
//! [PortStatus] atomics.

use crate::artnet_packet::{
    parse_packet, serialize_poll_reply, serialize_rdm, serialize_tod_data, ArtDmx, ArtNetPacket,
    ArtPoll, ArtRdm, ArtTodControl, ArtTodRequest, PollReplyPort, ATC_FLUSH, TOD_FULL,
};
use crate::config::{AddressChange, AddressCommand, ConfigError, ConfigStore, NodeConfig};
use crate::consts::{
    ARTNET_MAX_PACKET_SIZE, ARTNET_PORT, ARTNET_POLL_REPLY_SIZE, MAX_DEVICES_PER_PORT, MAX_PORTS,
    RDM_MAX_PACKAGE_SIZE, SC_RDM,
};
use crate::publish::Subscriber;
use crate::rdm_controller::{DeviceTable, DiscoveredDevice};
use crate::rdm_data::{BinaryRdmPackage, RdmData, RdmRequestData, RdmResponseData};
use crate::status::PortStatus;
use crate::types::RequestCommandClass;
use crate::unique_identifier::UniqueIdentifier;
use crate::universe::UniverseWriter;
use core::net::SocketAddrV4;
use heapless::spsc::{Consumer, Producer, Queue};

/// Capacity of the queues between node and controller, one slot of an spsc queue stays empty.
pub const BRIDGE_QUEUE_SIZE: usize = 5;

pub type BridgeRequestQueue = Queue<BridgedRequest, BRIDGE_QUEUE_SIZE>;
pub type BridgeResponseQueue = Queue<BridgedResponse, BRIDGE_QUEUE_SIZE>;

/// Distinct reply targets that can wait at the same time.
const PENDING_REPLY_TARGETS: usize = 4;

/// Sequence numbers this far behind the last accepted one are treated as out of order.
const SEQUENCE_WINDOW: u8 = 64;

/// Datagram based transport the node sends and receives Art-Net packets with.
pub trait ArtNetTransport {
    type Error;

    /// Receives a single datagram without blocking for long. Returns `None` if nothing arrived.
    fn recv_from(&mut self, buffer: &mut [u8])
        -> Result<Option<(usize, SocketAddrV4)>, Self::Error>;

    fn send_to(&mut self, buffer: &[u8], target: SocketAddrV4) -> Result<usize, Self::Error>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArtNetNodeConfig {
    /// Gap between two consecutive poll replies.
    pub min_reply_interval_us: u64,
    /// Upper bound of the random delay before the first reply to a poll.
    pub max_reply_jitter_us: u64,
    /// Datagrams handled per call to [ArtNetNode::poll].
    pub max_packets_per_poll: usize,
}

impl Default for ArtNetNodeConfig {
    fn default() -> Self {
        Self {
            min_reply_interval_us: 250_000,
            max_reply_jitter_us: 1_000_000,
            max_packets_per_poll: 8,
        }
    }
}

/// A get or set request an Art-Net controller wants to have sent on a port.
#[derive(Debug, Clone)]
pub struct BridgedRequest {
    pub request: RdmRequestData,
    pub reply_to: SocketAddrV4,
}

/// The answer to a [BridgedRequest]. `None` if the responder never answered.
#[derive(Debug, Clone)]
pub struct BridgedResponse {
    pub response: Option<RdmResponseData>,
    pub reply_to: SocketAddrV4,
}

/// What the node shares with the signal context for one output.
pub struct NodePort<'a> {
    pub universe: UniverseWriter<'a>,
    pub devices: Subscriber<'a, DeviceTable>,
    pub requests: Producer<'a, BridgedRequest, BRIDGE_QUEUE_SIZE>,
    pub responses: Consumer<'a, BridgedResponse, BRIDGE_QUEUE_SIZE>,
    pub status: &'a PortStatus,
}

struct PortState<'a> {
    shared: NodePort<'a>,
    last_sequence: u8,
    last_frames_sent: u32,
}

/// Counters of everything the node received and sent.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeCounters {
    pub packets_received: u32,
    /// Packets without a valid header or with a malformed body.
    pub invalid_packets: u32,
    pub unknown_packets: u32,
    pub dmx_frames: u32,
    pub dmx_out_of_order: u32,
    /// ArtDmx for a universe no port is configured for.
    pub dmx_unmatched: u32,
    pub polls: u32,
    /// Polls that arrived while replies were still pending.
    pub polls_coalesced: u32,
    pub replies_sent: u32,
    pub rdm_bridged: u32,
    /// ArtRdm that couldn't be forwarded because it was malformed or the queue was full.
    pub rdm_dropped: u32,
    pub rdm_timeouts: u32,
    pub send_errors: u32,
}

#[derive(Debug, Copy, Clone)]
struct PendingReplies {
    target: SocketAddrV4,
    /// Bit n is set while port n still has to reply.
    ports: u8,
    due_us: u64,
}

/// Xorshift generator for the poll reply jitter.
#[derive(Debug, Copy, Clone)]
struct XorShift(u32);

impl XorShift {
    fn from_mac(mac: &[u8; 6]) -> Self {
        let seed = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]])
            ^ (u16::from_be_bytes([mac[0], mac[1]]) as u32) << 16;

        Self(if seed == 0 { 0x2545_F491 } else { seed })
    }

    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

pub struct ArtNetNode<'a, S> {
    config: ArtNetNodeConfig,
    store: S,
    node_config: NodeConfig,
    ports: heapless::Vec<PortState<'a>, MAX_PORTS>,
    pending: heapless::Vec<PendingReplies, PENDING_REPLY_TARGETS>,
    last_reply_us: Option<u64>,
    reply_on_change: Option<SocketAddrV4>,
    reply_count: u16,
    rng: XorShift,
    counters: NodeCounters,
}

impl<'a, S: ConfigStore> ArtNetNode<'a, S> {
    /// Creates a node without ports. The configuration is read from `store` right away.
    pub fn new(config: ArtNetNodeConfig, store: S) -> Self {
        let node_config = NodeConfig::load(&store);
        let rng = XorShift::from_mac(&node_config.identity.mac);

        Self {
            config,
            store,
            node_config,
            ports: heapless::Vec::new(),
            pending: heapless::Vec::new(),
            last_reply_us: None,
            reply_on_change: None,
            reply_count: 0,
            rng,
            counters: NodeCounters::default(),
        }
    }

    /// Adds the next output, the first one added is port 0. Returns the index of the port.
    pub fn add_port(&mut self, port: NodePort<'a>) -> Result<usize, ConfigError> {
        let last_frames_sent = port.status.snapshot().frames_sent;
        self.ports
            .push(PortState {
                shared: port,
                last_sequence: 0,
                last_frames_sent,
            })
            .map_err(|_| ConfigError::PortOutOfRange)?;

        Ok(self.ports.len() - 1)
    }

    pub fn config(&self) -> &ArtNetNodeConfig {
        &self.config
    }

    pub fn node_config(&self) -> &NodeConfig {
        &self.node_config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn counters(&self) -> NodeCounters {
        self.counters
    }

    /// The device table the controller of `port` published last.
    pub fn discovered_devices(&mut self, port: usize) -> Option<&[DiscoveredDevice]> {
        let port = self.ports.get_mut(port)?;
        Some(&port.shared.devices.read()[..])
    }

    /// Status of the port as maintained by the signal context.
    pub fn port_status(&self, port: usize) -> Option<&'a PortStatus> {
        self.ports.get(port).map(|port| port.shared.status)
    }

    /// Point in time the next poll reply is due.
    pub fn next_reply_due_us(&self) -> Option<u64> {
        let due_us = self.pending.iter().map(|pending| pending.due_us).min()?;

        Some(match self.last_reply_us {
            Some(last_reply_us) => due_us.max(last_reply_us + self.config.min_reply_interval_us),
            None => due_us,
        })
    }

    /// Handles received packets, forwards rdm responses and sends due poll replies.
    pub fn poll<T: ArtNetTransport>(&mut self, transport: &mut T, now_us: u64) -> Result<(), T::Error> {
        let mut buffer = [0u8; ARTNET_MAX_PACKET_SIZE];

        for _ in 0..self.config.max_packets_per_poll {
            let (length, source) = match transport.recv_from(&mut buffer)? {
                Some(received) => received,
                None => break,
            };

            self.handle_datagram(transport, &buffer[..length], source, now_us);
        }

        self.reload_if_changed(now_us);
        self.forward_rdm_responses(transport);
        self.send_due_replies(transport, now_us);

        Ok(())
    }

    /// Handles a single datagram received from `source`.
    pub fn handle_datagram<T: ArtNetTransport>(
        &mut self,
        transport: &mut T,
        datagram: &[u8],
        source: SocketAddrV4,
        now_us: u64,
    ) {
        self.counters.packets_received = self.counters.packets_received.wrapping_add(1);

        let packet = match parse_packet(datagram) {
            Ok(packet) => packet,
            Err(_) => {
                trace!("dropping invalid packet of {} bytes", datagram.len());
                self.counters.invalid_packets += 1;
                return;
            },
        };

        match packet {
            ArtNetPacket::Dmx(dmx) => self.handle_dmx(&dmx),
            ArtNetPacket::Poll(poll) => self.handle_poll(&poll, source, now_us),
            ArtNetPacket::PollReply => {},
            ArtNetPacket::Rdm(rdm) => self.handle_rdm(&rdm, source),
            ArtNetPacket::Address(change) => {
                self.handle_address(&change, source, now_us)
            },
            ArtNetPacket::TodRequest(request) => {
                self.handle_tod_request(transport, &request, source)
            },
            ArtNetPacket::TodControl(control) => self.handle_tod_control(&control),
            ArtNetPacket::Unknown(op_code) => {
                trace!("ignoring opcode {}", op_code);
                self.counters.unknown_packets += 1;
            },
        }
    }

    fn handle_dmx(&mut self, dmx: &ArtDmx<'_>) {
        let mut matched = false;

        for (index, port) in self.ports.iter_mut().enumerate() {
            let port_config = &self.node_config.ports[index];
            if port_config.address != dmx.address {
                continue;
            }
            matched = true;

            if dmx.sequence != 0 && port.last_sequence != 0 {
                let behind = port.last_sequence.wrapping_sub(dmx.sequence);
                if behind != 0 && behind < SEQUENCE_WINDOW {
                    trace!("dropping out of order frame {} on port {}", dmx.sequence, index);
                    self.counters.dmx_out_of_order += 1;
                    continue;
                }
            }

            port.last_sequence = dmx.sequence;
            port.shared
                .universe
                .write(port_config.start_address as usize, dmx.data);
            self.counters.dmx_frames = self.counters.dmx_frames.wrapping_add(1);
        }

        if !matched {
            self.counters.dmx_unmatched += 1;
        }
    }

    /// Bitmask of the ports a poll asks for.
    fn polled_ports(&self, poll: &ArtPoll) -> u8 {
        let mut ports = 0;
        for index in 0..self.ports.len() {
            if poll.is_targeted_at(self.node_config.ports[index].address) {
                ports |= 1 << index;
            }
        }

        ports
    }

    fn handle_poll(&mut self, poll: &ArtPoll, source: SocketAddrV4, now_us: u64) {
        self.counters.polls += 1;

        let target = if poll.diagnostics_unicast {
            source
        } else {
            self.broadcast_address()
        };
        self.reply_on_change = poll.reply_on_change.then_some(target);

        let ports = self.polled_ports(poll);
        if ports == 0 {
            return;
        }

        let jitter_us = if self.pending.iter().any(|pending| pending.target == target) {
            debug!("poll coalesced with pending replies");
            self.counters.polls_coalesced += 1;
            0
        } else {
            match self.config.max_reply_jitter_us {
                0 => 0,
                max_jitter_us => self.rng.next() as u64 % max_jitter_us,
            }
        };

        self.schedule_replies(target, ports, now_us + jitter_us);
    }

    /// Queues replies of the ports in the bitmask `ports` to `target`. Ports already waiting for
    /// the same target are merged.
    fn schedule_replies(&mut self, target: SocketAddrV4, ports: u8, due_us: u64) {
        if ports == 0 {
            return;
        }

        if let Some(pending) = self.pending.iter_mut().find(|pending| pending.target == target) {
            pending.ports |= ports;
            return;
        }

        let replies = PendingReplies {
            target,
            ports,
            due_us,
        };
        if self.pending.push(replies).is_err() {
            warn!("too many reply targets, dropping {} poll replies", ports.count_ones());
        }
    }

    fn broadcast_address(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.node_config.identity.broadcast, ARTNET_PORT)
    }

    fn send_due_replies<T: ArtNetTransport>(&mut self, transport: &mut T, now_us: u64) {
        if let Some(last_reply_us) = self.last_reply_us {
            if now_us < last_reply_us + self.config.min_reply_interval_us {
                return;
            }
        }

        let position = match self.pending.iter().position(|pending| now_us >= pending.due_us) {
            Some(position) => position,
            None => return,
        };

        // one reply per call keeps them spaced by the minimum interval
        let pending = &mut self.pending[position];
        let index = pending.ports.trailing_zeros() as usize;
        let target = pending.target;
        if index < u8::BITS as usize {
            pending.ports &= !(1 << index);
        }
        if pending.ports == 0 {
            self.pending.remove(position);
        }

        if index < self.ports.len() {
            self.send_poll_reply(transport, index, target);
            self.last_reply_us = Some(now_us);
        }
    }

    fn send_poll_reply<T: ArtNetTransport>(
        &mut self,
        transport: &mut T,
        index: usize,
        target: SocketAddrV4,
    ) {
        let port = &mut self.ports[index];
        let frames_sent = port.shared.status.snapshot().frames_sent;
        let transmitting = frames_sent != port.last_frames_sent;
        port.last_frames_sent = frames_sent;

        self.reply_count = self.reply_count.wrapping_add(1) % 10_000;
        let reply_port = PollReplyPort {
            index: index as u8,
            config: self.node_config.ports[index],
            transmitting,
            reply_count: self.reply_count,
        };

        let mut buffer = [0u8; ARTNET_POLL_REPLY_SIZE];
        let size = serialize_poll_reply(&self.node_config.identity, &reply_port, &mut buffer);
        if self.send(transport, &buffer[..size], target) {
            self.counters.replies_sent += 1;
        }
    }

    fn send<T: ArtNetTransport>(
        &mut self,
        transport: &mut T,
        buffer: &[u8],
        target: SocketAddrV4,
    ) -> bool {
        match transport.send_to(buffer, target) {
            Ok(_) => true,
            Err(_) => {
                warn!("sending {} bytes failed", buffer.len());
                self.counters.send_errors += 1;
                false
            },
        }
    }

    fn rdm_port(&self, rdm: &ArtRdm<'_>) -> Option<usize> {
        let address = rdm.port_address().ok()?;

        (0..self.ports.len()).find(|index| {
            let port_config = &self.node_config.ports[*index];
            port_config.rdm_enabled && port_config.address == address
        })
    }

    fn handle_rdm(&mut self, rdm: &ArtRdm<'_>, source: SocketAddrV4) {
        if !rdm.is_process() {
            return;
        }

        let index = match self.rdm_port(rdm) {
            Some(index) => index,
            None => {
                trace!("no rdm port for net {} address {}", rdm.net, rdm.address);
                return;
            },
        };

        // the start code isn't part of ArtRdm
        let mut package = BinaryRdmPackage::new();
        let _ = package.push(SC_RDM);
        if package
            .extend_from_slice(&rdm.rdm_package[..rdm.rdm_package.len().min(RDM_MAX_PACKAGE_SIZE - 1)])
            .is_err()
        {
            self.counters.rdm_dropped += 1;
            return;
        }

        let request = match RdmData::deserialize(&package) {
            Ok(RdmData::Request(request))
                if matches!(
                    request.command_class,
                    RequestCommandClass::GetCommand | RequestCommandClass::SetCommand
                ) =>
            {
                request
            },
            _ => {
                debug!("dropping rdm package that is no get or set request");
                self.counters.rdm_dropped += 1;
                return;
            },
        };

        let bridged = BridgedRequest {
            request,
            reply_to: source,
        };
        match self.ports[index].shared.requests.enqueue(bridged) {
            Ok(()) => self.counters.rdm_bridged += 1,
            Err(_) => {
                warn!("rdm bridge queue of port {} full", index);
                self.counters.rdm_dropped += 1;
            },
        }
    }

    fn forward_rdm_responses<T: ArtNetTransport>(&mut self, transport: &mut T) {
        for index in 0..self.ports.len() {
            while let Some(bridged) = self.ports[index].shared.responses.dequeue() {
                let response = match bridged.response {
                    Some(response) => response,
                    None => {
                        self.counters.rdm_timeouts += 1;
                        continue;
                    },
                };

                let package = RdmData::Response(response).serialize();
                let mut buffer = [0u8; ARTNET_MAX_PACKET_SIZE];
                let address = self.node_config.ports[index].address;
                match serialize_rdm(address, &package[1..], &mut buffer) {
                    Ok(size) => {
                        self.send(transport, &buffer[..size], bridged.reply_to);
                    },
                    Err(_) => warn!("rdm response does not fit into ArtRdm"),
                }
            }
        }
    }

    /// Applies an ArtAddress. The answering ArtPollReply is sent to the sender with the other
    /// replies, spaced by the minimum reply interval.
    fn handle_address(&mut self, change: &AddressChange, source: SocketAddrV4, now_us: u64) {
        if change.port >= self.ports.len() {
            debug!("ArtAddress for unknown port {}", change.port);
            return;
        }

        self.store.request_change(change);

        if let AddressCommand::ClearOutput(offset) = change.command {
            if let Some(port) = self.ports.get_mut(change.port + offset as usize) {
                port.shared.universe.clear();
            }
        }

        self.reload_if_changed(now_us);
        self.schedule_replies(source, 1 << change.port, now_us);
    }

    /// Replaces the cached configuration once the store reports a change.
    pub fn reload_if_changed(&mut self, now_us: u64) {
        if !self.store.take_changed() {
            return;
        }

        self.node_config = NodeConfig::load(&self.store);
        info!("configuration reloaded");

        if let Some(target) = self.reply_on_change {
            let ports = ((1u16 << self.ports.len()) - 1) as u8;
            self.schedule_replies(target, ports, now_us);
        }
    }

    fn handle_tod_request<T: ArtNetTransport>(
        &mut self,
        transport: &mut T,
        request: &ArtTodRequest,
        source: SocketAddrV4,
    ) {
        if request.command != TOD_FULL {
            return;
        }

        for index in 0..self.ports.len() {
            let port_config = self.node_config.ports[index];
            if !port_config.rdm_enabled
                || port_config.address.net() != request.net
                || !request.addresses.contains(&port_config.address.sub_uni())
            {
                continue;
            }

            let mut uids: heapless::Vec<UniqueIdentifier, MAX_DEVICES_PER_PORT> =
                heapless::Vec::new();
            for device in self.ports[index].shared.devices.read().iter() {
                let _ = uids.push(device.uid);
            }

            let mut buffer = [0u8; ARTNET_MAX_PACKET_SIZE];
            match serialize_tod_data(
                port_config.address,
                index as u8 + 1,
                uids.len(),
                0,
                &uids,
                &mut buffer,
            ) {
                Ok(size) => {
                    self.send(transport, &buffer[..size], source);
                },
                Err(_) => warn!("table of devices does not fit into ArtTodData"),
            }
        }
    }

    fn handle_tod_control(&mut self, control: &ArtTodControl) {
        if control.command != ATC_FLUSH {
            return;
        }

        for (index, port) in self.ports.iter().enumerate() {
            let port_config = &self.node_config.ports[index];
            if port_config.rdm_enabled
                && port_config.address.net() == control.net
                && port_config.address.sub_uni() == control.address
            {
                info!("flushing table of devices of port {}", index);
                port.shared.status.request_discovery();
            }
        }
    }
}
