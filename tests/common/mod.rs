#![allow(dead_code)]

use dmx_rdm_node::clock::Clock;
use dmx_rdm_node::artnet_node::ArtNetTransport;
use dmx_rdm_node::consts::{BREAK_MICROS, MAB_MICROS, SC_RDM, SLOT_MICROS};
use dmx_rdm_node::dmx_uart_driver::{
    BreakTiming, DmxRecvUartDriver, DmxRespUartDriver, DmxUartDriver, DmxUartDriverError,
};
use dmx_rdm_node::rdm_data::{serialize_discovery_response, RdmData, RdmRequestData};
use dmx_rdm_node::rdm_types::{DeviceInfo, DmxStartAddress};
use dmx_rdm_node::types::{DataPack, RequestCommandClass, ResponseType};
use dmx_rdm_node::unique_identifier::{PackageAddress, UniqueIdentifier};
use std::cell::Cell;
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::rc::Rc;

pub const DISC_UNIQUE_BRANCH: u16 = 0x0001;
pub const DISC_MUTE: u16 = 0x0002;
pub const DISC_UN_MUTE: u16 = 0x0003;
pub const DEVICE_INFO: u16 = 0x0060;
pub const DMX_START_ADDRESS: u16 = 0x00F0;
pub const IDENTIFY_DEVICE: u16 = 0x1000;
/// Manufacturer specific parameter answered with the largest possible parameter data.
pub const LARGE_PARAMETER: u16 = 0x8000;

/// Clock that only moves when the test or the simulated bus advances it.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn new(start_us: u64) -> Self {
        Self(Rc::new(Cell::new(start_us)))
    }

    pub fn advance(&self, micros: u64) {
        self.0.set(self.0.get() + micros);
    }

    pub fn set(&self, now_us: u64) {
        self.0.set(now_us);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.0.get()
    }
}

/// A responder on the simulated bus.
#[derive(Debug, Clone)]
pub struct SimResponder {
    pub uid: UniqueIdentifier,
    pub muted: bool,
    /// Stops answering anything once set.
    pub silent: bool,
    pub mute_count: u32,
    pub start_address: u16,
    pub identify: bool,
    /// Control field and binding uid sent in mute responses.
    pub mute_response: Vec<u8>,
}

impl SimResponder {
    pub fn new(uid: UniqueIdentifier) -> Self {
        Self {
            uid,
            muted: false,
            silent: false,
            mute_count: 0,
            start_address: 1,
            identify: false,
            mute_response: vec![0, 0],
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_model_id: 0x0102,
            product_category: 0x0101,
            software_version: 7,
            dmx_footprint: 4,
            dmx_personality: 1,
            dmx_personality_count: 2,
            dmx_start_address: DmxStartAddress::Address(self.start_address),
            sub_device_count: 0,
            sensor_count: 0,
        }
    }
}

/// A frame the controller put on the line.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub started_us: u64,
    pub timing: BreakTiming,
    pub data: Vec<u8>,
}

/// Uart driver connected to a bus of simulated responders. Writing and reading advances the
/// shared clock by the time the bytes need on the line.
#[derive(Debug)]
pub struct SimBus {
    pub clock: SimClock,
    pub responders: Vec<SimResponder>,
    pub frames: Vec<SentFrame>,
    pub rdm_requests: Vec<RdmRequestData>,
    pub branch_requests: u32,
    pub fail_writes: bool,
    /// Number of upcoming branch requests the driver fails to write.
    pub failing_branches: u32,
    /// Answers the next device request with a response to another transaction first.
    pub stray_response: bool,
    pending: VecDeque<u8>,
}

impl SimBus {
    pub fn new(clock: SimClock, responders: Vec<SimResponder>) -> Self {
        Self {
            clock,
            responders,
            frames: Vec::new(),
            rdm_requests: Vec::new(),
            branch_requests: 0,
            fail_writes: false,
            failing_branches: 0,
            stray_response: false,
            pending: VecDeque::new(),
        }
    }

    pub fn responder(&self, uid: UniqueIdentifier) -> &SimResponder {
        self.responders
            .iter()
            .find(|responder| responder.uid == uid)
            .unwrap()
    }

    pub fn responder_mut(&mut self, uid: UniqueIdentifier) -> &mut SimResponder {
        self.responders
            .iter_mut()
            .find(|responder| responder.uid == uid)
            .unwrap()
    }

    /// Frames with the null start code.
    pub fn dmx_frames(&self) -> Vec<&SentFrame> {
        self.frames.iter().filter(|frame| frame.data[0] == 0).collect()
    }

    fn respond(&mut self, request: RdmRequestData) {
        self.rdm_requests.push(request.clone());

        match (request.command_class, request.parameter_id) {
            (RequestCommandClass::DiscoveryCommand, DISC_UN_MUTE) => {
                for responder in self.responders.iter_mut().filter(|responder| !responder.silent) {
                    responder.muted = false;
                }
            },
            (RequestCommandClass::DiscoveryCommand, DISC_UNIQUE_BRANCH) => {
                self.branch_requests += 1;
                let data = &request.parameter_data;
                let lower = u64::from_be_bytes([0, 0, data[0], data[1], data[2], data[3], data[4], data[5]]);
                let upper =
                    u64::from_be_bytes([0, 0, data[6], data[7], data[8], data[9], data[10], data[11]]);

                let answering: Vec<UniqueIdentifier> = self
                    .responders
                    .iter()
                    .filter(|responder| !responder.muted && !responder.silent)
                    .map(|responder| responder.uid)
                    .filter(|uid| (lower..=upper).contains(&u64::from(*uid)))
                    .collect();

                if let Some(first) = answering.first() {
                    let mut response = serialize_discovery_response(*first);
                    if answering.len() > 1 {
                        // overlapping responses never carry a valid checksum
                        response[23] ^= 0xFF;
                    }
                    self.pending.extend(response);
                }
            },
            _ => self.respond_to_device(request),
        }
    }

    fn respond_to_device(&mut self, request: RdmRequestData) {
        let uid = match request.destination_uid {
            PackageAddress::Device(uid) => uid,
            _ => return,
        };

        let responder = match self
            .responders
            .iter_mut()
            .find(|responder| responder.uid == uid && !responder.silent)
        {
            Some(responder) => responder,
            None => return,
        };

        let parameter_data = match (request.command_class, request.parameter_id) {
            (RequestCommandClass::DiscoveryCommand, DISC_MUTE) => {
                responder.muted = true;
                responder.mute_count += 1;
                DataPack::from_slice(&responder.mute_response).unwrap()
            },
            (RequestCommandClass::GetCommand, LARGE_PARAMETER) => {
                DataPack::from_slice(&[0x5A; 231]).unwrap()
            },
            (RequestCommandClass::GetCommand, DEVICE_INFO) => responder.device_info().serialize(),
            (RequestCommandClass::SetCommand, DMX_START_ADDRESS) => {
                responder.start_address =
                    u16::from_be_bytes([request.parameter_data[0], request.parameter_data[1]]);
                DataPack::new()
            },
            (RequestCommandClass::SetCommand, IDENTIFY_DEVICE) => {
                responder.identify = request.parameter_data[0] != 0;
                DataPack::new()
            },
            _ => {
                let response = request
                    .build_response(
                        ResponseType::ResponseTypeNackReason,
                        DataPack::from_slice(&[0, 0]).unwrap(),
                        0,
                    )
                    .unwrap();
                self.pending.extend(RdmData::Response(response).serialize());
                return;
            },
        };

        if self.stray_response {
            self.stray_response = false;
            let mut stray = request.clone();
            stray.transaction_number = stray.transaction_number.wrapping_sub(1);
            let response = stray
                .build_response(ResponseType::ResponseTypeAck, DataPack::new(), 0)
                .unwrap();
            self.pending.extend(RdmData::Response(response).serialize());
        }

        let response = request
            .build_response(ResponseType::ResponseTypeAck, parameter_data, 0)
            .unwrap();
        self.pending.extend(RdmData::Response(response).serialize());
    }

    fn read(
        &mut self,
        buffer: &mut [u8],
        timeout_us: u32,
    ) -> Result<usize, DmxUartDriverError<&'static str>> {
        if self.pending.is_empty() {
            self.clock.advance(timeout_us as u64);
            return Err(DmxUartDriverError::TimeoutError);
        }

        // a responder sends at line speed, whatever does not arrive in time is cut off
        let arriving = buffer.len().min(self.pending.len());
        if arriving as u64 * SLOT_MICROS > timeout_us as u64 {
            let cut = (timeout_us as u64 / SLOT_MICROS) as usize;
            for slot in buffer.iter_mut().take(cut) {
                *slot = self.pending.pop_front().unwrap();
            }
            self.clock.advance(timeout_us as u64);
            return Err(DmxUartDriverError::TimeoutError);
        }

        let mut count = 0;
        while count < buffer.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buffer[count] = byte;
                    count += 1;
                },
                None => break,
            }
        }

        self.clock.advance(count as u64 * SLOT_MICROS);
        Ok(count)
    }
}

impl DmxUartDriver for SimBus {
    type DriverError = &'static str;
}

impl DmxRespUartDriver for SimBus {
    fn write_frames(
        &mut self,
        buffer: &[u8],
        timing: &BreakTiming,
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>> {
        if self.fail_writes {
            return Err(DmxUartDriverError::DriverError("line fault"));
        }

        if self.failing_branches > 0 && is_branch_request(buffer) {
            self.failing_branches -= 1;
            return Err(DmxUartDriverError::DriverError("line fault"));
        }

        self.pending.clear();
        self.frames.push(SentFrame {
            started_us: self.clock.now_us(),
            timing: *timing,
            data: buffer.to_vec(),
        });
        self.clock.advance(
            timing.break_us as u64
                + timing.mark_after_break_us as u64
                + buffer.len() as u64 * SLOT_MICROS,
        );

        if buffer.first() == Some(&SC_RDM) {
            if let Ok(RdmData::Request(request)) = RdmData::deserialize(buffer) {
                self.respond(request);
            }
        }

        Ok(buffer.len())
    }

    fn write_frames_no_break(
        &mut self,
        buffer: &[u8],
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>> {
        self.clock.advance(buffer.len() as u64 * SLOT_MICROS);
        Ok(buffer.len())
    }
}

impl DmxRecvUartDriver for SimBus {
    fn read_frames(
        &mut self,
        buffer: &mut [u8],
        timeout_us: u32,
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>> {
        self.read(buffer, timeout_us)
    }

    fn read_frames_no_break(
        &mut self,
        buffer: &mut [u8],
        timeout_us: u32,
    ) -> Result<usize, DmxUartDriverError<Self::DriverError>> {
        self.read(buffer, timeout_us)
    }
}

fn is_branch_request(buffer: &[u8]) -> bool {
    matches!(
        RdmData::deserialize(buffer),
        Ok(RdmData::Request(request)) if request.parameter_id == DISC_UNIQUE_BRANCH
    )
}

/// Default frame timing as the driver sees it.
pub fn default_break_timing() -> BreakTiming {
    BreakTiming {
        break_us: BREAK_MICROS as u32,
        mark_after_break_us: MAB_MICROS as u32,
    }
}

/// Transport that hands out queued datagrams and records everything sent.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub inbound: VecDeque<(Vec<u8>, SocketAddrV4)>,
    pub sent: Vec<(Vec<u8>, SocketAddrV4)>,
}

impl MockTransport {
    pub fn push(&mut self, datagram: &[u8], source: SocketAddrV4) {
        self.inbound.push_back((datagram.to_vec(), source));
    }

    /// Sent packets with the given opcode.
    pub fn sent_with_op_code(&self, op_code: u16) -> Vec<&(Vec<u8>, SocketAddrV4)> {
        self.sent
            .iter()
            .filter(|(packet, _)| u16::from_le_bytes([packet[8], packet[9]]) == op_code)
            .collect()
    }
}

impl ArtNetTransport for MockTransport {
    type Error = ();

    fn recv_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, Self::Error> {
        match self.inbound.pop_front() {
            Some((datagram, source)) => {
                let length = datagram.len().min(buffer.len());
                buffer[..length].copy_from_slice(&datagram[..length]);
                Ok(Some((length, source)))
            },
            None => Ok(None),
        }
    }

    fn send_to(&mut self, buffer: &[u8], target: SocketAddrV4) -> Result<usize, Self::Error> {
        self.sent.push((buffer.to_vec(), target));
        Ok(buffer.len())
    }
}

pub fn uid(device_id: u32) -> UniqueIdentifier {
    UniqueIdentifier::new(0x0A0B, device_id).unwrap()
}
