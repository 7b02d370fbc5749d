//! Non blocking RDM controller that shares the bus with the frame generator.
//!
//! Every call to [RdmController::step] performs at most one exchange on the bus: a queued get or
//! set transaction, or one step of the discovery. Queued transactions always go first, the
//! discovery continues where it left off afterwards. If the idle time left before the next frame
//! is too short for the exchange it is deferred to the next gap.

use crate::clock::Clock;
use crate::consts::{MAX_DEVICES_PER_PORT, RDM_MAX_DISCOVERY_RESPONSE_SIZE, RDM_MIN_PACKAGE_SIZE};
use crate::dmx_port::{DiscoveryOption, DmxError, DmxPort};
use crate::dmx_uart_driver::{DmxRecvUartDriver, DmxRespUartDriver};
use crate::pids;
use crate::rdm_data::{RdmData, RdmRequestData, RdmResponseData};
use crate::rdm_discovery::{BranchOutcome, DiscoverySearch, UidRange};
use crate::rdm_types::{self, DeviceInfo, DiscoveryMuteResponse, DmxStartAddress};
use crate::types::{DataPack, NackReason, RequestCommandClass, ResponseType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};
use core::net::SocketAddrV4;

const JOB_QUEUE_SIZE: usize = 8;
const EVENT_QUEUE_SIZE: usize = 16;
/// Response size a get or set transaction reserves time for.
const TRANSACTION_RESPONSE_SLOTS: usize = 64;
/// DISC_MUTE response with binding uid.
const MUTE_RESPONSE_SLOTS: usize = RDM_MIN_PACKAGE_SIZE + 8;
/// DISC_UNIQUE_BRANCH request with lower and upper bound.
const BRANCH_REQUEST_SLOTS: usize = RDM_MIN_PACKAGE_SIZE + 12;

pub type DeviceTable = heapless::Vec<DiscoveredDevice, MAX_DEVICES_PER_PORT>;

#[derive(Debug, Clone)]
pub struct RdmControllerConfig {
    /// Source uid of requests the controller makes on its own.
    pub uid: UniqueIdentifier,
    /// How often a request that timed out is repeated.
    pub retries: u8,
    /// Quiet period after which discovery runs again, zero disables it.
    pub rediscovery_interval_us: u64,
    /// Run a discovery as soon as the controller is stepped for the first time.
    pub discover_on_start: bool,
}

impl Default for RdmControllerConfig {
    fn default() -> Self {
        Self {
            uid: UniqueIdentifier::PROTOTYPE,
            retries: 2,
            rediscovery_interval_us: 60_000_000,
            discover_on_start: true,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RdmState {
    Idle = 0,
    /// A discovery is running but the current step does something else.
    Discovering = 1,
    /// Muting a device that answered a branch request.
    Muting = 2,
    /// Broadcasting DISC_UN_MUTE at the start of a discovery.
    Unmuting = 3,
    /// Waiting for answers to a DISC_UNIQUE_BRANCH request.
    Branching = 4,
    /// Running a get or set transaction.
    Transacting = 5,
}

impl RdmState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Discovering,
            2 => Self::Muting,
            3 => Self::Unmuting,
            4 => Self::Branching,
            5 => Self::Transacting,
            _ => Self::Idle,
        }
    }
}

/// Parameters of a device as reported by DEVICE_INFO.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceParameters {
    pub device_model_id: u16,
    pub product_category: u16,
    pub software_version: u32,
    pub dmx_footprint: u16,
    pub dmx_personality: u8,
    pub dmx_personality_count: u8,
    pub dmx_start_address: DmxStartAddress,
}

impl From<DeviceInfo> for DeviceParameters {
    fn from(value: DeviceInfo) -> Self {
        Self {
            device_model_id: value.device_model_id,
            product_category: value.product_category,
            software_version: value.software_version,
            dmx_footprint: value.dmx_footprint,
            dmx_personality: value.dmx_personality,
            dmx_personality_count: value.dmx_personality_count,
            dmx_start_address: value.dmx_start_address,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredDevice {
    pub uid: UniqueIdentifier,
    /// The device acknowledged DISC_MUTE during the last discovery.
    pub muted: bool,
    /// Uid of the primary port if the device has several responder ports.
    pub binding_uid: Option<UniqueIdentifier>,
    /// Cached parameters, None until DEVICE_INFO was answered.
    pub parameters: Option<DeviceParameters>,
    seen: bool,
}

impl DiscoveredDevice {
    pub fn new(uid: UniqueIdentifier) -> Self {
        Self {
            uid,
            muted: false,
            binding_uid: None,
            parameters: None,
            seen: true,
        }
    }
}

/// Who queued a request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestOrigin {
    /// Queued by the application or by the controller itself.
    Local,
    /// Bridged from an Art-Net controller that expects the response at this address.
    Network(SocketAddrV4),
}

#[derive(Debug)]
pub enum RdmResponse {
    /// The request was acknowledged.
    Response(RdmResponseData),
    /// The request was acknowledged but the message data is too big to fit into one response.
    /// Use the get command on the same pid to receive the rest of it until you just receive a
    /// Response.
    IncompleteResponse(RdmResponseData),
    /// No response was received since the request was a broadcast.
    RequestWasBroadcast,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdmResponseError<E> {
    /// The received package doesn't match the request.
    NotMatching,
    /// The parameter data couldn't be deserialized.
    ParameterDataNotDeserializable,
    /// The response has an error status but the contents aren't deserializable.
    ErrorNotDeserializable,
    /// The response isn't ready yet. The value is the estimated time in 100ms steps.
    NotReady(u16),
    /// The responder didn't acknowledge the request.
    NotAcknowledged(NackReason),
    /// The port raised an error.
    DmxError(DmxError<E>),
}

impl<E: core::fmt::Display> core::fmt::Display for RdmResponseError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotMatching => write!(f, "response does not match the request"),
            Self::ParameterDataNotDeserializable => {
                write!(f, "parameter data could not be deserialized")
            },
            Self::ErrorNotDeserializable => write!(f, "error response could not be deserialized"),
            Self::NotReady(estimate) => {
                write!(f, "response not ready, retry in {}ms", *estimate as u32 * 100)
            },
            Self::NotAcknowledged(reason) => write!(f, "request not acknowledged: {:?}", reason),
            Self::DmxError(error) => write!(f, "port error: {}", error),
        }
    }
}

impl<E> From<DmxError<E>> for RdmResponseError<E> {
    fn from(value: DmxError<E>) -> Self {
        Self::DmxError(value)
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug + core::fmt::Display> std::error::Error for RdmResponseError<E> {}

impl<E> From<rdm_types::DeserializationError> for RdmResponseError<E> {
    fn from(_: rdm_types::DeserializationError) -> Self {
        Self::ParameterDataNotDeserializable
    }
}

impl<E> RdmResponseError<E> {
    /// The responder did not answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RdmResponseError::DmxError(DmxError::TimeoutError))
    }
}

/// Raised when the request queue of a controller is full.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RdmQueueFull;

impl core::fmt::Display for RdmQueueFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "rdm request queue is full")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RdmQueueFull {}

#[derive(Debug)]
pub enum RdmEvent<E> {
    /// A device was muted and added to the table.
    DeviceFound(UniqueIdentifier),
    /// A device stopped answering or wasn't found again and got removed from the table.
    DeviceLost(UniqueIdentifier),
    DiscoveryFinished {
        devices: usize,
        branch_requests: u32,
    },
    /// A queued request completed or ran out of retries.
    Response {
        origin: RequestOrigin,
        request: RdmRequestData,
        result: Result<RdmResponse, RdmResponseError<E>>,
    },
    /// The gap before the next frame was too short for the next exchange.
    Deferred,
}

#[derive(Debug)]
struct RdmJob {
    request: RdmRequestData,
    origin: RequestOrigin,
    attempts: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum DiscoveryPhase {
    Unmute,
    Search,
}

/// Evaluates the response type of a response as described in section 6.2.8 of ANSI E1.20.
pub fn interpret_response<E>(
    response: RdmResponseData,
) -> Result<RdmResponse, RdmResponseError<E>> {
    match response.response_type {
        ResponseType::ResponseTypeAck => Ok(RdmResponse::Response(response)),
        ResponseType::ResponseTypeAckTimer => {
            let estimate: [u8; 2] = response.parameter_data[..]
                .try_into()
                .map_err(|_| RdmResponseError::ErrorNotDeserializable)?;

            Err(RdmResponseError::NotReady(u16::from_be_bytes(estimate)))
        },
        ResponseType::ResponseTypeNackReason => {
            let reason: [u8; 2] = response.parameter_data[..]
                .try_into()
                .map_err(|_| RdmResponseError::ErrorNotDeserializable)?;
            let nack_reason = NackReason::try_from(u16::from_be_bytes(reason))
                .map_err(|_| RdmResponseError::ErrorNotDeserializable)?;

            Err(RdmResponseError::NotAcknowledged(nack_reason))
        },
        ResponseType::ResponseTypeAckOverflow => Ok(RdmResponse::IncompleteResponse(response)),
    }
}

pub struct RdmController<E> {
    config: RdmControllerConfig,
    state: RdmState,
    transaction_number: u8,
    jobs: heapless::Deque<RdmJob, JOB_QUEUE_SIZE>,
    events: heapless::Deque<RdmEvent<E>, EVENT_QUEUE_SIZE>,
    devices: DeviceTable,
    table_changed: bool,
    discovery: Option<DiscoveryPhase>,
    search: DiscoverySearch,
    mute_attempts: u8,
    branch_attempts: u8,
    /// A range was skipped, devices not seen in this discovery may still be there.
    search_incomplete: bool,
    last_discovery_us: Option<u64>,
}

impl<E> RdmController<E> {
    pub fn new(config: RdmControllerConfig) -> Self {
        Self {
            config,
            state: RdmState::Idle,
            transaction_number: 0,
            jobs: heapless::Deque::new(),
            events: heapless::Deque::new(),
            devices: DeviceTable::new(),
            table_changed: false,
            discovery: None,
            search: DiscoverySearch::new(),
            mute_attempts: 0,
            branch_attempts: 0,
            search_incomplete: false,
            last_discovery_us: None,
        }
    }

    pub fn config(&self) -> &RdmControllerConfig {
        &self.config
    }

    pub fn state(&self) -> RdmState {
        self.state
    }

    pub fn uid(&self) -> UniqueIdentifier {
        self.config.uid
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn device(&self, uid: UniqueIdentifier) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|device| device.uid == uid)
    }

    pub fn device_table(&self) -> DeviceTable {
        self.devices.clone()
    }

    /// Returns true once after the device table changed.
    pub fn take_table_changed(&mut self) -> bool {
        core::mem::take(&mut self.table_changed)
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_some()
    }

    /// Number of requests waiting for the bus.
    pub fn pending_requests(&self) -> usize {
        self.jobs.len()
    }

    /// Starts a new discovery. A running discovery starts over.
    pub fn start_discovery(&mut self) {
        info!("rdm discovery started");

        for device in self.devices.iter_mut() {
            device.seen = false;
        }

        self.discovery = Some(DiscoveryPhase::Unmute);
        self.mute_attempts = 0;
        self.branch_attempts = 0;
        self.search_incomplete = false;
        self.state = RdmState::Discovering;
    }

    /// Queues a request. Requests from the network are forwarded untouched, local requests get
    /// the source uid and transaction number of this controller.
    pub fn enqueue(
        &mut self,
        request: RdmRequestData,
        origin: RequestOrigin,
    ) -> Result<(), RdmQueueFull> {
        self.jobs
            .push_back(RdmJob {
                request,
                origin,
                attempts: 0,
            })
            .map_err(|_| RdmQueueFull)
    }

    fn enqueue_local(
        &mut self,
        destination_uid: PackageAddress,
        command_class: RequestCommandClass,
        parameter_id: u16,
        parameter_data: DataPack,
    ) -> Result<(), RdmQueueFull> {
        self.enqueue(
            RdmRequestData {
                destination_uid,
                source_uid: self.config.uid,
                transaction_number: 0,
                port_id: 1,
                message_count: 0,
                sub_device: 0,
                command_class,
                parameter_id,
                parameter_data,
            },
            RequestOrigin::Local,
        )
    }

    /// Queues a get request.
    pub fn get(
        &mut self,
        uid: UniqueIdentifier,
        parameter_id: u16,
        parameter_data: DataPack,
    ) -> Result<(), RdmQueueFull> {
        self.enqueue_local(
            PackageAddress::Device(uid),
            RequestCommandClass::GetCommand,
            parameter_id,
            parameter_data,
        )
    }

    /// Queues a set request.
    pub fn set(
        &mut self,
        destination_uid: PackageAddress,
        parameter_id: u16,
        parameter_data: DataPack,
    ) -> Result<(), RdmQueueFull> {
        self.enqueue_local(
            destination_uid,
            RequestCommandClass::SetCommand,
            parameter_id,
            parameter_data,
        )
    }

    /// Queues a request for the device info, the answer updates the cached parameters.
    pub fn get_device_info(&mut self, uid: UniqueIdentifier) -> Result<(), RdmQueueFull> {
        self.get(uid, pids::DEVICE_INFO, DataPack::new())
    }

    /// Queues switching the identify state of a device (led for searching).
    pub fn identify(&mut self, uid: PackageAddress, enabled: bool) -> Result<(), RdmQueueFull> {
        let mut parameter_data = DataPack::new();
        let _ = parameter_data.push(enabled as u8);

        self.set(uid, pids::IDENTIFY_DEVICE, parameter_data)
    }

    /// Queues setting the dmx start address of a device, the acknowledgement updates the cached
    /// parameters.
    pub fn set_start_address(
        &mut self,
        uid: PackageAddress,
        start_address: u16,
    ) -> Result<(), RdmQueueFull> {
        self.set(
            uid,
            pids::DMX_START_ADDRESS,
            DmxStartAddress::Address(start_address).serialize(),
        )
    }

    /// Returns events that are left from the last step.
    pub fn next_event(&mut self) -> Option<RdmEvent<E>> {
        self.events.pop_front()
    }

    fn push_event(&mut self, event: RdmEvent<E>) {
        if self.events.push_back(event).is_err() {
            warn!("rdm event queue full, event dropped");
        }
    }

    fn next_transaction_number(&mut self) -> u8 {
        self.transaction_number = self.transaction_number.wrapping_add(1);
        self.transaction_number
    }

    fn idle_state(&self) -> RdmState {
        if self.discovery.is_some() {
            RdmState::Discovering
        } else {
            RdmState::Idle
        }
    }

    fn discovery_due(&mut self, now_us: u64) -> bool {
        if self.discovery.is_some() {
            return false;
        }

        match self.last_discovery_us {
            None => {
                self.last_discovery_us = Some(now_us);
                self.config.discover_on_start
            },
            Some(last_discovery_us) => {
                self.config.rediscovery_interval_us != 0
                    && now_us.saturating_sub(last_discovery_us)
                        >= self.config.rediscovery_interval_us
            },
        }
    }

    fn record_device(&mut self, uid: UniqueIdentifier, mute: DiscoveryMuteResponse) {
        if mute.proxy_device {
            debug!("{} is answered by a proxy", uid);
        }

        if let Some(device) = self.devices.iter_mut().find(|device| device.uid == uid) {
            device.seen = true;
            device.muted = true;
            device.binding_uid = mute.binding_uid;
            return;
        }

        let mut device = DiscoveredDevice::new(uid);
        device.muted = true;
        device.binding_uid = mute.binding_uid;
        if self.devices.push(device).is_err() {
            warn!("device table full, ignoring {}", uid);
            return;
        }

        info!("found rdm device {}", uid);
        self.table_changed = true;
        self.push_event(RdmEvent::DeviceFound(uid));
    }

    fn remove_device(&mut self, uid: UniqueIdentifier) {
        if let Some(index) = self.devices.iter().position(|device| device.uid == uid) {
            self.devices.swap_remove(index);
            self.table_changed = true;
            info!("lost rdm device {}", uid);
            self.push_event(RdmEvent::DeviceLost(uid));
        }
    }

    fn finish_discovery(&mut self, now_us: u64) {
        if core::mem::take(&mut self.search_incomplete) {
            warn!("rdm discovery skipped ranges, keeping devices that were not seen");
            for device in self.devices.iter_mut() {
                device.seen = true;
            }
        }

        let mut index = 0;
        while index < self.devices.len() {
            if self.devices[index].seen {
                index += 1;
                continue;
            }

            let uid = self.devices[index].uid;
            self.remove_device(uid);
        }

        self.discovery = None;
        self.state = RdmState::Idle;
        self.last_discovery_us = Some(now_us);

        let mut unknown: heapless::Vec<UniqueIdentifier, MAX_DEVICES_PER_PORT> =
            heapless::Vec::new();
        for device in self.devices.iter().filter(|device| device.parameters.is_none()) {
            let _ = unknown.push(device.uid);
        }
        for uid in unknown {
            if self.get_device_info(uid).is_err() {
                debug!("request queue full, device info of {} postponed", uid);
                break;
            }
        }

        info!(
            "rdm discovery finished with {} devices after {} branch requests",
            self.devices.len(),
            self.search.branch_requests()
        );
        self.push_event(RdmEvent::DiscoveryFinished {
            devices: self.devices.len(),
            branch_requests: self.search.branch_requests(),
        });
    }

    fn update_cache(&mut self, request: &RdmRequestData, response: &RdmResponse) {
        let (uid, response) = match (request.destination_uid, response) {
            (PackageAddress::Device(uid), RdmResponse::Response(response)) => (uid, response),
            _ => return,
        };

        let device = match self.devices.iter_mut().find(|device| device.uid == uid) {
            Some(device) => device,
            None => return,
        };

        match (request.command_class, request.parameter_id) {
            (RequestCommandClass::GetCommand, pids::DEVICE_INFO) => {
                match DeviceInfo::deserialize(&response.parameter_data) {
                    Ok(device_info) => {
                        device.parameters = Some(device_info.into());
                        self.table_changed = true;
                    },
                    Err(_) => warn!("device info of {} is malformed", uid),
                }
            },
            (RequestCommandClass::SetCommand, pids::DMX_START_ADDRESS) => {
                if let (Some(parameters), Ok(start_address)) = (
                    device.parameters.as_mut(),
                    DmxStartAddress::deserialize(&request.parameter_data),
                ) {
                    parameters.dmx_start_address = start_address;
                    self.table_changed = true;
                }
            },
            _ => {},
        }
    }
}

impl<E> RdmController<E> {
    /// Runs the next exchange if the gap before the next frame allows it and returns the first
    /// event it produced. Further events can be taken with [RdmController::next_event].
    pub fn step<D, C>(&mut self, port: &mut DmxPort<'_, D, C>) -> Option<RdmEvent<E>>
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        let now_us = port.now_us();
        if port.status().take_discovery_request() || self.discovery_due(now_us) {
            self.start_discovery();
        }

        if let Some(job) = self.jobs.pop_front() {
            self.run_job(port, job);
        } else if let Some(phase) = self.discovery {
            self.run_discovery_step(port, phase);
        }

        port.status().set_rdm_state(self.state);
        self.next_event()
    }

    fn defer<D, C>(&mut self, port: &DmxPort<'_, D, C>)
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        port.status().rdm_deferred();
        self.push_event(RdmEvent::Deferred);
    }

    fn has_window<D, C>(
        &self,
        port: &DmxPort<'_, D, C>,
        request_len: usize,
        response_len: usize,
    ) -> bool
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        port.turnaround_window_us() >= port.timing().exchange_budget_us(request_len, response_len)
    }

    fn run_job<D, C>(&mut self, port: &mut DmxPort<'_, D, C>, mut job: RdmJob)
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        let request_len = RDM_MIN_PACKAGE_SIZE + job.request.parameter_data.len();
        if !self.has_window(port, request_len, TRANSACTION_RESPONSE_SLOTS) {
            let _ = self.jobs.push_front(job);
            self.defer(port);
            return;
        }

        if job.origin == RequestOrigin::Local {
            job.request.source_uid = self.config.uid;
            job.request.transaction_number = self.next_transaction_number();
        }

        self.state = RdmState::Transacting;
        port.status().set_rdm_state(self.state);
        let result = transact(port, &job.request);
        self.state = self.idle_state();

        match result {
            Err(error) if error.is_timeout() && !job.request.destination_uid.is_broadcast() => {
                port.status().rdm_timed_out();

                if job.attempts < self.config.retries {
                    debug!("rdm request timed out, retrying");
                    job.attempts += 1;
                    let _ = self.jobs.push_front(job);
                    return;
                }

                if let PackageAddress::Device(uid) = job.request.destination_uid {
                    warn!("{} did not answer after {} attempts", uid, job.attempts + 1);
                    self.remove_device(uid);
                }

                self.push_event(RdmEvent::Response {
                    origin: job.origin,
                    request: job.request,
                    result: Err(error),
                });
            },
            result => {
                if let Ok(response) = &result {
                    self.update_cache(&job.request, response);
                }

                self.push_event(RdmEvent::Response {
                    origin: job.origin,
                    request: job.request,
                    result,
                });
            },
        }
    }

    fn run_discovery_step<D, C>(&mut self, port: &mut DmxPort<'_, D, C>, phase: DiscoveryPhase)
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        match phase {
            DiscoveryPhase::Unmute => {
                if !self.has_window(port, RDM_MIN_PACKAGE_SIZE, 0) {
                    self.defer(port);
                    return;
                }

                self.state = RdmState::Unmuting;
                port.status().set_rdm_state(self.state);
                let request = self.discovery_request(
                    PackageAddress::Broadcast,
                    pids::DISC_UN_MUTE,
                    DataPack::new(),
                );
                if transact(port, &request).is_err() {
                    warn!("un-mute broadcast failed");
                }

                self.search.start();
                self.discovery = Some(DiscoveryPhase::Search);
                self.state = RdmState::Discovering;
            },
            DiscoveryPhase::Search => match self.search.candidate() {
                Some(uid) => self.mute_candidate(port, uid),
                None => match self.search.next_range() {
                    Some(range) => self.branch(port, range),
                    None => self.finish_discovery(port.now_us()),
                },
            },
        }
    }

    fn discovery_request(
        &mut self,
        destination_uid: PackageAddress,
        parameter_id: u16,
        parameter_data: DataPack,
    ) -> RdmRequestData {
        RdmRequestData {
            destination_uid,
            source_uid: self.config.uid,
            transaction_number: self.next_transaction_number(),
            port_id: 1,
            message_count: 0,
            sub_device: 0,
            command_class: RequestCommandClass::DiscoveryCommand,
            parameter_id,
            parameter_data,
        }
    }

    fn branch<D, C>(&mut self, port: &mut DmxPort<'_, D, C>, range: UidRange)
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        if !self.has_window(port, BRANCH_REQUEST_SLOTS, RDM_MAX_DISCOVERY_RESPONSE_SIZE) {
            self.search.restore_range(range);
            self.defer(port);
            return;
        }

        self.state = RdmState::Branching;
        port.status().set_rdm_state(self.state);

        let mut parameter_data = DataPack::new();
        let _ = parameter_data.extend_from_slice(&range.to_bytes());
        let request = self.discovery_request(
            PackageAddress::Broadcast,
            pids::DISC_UNIQUE_BRANCH,
            parameter_data,
        );

        let option = match discover(port, &request) {
            Ok(option) => option,
            Err(_) => {
                self.branch_failed(range, port.now_us());
                return;
            },
        };

        self.branch_attempts = 0;
        match self.search.branch_result(range, option) {
            BranchOutcome::Candidate(_) => {
                self.mute_attempts = 0;
                self.state = RdmState::Muting;
            },
            _ => self.state = RdmState::Discovering,
        }

        if !self.search.is_active() {
            self.finish_discovery(port.now_us());
        }
    }

    /// Repeats a failed branch request. A range that keeps failing is skipped and the devices
    /// not seen in this discovery stay in the table.
    fn branch_failed(&mut self, range: UidRange, now_us: u64) {
        self.state = RdmState::Discovering;

        if self.branch_attempts < self.config.retries {
            self.branch_attempts += 1;
            debug!("branch request failed, retrying range {} to {}", range.lower, range.upper);
            self.search.restore_range(range);
            return;
        }

        warn!("branch request failed, skipping range {} to {}", range.lower, range.upper);
        self.branch_attempts = 0;
        self.search_incomplete = true;

        if !self.search.is_active() {
            self.finish_discovery(now_us);
        }
    }

    fn mute_candidate<D, C>(&mut self, port: &mut DmxPort<'_, D, C>, uid: UniqueIdentifier)
    where
        D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
        C: Clock,
    {
        if !self.has_window(port, RDM_MIN_PACKAGE_SIZE, MUTE_RESPONSE_SLOTS) {
            self.defer(port);
            return;
        }

        self.state = RdmState::Muting;
        port.status().set_rdm_state(self.state);

        let request =
            self.discovery_request(PackageAddress::Device(uid), pids::DISC_MUTE, DataPack::new());

        let result = transact(port, &request).and_then(|response| match response {
            RdmResponse::Response(response) | RdmResponse::IncompleteResponse(response) => {
                Ok(DiscoveryMuteResponse::deserialize(&response.parameter_data)?)
            },
            RdmResponse::RequestWasBroadcast => Err(RdmResponseError::NotMatching),
        });

        match result {
            Ok(mute) => {
                self.search.candidate_muted();
                self.record_device(uid, mute);
            },
            Err(error) => {
                if error.is_timeout() {
                    port.status().rdm_timed_out();
                } else if matches!(error, RdmResponseError::ParameterDataNotDeserializable) {
                    warn!("mute response of {} is malformed", uid);
                }

                self.mute_attempts += 1;
                if self.mute_attempts > self.config.retries {
                    warn!("{} did not acknowledge its mute", uid);
                    self.search.candidate_lost();
                }
            },
        }

        self.state = RdmState::Discovering;
        if !self.search.is_active() {
            self.finish_discovery(port.now_us());
        }
    }
}

/// Sends a request and waits for the matching response inside one turnaround.
fn transact<D, C, E>(
    port: &mut DmxPort<'_, D, C>,
    request: &RdmRequestData,
) -> Result<RdmResponse, RdmResponseError<E>>
where
    D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
    C: Clock,
{
    port.request_turnaround()?;
    let result = exchange(port, request);
    port.release_turnaround();

    result
}

fn exchange<D, C, E>(
    port: &mut DmxPort<'_, D, C>,
    request: &RdmRequestData,
) -> Result<RdmResponse, RdmResponseError<E>>
where
    D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
    C: Clock,
{
    port.rdm_send(&RdmData::Request(request.clone()))?;

    if request.destination_uid.is_broadcast() {
        return Ok(RdmResponse::RequestWasBroadcast);
    }

    let response = loop {
        let response = match port.rdm_receive()? {
            RdmData::Request(_) => {
                return Err(RdmResponseError::NotMatching);
            },
            RdmData::Response(response) => response,
        };

        if request.transaction_number == response.transaction_number {
            break response;
        }

        debug!(
            "discarding response to transaction {}, expected {}",
            response.transaction_number,
            request.transaction_number
        );
        port.status().response_discarded();
    };

    if response.destination_uid != PackageAddress::Device(request.source_uid)
        || PackageAddress::Device(response.source_uid) != request.destination_uid
    {
        return Err(RdmResponseError::NotMatching);
    }

    interpret_response(response)
}

/// Sends a DISC_UNIQUE_BRANCH request and collects the answers.
fn discover<D, C, E>(
    port: &mut DmxPort<'_, D, C>,
    request: &RdmRequestData,
) -> Result<DiscoveryOption, RdmResponseError<E>>
where
    D: DmxRespUartDriver<DriverError = E> + DmxRecvUartDriver,
    C: Clock,
{
    port.request_turnaround()?;
    let result = port
        .rdm_send(&RdmData::Request(request.clone()))
        .and_then(|_| port.rdm_receive_discovery());
    port.release_turnaround();

    Ok(result?)
}
