//! The two contexts of the node.
//!
//! [SignalTask] owns the ports and their rdm controllers. It never blocks, never allocates and
//! only talks to the network context through the shared buffers, queues and atomics.
//! [NetworkTask] runs the [ArtNetNode] on a transport and is allowed to be late.

use crate::artnet_node::{
    ArtNetNode, ArtNetTransport, BridgedRequest, BridgedResponse, BRIDGE_QUEUE_SIZE,
};
use crate::clock::Clock;
use crate::config::{ConfigError, ConfigStore};
use crate::consts::MAX_PORTS;
use crate::dmx_port::DmxPort;
use crate::dmx_uart_driver::{DmxRecvUartDriver, DmxRespUartDriver, DmxUartDriver};
use crate::publish::Publisher;
use crate::rdm_controller::{
    DeviceTable, RdmController, RdmEvent, RdmResponse, RdmResponseError, RequestOrigin,
};
use crate::rdm_data::{RdmRequestData, RdmResponseData};
use crate::types::{DataPack, ResponseType};
use crate::universe::UniverseReader;
use heapless::spsc::{Consumer, Producer};

/// Everything the signal context needs to drive one output.
pub struct SignalPort<'a, D: DmxUartDriver, C> {
    port: DmxPort<'a, D, C>,
    controller: Option<RdmController<D::DriverError>>,
    universe: UniverseReader<'a>,
    requests: Consumer<'a, BridgedRequest, BRIDGE_QUEUE_SIZE>,
    responses: Producer<'a, BridgedResponse, BRIDGE_QUEUE_SIZE>,
    devices: Publisher<'a, DeviceTable>,
}

impl<'a, D, C> SignalPort<'a, D, C>
where
    D: DmxRespUartDriver + DmxRecvUartDriver,
    C: Clock,
{
    /// Bundles a port with its shared halves. Without a controller rdm requests are answered
    /// with no response.
    pub fn new(
        port: DmxPort<'a, D, C>,
        controller: Option<RdmController<D::DriverError>>,
        universe: UniverseReader<'a>,
        requests: Consumer<'a, BridgedRequest, BRIDGE_QUEUE_SIZE>,
        responses: Producer<'a, BridgedResponse, BRIDGE_QUEUE_SIZE>,
        devices: Publisher<'a, DeviceTable>,
    ) -> Self {
        Self {
            port,
            controller,
            universe,
            requests,
            responses,
            devices,
        }
    }

    pub fn port(&self) -> &DmxPort<'a, D, C> {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut DmxPort<'a, D, C> {
        &mut self.port
    }

    pub fn controller(&self) -> Option<&RdmController<D::DriverError>> {
        self.controller.as_ref()
    }

    pub fn controller_mut(&mut self) -> Option<&mut RdmController<D::DriverError>> {
        self.controller.as_mut()
    }

    /// Sends the next frame when it is due and runs one rdm step in the gap after it. Returns
    /// the microseconds until something is due again.
    pub fn poll(&mut self) -> u64 {
        let frame_sent = self.port.poll(self.universe.snapshot()).is_some();

        let controller = match self.controller.as_mut() {
            Some(controller) => controller,
            None => {
                // nobody can answer, the network side counts them as timeouts
                while let Some(bridged) = self.requests.dequeue() {
                    push_response(&mut self.responses, None, bridged.reply_to);
                }
                return self.port.time_until_next_event_us();
            },
        };

        if frame_sent {
            while let Some(bridged) = self.requests.peek() {
                let origin = RequestOrigin::Network(bridged.reply_to);
                if controller.enqueue(bridged.request.clone(), origin).is_err() {
                    break;
                }
                self.requests.dequeue();
            }

            if let Some(event) = controller.step(&mut self.port) {
                handle_event(&mut self.responses, event);
            }
            while let Some(event) = controller.next_event() {
                handle_event(&mut self.responses, event);
            }

            if controller.take_table_changed() {
                self.devices.write(controller.device_table());
            }
        }

        self.port.time_until_next_event_us()
    }
}

fn push_response(
    responses: &mut Producer<'_, BridgedResponse, BRIDGE_QUEUE_SIZE>,
    response: Option<RdmResponseData>,
    reply_to: core::net::SocketAddrV4,
) {
    if responses.enqueue(BridgedResponse { response, reply_to }).is_err() {
        warn!("rdm response queue full, response dropped");
    }
}

fn handle_event<E>(
    responses: &mut Producer<'_, BridgedResponse, BRIDGE_QUEUE_SIZE>,
    event: RdmEvent<E>,
) {
    match event {
        RdmEvent::Response {
            origin: RequestOrigin::Network(reply_to),
            request,
            result,
        } => push_response(responses, network_response(&request, &result), reply_to),
        RdmEvent::Response { result: Err(error), .. } if error.is_timeout() => {
            debug!("local rdm request timed out");
        },
        RdmEvent::Deferred => trace!("rdm step deferred"),
        _ => {},
    }
}

/// The response that goes back to an Art-Net controller. Timers and rejections are rebuilt from
/// their decoded form, timeouts and broadcasts have no response.
pub fn network_response<E>(
    request: &RdmRequestData,
    result: &Result<RdmResponse, RdmResponseError<E>>,
) -> Option<RdmResponseData> {
    match result {
        Ok(RdmResponse::Response(response)) | Ok(RdmResponse::IncompleteResponse(response)) => {
            Some(response.clone())
        },
        Ok(RdmResponse::RequestWasBroadcast) => None,
        Err(RdmResponseError::NotReady(estimate)) => request
            .build_response(
                ResponseType::ResponseTypeAckTimer,
                DataPack::from_slice(&estimate.to_be_bytes()).ok()?,
                0,
            )
            .ok(),
        Err(RdmResponseError::NotAcknowledged(reason)) => request
            .build_response(
                ResponseType::ResponseTypeNackReason,
                DataPack::from_slice(&(*reason as u16).to_be_bytes()).ok()?,
                0,
            )
            .ok(),
        Err(_) => None,
    }
}

/// The latency critical context driving all ports.
pub struct SignalTask<'a, D: DmxUartDriver, C> {
    ports: heapless::Vec<SignalPort<'a, D, C>, MAX_PORTS>,
}

impl<D: DmxUartDriver, C> Default for SignalTask<'_, D, C> {
    fn default() -> Self {
        Self {
            ports: heapless::Vec::new(),
        }
    }
}

impl<'a, D, C> SignalTask<'a, D, C>
where
    D: DmxRespUartDriver + DmxRecvUartDriver,
    C: Clock,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the next port. Returns its index.
    pub fn add_port(&mut self, port: SignalPort<'a, D, C>) -> Result<usize, ConfigError> {
        self.ports
            .push(port)
            .map_err(|_| ConfigError::PortOutOfRange)?;

        Ok(self.ports.len() - 1)
    }

    pub fn port(&self, index: usize) -> Option<&SignalPort<'a, D, C>> {
        self.ports.get(index)
    }

    pub fn port_mut(&mut self, index: usize) -> Option<&mut SignalPort<'a, D, C>> {
        self.ports.get_mut(index)
    }

    /// Polls every port once. Returns the microseconds until the next port is due.
    pub fn poll(&mut self) -> u64 {
        self.ports
            .iter_mut()
            .map(|port| port.poll())
            .min()
            .unwrap_or(u64::MAX)
    }
}

/// The best effort context running the node.
pub struct NetworkTask<'a, S, T, C> {
    node: ArtNetNode<'a, S>,
    transport: T,
    clock: C,
}

impl<'a, S: ConfigStore, T: ArtNetTransport, C: Clock> NetworkTask<'a, S, T, C> {
    pub fn new(node: ArtNetNode<'a, S>, transport: T, clock: C) -> Self {
        Self {
            node,
            transport,
            clock,
        }
    }

    pub fn node(&self) -> &ArtNetNode<'a, S> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut ArtNetNode<'a, S> {
        &mut self.node
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs the node once. Returns the microseconds until the next poll reply is due.
    pub fn poll(&mut self) -> Result<Option<u64>, T::Error> {
        let now_us = self.clock.now_us();
        self.node.poll(&mut self.transport, now_us)?;

        Ok(self
            .node
            .next_reply_due_us()
            .map(|due_us| due_us.saturating_sub(now_us)))
    }
}
