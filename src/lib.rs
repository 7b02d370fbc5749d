//! Art-Net to DMX512 (ANSI E1.11) node with a DMX-RDM (ANSI E1.20) controller for up to two RS485
//! outputs using interchangeable drivers. The core features no-std as well as no-alloc support
//! (no heap allocation) to target embedded as well as os platforms.
//!
//! Please refer to the [official specifications](https://tsp.esta.org/) published by the ESTA and
//! to the Art-Net 4 specification published by Artistic Licence.
//!
//! <div class="warning">This library is wip, it has not yet received extensive testing and the api
//! might not be final.</div>
//!
//! # Architecture
//!
//! The node is split into two contexts that only share lock-free primitives:
//!
//! * The signal context ([scheduler::SignalTask]) owns the [dmx_port::DmxPort]s and their
//!   [rdm_controller::RdmController]s. It generates the frames and runs one rdm exchange in the
//!   gap after every frame.
//! * The network context ([scheduler::NetworkTask]) runs the [artnet_node::ArtNetNode]. It writes
//!   received channel values into the [universe::Universe]s, answers polls and bridges rdm
//!   requests to the controllers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use core::sync::atomic::AtomicBool;
//! use dmx_rdm_node::artnet_node::{ArtNetNode, ArtNetNodeConfig, BridgeRequestQueue, BridgeResponseQueue, NodePort};
//! use dmx_rdm_node::clock::StdClock;
//! use dmx_rdm_node::config::{MemoryConfigStore, NodeConfig};
//! use dmx_rdm_node::dmx_port::{DmxPort, DmxTiming};
//! use dmx_rdm_node::publish::TripleBuffer;
//! use dmx_rdm_node::rdm_controller::{DeviceTable, RdmController, RdmControllerConfig};
//! use dmx_rdm_node::runtime::{run_bridge, UdpTransport};
//! use dmx_rdm_node::scheduler::{NetworkTask, SignalPort, SignalTask};
//! use dmx_rdm_node::status::PortStatus;
//! use dmx_rdm_node::universe::Universe;
//!
//! let status = PortStatus::new();
//! let mut universe = Universe::new();
//! let mut devices = TripleBuffer::new(DeviceTable::new());
//! let mut requests = BridgeRequestQueue::new();
//! let mut responses = BridgeResponseQueue::new();
//!
//! let (universe_writer, universe_reader) = universe.split();
//! let (device_publisher, device_subscriber) = devices.split();
//! let (request_producer, request_consumer) = requests.split();
//! let (response_producer, response_consumer) = responses.split();
//!
//! let clock = StdClock::new();
//! let port = DmxPort::new(my_uart_driver(), &clock, DmxTiming::default(), &status);
//!
//! let mut signal = SignalTask::new();
//! signal.add_port(SignalPort::new(
//!     port,
//!     Some(RdmController::new(RdmControllerConfig::default())),
//!     universe_reader,
//!     request_consumer,
//!     response_producer,
//!     device_publisher,
//! )).unwrap();
//!
//! let store = MemoryConfigStore::new(NodeConfig::default());
//! let mut node = ArtNetNode::new(ArtNetNodeConfig::default(), store);
//! node.add_port(NodePort {
//!     universe: universe_writer,
//!     devices: device_subscriber,
//!     requests: request_producer,
//!     responses: response_consumer,
//!     status: &status,
//! }).unwrap();
//!
//! let network = NetworkTask::new(node, UdpTransport::bind_default().unwrap(), &clock);
//! let stop = AtomicBool::new(false);
//! run_bridge(signal, network, &stop);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod fmt;

/// Parsing and serialization of the Art-Net packets the node handles.
pub mod artnet_packet;
/// The network side of the node.
pub mod artnet_node;
pub mod clock;
/// Node configuration and the interface to its store.
pub mod config;
pub mod consts;
/// Frame generation and line turnaround of a single output.
pub mod dmx_port;
/// Module for simplifying the implementation of new drivers/hardware that behave like direct uart devices.
pub mod dmx_uart_driver;
mod layouts;
mod pids;
pub mod publish;
pub mod rdm_controller;
pub mod rdm_data;
pub mod rdm_discovery;
pub mod rdm_types;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod runtime;
pub mod scheduler;
pub mod status;
pub mod types;
pub mod unique_identifier;
pub mod universe;
