//! Node configuration and the interface to the store that persists it.

use crate::consts::{DMX_MAX_SLOTS, MAX_PORTS};
use core::net::Ipv4Addr;

pub type ShortName = heapless::String<18>;
pub type LongName = heapless::String<64>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Net must be between 0 and 127.
    NetOutOfRange,
    /// Sub-Net must be between 0 and 15.
    SubNetOutOfRange,
    /// Universe must be between 0 and 15.
    UniverseOutOfRange,
    /// Start address must be between 1 and 512.
    StartAddressOutOfRange,
    /// The name does not fit into the name field.
    NameTooLong,
    /// There is no port with this index.
    PortOutOfRange,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::NetOutOfRange => write!(f, "net must be between 0 and 127"),
            ConfigError::SubNetOutOfRange => write!(f, "sub-net must be between 0 and 15"),
            ConfigError::UniverseOutOfRange => write!(f, "universe must be between 0 and 15"),
            ConfigError::StartAddressOutOfRange => {
                write!(f, "start address must be between 1 and 512")
            },
            ConfigError::NameTooLong => write!(f, "name is too long"),
            ConfigError::PortOutOfRange => write!(f, "port does not exist"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// The 15 bit Art-Net Port-Address made of net, sub-net and universe.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortAddress {
    net: u8,
    sub_net: u8,
    universe: u8,
}

impl PortAddress {
    pub fn new(net: u8, sub_net: u8, universe: u8) -> Result<Self, ConfigError> {
        if net > 0x7F {
            return Err(ConfigError::NetOutOfRange);
        }

        if sub_net > 0x0F {
            return Err(ConfigError::SubNetOutOfRange);
        }

        if universe > 0x0F {
            return Err(ConfigError::UniverseOutOfRange);
        }

        Ok(Self {
            net,
            sub_net,
            universe,
        })
    }

    /// Builds the address from the Net and SubUni fields of a packet.
    pub fn from_net_sub_uni(net: u8, sub_uni: u8) -> Result<Self, ConfigError> {
        Self::new(net, sub_uni >> 4, sub_uni & 0x0F)
    }

    pub fn net(&self) -> u8 {
        self.net
    }

    pub fn sub_net(&self) -> u8 {
        self.sub_net
    }

    pub fn universe(&self) -> u8 {
        self.universe
    }

    /// Sub-net in the high and universe in the low nibble.
    pub fn sub_uni(&self) -> u8 {
        self.sub_net << 4 | self.universe
    }

    pub fn as_u16(&self) -> u16 {
        (self.net as u16) << 8 | self.sub_uni() as u16
    }
}

impl TryFrom<u16> for PortAddress {
    type Error = ConfigError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_net_sub_uni((value >> 8) as u8, value as u8)
    }
}

impl core::fmt::Display for PortAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.net, self.sub_net, self.universe)
    }
}

/// Addressing of a single output.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortConfig {
    pub address: PortAddress,
    /// First slot the Art-Net payload is written to.
    pub start_address: u16,
    pub rdm_enabled: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            address: PortAddress::default(),
            start_address: 1,
            rdm_enabled: true,
        }
    }
}

impl PortConfig {
    pub fn new(
        address: PortAddress,
        start_address: u16,
        rdm_enabled: bool,
    ) -> Result<Self, ConfigError> {
        if !(1..=DMX_MAX_SLOTS as u16).contains(&start_address) {
            return Err(ConfigError::StartAddressOutOfRange);
        }

        Ok(Self {
            address,
            start_address,
            rdm_enabled,
        })
    }
}

/// How the node presents itself on the network.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeIdentity {
    pub short_name: ShortName,
    pub long_name: LongName,
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
    pub oem: u16,
    pub esta_manufacturer: u16,
    pub firmware_version: u16,
    pub dhcp: bool,
    /// Destination of broadcast poll replies.
    pub broadcast: Ipv4Addr,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        let mut short_name = ShortName::new();
        let _ = short_name.push_str("dmx-rdm-node");
        let mut long_name = LongName::new();
        let _ = long_name.push_str("Art-Net DMX512/RDM node");

        Self {
            short_name,
            long_name,
            ip: Ipv4Addr::new(192, 168, 4, 1),
            mac: [0; 6],
            oem: 0x00FF,
            esta_manufacturer: 0x7FF0,
            firmware_version: 1,
            dhcp: false,
            broadcast: Ipv4Addr::BROADCAST,
        }
    }
}

impl NodeIdentity {
    pub fn set_short_name(&mut self, name: &str) -> Result<(), ConfigError> {
        self.short_name = name_from_str(name)?;
        Ok(())
    }

    pub fn set_long_name(&mut self, name: &str) -> Result<(), ConfigError> {
        self.long_name = name_from_str(name)?;
        Ok(())
    }
}

fn name_from_str<const N: usize>(name: &str) -> Result<heapless::String<N>, ConfigError> {
    // one byte is kept for the terminating null on the wire
    if name.len() >= N {
        return Err(ConfigError::NameTooLong);
    }

    let mut string = heapless::String::new();
    string
        .push_str(name)
        .map_err(|_| ConfigError::NameTooLong)?;

    Ok(string)
}

/// Everything the node reads from the store.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeConfig {
    pub ports: [PortConfig; MAX_PORTS],
    pub identity: NodeIdentity,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ports: [
                PortConfig::default(),
                PortConfig {
                    address: PortAddress {
                        net: 0,
                        sub_net: 0,
                        universe: 1,
                    },
                    start_address: 1,
                    rdm_enabled: false,
                },
            ],
            identity: NodeIdentity::default(),
        }
    }
}

impl NodeConfig {
    /// Reads the complete configuration from a store.
    pub fn load<S: ConfigStore + ?Sized>(store: &S) -> Self {
        Self {
            ports: core::array::from_fn(|port| store.load_addressing(port)),
            identity: store.load_identity(),
        }
    }
}

/// How a single ArtAddress switch field wants a value changed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchProgram {
    NoChange,
    /// Go back to the default of the node.
    Reset,
    Set(u8),
}

impl SwitchProgram {
    /// Decodes a switch byte, bit 7 marks a new value in the bits of `mask`.
    pub fn decode(value: u8, mask: u8) -> Self {
        match value {
            0x7F => Self::NoChange,
            0x00 => Self::Reset,
            value if value & 0x80 != 0 => Self::Set(value & mask),
            _ => Self::NoChange,
        }
    }

    fn apply(&self, current: u8, default: u8) -> u8 {
        match self {
            Self::NoChange => current,
            Self::Reset => default,
            Self::Set(value) => *value,
        }
    }
}

/// Commands of an ArtAddress packet the node acts on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressCommand {
    None,
    /// Clear the output buffer of the port with the given offset.
    ClearOutput(u8),
    /// Any other command, it is forwarded to the store.
    Other(u8),
}

impl From<u8> for AddressCommand {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::None,
            0x90..=0x93 => Self::ClearOutput(value - 0x90),
            other => Self::Other(other),
        }
    }
}

/// A configuration change requested by an ArtAddress packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AddressChange {
    /// Port the packet is addressed at.
    pub port: usize,
    pub net: SwitchProgram,
    pub sub_net: SwitchProgram,
    pub universe: SwitchProgram,
    pub short_name: Option<ShortName>,
    pub long_name: Option<LongName>,
    pub command: AddressCommand,
}

impl AddressChange {
    /// Returns the addressing of `current` after applying the change, falling back to `default`
    /// for resets.
    pub fn apply_to(&self, current: &PortConfig, default: &PortConfig) -> PortConfig {
        let address = PortAddress::new(
            self.net
                .apply(current.address.net, default.address.net),
            self.sub_net
                .apply(current.address.sub_net, default.address.sub_net),
            self.universe
                .apply(current.address.universe, default.address.universe),
        )
        .unwrap_or(current.address);

        PortConfig {
            address,
            ..*current
        }
    }
}

/// The collaborator that persists the configuration. The node only reads from it and forwards
/// change requests, it reloads once the store reports a change.
pub trait ConfigStore {
    fn load_addressing(&self, port: usize) -> PortConfig;

    fn load_identity(&self) -> NodeIdentity;

    /// Returns true once after the configuration changed.
    fn take_changed(&mut self) -> bool;

    fn request_change(&mut self, change: &AddressChange);
}

/// A [ConfigStore] that keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    config: NodeConfig,
    changed: bool,
}

impl MemoryConfigStore {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            changed: false,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn set_port(&mut self, port: usize, port_config: PortConfig) -> Result<(), ConfigError> {
        let slot = self
            .config
            .ports
            .get_mut(port)
            .ok_or(ConfigError::PortOutOfRange)?;
        *slot = port_config;
        self.changed = true;

        Ok(())
    }

    pub fn set_identity(&mut self, identity: NodeIdentity) {
        self.config.identity = identity;
        self.changed = true;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_addressing(&self, port: usize) -> PortConfig {
        self.config.ports.get(port).copied().unwrap_or_default()
    }

    fn load_identity(&self) -> NodeIdentity {
        self.config.identity.clone()
    }

    fn take_changed(&mut self) -> bool {
        core::mem::take(&mut self.changed)
    }

    fn request_change(&mut self, change: &AddressChange) {
        let defaults = NodeConfig::default();

        if let Some(current) = self.config.ports.get(change.port) {
            let updated = change.apply_to(current, &defaults.ports[change.port]);
            if updated != *current {
                self.config.ports[change.port] = updated;
                self.changed = true;
            }
        }

        if let Some(short_name) = &change.short_name {
            self.config.identity.short_name = short_name.clone();
            self.changed = true;
        }

        if let Some(long_name) = &change.long_name {
            self.config.identity.long_name = long_name.clone();
            self.changed = true;
        }
    }
}
