use crate::consts::RDM_DEVICE_INFO_SIZE;
use crate::layouts::rdm_device_info_layout;
use crate::types::DataPack;
use crate::unique_identifier::UniqueIdentifier;
use modular_bitfield::bitfield;
use modular_bitfield::prelude::B12;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeserializationError;

impl core::fmt::Display for DeserializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "There was a deserialization error.")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DeserializationError {}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxStartAddress {
    /// The requested device has a dmx footprint of 0.
    NoAddress,
    /// The requested device does allocate dmx addresses.
    Address(u16),
}

impl DmxStartAddress {
    pub fn as_u16(&self) -> u16 {
        match self {
            DmxStartAddress::Address(address) => *address,
            DmxStartAddress::NoAddress => 0xFFFF,
        }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializationError> {
        let start_address = u16::from_be_bytes(data.try_into().map_err(|_| DeserializationError)?);

        start_address.try_into()
    }

    pub fn serialize(&self) -> DataPack {
        let mut data_pack = DataPack::new();
        let _ = data_pack.extend_from_slice(&self.as_u16().to_be_bytes());

        data_pack
    }
}

impl TryFrom<u16> for DmxStartAddress {
    type Error = DeserializationError;

    fn try_from(start_address: u16) -> Result<Self, Self::Error> {
        if start_address == 0xFFFF {
            return Ok(Self::NoAddress);
        }

        if !(1..=512).contains(&start_address) {
            return Err(DeserializationError);
        }

        Ok(Self::Address(start_address))
    }
}

/// Response to discovery mute/unmute requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryMuteResponse {
    /// The responder is a proxy device.
    pub managed_proxy: bool,
    /// The responder supports sub devices.
    pub sub_device: bool,
    /// The responder is not operational before receiving a firmware update.
    pub boot_loader: bool,
    /// A proxy device has responded on behalf of another device.
    pub proxy_device: bool,
    /// Included if the responding device contains multiple responder ports.
    /// It is the UID of the primary port of the device.
    pub binding_uid: Option<UniqueIdentifier>,
}

#[bitfield]
struct DiscControlField {
    pub managed_proxy: bool,
    pub sub_device: bool,
    pub boot_loader: bool,
    pub proxy_device: bool,
    #[skip]
    reserved: B12,
}

impl DiscoveryMuteResponse {
    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializationError> {
        let control_bytes: [u8; 2] = data
            .get(0..2)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(DeserializationError)?;

        let control_field = DiscControlField::from_bytes(control_bytes);
        let mut discovery_mute_response = Self {
            managed_proxy: control_field.managed_proxy(),
            sub_device: control_field.sub_device(),
            boot_loader: control_field.boot_loader(),
            proxy_device: control_field.proxy_device(),
            binding_uid: None,
        };

        if let Some(binding_bytes) = data.get(2..8) {
            let binding_bytes: &[u8; 6] =
                binding_bytes.try_into().map_err(|_| DeserializationError)?;
            discovery_mute_response.binding_uid = Some(
                UniqueIdentifier::from_bytes(binding_bytes).map_err(|_| DeserializationError)?,
            );
        }

        Ok(discovery_mute_response)
    }

    pub fn serialize(&self) -> DataPack {
        let mut data_pack = DataPack::new();
        let disc_control_field = DiscControlField::new()
            .with_managed_proxy(self.managed_proxy)
            .with_sub_device(self.sub_device)
            .with_boot_loader(self.boot_loader)
            .with_proxy_device(self.proxy_device);

        let _ = data_pack.extend_from_slice(&disc_control_field.into_bytes());

        if let Some(uid) = self.binding_uid {
            let _ = data_pack.extend_from_slice(&uid.to_bytes());
        }

        data_pack
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub device_model_id: u16,
    pub product_category: u16,
    pub software_version: u32,
    pub dmx_footprint: u16,
    /// The currently selected personality.
    pub dmx_personality: u8,
    /// How many personalities the device offers.
    pub dmx_personality_count: u8,
    pub dmx_start_address: DmxStartAddress,
    pub sub_device_count: u16,
    pub sensor_count: u8,
}

impl DeviceInfo {
    pub fn deserialize(buffer: &[u8]) -> Result<Self, DeserializationError> {
        if buffer.len() != RDM_DEVICE_INFO_SIZE {
            return Err(DeserializationError);
        }

        let device_info_view = rdm_device_info_layout::View::new(buffer);
        let [dmx_personality, dmx_personality_count] =
            device_info_view.dmx_personality().read().to_be_bytes();

        Ok(DeviceInfo {
            device_model_id: device_info_view.device_model_id().read(),
            product_category: device_info_view.product_category().read(),
            software_version: device_info_view.software_version_id().read(),
            dmx_footprint: device_info_view.dmx_footprint().read(),
            dmx_personality,
            dmx_personality_count,
            dmx_start_address: device_info_view.dmx_start_address().read().try_into()?,
            sub_device_count: device_info_view.sub_device_count().read(),
            sensor_count: device_info_view.sensor_count().read(),
        })
    }

    pub fn serialize(&self) -> DataPack {
        let mut resp_buffer = [0u8; RDM_DEVICE_INFO_SIZE];
        let mut device_info_view = rdm_device_info_layout::View::new(&mut resp_buffer);

        device_info_view.protocol_version_mut().write(0x01_00);
        device_info_view
            .device_model_id_mut()
            .write(self.device_model_id);
        device_info_view
            .product_category_mut()
            .write(self.product_category);
        device_info_view
            .software_version_id_mut()
            .write(self.software_version);
        device_info_view
            .dmx_footprint_mut()
            .write(self.dmx_footprint);
        device_info_view
            .dmx_personality_mut()
            .write(u16::from_be_bytes([
                self.dmx_personality,
                self.dmx_personality_count,
            ]));
        device_info_view
            .dmx_start_address_mut()
            .write(self.dmx_start_address.as_u16());
        device_info_view
            .sub_device_count_mut()
            .write(self.sub_device_count);
        device_info_view.sensor_count_mut().write(self.sensor_count);

        let mut data_pack = DataPack::new();
        let _ = data_pack.extend_from_slice(&resp_buffer);

        data_pack
    }
}
