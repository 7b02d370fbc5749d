use crate::consts::{
    PREAMBLE_BYTE, RDM_DISCOVERY_RESPONSE_SIZE, RDM_MAX_DISCOVERY_RESPONSE_SIZE,
    RDM_MAX_PACKAGE_SIZE, RDM_MAX_PARAMETER_DATA_LENGTH, RDM_MIN_PACKAGE_SIZE, SC_RDM,
    SC_SUB_MESSAGE, SEPARATOR_BYTE,
};
use crate::layouts::rdm_package_layout;
use crate::types::{DataPack, RequestCommandClass, ResponseCommandClass, ResponseType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};

/// Binary representation of an RDM package including the start code.
pub type BinaryRdmPackage = heapless::Vec<u8, RDM_MAX_PACKAGE_SIZE>;

/// Error that gets raised when attempting to answer an [RdmRequestData] that was sent to a
/// broadcast address.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsBroadcastError;

impl core::fmt::Display for IsBroadcastError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tried to convert broadcast request to response")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IsBroadcastError {}

/// An RDM Request package that does not have its parameter data deserialized.
#[derive(Debug, Clone)]
pub struct RdmRequestData {
    pub destination_uid: PackageAddress,
    pub source_uid: UniqueIdentifier,
    pub transaction_number: u8,
    pub port_id: u8,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: RequestCommandClass,
    pub parameter_id: u16,
    pub parameter_data: DataPack,
}

impl RdmRequestData {
    /// Builds the response a responder would send to this request.
    pub fn build_response(
        &self,
        response_type: ResponseType,
        response: DataPack,
        message_count: u8,
    ) -> Result<RdmResponseData, IsBroadcastError> {
        Ok(RdmResponseData {
            destination_uid: PackageAddress::Device(self.source_uid),
            source_uid: match self.destination_uid {
                PackageAddress::Device(uid) => uid,
                _ => return Err(IsBroadcastError),
            },
            transaction_number: self.transaction_number,
            response_type,
            message_count,
            sub_device: self.sub_device,
            command_class: self.command_class.response_class(),
            parameter_id: self.parameter_id,
            parameter_data: response,
        })
    }
}

/// An RDM Response package that does not have its parameter data deserialized.
#[derive(Debug, Clone)]
pub struct RdmResponseData {
    pub destination_uid: PackageAddress,
    pub source_uid: UniqueIdentifier,
    pub transaction_number: u8,
    pub response_type: ResponseType,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: ResponseCommandClass,
    pub parameter_id: u16,
    pub parameter_data: DataPack,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdmDeserializationError {
    /// Buffer must be at least 26 bytes
    BufferTooSmall,
    /// Buffer must be at most 257 bytes
    BufferTooBig,
    /// The command class was not found; contains contents of command class field
    CommandClassNotFound(u8),
    /// The response type was not found; contains contents of response type field
    ResponseTypeNotFound(u8),
    /// The message length field is incorrect; contains result of parsing
    WrongMessageLength(usize),
    /// Wrong checksum
    WrongChecksum,
    /// Received wrong start code (0xCC) or sub start code (0x01)
    WrongStartCode,
    /// The discovery response has no separator byte.
    MissingSeparator,
    /// The source uid is a broadcast address.
    SourceUidIsBroadcast,
}

impl core::fmt::Display for RdmDeserializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RdmDeserializationError::BufferTooSmall => write!(f, "buffer too small"),
            RdmDeserializationError::BufferTooBig => write!(f, "buffer too big"),
            RdmDeserializationError::CommandClassNotFound(command_class) => {
                write!(f, "command class {} not found", command_class)
            },
            RdmDeserializationError::ResponseTypeNotFound(response_type) => {
                write!(f, "response type {} is unknown", response_type)
            },
            RdmDeserializationError::WrongMessageLength(message_length) => {
                write!(f, "message length {} is incorrect", message_length)
            },
            RdmDeserializationError::WrongChecksum => write!(f, "checksum is incorrect"),
            RdmDeserializationError::WrongStartCode => write!(f, "start code is incorrect"),
            RdmDeserializationError::MissingSeparator => {
                write!(f, "discovery response has no separator")
            },
            RdmDeserializationError::SourceUidIsBroadcast => write!(f, "source uid is a broadcast"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RdmDeserializationError {}

#[derive(Debug, Clone)]
pub enum RdmData {
    Request(RdmRequestData),
    Response(RdmResponseData),
}

impl RdmData {
    pub fn deserialize(buf: &[u8]) -> Result<Self, RdmDeserializationError> {
        deserialize_rdm_data(buf)
    }

    pub fn serialize(&self) -> BinaryRdmPackage {
        serialize_rdm_data(self)
    }
}

#[inline]
pub(crate) fn calculate_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |checksum, byte| checksum.wrapping_add(*byte as u16))
}

/// Deserialize rdm data including the start code.
/// Buffer must be between 26 and 257 bytes.
pub fn deserialize_rdm_data(buffer: &[u8]) -> Result<RdmData, RdmDeserializationError> {
    let buffer_size = buffer.len();

    if buffer_size < RDM_MIN_PACKAGE_SIZE {
        return Err(RdmDeserializationError::BufferTooSmall);
    }

    if buffer_size > RDM_MAX_PACKAGE_SIZE {
        return Err(RdmDeserializationError::BufferTooBig);
    }

    let expected_checksum = calculate_checksum(&buffer[..buffer_size - 2]);
    let actual_checksum = u16::from_be_bytes([buffer[buffer_size - 2], buffer[buffer_size - 1]]);

    if expected_checksum != actual_checksum {
        return Err(RdmDeserializationError::WrongChecksum);
    }

    let package_view = rdm_package_layout::View::new(buffer);

    if package_view.start_code().read() != SC_RDM
        || package_view.sub_start_code().read() != SC_SUB_MESSAGE
    {
        return Err(RdmDeserializationError::WrongStartCode);
    }

    // the message length excludes the checksum
    let message_length = package_view.message_length().read() as usize;
    if message_length != buffer_size - 2 {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let parameter_data_and_checksum = package_view.parameter_data_and_checksum();
    let parameter_data =
        DataPack::from_slice(&parameter_data_and_checksum[..parameter_data_and_checksum.len() - 2])
            .map_err(|_| RdmDeserializationError::BufferTooBig)?;

    let destination_uid = PackageAddress::from_bytes(package_view.destination_uid());
    let source_uid = UniqueIdentifier::from_bytes(package_view.source_uid())
        .map_err(|_| RdmDeserializationError::SourceUidIsBroadcast)?;
    let transaction_number = package_view.transaction_number().read();
    let message_count = package_view.message_count().read();
    let sub_device = package_view.sub_device().read();
    let parameter_id = package_view.parameter_id().read();

    let command_class_field = package_view.command_class().read();
    if let Ok(command_class) = RequestCommandClass::try_from(command_class_field) {
        return Ok(RdmData::Request(RdmRequestData {
            destination_uid,
            source_uid,
            transaction_number,
            port_id: package_view.port_id_response_type().read(),
            message_count,
            sub_device,
            command_class,
            parameter_id,
            parameter_data,
        }));
    }

    let command_class = ResponseCommandClass::try_from(command_class_field)
        .map_err(|_| RdmDeserializationError::CommandClassNotFound(command_class_field))?;
    let response_type_field = package_view.port_id_response_type().read();
    let response_type = ResponseType::try_from(response_type_field)
        .map_err(|_| RdmDeserializationError::ResponseTypeNotFound(response_type_field))?;

    Ok(RdmData::Response(RdmResponseData {
        destination_uid,
        source_uid,
        transaction_number,
        response_type,
        message_count,
        sub_device,
        command_class,
        parameter_id,
        parameter_data,
    }))
}

/// Serializes RDM data including start code and checksum.
pub fn serialize_rdm_data(rdm_data: &RdmData) -> BinaryRdmPackage {
    let mut dst = [0u8; RDM_MAX_PACKAGE_SIZE];

    let (destination_uid, source_uid, transaction_number, port_or_type, message_count) =
        match rdm_data {
            RdmData::Request(request) => (
                request.destination_uid,
                request.source_uid,
                request.transaction_number,
                request.port_id,
                request.message_count,
            ),
            RdmData::Response(response) => (
                response.destination_uid,
                response.source_uid,
                response.transaction_number,
                response.response_type as u8,
                response.message_count,
            ),
        };
    let (sub_device, command_class, parameter_id, parameter_data) = match rdm_data {
        RdmData::Request(request) => (
            request.sub_device,
            request.command_class as u8,
            request.parameter_id,
            &request.parameter_data,
        ),
        RdmData::Response(response) => (
            response.sub_device,
            response.command_class as u8,
            response.parameter_id,
            &response.parameter_data,
        ),
    };

    let parameter_data_length = parameter_data.len();
    debug_assert!(parameter_data_length <= RDM_MAX_PARAMETER_DATA_LENGTH);

    // parameter data length + all other fields including checksum
    let total_package_length = parameter_data_length + RDM_MIN_PACKAGE_SIZE;
    let mut package_view = rdm_package_layout::View::new(&mut dst[..total_package_length]);

    package_view.start_code_mut().write(SC_RDM);
    package_view.sub_start_code_mut().write(SC_SUB_MESSAGE);
    package_view
        .message_length_mut()
        .write((total_package_length - 2) as u8);
    package_view
        .destination_uid_mut()
        .copy_from_slice(&destination_uid.to_bytes());
    package_view
        .source_uid_mut()
        .copy_from_slice(&source_uid.to_bytes());
    package_view
        .transaction_number_mut()
        .write(transaction_number);
    package_view.port_id_response_type_mut().write(port_or_type);
    package_view.message_count_mut().write(message_count);
    package_view.sub_device_mut().write(sub_device);
    package_view.command_class_mut().write(command_class);
    package_view.parameter_id_mut().write(parameter_id);
    package_view
        .parameter_data_length_mut()
        .write(parameter_data_length as u8);
    package_view.parameter_data_and_checksum_mut()[..parameter_data_length]
        .copy_from_slice(parameter_data);

    let checksum = calculate_checksum(&dst[..total_package_length - 2]);
    dst[total_package_length - 2..total_package_length].copy_from_slice(&checksum.to_be_bytes());

    // total_package_length never exceeds the capacity
    let mut package = BinaryRdmPackage::new();
    let _ = package.extend_from_slice(&dst[..total_package_length]);
    package
}

/// Builds the preamble, separator and encoded uid and checksum a responder sends back on a
/// DISC_UNIQUE_BRANCH request.
pub fn serialize_discovery_response(
    uid: UniqueIdentifier,
) -> [u8; RDM_MAX_DISCOVERY_RESPONSE_SIZE] {
    let mut frame_buffer = [PREAMBLE_BYTE; RDM_MAX_DISCOVERY_RESPONSE_SIZE];
    frame_buffer[7] = SEPARATOR_BYTE;

    encode_disc_unique(&uid.to_bytes(), &mut frame_buffer[8..20]);

    let checksum = calculate_checksum(&frame_buffer[8..20]);
    encode_disc_unique(&checksum.to_be_bytes(), &mut frame_buffer[20..24]);

    frame_buffer
}

/// Returns received device id if there is no collision.
pub fn deserialize_discovery_response(
    buffer: &[u8],
) -> Result<UniqueIdentifier, RdmDeserializationError> {
    let index_of_separator_byte = buffer
        .iter()
        .position(|&x| x == SEPARATOR_BYTE)
        .ok_or(RdmDeserializationError::MissingSeparator)?;

    // at most 7 preamble bytes are allowed in front of the separator
    if index_of_separator_byte > 7 {
        return Err(RdmDeserializationError::MissingSeparator);
    }

    let start_index = index_of_separator_byte + 1;
    let message_length = buffer.len() - start_index;
    if message_length < RDM_DISCOVERY_RESPONSE_SIZE {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let encoded = &buffer[start_index..start_index + RDM_DISCOVERY_RESPONSE_SIZE];
    let calculated_checksum = calculate_checksum(&encoded[..12]);

    let mut device_id_buf = [0u8; 6];
    decode_disc_unique(&encoded[..12], &mut device_id_buf);

    let mut checksum_buf = [0u8; 2];
    decode_disc_unique(&encoded[12..16], &mut checksum_buf);

    if calculated_checksum != u16::from_be_bytes(checksum_buf) {
        return Err(RdmDeserializationError::WrongChecksum);
    }

    UniqueIdentifier::from_bytes(&device_id_buf)
        .map_err(|_| RdmDeserializationError::SourceUidIsBroadcast)
}

/// Every byte is sent twice, once or-ed with 0xAA and once or-ed with 0x55.
fn encode_disc_unique(src: &[u8], dest: &mut [u8]) {
    for (byte, chunk) in src.iter().zip(dest.chunks_mut(2)) {
        chunk[0] = byte | 0xAA;
        chunk[1] = byte | 0x55;
    }
}

fn decode_disc_unique(src: &[u8], dest: &mut [u8]) {
    for (chunk, byte) in src.chunks(2).zip(dest.iter_mut()) {
        *byte = chunk[0] & chunk[1];
    }
}
