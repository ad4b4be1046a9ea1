//! PD message buffers and their field-level views.
//!
//! Messages are kept as flat little-endian byte buffers, exactly as they move
//! through the PHY FIFOs. Structured access goes through the bit-packed types
//! in the submodules; nothing relies on in-memory struct layout.

pub mod epr_mode;
pub mod extended;
pub mod header;

// FIXME: add documentation
#[allow(missing_docs)]
pub mod pdo;

// FIXME: add documentation
#[allow(missing_docs)]
pub mod request;

use byteorder::{ByteOrder, LittleEndian};
use extended::ExtendedHeader;
use header::{ControlMessageType, DataMessageType, ExtendedMessageType, Header};

pub(crate) mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamps", "_50milliamps";
    }
}

pub(crate) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

pub(crate) mod _20millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_20millivolts: 0.02; "_20mV", "_20millivolts", "_20millivolts";
    }
}

pub(crate) mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 2;

/// Size of the extended message header in bytes.
pub const EXTENDED_HEADER_SIZE: usize = 2;

/// Number of 32-bit data objects a non-extended message can carry.
pub const MAX_OBJECTS: usize = 7;

/// Maximum wire size of a non-extended message in bytes.
pub const MAX_MESSAGE_SIZE: usize = HEADER_SIZE + 4 * MAX_OBJECTS;

/// Number of 32-bit data objects an assembled EPR message can carry.
pub const MAX_EXTENDED_OBJECTS: usize = 11;

/// Number of data bytes in an assembled EPR message.
pub const MAX_EXTENDED_DATA: usize = 4 * MAX_EXTENDED_OBJECTS;

/// Buffer size of an assembled EPR message in bytes.
pub const MAX_EXTENDED_MESSAGE_SIZE: usize = HEADER_SIZE + EXTENDED_HEADER_SIZE + MAX_EXTENDED_DATA;

/// A USB PD message in wire form.
///
/// A 16-bit header followed by up to seven 32-bit data objects. The number of
/// valid payload bytes is `2 + 4 * num_objects`, as advertised in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    bytes: [u8; MAX_MESSAGE_SIZE],
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// An empty message: all-zero header, no objects.
    pub const fn new() -> Self {
        Self {
            bytes: [0; MAX_MESSAGE_SIZE],
        }
    }

    /// A control message following a header template.
    pub fn new_control(template: Header, message_type: ControlMessageType) -> Self {
        let mut message = Self::new();
        message.set_header(Header::new_control(template, message_type));
        message
    }

    /// A data message following a header template. Objects start out zeroed.
    pub fn new_data(template: Header, message_type: DataMessageType, num_objects: u8) -> Self {
        let mut message = Self::new();
        message.set_header(Header::new_data(template, message_type, num_objects));
        message
    }

    /// An extended message following a header template. Payload starts out zeroed.
    pub fn new_extended(template: Header, message_type: ExtendedMessageType, num_objects: u8) -> Self {
        let mut message = Self::new();
        message.set_header(Header::new_extended(template, message_type, num_objects));
        message
    }

    /// Copy a message out of its wire representation.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut message = Self::new();
        let length = data.len().min(MAX_MESSAGE_SIZE);
        message.bytes[..length].copy_from_slice(&data[..length]);
        message
    }

    /// The message header.
    pub fn header(&self) -> Header {
        Header(LittleEndian::read_u16(&self.bytes[..HEADER_SIZE]))
    }

    /// Replace the message header.
    pub fn set_header(&mut self, header: Header) {
        LittleEndian::write_u16(&mut self.bytes[..HEADER_SIZE], header.0);
    }

    /// The data object at `index`.
    pub fn object(&self, index: usize) -> u32 {
        let offset = HEADER_SIZE + 4 * index;
        LittleEndian::read_u32(&self.bytes[offset..offset + 4])
    }

    /// Replace the data object at `index`.
    pub fn set_object(&mut self, index: usize, object: u32) {
        let offset = HEADER_SIZE + 4 * index;
        LittleEndian::write_u32(&mut self.bytes[offset..offset + 4], object);
    }

    /// The extended header, when viewing the message as one chunk of an
    /// extended message.
    pub fn extended_header(&self) -> ExtendedHeader {
        ExtendedHeader(LittleEndian::read_u16(
            &self.bytes[HEADER_SIZE..HEADER_SIZE + EXTENDED_HEADER_SIZE],
        ))
    }

    /// Replace the extended header.
    pub fn set_extended_header(&mut self, extended_header: ExtendedHeader) {
        LittleEndian::write_u16(
            &mut self.bytes[HEADER_SIZE..HEADER_SIZE + EXTENDED_HEADER_SIZE],
            extended_header.0,
        );
    }

    /// The chunk data that follows the extended header.
    pub fn chunk_data(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE + EXTENDED_HEADER_SIZE..]
    }

    /// Mutable access to the chunk data that follows the extended header.
    pub fn chunk_data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[HEADER_SIZE + EXTENDED_HEADER_SIZE..]
    }

    /// Number of valid wire bytes: the header plus the advertised objects.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + 4 * self.header().num_objects()
    }

    /// The valid wire bytes of this message.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.bytes[..self.wire_len()]
    }

    /// The full backing buffer.
    pub fn as_bytes(&self) -> &[u8; MAX_MESSAGE_SIZE] {
        &self.bytes
    }

    /// Mutable access to the full backing buffer, for FIFO reads.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; MAX_MESSAGE_SIZE] {
        &mut self.bytes
    }
}

/// An extended USB PD message in assembled form.
///
/// Large enough for an EPR Source_Capabilities message: header, extended
/// header and eleven 32-bit data objects. Serves as the reassembly target for
/// chunked reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtendedMessage {
    bytes: [u8; MAX_EXTENDED_MESSAGE_SIZE],
}

impl Default for ExtendedMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtendedMessage {
    /// An empty extended message.
    pub const fn new() -> Self {
        Self {
            bytes: [0; MAX_EXTENDED_MESSAGE_SIZE],
        }
    }

    /// The message header.
    pub fn header(&self) -> Header {
        Header(LittleEndian::read_u16(&self.bytes[..HEADER_SIZE]))
    }

    /// The extended header.
    pub fn extended_header(&self) -> ExtendedHeader {
        ExtendedHeader(LittleEndian::read_u16(
            &self.bytes[HEADER_SIZE..HEADER_SIZE + EXTENDED_HEADER_SIZE],
        ))
    }

    /// The total data size advertised by the extended header, in bytes.
    pub fn data_size(&self) -> usize {
        usize::from(self.extended_header().data_size())
    }

    /// The data object at `index`.
    pub fn object(&self, index: usize) -> u32 {
        let offset = HEADER_SIZE + EXTENDED_HEADER_SIZE + 4 * index;
        LittleEndian::read_u32(&self.bytes[offset..offset + 4])
    }

    /// The data bytes following the extended header.
    pub fn data(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE + EXTENDED_HEADER_SIZE..]
    }

    /// Restart reassembly from the first chunk.
    ///
    /// Chunk zero carries the header, the extended header and the leading data
    /// bytes, so its wire image maps directly onto this buffer.
    pub fn begin_reassembly(&mut self, chunk: &Message) {
        self.bytes = [0; MAX_EXTENDED_MESSAGE_SIZE];
        self.bytes[..MAX_MESSAGE_SIZE].copy_from_slice(chunk.as_bytes());
    }

    /// Merge a follow-up chunk's data bytes into place.
    ///
    /// Copies are bounded to the data area; a chunk number past the buffer is
    /// dropped rather than written out of bounds.
    pub fn merge_chunk(&mut self, chunk_number: u8, chunk: &Message) {
        let offset = extended::MAX_EXTENDED_MSG_CHUNK_LEN * usize::from(chunk_number);
        if offset >= MAX_EXTENDED_DATA {
            warn!("Dropping chunk {} beyond the reassembly buffer", chunk_number);
            return;
        }

        let length = (EXTENDED_HEADER_SIZE + 4 * chunk.header().num_objects().saturating_sub(1))
            .min(MAX_EXTENDED_DATA - offset);
        let data_start = HEADER_SIZE + EXTENDED_HEADER_SIZE + offset;
        self.bytes[data_start..data_start + length].copy_from_slice(&chunk.chunk_data()[..length]);
    }
}
