//! Extended message definitions: the chunking header and extended control
//! messages.
//!
//! See [6.2.1.2] and [6.5.14].
use proc_bitfield::bitfield;

/// Maximum number of data bytes in a single chunk of a chunked extended
/// message.
///
/// This is also the largest payload a legacy (non-chunking) receiver accepts;
/// any extended message advertising at least this much data arrives in chunks.
pub const MAX_EXTENDED_MSG_CHUNK_LEN: usize = 26;

bitfield! {
    /// The extended message header, following the message header on every
    /// extended message.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ExtendedHeader(pub u16): Debug, FromStorage, IntoStorage {
        /// Set when the message is communicated in chunks.
        pub chunked: bool @ 15,
        /// Number of this chunk, starting at zero.
        pub chunk_number: u8 @ 11..=14,
        /// Set on a message that requests a chunk from the port partner.
        pub request_chunk: bool @ 10,
        /// Total number of data bytes across all chunks.
        pub data_size: u16 @ 0..=8,
    }
}

impl ExtendedHeader {
    /// Create an extended header for `data_size` bytes of payload.
    pub fn new(data_size: u16) -> Self {
        Self(0).with_data_size(data_size)
    }
}

/// Types of extended control messages, carried in the first data byte of an
/// `ExtendedControl` message.
///
/// See [6.5.14].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExtendedControlMessageType {
    /// Get capabilities offered by a source in EPR mode.
    EprGetSourceCap = 1,
    /// Get capabilities offered by a sink in EPR mode.
    EprGetSinkCap = 2,
    /// Periodic traffic that a sink in EPR mode must generate.
    EprKeepAlive = 3,
    /// The source's answer to an [`Self::EprKeepAlive`].
    EprKeepAliveAck = 4,
}
