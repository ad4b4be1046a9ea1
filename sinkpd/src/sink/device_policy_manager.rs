//! The device policy manager (DPM): the application-owned decision layer that
//! picks what power to request and what to advertise.

use crate::protocol_layer::message::header::{DataMessageType, Header};
use crate::protocol_layer::message::pdo::SinkFixedSupply;
use crate::protocol_layer::message::request::FixedVariableSupply;
use crate::protocol_layer::message::{ExtendedMessage, Message};

/// Trait for the device policy manager.
///
/// The policy engine calls into this trait during negotiation. All methods run
/// on the engine's cooperative thread and must not block.
pub trait DevicePolicyManager {
    /// Evaluate received source capabilities and write a fully-formed Request
    /// into `request`: the header's message type and object count, plus one
    /// request data object with a 1-based object position.
    ///
    /// Returns `true` if the request shall be transmitted. Returning `false`
    /// leaves the engine waiting for different capabilities.
    fn evaluate_capability(&mut self, capabilities: &Message, request: &mut Message) -> bool;

    /// Evaluate reassembled EPR source capabilities and write a two-object EPR
    /// Request (request data object, then a copy of the selected PDO) into
    /// `request`.
    ///
    /// The default declines, keeping the engine on its SPR contract.
    fn evaluate_epr_capability(&mut self, capabilities: &ExtendedMessage, request: &mut Message) -> bool {
        let _ = (capabilities, request);
        false
    }

    /// Build the Sink_Capabilities message that answers a Get_Sink_Cap.
    ///
    /// The first object must be a Fixed 5 V PDO with the USB communications
    /// flag set. The default advertises a bare 5 V, 100 mA sink.
    fn sink_capabilities(&mut self, capabilities: &mut Message, is_pd3: bool) {
        let _ = is_pd3;

        *capabilities = Message::new();
        capabilities.set_header(
            Header(0)
                .with_message_type_raw(DataMessageType::SinkCapabilities as u8)
                .with_num_objects(1),
        );
        capabilities.set_object(
            0,
            SinkFixedSupply(0)
                .with_raw_voltage(100)
                .with_raw_operating_current(10)
                .with_usb_communications_capable(true)
                .0,
        );
    }
}

/// A minimal request for 5 V at 100 mA from the first object position.
///
/// Useful as a fallback when nothing better matches.
pub fn request_5v_fallback(request: &mut Message) {
    *request = Message::new();
    request.set_header(
        Header(0)
            .with_message_type_raw(DataMessageType::Request as u8)
            .with_num_objects(1),
    );
    request.set_object(
        0,
        FixedVariableSupply(0)
            .with_object_position(1)
            .with_raw_operating_current(10)
            .with_raw_max_operating_current(10)
            .with_no_usb_suspend(true)
            .with_usb_communications_capable(true)
            .0,
    );
}
