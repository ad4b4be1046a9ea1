//! The EPR mode data object, used to enter, acknowledge and exit EPR mode.
//!
//! See [6.4.10].
use proc_bitfield::bitfield;

bitfield! {
    /// The data object of an EPR_Mode message.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct EprModeDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The action field, see [`Action`].
        pub action: u8 @ 24..=31,
        /// Action-specific data; the sink's operational PDP in watts on entry.
        pub data: u8 @ 16..=23,
    }
}

impl EprModeDataObject {
    /// Build the enter request that a sink sends, carrying its operational
    /// PDP in watts.
    pub fn new_enter(operational_pdp_watts: u8) -> Self {
        Self(0)
            .with_action(Action::Enter as u8)
            .with_data(operational_pdp_watts)
    }

    /// Decode the action field; `None` for reserved values.
    pub fn action_kind(&self) -> Option<Action> {
        match self.action() {
            0x01 => Some(Action::Enter),
            0x02 => Some(Action::EnterAcknowledged),
            0x03 => Some(Action::EnterSucceeded),
            0x04 => Some(Action::EnterFailed),
            0x05 => Some(Action::Exit),
            _ => None,
        }
    }
}

/// EPR mode actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// The sink requests entry.
    Enter = 0x01,
    /// The source acknowledges the entry attempt.
    EnterAcknowledged = 0x02,
    /// Entry succeeded; EPR capabilities follow.
    EnterSucceeded = 0x03,
    /// Entry failed; the SPR contract stands.
    EnterFailed = 0x04,
    /// EPR mode is exited.
    Exit = 0x05,
}
