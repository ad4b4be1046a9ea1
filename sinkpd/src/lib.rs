//! USB-PD sink policy engine for bridge PHYs of the FUSB302B family.
//!
//! The crate is split along the layers of the USB PD specification:
//!
//! - [`phy`] drives the bridge chip over a register bus: FIFO framing, CC line
//!   selection, status and interrupt readout.
//! - [`protocol_layer`] holds the wire formats: message buffers, the bit-packed
//!   header and the power data objects.
//! - [`sink`] implements the sink policy engine, a cooperative state machine
//!   that the host steps explicitly. It supports SPR and EPR contracts,
//!   programmable supplies (PPS) with their keep-alive cadence, and soft/hard
//!   reset recovery.
//!
//! Nothing in here blocks on protocol progress and nothing allocates; the host
//! application wires up the [`sinkpd_traits::Bus`] and [`sinkpd_traits::Clock`]
//! implementations and owns the schedule.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// This module must come first, it provides the logging shim macros.
#[macro_use]
mod fmt;

pub mod counters;
pub mod phy;
pub mod protocol_layer;
pub mod ring_buffer;
pub mod sink;
pub mod timers;

#[cfg(test)]
pub(crate) mod dummy;

#[macro_use]
extern crate uom;

/// Quantities used throughout the protocol layer, expressed as `u32` values
/// of millivolts, milliamperes and microwatts.
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

/// The power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerRole {
    /// Provides power.
    Source,
    /// Consumes power.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// The data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRole {
    /// Upward-facing port.
    Ufp,
    /// Downward-facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
