//! Driver for the FUSB302B USB-PD bridge PHY.
//!
//! The chip sits on a register bus and provides BMC signaling, CRC handling,
//! TX/RX FIFOs and an interrupt line. This driver covers register-level
//! bring-up, FIFO framing of PD messages, CC line selection and status
//! readout. Policy lives a layer up, in [`crate::sink`].

pub mod registers;

use sinkpd_traits::{Bus, BusError};

use crate::protocol_layer::message::{HEADER_SIZE, Message};

/// Bus addresses of the FUSB302B address variants, in 8-bit form.
pub const FUSB302B_ADDR: u8 = 0x22 << 1;
#[allow(missing_docs)]
pub const FUSB302B01_ADDR: u8 = 0x23 << 1;
#[allow(missing_docs)]
pub const FUSB302B10_ADDR: u8 = 0x24 << 1;
#[allow(missing_docs)]
pub const FUSB302B11_ADDR: u8 = 0x25 << 1;

/// Errors during PHY bring-up.
///
/// Outside of [`Fusb302b::setup`], register access is best-effort; the policy
/// engine recovers from transfer glitches through protocol timeouts.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A register transfer failed.
    #[error("bus transfer failed")]
    Bus,
    /// The device ID register did not read back a sane value in time.
    #[error("device ID poll timed out")]
    DeviceId,
}

impl From<BusError> for Error {
    fn from(_: BusError) -> Self {
        Self::Bus
    }
}

/// Who a received frame was addressed to, derived from its SOP token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageTarget {
    /// SOP: a message for the port partner, i.e. for us.
    PortPartner,
    /// SOP'/SOP'' or garbage: cable plug traffic that we only drain.
    CablePlug,
}

/// The seven consecutive status and interrupt registers, read as one block.
#[allow(missing_docs)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub status0a: u8,
    pub status1a: u8,
    pub interrupta: u8,
    pub interruptb: u8,
    pub status0: u8,
    pub status1: u8,
    pub interrupt: u8,
}

/// Type-C current advertisement measured on the active CC line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TypeCCurrent {
    /// No partner detected.
    None,
    /// Default USB current.
    Default,
    /// 1.5 A advertisement.
    Current1A5,
    /// 3.0 A advertisement.
    Current3A0,
}

impl From<u8> for TypeCCurrent {
    fn from(value: u8) -> Self {
        match value & registers::STATUS0_BC_LVL {
            0 => Self::None,
            1 => Self::Default,
            2 => Self::Current1A5,
            _ => Self::Current3A0,
        }
    }
}

/// Driver for one FUSB302B behind a register bus.
#[derive(Debug)]
pub struct Fusb302b<BUS: Bus> {
    bus: BUS,
    address: u8,
}

impl<BUS: Bus> Fusb302b<BUS> {
    /// Create a driver for the device at the given bus address.
    pub fn new(bus: BUS, address: u8) -> Self {
        Self { bus, address }
    }

    /// Read a single register; zero on a failed transfer.
    fn read_byte(&mut self, register: u8) -> u8 {
        let mut data = [0u8];
        if self.bus.read(self.address, register, &mut data).is_err() {
            return 0;
        }
        data[0]
    }

    /// Write a single register.
    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.bus.write(self.address, register, &[value])
    }

    /// Block for the given number of milliseconds on the bus' delay primitive.
    pub(crate) fn delay_ms(&mut self, milliseconds: u32) {
        self.bus.delay_ms(milliseconds);
    }

    /// Whether the device ID register reads back a sane value.
    pub fn read_device_id(&mut self) -> bool {
        let mut version = [0u8];
        if self.bus.read(self.address, registers::DEVICE_ID, &mut version).is_err() {
            return false;
        }
        version[0] != 0 && version[0] != 0xFF
    }

    /// Full chip bring-up: software reset, device ID poll, power-up, unmasked
    /// interrupts, automatic retransmission, CC line selection and a PD logic
    /// reset.
    pub fn setup(&mut self) -> Result<(), Error> {
        self.write_byte(registers::RESET, registers::RESET_SW_RES)?;
        self.bus.delay_ms(10);

        let mut tries = 0;
        while !self.read_device_id() {
            self.bus.delay_ms(10);
            tries += 1;
            if tries > 5 {
                return Err(Error::DeviceId);
            }
        }

        // Power up all blocks.
        self.write_byte(registers::POWER, registers::POWER_ALL)?;

        // Unmask all interrupts.
        self.write_byte(registers::MASK1, 0x00)?;
        self.write_byte(registers::MASKA, 0x00)?;
        self.write_byte(registers::MASKB, 0x00)?;

        self.write_byte(registers::CONTROL0, registers::CONTROL0_HOST_CUR_3A0)?;

        // Enable automatic retransmission, three retries.
        self.write_byte(
            registers::CONTROL3,
            registers::CONTROL3_N_RETRIES_3 | registers::CONTROL3_AUTO_RETRY,
        )?;

        self.write_byte(registers::CONTROL2, 0x00)?;

        // Flush the receive buffer.
        self.write_byte(registers::CONTROL1, registers::CONTROL1_RX_FLUSH)?;

        self.select_cc_line()?;
        self.reset()?;

        Ok(())
    }

    /// Flush both FIFOs and reset the PD logic, leaving the chip configured.
    pub fn reset(&mut self) -> Result<(), BusError> {
        self.write_byte(
            registers::CONTROL0,
            registers::CONTROL0_TX_FLUSH | registers::CONTROL0_HOST_CUR_USB,
        )?;
        self.write_byte(registers::CONTROL1, registers::CONTROL1_RX_FLUSH)?;
        self.write_byte(registers::RESET, registers::RESET_PD_RESET)?;
        Ok(())
    }

    /// Measure BC_LVL on both CC pins and route BMC signaling to the stronger
    /// one, with automatic GoodCRC generation enabled. Ties select CC2.
    pub fn select_cc_line(&mut self) -> Result<(), BusError> {
        let measure_cc1 =
            registers::SWITCHES0_PDWN1 | registers::SWITCHES0_PDWN2 | registers::SWITCHES0_MEAS_CC1;
        let measure_cc2 =
            registers::SWITCHES0_PDWN1 | registers::SWITCHES0_PDWN2 | registers::SWITCHES0_MEAS_CC2;

        self.write_byte(registers::SWITCHES0, measure_cc1)?;
        self.bus.delay_ms(10);
        let cc1 = self.read_byte(registers::STATUS0) & registers::STATUS0_BC_LVL;

        self.write_byte(registers::SWITCHES0, measure_cc2)?;
        self.bus.delay_ms(10);
        let cc2 = self.read_byte(registers::STATUS0) & registers::STATUS0_BC_LVL;

        if cc1 > cc2 {
            self.write_byte(
                registers::SWITCHES1,
                registers::SWITCHES1_TXCC1 | registers::SWITCHES1_AUTO_CRC | registers::SWITCHES1_SPECREV_2_0,
            )?;
            self.write_byte(registers::SWITCHES0, measure_cc1)?;
        } else {
            self.write_byte(
                registers::SWITCHES1,
                registers::SWITCHES1_TXCC2 | registers::SWITCHES1_AUTO_CRC | registers::SWITCHES1_SPECREV_2_0,
            )?;
            self.write_byte(registers::SWITCHES0, measure_cc2)?;
        }

        Ok(())
    }

    /// Frame a message into the TX FIFO and start transmission.
    ///
    /// Three bursts: the SOP preamble with the packed symbol length, the
    /// payload, and the CRC/EOP/TX trailer. Transfer failures are not
    /// reported; an unsent message surfaces as a protocol timeout.
    pub fn send_message(&mut self, message: &Message) {
        let length = message.wire_len() as u8;
        let sop_seq = [
            registers::FIFO_TX_SOP1,
            registers::FIFO_TX_SOP1,
            registers::FIFO_TX_SOP1,
            registers::FIFO_TX_SOP2,
            registers::FIFO_TX_PACKSYM | length,
        ];
        let eop_seq = [
            registers::FIFO_TX_JAM_CRC,
            registers::FIFO_TX_EOP,
            registers::FIFO_TX_TXOFF,
            registers::FIFO_TX_TXON,
        ];

        if self.bus.write(self.address, registers::FIFOS, &sop_seq).is_err()
            || self
                .bus
                .write(self.address, registers::FIFOS, message.wire_bytes())
                .is_err()
            || self.bus.write(self.address, registers::FIFOS, &eop_seq).is_err()
        {
            warn!("TX FIFO write failed");
        }
    }

    /// Whether the RX FIFO holds at least one frame.
    pub fn rx_pending(&mut self) -> bool {
        self.read_byte(registers::STATUS1) & registers::STATUS1_RX_EMPTY != registers::STATUS1_RX_EMPTY
    }

    /// Read one frame out of the RX FIFO.
    ///
    /// Frames whose SOP token is not addressed to the port partner are still
    /// drained completely (header, payload and CRC); on some chip revisions
    /// the FIFO wedges otherwise.
    pub fn read_message(&mut self, message: &mut Message) -> MessageTarget {
        let mut token = [0u8];
        let _ = self.bus.read(self.address, registers::FIFOS, &mut token);
        let target = if token[0] & registers::FIFO_RX_TOKEN_BITS == registers::FIFO_RX_SOP {
            MessageTarget::PortPartner
        } else {
            MessageTarget::CablePlug
        };

        let _ = self
            .bus
            .read(self.address, registers::FIFOS, &mut message.as_bytes_mut()[..HEADER_SIZE]);
        let objects = message.header().num_objects();
        if objects > 0 {
            let _ = self.bus.read(
                self.address,
                registers::FIFOS,
                &mut message.as_bytes_mut()[HEADER_SIZE..HEADER_SIZE + 4 * objects],
            );
        }

        // The PHY already checked the CRC; throw it away.
        let mut crc = [0u8; 4];
        let _ = self.bus.read(self.address, registers::FIFOS, &mut crc);

        target
    }

    /// Signal a hard reset on the wire.
    pub fn send_hard_reset(&mut self) {
        let _ = self.write_byte(
            registers::CONTROL3,
            registers::CONTROL3_N_RETRIES_3
                | registers::CONTROL3_AUTO_RETRY
                | registers::CONTROL3_SEND_HARD_RESET,
        );
    }

    /// Read the status and interrupt block.
    pub fn get_status(&mut self, status: &mut Status) -> bool {
        let mut block = [0u8; 7];
        if self.bus.read(self.address, registers::STATUS0A, &mut block).is_err() {
            return false;
        }

        *status = Status {
            status0a: block[0],
            status1a: block[1],
            interrupta: block[2],
            interruptb: block[3],
            status0: block[4],
            status1: block[5],
            interrupt: block[6],
        };
        true
    }

    /// The current advertisement on the active CC line.
    pub fn get_typec_current(&mut self) -> TypeCCurrent {
        self.read_byte(registers::STATUS0).into()
    }

    /// Measure whether VBUS is present.
    ///
    /// Temporarily retargets the measurement block at VBUS; the measurement
    /// and switch registers are restored afterwards.
    pub fn is_vbus_connected(&mut self) -> bool {
        let measure_backup = self.read_byte(registers::MEASURE);
        let switches_backup = self.read_byte(registers::SWITCHES0);

        let _ = self.write_byte(
            registers::SWITCHES0,
            switches_backup & !(registers::SWITCHES0_MEAS_CC1 | registers::SWITCHES0_MEAS_CC2),
        );
        self.bus.delay_ms(10);
        let _ = self.write_byte(registers::MEASURE, registers::MEASURE_MEAS_VBUS);
        self.bus.delay_ms(100);

        let status = self.read_byte(registers::STATUS0);

        let _ = self.write_byte(registers::MEASURE, measure_backup);
        let _ = self.write_byte(registers::SWITCHES0, switches_backup);

        status & registers::STATUS0_VBUSOK != 0
    }
}
