//! Register-level test doubles: a virtual FUSB302B behind the bus trait, a
//! manually advanced clock, and reference device policies.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use sinkpd_traits::{Bus, BusError, Clock};

use crate::phy::registers;
use crate::protocol_layer::message::header::{DataMessageType, Header, SpecificationRevision};
use crate::protocol_layer::message::pdo::{
    Augmented, FixedSupply, PowerDataObject, SinkFixedSupply, SourceCapabilities, SprProgrammablePowerSupply,
};
use crate::protocol_layer::message::request::{FixedVariableSupply, Pps};
use crate::protocol_layer::message::{ExtendedMessage, Message};
use crate::sink::device_policy_manager::{DevicePolicyManager, request_5v_fallback};
use crate::{DataRole, PowerRole};

/// Bus address used by all tests (an FUSB302B01).
pub const TEST_ADDRESS: u8 = 0x23 << 1;

struct BusState {
    registers: [u8; 0x44],
    status0_queue: VecDeque<u8>,
    rx_fifo: VecDeque<u8>,
    tx_fifo: Vec<u8>,
    register_writes: Vec<(u8, u8)>,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            registers: [0; 0x44],
            status0_queue: VecDeque::new(),
            rx_fifo: VecDeque::new(),
            tx_fifo: Vec::new(),
            register_writes: Vec::new(),
        }
    }
}

/// A virtual FUSB302B behind the register bus.
///
/// Clones share the underlying state, so a test keeps a handle while the
/// engine owns the bus. Interrupt registers clear on read, `STATUS1` tracks
/// the RX FIFO fill state, and everything written to the TX FIFO accumulates
/// for inspection.
#[derive(Clone, Default)]
pub struct DummyBus {
    state: Rc<RefCell<BusState>>,
}

impl DummyBus {
    pub fn new() -> Self {
        let bus = Self::default();
        // A sane device ID, so bring-up succeeds by default.
        bus.state.borrow_mut().registers[usize::from(registers::DEVICE_ID)] = 0x90;
        bus
    }

    pub fn set_register(&self, register: u8, value: u8) {
        self.state.borrow_mut().registers[usize::from(register)] = value;
    }

    pub fn register(&self, register: u8) -> u8 {
        self.state.borrow().registers[usize::from(register)]
    }

    /// All single register writes so far, in order, as `(register, value)`.
    pub fn register_writes(&self) -> Vec<(u8, u8)> {
        self.state.borrow().register_writes.clone()
    }

    /// Queue values that successive `STATUS0` reads return, ahead of the
    /// register itself.
    pub fn queue_status0(&self, values: &[u8]) {
        self.state.borrow_mut().status0_queue.extend(values.iter().copied());
    }

    /// Frame a wire message into the RX FIFO with the given start-of-packet
    /// token and raise the GoodCRC-sent interrupt, as the PHY would.
    pub fn inject_frame_with_token(&self, token: u8, payload: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.rx_fifo.push_back(token);
        state.rx_fifo.extend(payload.iter().copied());
        // The CRC was already verified by the PHY; its value does not matter.
        state.rx_fifo.extend([0u8; 4]);
        state.registers[usize::from(registers::INTERRUPTB)] |= registers::INTERRUPTB_I_GCRCSENT;
    }

    /// Inject a message addressed to the port partner.
    pub fn inject_message(&self, message: &Message) {
        self.inject_frame_with_token(registers::FIFO_RX_SOP, message.wire_bytes());
    }

    pub fn raise_interrupt_a(&self, bits: u8) {
        let mut state = self.state.borrow_mut();
        state.registers[usize::from(registers::INTERRUPTA)] |= bits;
    }

    pub fn set_status1(&self, bits: u8) {
        let mut state = self.state.borrow_mut();
        state.registers[usize::from(registers::STATUS1)] |= bits;
    }

    /// Return and clear everything written to the TX FIFO.
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().tx_fifo)
    }

    pub fn rx_fifo_is_empty(&self) -> bool {
        self.state.borrow().rx_fifo.is_empty()
    }
}

impl Bus for DummyBus {
    fn read(&mut self, _address: u8, register: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();

        if register == registers::FIFOS {
            for byte in buffer.iter_mut() {
                *byte = state.rx_fifo.pop_front().unwrap_or(0);
            }
            return Ok(());
        }

        for (offset, byte) in buffer.iter_mut().enumerate() {
            let register = register + offset as u8;
            let index = usize::from(register);
            *byte = match register {
                registers::STATUS0 => state.status0_queue.pop_front().unwrap_or(state.registers[index]),
                registers::STATUS1 => {
                    let mut value = state.registers[index] & !registers::STATUS1_RX_EMPTY;
                    if state.rx_fifo.is_empty() {
                        value |= registers::STATUS1_RX_EMPTY;
                    }
                    value
                }
                _ => state.registers[index],
            };

            // Interrupt registers clear on read, as on the real chip.
            if matches!(register, registers::INTERRUPTA | registers::INTERRUPTB | registers::INTERRUPT) {
                state.registers[index] = 0;
            }
        }

        Ok(())
    }

    fn write(&mut self, _address: u8, register: u8, buffer: &[u8]) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();

        if register == registers::FIFOS {
            state.tx_fifo.extend_from_slice(buffer);
            return Ok(());
        }

        for (offset, byte) in buffer.iter().enumerate() {
            let register = register + offset as u8;
            state.registers[usize::from(register)] = *byte;
            state.register_writes.push((register, *byte));
        }

        Ok(())
    }

    fn delay_ms(&mut self, _milliseconds: u32) {}
}

/// A clock that only moves when the test advances it.
#[derive(Clone, Default)]
pub struct DummyClock {
    now: Rc<Cell<u32>>,
}

impl DummyClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, milliseconds: u32) {
        self.now.set(self.now.get().wrapping_add(milliseconds));
    }
}

impl Clock for DummyClock {
    fn now_ms(&mut self) -> u32 {
        self.now.get()
    }
}

/// A template for messages that the simulated source originates.
pub fn source_header_template() -> Header {
    Header::new_template(DataRole::Dfp, PowerRole::Source, SpecificationRevision::R3_X)
}

/// Source capabilities used throughout the tests:
/// 5 V/3 A (unconstrained), 9 V/3 A, 15 V/3 A, 20 V/2.25 A,
/// PPS 3.3-11 V/5 A, PPS 3.3-16 V/3 A, PPS 3.3-21 V/2.25 A.
pub fn mock_capabilities(epr_capable: bool) -> Message {
    let mut message = Message::new_data(source_header_template(), DataMessageType::SourceCapabilities, 7);

    message.set_object(
        0,
        FixedSupply(0)
            .with_raw_voltage(100)
            .with_raw_max_current(300)
            .with_unconstrained_power(true)
            .with_epr_mode_capable(epr_capable)
            .0,
    );
    message.set_object(1, FixedSupply(0).with_raw_voltage(180).with_raw_max_current(300).0);
    message.set_object(2, FixedSupply(0).with_raw_voltage(300).with_raw_max_current(300).0);
    message.set_object(3, FixedSupply(0).with_raw_voltage(400).with_raw_max_current(225).0);
    message.set_object(
        4,
        SprProgrammablePowerSupply::new()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(110)
            .with_raw_max_current(100)
            .0,
    );
    message.set_object(
        5,
        SprProgrammablePowerSupply::new()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(160)
            .with_raw_max_current(60)
            .0,
    );
    message.set_object(
        6,
        SprProgrammablePowerSupply::new()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(210)
            .with_raw_max_current(45)
            .0,
    );

    message
}

/// A device policy that requests the highest advertised voltage, programmable
/// supplies included.
///
/// This mirrors the policy of the original soldering iron firmware: fixed and
/// PPS PDOs compete on their maximum voltage, and PPS requests pin the output
/// to the APDO's upper limit.
pub struct HighestVoltageDevice;

impl DevicePolicyManager for HighestVoltageDevice {
    fn evaluate_capability(&mut self, capabilities: &Message, request: &mut Message) -> bool {
        use uom::si::electric_current::milliampere;
        use uom::si::electric_potential::millivolt;

        let parsed = SourceCapabilities::parse(capabilities);

        let mut best: Option<usize> = None;
        let mut best_voltage_mv = 0;
        let mut best_current_ca = 0;
        let mut best_is_pps = false;

        for (index, pdo) in parsed.pdos().iter().enumerate() {
            match pdo {
                PowerDataObject::FixedSupply(supply) => {
                    let voltage_mv = supply.voltage().get::<millivolt>();
                    if best.is_none() || voltage_mv > best_voltage_mv {
                        best = Some(index);
                        best_voltage_mv = voltage_mv;
                        best_current_ca = supply.max_current().get::<milliampere>() / 10;
                        best_is_pps = false;
                    }
                }
                PowerDataObject::Augmented(Augmented::Spr(supply)) => {
                    let voltage_mv = supply.max_voltage().get::<millivolt>();
                    if best.is_none() || voltage_mv > best_voltage_mv {
                        best = Some(index);
                        best_voltage_mv = voltage_mv;
                        best_current_ca = supply.max_current().get::<milliampere>() / 10;
                        best_is_pps = true;
                    }
                }
                _ => {}
            }
        }

        let Some(index) = best else {
            // Nothing matched; still shake hands on 5 V.
            request_5v_fallback(request);
            return true;
        };

        *request = Message::new();
        request.set_header(
            Header(0)
                .with_message_type_raw(DataMessageType::Request as u8)
                .with_num_objects(1),
        );

        let object = if best_is_pps {
            Pps(0)
                .with_object_position(index as u8 + 1)
                .with_raw_output_voltage((best_voltage_mv / 20) as u16)
                .with_raw_operating_current((best_current_ca / 5) as u16)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true)
                .0
        } else {
            FixedVariableSupply(0)
                .with_object_position(index as u8 + 1)
                .with_raw_operating_current(best_current_ca as u16)
                .with_raw_max_operating_current(best_current_ca as u16)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true)
                .0
        };
        request.set_object(0, object);

        true
    }

    fn evaluate_epr_capability(&mut self, capabilities: &ExtendedMessage, request: &mut Message) -> bool {
        *request = Message::new();
        request.set_header(
            Header(0)
                .with_message_type_raw(DataMessageType::EprRequest as u8)
                .with_num_objects(2),
        );
        request.set_object(
            0,
            FixedVariableSupply(0)
                .with_object_position(1)
                .with_raw_operating_current(10)
                .with_raw_max_operating_current(10)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true)
                .with_epr_mode_capable(true)
                .0,
        );
        // The selected PDO travels along in the second object.
        request.set_object(1, capabilities.object(0));

        true
    }

    fn sink_capabilities(&mut self, capabilities: &mut Message, is_pd3: bool) {
        *capabilities = Message::new();

        // vSafe5V first, at the bare minimum current.
        let mut vsafe_5v = SinkFixedSupply(0).with_raw_voltage(100).with_raw_operating_current(10);

        // The power level this device actually wants: 20 V at 2 A.
        let voltage_mv: u32 = 20_000;
        let current_ca: u16 = 200;

        capabilities.set_object(
            1,
            SinkFixedSupply(0)
                .with_raw_voltage((voltage_mv / 50) as u16)
                .with_raw_operating_current(current_ca)
                .0,
        );
        vsafe_5v = vsafe_5v.with_higher_capability(true);
        let mut num_objects = 2;

        // Under PD 3.0, also advertise a PPS APDO for the desired level.
        if is_pd3 {
            capabilities.set_object(
                2,
                SprProgrammablePowerSupply::new()
                    .with_raw_min_voltage((voltage_mv / 100) as u8)
                    .with_raw_max_voltage((voltage_mv / 100) as u8)
                    .with_raw_max_current((current_ca / 5) as u8)
                    .0,
            );
            num_objects = 3;
        }

        vsafe_5v = vsafe_5v.with_usb_communications_capable(true).with_unconstrained_power(true);
        capabilities.set_object(0, vsafe_5v.0);

        capabilities.set_header(
            Header(0)
                .with_message_type_raw(DataMessageType::SinkCapabilities as u8)
                .with_num_objects(num_objects),
        );
    }
}

/// A device policy that always settles for 5 V.
pub struct MinimalDevice;

impl DevicePolicyManager for MinimalDevice {
    fn evaluate_capability(&mut self, _capabilities: &Message, request: &mut Message) -> bool {
        request_5v_fallback(request);
        true
    }
}
