//! The sink policy engine: a cooperative, single-step state machine that
//! drives USB PD negotiation through the bridge PHY.
//!
//! The host owns the schedule. It calls [`Sink::irq_occurred`] after the
//! bridge's interrupt line asserts, [`Sink::tick`] on a periodic timer, and
//! [`Sink::run_step`] in a loop until it reports that no immediate work is
//! left. Nothing here blocks on protocol progress: every protocol wait parks
//! the engine with a notification mask and a deadline, and the next step
//! resumes it.

use sinkpd_traits::{Bus, Clock};

use crate::counters::{Counter, CounterType};
use crate::phy::{Fusb302b, MessageTarget, Status, registers};
use crate::protocol_layer::message::epr_mode::{Action, EprModeDataObject};
use crate::protocol_layer::message::extended::{
    ExtendedControlMessageType, ExtendedHeader, MAX_EXTENDED_MSG_CHUNK_LEN,
};
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, ExtendedMessageType, Header, MessageType, SpecificationRevision,
};
use crate::protocol_layer::message::pdo::{AugmentedRaw, FixedSupply, RawPowerDataObject};
use crate::protocol_layer::message::request::RawDataObject;
use crate::protocol_layer::message::{EXTENDED_HEADER_SIZE, ExtendedMessage, MAX_EXTENDED_OBJECTS, Message};
use crate::ring_buffer::RingBuffer;
use crate::sink::device_policy_manager::DevicePolicyManager;
use crate::sink::notification::{Notification, NotificationSet};
use crate::timers::TimerType;
use crate::{DataRole, PowerRole};

#[cfg(test)]
mod tests;

/// Number of received messages buffered between steps.
const RX_QUEUE_DEPTH: usize = 4;

/// Static configuration of the sink.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SinkConfig {
    /// The sink's maximum EPR wattage in watts. Zero disables EPR entry.
    pub device_epr_wattage: u8,
    /// Whether entering the hard-reset state also signals a hard reset on the
    /// wire. A sink that runs from VBUS usually keeps this off: the source
    /// would cut power and reset this controller along with the contract.
    pub signal_hard_reset: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            device_epr_wattage: 0,
            signal_hard_reset: false,
        }
    }
}

/// Policy engine states. [8.3.3.3]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    /// Entry point, re-entered after every hard reset.
    Startup,
    /// Wait for VBUS. This sink runs from VBUS, so it is present by
    /// construction.
    Discovery,
    /// Arm the wait for Source_Capabilities.
    SetupWaitCap,
    /// Drain the queue, looking for Source_Capabilities.
    WaitCap,
    /// Let the DPM evaluate received capabilities.
    EvaluateCapability,
    /// Transmit the selected request.
    SelectCapabilityTx,
    /// Request sent; arm the wait for the source's verdict.
    SelectCapability,
    /// Evaluate the source's verdict on our request.
    WaitCapabilityResponse,
    /// Wait for PS_RDY while the source switches its supply.
    TransitionSink,
    /// Operational state with an explicit contract.
    Ready,
    /// Ask the source for its capabilities.
    GetSourceCap,
    /// Answer a Get_Sink_Cap.
    GiveSinkCap,
    /// Count and (optionally) signal a hard reset.
    HardReset,
    /// Return the port to its default state.
    TransitionDefault,
    /// A Soft_Reset was received; acknowledge and resynchronize.
    HandleSoftReset,
    /// Start our own soft reset exchange.
    SendSoftReset,
    /// Soft reset sent; arm the wait for the response.
    SendSoftResetTxOk,
    /// Evaluate the response to our soft reset.
    SendSoftResetResponse,
    /// Reject an unsupported message.
    SendNotSupported,
    /// One of our messages was answered with Not_Supported.
    NotSupportedReceived,
    /// Resting state for a source that does not speak PD.
    SourceUnresponsive,
    /// Let the DPM evaluate reassembled EPR capabilities.
    EprEvaluateCapability,
    /// Request entry into EPR mode.
    RequestEpr,
    /// Emit the periodic EPR keep-alive.
    SendEprKeepAlive,
    /// Wait for the keep-alive acknowledgement.
    WaitEprKeepAliveAck,
    /// Process one chunk of an extended EPR message.
    HandleEprChunk,
    /// Park until the next EPR chunk arrives.
    WaitForEprChunk,
    /// Meta state: parked until a masked notification fires or the deadline
    /// passes.
    WaitingEvent,
    /// Meta state: frame handed to the PHY, waiting for the transmit
    /// interrupt.
    WaitingMessageTx,
    /// Meta state: transmission confirmed, waiting for the GoodCRC echo.
    WaitingGoodCrc,
}

/// Continuation of a parked wait.
///
/// Every entry into [`State::WaitingEvent`] goes through
/// [`Sink::wait_for_event`], which fills all three fields; a parked engine
/// always knows what wakes it and where it resumes.
#[derive(Debug, Clone, Copy)]
struct WaitContext {
    resume: State,
    mask: NotificationSet,
    deadline: Option<u32>,
}

/// Continuation of an in-flight transmission.
#[derive(Debug, Clone, Copy)]
struct TxContext {
    on_acknowledged: State,
    on_failed: State,
}

/// The sink policy engine.
///
/// Generic over the register bus below the PHY, the host clock and the
/// device policy manager, so a test harness can inject all three.
#[derive(Debug)]
pub struct Sink<BUS: Bus, CLOCK: Clock, DPM: DevicePolicyManager> {
    phy: Fusb302b<BUS>,
    clock: CLOCK,
    device_policy_manager: DPM,
    config: SinkConfig,

    state: State,
    wait: WaitContext,
    tx: TxContext,

    header_template: Header,
    tx_message_id: Counter,
    hard_reset_counter: Counter,
    events: NotificationSet,
    incoming: RingBuffer<Message, RX_QUEUE_DEPTH>,
    /// The message most recently popped for evaluation.
    scratch: Message,
    /// The most recent request, re-sent verbatim for PPS keep-alive.
    last_request: Message,
    /// Reassembly buffer for chunked EPR Source_Capabilities.
    epr_capabilities: ExtendedMessage,

    /// 1-based object position of the first PPS APDO in the most recent
    /// Source_Capabilities.
    pps_index: Option<u8>,
    explicit_contract: bool,
    negotiating_epr: bool,
    is_epr: bool,
    source_is_epr_capable: bool,
    unconstrained_power: bool,
    pps_timer_enabled: bool,
    pps_last_request_ms: u32,
    epr_last_event_ms: u32,
    negotiation_started_ms: u32,
}

impl<BUS: Bus, CLOCK: Clock, DPM: DevicePolicyManager> Sink<BUS, CLOCK, DPM> {
    /// Create a policy engine around a PHY, a clock and a device policy
    /// manager.
    pub fn new(phy: Fusb302b<BUS>, clock: CLOCK, device_policy_manager: DPM, config: SinkConfig) -> Self {
        Self {
            phy,
            clock,
            device_policy_manager,
            config,
            state: State::Startup,
            wait: WaitContext {
                resume: State::Startup,
                mask: NotificationSet::NONE,
                deadline: None,
            },
            tx: TxContext {
                on_acknowledged: State::Startup,
                on_failed: State::Startup,
            },
            header_template: Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R1_0),
            tx_message_id: Counter::new(CounterType::MessageId),
            hard_reset_counter: Counter::new(CounterType::HardReset),
            events: NotificationSet::NONE,
            incoming: RingBuffer::new(),
            scratch: Message::new(),
            last_request: Message::new(),
            epr_capabilities: ExtendedMessage::new(),
            pps_index: None,
            explicit_contract: false,
            negotiating_epr: false,
            is_epr: false,
            source_is_epr_capable: false,
            unconstrained_power: false,
            pps_timer_enabled: false,
            pps_last_request_ms: 0,
            epr_last_event_ms: 0,
            negotiation_started_ms: 0,
        }
    }

    /// Bring up the PHY. Call once before stepping the engine.
    pub fn setup(&mut self) -> Result<(), crate::phy::Error> {
        self.phy.setup()
    }

    /// Advance the state machine by exactly one transition.
    ///
    /// Returns `true` when calling again immediately may make further
    /// progress, `false` once the engine is parked.
    pub fn run_step(&mut self) -> bool {
        let entry_state = self.state;

        self.state = match self.state {
            State::Startup => self.startup(),
            State::Discovery => self.discovery(),
            State::SetupWaitCap => self.setup_wait_cap(),
            State::WaitCap => self.wait_cap(),
            State::EvaluateCapability => self.evaluate_capability(),
            State::SelectCapabilityTx => self.select_capability_tx(),
            State::SelectCapability => self.select_capability(),
            State::WaitCapabilityResponse => self.wait_capability_response(),
            State::TransitionSink => self.transition_sink(),
            State::Ready => self.ready(),
            State::GetSourceCap => self.get_source_cap(),
            State::GiveSinkCap => self.give_sink_cap(),
            State::HardReset => self.hard_reset(),
            State::TransitionDefault => self.transition_default(),
            State::HandleSoftReset => self.handle_soft_reset(),
            State::SendSoftReset => self.send_soft_reset(),
            State::SendSoftResetTxOk => self.send_soft_reset_tx_ok(),
            State::SendSoftResetResponse => self.send_soft_reset_response(),
            State::SendNotSupported => self.send_not_supported(),
            State::NotSupportedReceived => self.not_supported_received(),
            State::SourceUnresponsive => self.source_unresponsive(),
            State::EprEvaluateCapability => self.epr_evaluate_capability(),
            State::RequestEpr => self.request_epr(),
            State::SendEprKeepAlive => self.send_epr_keep_alive(),
            State::WaitEprKeepAliveAck => self.wait_epr_keep_alive_ack(),
            State::HandleEprChunk => self.handle_epr_chunk(),
            State::WaitForEprChunk => self.wait_for_epr_chunk(),
            State::WaitingEvent => self.waiting_event(),
            State::WaitingMessageTx => self.waiting_message_tx(),
            State::WaitingGoodCrc => self.waiting_good_crc(),
        };

        if self.state != entry_state && self.state != State::WaitingEvent {
            trace!("Sink state: {:?}", self.state);
        }

        self.state != entry_state || self.state != State::WaitingEvent
    }

    /// Decode the PHY status block after the interrupt line asserted.
    ///
    /// Drains the RX FIFO into the message ring and posts the matching
    /// notifications. Returns `true` if anything was decoded.
    pub fn irq_occurred(&mut self) -> bool {
        let mut status = Status::default();
        if !self.phy.get_status(&mut status) {
            return false;
        }

        let mut decoded = false;

        // GoodCRC sent by the PHY: a verified message sits in the FIFO.
        if status.interruptb & registers::INTERRUPTB_I_GCRCSENT != 0 {
            self.read_pending_messages();
            decoded = true;
        }

        if status.interrupta & registers::INTERRUPTA_I_TXSENT != 0 {
            self.notify(Notification::TransmitSent);
            decoded = true;
        }
        if status.interrupta & registers::INTERRUPTA_I_RETRYFAIL != 0 {
            self.notify(Notification::RetriesExceeded);
            decoded = true;
        }
        if status.interrupta & registers::INTERRUPTA_I_OCP_TEMP != 0
            && status.status1 & registers::STATUS1_OVRTEMP != 0
        {
            self.notify(Notification::OverTemperature);
            decoded = true;
        }

        decoded
    }

    /// Drive the engine's periodic work.
    ///
    /// Call at least once per second, and every 4-400 ms while an EPR
    /// contract is active.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        if self.pps_timer_enabled
            && now.wrapping_sub(self.pps_last_request_ms) > TimerType::SinkPpsPeriodic.duration_ms()
        {
            // A programmable contract lapses without periodic re-requests.
            self.notify(Notification::PpsRequest);
            self.pps_last_request_ms = now;
        }

        if self.is_epr && now.wrapping_sub(self.epr_last_event_ms) > TimerType::SinkEprKeepAlive.duration_ms() {
            self.notify(Notification::EprKeepAlive);
        }
    }

    /// Ask the engine to renegotiate power via the DPM.
    pub fn renegotiate(&mut self) {
        self.notify(Notification::NewPower);
    }

    /// Ask the source for fresh capabilities.
    pub fn request_source_capabilities(&mut self) {
        self.notify(Notification::GetSourceCap);
    }

    /// Whether the negotiated revision is PD 3.0 or later.
    pub fn is_pd3(&self) -> bool {
        self.header_template.spec_revision() == SpecificationRevision::R3_X
    }

    /// Whether an explicit contract is in place.
    pub fn has_explicit_contract(&self) -> bool {
        self.explicit_contract
    }

    /// Whether the engine holds, or is still actively upgrading, a contract.
    pub fn has_negotiated(&self) -> bool {
        if self.effective_state() == State::SourceUnresponsive {
            return false;
        }
        self.negotiating_epr || self.explicit_contract
    }

    /// Whether the current contract runs in EPR mode.
    pub fn is_epr(&self) -> bool {
        self.is_epr
    }

    /// Whether the source advertised unconstrained power.
    pub fn is_unconstrained(&self) -> bool {
        self.unconstrained_power
    }

    /// Whether negotiation has settled, one way or the other.
    ///
    /// `timeout_deciseconds` bounds the wait from the start of capability
    /// negotiation, in tenths of a second; zero disables the deadline.
    pub fn setup_complete_or_timed_out(&mut self, timeout_deciseconds: u8) -> bool {
        if self.negotiating_epr {
            return false;
        }
        if self.explicit_contract {
            return true;
        }
        if matches!(self.effective_state(), State::SourceUnresponsive | State::Ready) {
            return true;
        }
        self.negotiation_timeout_reached(timeout_deciseconds)
    }

    /// Whether the negotiation deadline has passed without an outcome.
    pub fn negotiation_timeout_reached(&mut self, timeout_deciseconds: u8) -> bool {
        timeout_deciseconds != 0
            && self.clock.now_ms().wrapping_sub(self.negotiation_started_ms)
                > u32::from(timeout_deciseconds) * 100
    }

    /// The state the engine runs (or will resume into, when parked).
    fn effective_state(&self) -> State {
        if self.state == State::WaitingEvent {
            self.wait.resume
        } else {
            self.state
        }
    }

    fn notify(&mut self, notification: Notification) {
        trace!("Notification: {:?}", notification);
        self.events.insert(notification);
    }

    /// Drain the RX FIFO into the message ring.
    ///
    /// Zero-object Soft_Reset messages become a [`Notification::Reset`]
    /// instead of queue entries; frames for cable plugs are drained and
    /// dropped.
    fn read_pending_messages(&mut self) {
        while self.phy.rx_pending() {
            let mut message = Message::new();
            match self.phy.read_message(&mut message) {
                MessageTarget::PortPartner => {
                    if message.header().message_type() == MessageType::Control(ControlMessageType::SoftReset) {
                        self.notify(Notification::Reset);
                    } else {
                        self.incoming.push(message);
                        self.notify(Notification::MessageReceived);
                    }
                }
                MessageTarget::CablePlug => {}
            }
        }
    }

    /// Park until one of the masked notifications fires or the timeout
    /// elapses.
    ///
    /// Falls straight through when a wanted notification is already pending,
    /// or when waiting for reception and the ring is not empty.
    fn wait_for_event(&mut self, resume: State, mask: NotificationSet, timeout_ms: Option<u32>) -> State {
        debug_assert!(!mask.is_empty());

        if self.events.intersects(mask) {
            return resume;
        }

        if mask.contains(Notification::MessageReceived) && !self.incoming.is_empty() {
            self.events.insert(Notification::MessageReceived);
            return resume;
        }

        self.wait = WaitContext {
            resume,
            mask,
            deadline: timeout_ms.map(|timeout| self.clock.now_ms().wrapping_add(timeout)),
        };
        State::WaitingEvent
    }

    /// Stamp a message with the transmit counter, hand it to the PHY, and park
    /// until the PHY reports the outcome.
    fn start_message_tx(&mut self, on_acknowledged: State, on_failed: State, mut message: Message) -> State {
        if message.header().message_type() == MessageType::Control(ControlMessageType::SoftReset) {
            // A Soft_Reset restarts message ID counting on both sides. [6.8.1]
            self.tx_message_id.reset();
        }

        self.tx = TxContext {
            on_acknowledged,
            on_failed,
        };

        message.set_header(message.header().with_message_id(self.tx_message_id.value()));
        self.phy.send_message(&message);

        self.wait_for_event(
            State::WaitingMessageTx,
            NotificationSet::NONE
                .with(Notification::Reset)
                .with(Notification::MessageReceived)
                .with(Notification::TransmitSent)
                .with(Notification::RetriesExceeded),
            None,
        )
    }

    fn waiting_event(&mut self) -> State {
        if let Some(deadline) = self.wait.deadline {
            if self.clock.now_ms() > deadline {
                self.notify(Notification::Timeout);
            }
        }

        if self.events.contains(Notification::Timeout) {
            self.events.clear();
            return if matches!(
                self.wait.resume,
                State::HandleSoftReset
                    | State::SendSoftReset
                    | State::SendSoftResetTxOk
                    | State::SendSoftResetResponse
            ) {
                // A timeout inside the soft reset exchange restarts the
                // machine instead of soft-resetting the soft reset.
                State::Startup
            } else {
                State::SendSoftReset
            };
        }

        if self.events.contains(Notification::Reset) {
            return State::TransitionDefault;
        }

        if self.events.intersects(self.wait.mask) {
            return self.wait.resume;
        }

        State::WaitingEvent
    }

    fn waiting_message_tx(&mut self) -> State {
        let events = self.events.take();

        if events.contains(Notification::TransmitSent) {
            if !self.incoming.is_empty() {
                return self.waiting_good_crc();
            }
            // The GoodCRC normally follows within about 100 us; allow for a
            // slow host loop.
            return self.wait_for_event(
                State::WaitingGoodCrc,
                NotificationSet::NONE.with(Notification::MessageReceived),
                Some(TimerType::CrcReceive.duration_ms()),
            );
        }

        // Retry exhaustion, or any unexpected wake-up, aborts the
        // transmission.
        self.notify(Notification::TransmitError);
        self.tx.on_failed
    }

    fn waiting_good_crc(&mut self) -> State {
        self.events.clear();

        if let Some(message) = self.incoming.pop() {
            let header = message.header();
            if header.message_type() == MessageType::Control(ControlMessageType::GoodCRC)
                && header.message_id() == self.tx_message_id.value()
            {
                // Acknowledged; roll the transmit counter. [6.7.1.1]
                let _ = self.tx_message_id.increment();
                self.notify(Notification::TransmitDone);
                return self.tx.on_acknowledged;
            }
        }

        self.notify(Notification::TransmitError);
        self.tx.on_failed
    }

    fn startup(&mut self) -> State {
        // A hard reset voids the explicit contract and exits EPR mode.
        self.explicit_contract = false;
        self.pps_timer_enabled = false;
        self.is_epr = false;
        self.negotiating_epr = false;
        self.events.clear();

        State::Discovery
    }

    fn discovery(&mut self) -> State {
        // VBUS powers this sink, so it is present whenever code runs. A
        // dual-supply design would wait here and re-run CC line selection.
        State::SetupWaitCap
    }

    fn setup_wait_cap(&mut self) -> State {
        self.explicit_contract = false;
        self.pps_timer_enabled = false;
        self.events.clear();
        self.negotiation_started_ms = self.clock.now_ms();

        self.wait_for_event(
            State::WaitCap,
            NotificationSet::NONE
                .with(Notification::MessageReceived)
                .with(Notification::OverTemperature)
                .with(Notification::Reset),
            Some(TimerType::SinkWaitCap.duration_ms()),
        )
    }

    fn wait_cap(&mut self) -> State {
        let events = self.events.take();

        // Too hot to negotiate power.
        if events.contains(Notification::OverTemperature) {
            return State::SetupWaitCap;
        }

        while let Some(message) = self.incoming.pop() {
            let header = message.header();
            if header.message_type() == MessageType::Data(DataMessageType::SourceCapabilities) {
                trace!("Source_Capabilities received");
                self.scratch = message;

                // Lock in the specification revision on the first
                // capabilities: the partner's 3.x if it speaks it, else 2.0.
                // There is no hardware for PD 1.0 signaling.
                if self.header_template.spec_revision() == SpecificationRevision::R1_0 {
                    let revision = if header.spec_revision() >= SpecificationRevision::R3_X {
                        SpecificationRevision::R3_X
                    } else {
                        SpecificationRevision::R2_0
                    };
                    self.header_template = self.header_template.with_spec_revision(revision);
                }

                return State::EvaluateCapability;
            }
        }

        // Not the message we wanted; keep waiting.
        State::SetupWaitCap
    }

    fn evaluate_capability(&mut self) -> State {
        let capabilities = self.scratch;

        // Remember where the first PPS APDO sits, so a request against it (or
        // a later position) arms the periodic re-request.
        self.pps_index = None;
        for index in 0..capabilities.header().num_objects() {
            let object = capabilities.object(index);
            if RawPowerDataObject(object).kind() == 0b11 && AugmentedRaw(object).supply() == 0b00 {
                self.pps_index = Some(index as u8 + 1);
                break;
            }
        }

        let vsafe_5v = FixedSupply(capabilities.object(0));
        self.unconstrained_power = vsafe_5v.unconstrained_power();
        self.source_is_epr_capable = vsafe_5v.epr_mode_capable();

        self.hard_reset_counter.reset();

        let mut request = Message::new();
        if self.device_policy_manager.evaluate_capability(&capabilities, &mut request) {
            request.set_header(Header(request.header().0 | self.header_template.0));
            self.last_request = request;

            if self.is_pd3() {
                let position = RawDataObject(request.object(0)).object_position();
                self.pps_timer_enabled = match self.pps_index {
                    Some(pps_index) => position >= pps_index && position <= 7,
                    None => false,
                };
            }

            State::SelectCapabilityTx
        } else {
            State::WaitCap
        }
    }

    fn select_capability_tx(&mut self) -> State {
        trace!("Requesting the selected capability");
        self.start_message_tx(State::SelectCapability, State::HardReset, self.last_request)
    }

    fn select_capability(&mut self) -> State {
        self.events.clear();
        self.wait_for_event(
            State::WaitCapabilityResponse,
            NotificationSet::NONE
                .with(Notification::MessageReceived)
                .with(Notification::Reset)
                .with(Notification::Timeout),
            Some(TimerType::SenderResponse.duration_ms()),
        )
    }

    fn wait_capability_response(&mut self) -> State {
        self.events.clear();

        while let Some(message) = self.incoming.pop() {
            match message.header().message_type() {
                MessageType::Control(ControlMessageType::Accept) => {
                    // A two-object request is an EPR request; its acceptance
                    // moves the contract into EPR operation.
                    self.is_epr = self.last_request.header().num_objects() == 2;
                    if self.is_epr {
                        self.epr_last_event_ms = self.clock.now_ms();
                    }

                    return self.wait_for_event(
                        State::TransitionSink,
                        NotificationSet::NONE
                            .with(Notification::MessageReceived)
                            .with(Notification::Reset),
                        Some(TimerType::PSTransition.duration_ms()),
                    );
                }
                MessageType::Control(ControlMessageType::SoftReset) => {
                    return State::HandleSoftReset;
                }
                MessageType::Control(ControlMessageType::Reject) | MessageType::Control(ControlMessageType::Wait) => {
                    trace!("Requested capability rejected");
                    return if self.explicit_contract {
                        // The old contract stands.
                        self.wait_for_event(State::Ready, NotificationSet::ALL, None)
                    } else {
                        State::SetupWaitCap
                    };
                }
                _ => {}
            }
        }

        self.wait_for_event(
            State::WaitCapabilityResponse,
            NotificationSet::NONE
                .with(Notification::MessageReceived)
                .with(Notification::Reset)
                .with(Notification::Timeout),
            Some(TimerType::SenderResponse.duration_ms()),
        )
    }

    fn transition_sink(&mut self) -> State {
        self.events.clear();

        while let Some(message) = self.incoming.pop() {
            match message.header().message_type() {
                MessageType::Control(ControlMessageType::PsRdy) => {
                    self.negotiating_epr = false;
                    if self.source_is_epr_capable && self.config.device_epr_wattage > 0 && !self.is_epr {
                        // An SPR contract with EPR capability on both ends:
                        // queue the mode upgrade.
                        self.negotiating_epr = true;
                        self.notify(Notification::RequestEpr);
                    }
                    self.explicit_contract = true;

                    return State::Ready;
                }
                MessageType::Data(DataMessageType::SourceCapabilities) => {
                    // The source changed its mind mid-transition.
                    self.scratch = message;
                    return State::EvaluateCapability;
                }
                _ => {}
            }
        }

        // The PS_RDY did not arrive in time.
        State::SendSoftReset
    }

    fn ready(&mut self) -> State {
        let events = self.events.take();

        if events.contains(Notification::PpsRequest) {
            return State::SelectCapabilityTx;
        }
        if events.contains(Notification::OverTemperature) {
            // No longer fit for the contract.
            return State::HardReset;
        }
        if events.contains(Notification::GetSourceCap) {
            return State::GetSourceCap;
        }
        if events.contains(Notification::NewPower) {
            // Give the DPM another pass over the stored capabilities.
            return State::EvaluateCapability;
        }
        if events.contains(Notification::RequestEpr) {
            return State::RequestEpr;
        }
        if events.contains(Notification::EprKeepAlive) {
            return State::SendEprKeepAlive;
        }

        if events.contains(Notification::MessageReceived) {
            while let Some(message) = self.incoming.pop() {
                let header = message.header();
                match header.message_type() {
                    MessageType::Data(DataMessageType::VendorDefined) => {
                        // Vendor messages are not supported, but harmless.
                    }
                    MessageType::Control(ControlMessageType::Ping) => {}
                    MessageType::Control(ControlMessageType::DrSwap)
                    | MessageType::Control(ControlMessageType::PrSwap)
                    | MessageType::Control(ControlMessageType::VconnSwap)
                    | MessageType::Control(ControlMessageType::GetSourceCap)
                    | MessageType::Control(ControlMessageType::GotoMin)
                    | MessageType::Data(DataMessageType::Request)
                    | MessageType::Data(DataMessageType::SinkCapabilities) => {
                        return State::SendNotSupported;
                    }
                    MessageType::Data(DataMessageType::SourceCapabilities) => {
                        self.scratch = message;
                        return State::EvaluateCapability;
                    }
                    MessageType::Control(ControlMessageType::GetSinkCap) => {
                        return State::GiveSinkCap;
                    }
                    MessageType::Control(ControlMessageType::SoftReset) => {
                        return State::HandleSoftReset;
                    }
                    MessageType::Data(DataMessageType::EprMode) => {
                        match EprModeDataObject(message.object(0)).action_kind() {
                            Some(Action::EnterSucceeded) => {
                                self.is_epr = true;
                                // Keep draining; EPR capabilities follow.
                            }
                            Some(Action::EnterFailed) => {
                                // Stay on the SPR contract.
                                self.is_epr = false;
                                return State::Ready;
                            }
                            Some(Action::Exit) => {
                                // Fall back to an SPR contract.
                                self.is_epr = false;
                                return State::WaitCap;
                            }
                            _ => {}
                        }
                    }
                    _ if self.is_pd3() => {
                        if header.extended()
                            && usize::from(message.extended_header().data_size()) >= MAX_EXTENDED_MSG_CHUNK_LEN
                        {
                            if header.message_type()
                                == MessageType::Extended(ExtendedMessageType::EprSourceCapabilities)
                            {
                                self.scratch = message;
                                return State::HandleEprChunk;
                            }
                            // Chunking is only understood for EPR capabilities.
                            return State::SendNotSupported;
                        }
                        if header.message_type() == MessageType::Control(ControlMessageType::NotSupported) {
                            return State::NotSupportedReceived;
                        }
                        return State::SendSoftReset;
                    }
                    _ => {
                        // Unknown message under PD 2.0: ignored.
                    }
                }
            }
        }

        self.wait_for_event(State::Ready, NotificationSet::ALL, None)
    }

    fn get_source_cap(&mut self) -> State {
        let message = Message::new_control(self.header_template, ControlMessageType::GetSourceCap);
        self.start_message_tx(State::Ready, State::HardReset, message)
    }

    fn give_sink_cap(&mut self) -> State {
        let mut capabilities = Message::new();
        let is_pd3 = self.is_pd3();
        self.device_policy_manager.sink_capabilities(&mut capabilities, is_pd3);
        capabilities.set_header(Header(capabilities.header().0 | self.header_template.0));

        self.start_message_tx(State::Ready, State::HardReset, capabilities)
    }

    fn hard_reset(&mut self) -> State {
        if self.hard_reset_counter.increment().is_err() {
            // Too many attempts; assume the source does not speak PD.
            return State::SourceUnresponsive;
        }

        if self.config.signal_hard_reset {
            self.phy.send_hard_reset();
            self.notify(Notification::HardResetSent);
        }

        State::TransitionDefault
    }

    fn transition_default(&mut self) -> State {
        // There is no local hardware to reset, and the data role never leaves
        // UFP.
        State::Startup
    }

    fn handle_soft_reset(&mut self) -> State {
        // Accepting a Soft_Reset restarts message ID counting; the Accept
        // itself goes out with ID zero. [6.8.1]
        self.tx_message_id.reset();
        let accept = Message::new_control(self.header_template, ControlMessageType::Accept);
        self.start_message_tx(State::SetupWaitCap, State::HardReset, accept)
    }

    fn send_soft_reset(&mut self) -> State {
        trace!("Sending soft reset");
        let soft_reset = Message::new_control(self.header_template, ControlMessageType::SoftReset);
        self.start_message_tx(State::SendSoftResetTxOk, State::HardReset, soft_reset)
    }

    fn send_soft_reset_tx_ok(&mut self) -> State {
        self.wait_for_event(
            State::SendSoftResetResponse,
            NotificationSet::NONE
                .with(Notification::Timeout)
                .with(Notification::MessageReceived)
                .with(Notification::Reset),
            Some(TimerType::SenderResponse.duration_ms()),
        )
    }

    fn send_soft_reset_response(&mut self) -> State {
        self.events.clear();

        if let Some(message) = self.incoming.pop() {
            match message.header().message_type() {
                MessageType::Control(ControlMessageType::Accept) => State::SetupWaitCap,
                MessageType::Control(ControlMessageType::SoftReset) => State::HandleSoftReset,
                _ => State::HardReset,
            }
        } else {
            State::HardReset
        }
    }

    fn send_not_supported(&mut self) -> State {
        let message_type = if self.is_pd3() {
            ControlMessageType::NotSupported
        } else {
            // PD 2.0 has no Not_Supported message.
            ControlMessageType::Reject
        };

        let message = Message::new_control(self.header_template, message_type);
        self.start_message_tx(State::Ready, State::SendSoftReset, message)
    }

    fn not_supported_received(&mut self) -> State {
        self.wait_for_event(State::Ready, NotificationSet::ALL, None)
    }

    fn source_unresponsive(&mut self) -> State {
        // PD is not happening; rest here until the host restarts the PHY.
        self.explicit_contract = false;
        self.phy.delay_ms(TimerType::PdDebounce.duration_ms());

        State::SourceUnresponsive
    }

    fn epr_evaluate_capability(&mut self) -> State {
        self.epr_last_event_ms = self.clock.now_ms();

        let mut request = Message::new();
        if self
            .device_policy_manager
            .evaluate_epr_capability(&self.epr_capabilities, &mut request)
        {
            // The re-request timer follows the selected object, which may be
            // a PPS APDO even in EPR mode.
            let position = RawDataObject(request.object(0)).object_position();
            let index = usize::from(position.saturating_sub(1)).min(MAX_EXTENDED_OBJECTS - 1);
            let object = self.epr_capabilities.object(index);
            self.pps_timer_enabled =
                RawPowerDataObject(object).kind() == 0b11 && AugmentedRaw(object).supply() == 0b00;

            request.set_header(Header(request.header().0 | self.header_template.0));
            self.last_request = request;

            State::SelectCapabilityTx
        } else {
            State::WaitCap
        }
    }

    fn request_epr(&mut self) -> State {
        self.epr_last_event_ms = self.clock.now_ms();

        let mut message = Message::new_data(self.header_template, DataMessageType::EprMode, 1);
        message.set_object(0, EprModeDataObject::new_enter(self.config.device_epr_wattage).0);

        self.start_message_tx(State::Ready, State::HardReset, message)
    }

    fn send_epr_keep_alive(&mut self) -> State {
        // Anything still queued is stale; the keep-alive exchange is all that
        // matters now.
        self.incoming.flush();
        self.negotiating_epr = true;

        let mut message = Message::new_extended(self.header_template, ExtendedMessageType::ExtendedControl, 1);
        message.set_extended_header(ExtendedHeader::new(EXTENDED_HEADER_SIZE as u16).with_chunked(true));
        message.chunk_data_mut()[0] = ExtendedControlMessageType::EprKeepAlive as u8;
        message.chunk_data_mut()[1] = 0;

        self.start_message_tx(State::WaitEprKeepAliveAck, State::Ready, message)
    }

    fn wait_epr_keep_alive_ack(&mut self) -> State {
        while let Some(message) = self.incoming.pop() {
            if message.header().message_type() == MessageType::Extended(ExtendedMessageType::ExtendedControl)
                && message.chunk_data()[0] == ExtendedControlMessageType::EprKeepAliveAck as u8
            {
                self.negotiating_epr = false;
                self.epr_last_event_ms = self.clock.now_ms();
                return State::Ready;
            }
        }

        // No acknowledgement yet; send another keep-alive.
        State::SendEprKeepAlive
    }

    fn handle_epr_chunk(&mut self) -> State {
        let chunk = self.scratch;
        let extended_header = chunk.extended_header();

        if extended_header.request_chunk() {
            // The source asking us for a chunk carries no data.
            return self.wait_for_event(State::WaitForEprChunk, NotificationSet::ALL, None);
        }

        let chunk_number = extended_header.chunk_number();
        if chunk_number == 0 {
            self.epr_capabilities.begin_reassembly(&chunk);
        } else {
            self.epr_capabilities.merge_chunk(chunk_number, &chunk);
        }

        // Bytes known so far: the full chunks before this one, plus the
        // half object that completes a split PDO and this chunk's objects.
        let received = MAX_EXTENDED_MSG_CHUNK_LEN * usize::from(chunk_number)
            + EXTENDED_HEADER_SIZE
            + 4 * chunk.header().num_objects().saturating_sub(1);

        if received >= self.epr_capabilities.data_size() {
            return State::EprEvaluateCapability;
        }

        // Request the next chunk: a single-object extended message of the
        // same type, with the request-chunk flag set.
        let mut request = Message::new();
        request.set_header(
            Header(self.header_template.0)
                .with_message_type_raw(chunk.header().message_type_raw())
                .with_num_objects(1)
                .with_extended(true),
        );
        request.set_extended_header(
            ExtendedHeader(0)
                .with_chunk_number(chunk_number + 1)
                .with_request_chunk(true)
                .with_chunked(true),
        );

        self.start_message_tx(State::WaitForEprChunk, State::HardReset, request)
    }

    fn wait_for_epr_chunk(&mut self) -> State {
        let events = self.events.take();

        if events.contains(Notification::MessageReceived) {
            while let Some(message) = self.incoming.pop() {
                let header = message.header();
                if self.is_pd3()
                    && header.extended()
                    && usize::from(message.extended_header().data_size()) >= MAX_EXTENDED_MSG_CHUNK_LEN
                {
                    if header.message_type() == MessageType::Extended(ExtendedMessageType::EprSourceCapabilities)
                    {
                        self.scratch = message;
                        return State::HandleEprChunk;
                    }
                    return State::SendNotSupported;
                }
            }
        }

        self.wait_for_event(State::WaitForEprChunk, NotificationSet::ALL, None)
    }
}
