//! Tests for the policy engine, driven through the mock bus at the register
//! level.

use super::*;
use crate::dummy::{DummyBus, DummyClock, HighestVoltageDevice, TEST_ADDRESS, mock_capabilities, source_header_template};
use crate::phy::Fusb302b;

struct Harness {
    sink: Sink<DummyBus, DummyClock, HighestVoltageDevice>,
    bus: DummyBus,
    clock: DummyClock,
}

fn harness(config: SinkConfig) -> Harness {
    let bus = DummyBus::new();
    let clock = DummyClock::new();
    let sink = Sink::new(
        Fusb302b::new(bus.clone(), TEST_ADDRESS),
        clock.clone(),
        HighestVoltageDevice,
        config,
    );

    Harness { sink, bus, clock }
}

/// Step the engine until it parks. Panics if it never settles.
fn pump(harness: &mut Harness) {
    for _ in 0..64 {
        if !harness.sink.run_step() {
            return;
        }
    }
    panic!("the engine did not settle");
}

fn inject_control(harness: &mut Harness, message_type: ControlMessageType, message_id: u8) {
    let mut message = Message::new_control(source_header_template(), message_type);
    message.set_header(message.header().with_message_id(message_id));
    harness.bus.inject_message(&message);
    assert!(harness.sink.irq_occurred());
}

/// Raise the transmit interrupt and echo a GoodCRC in one interrupt, the way
/// the PHY delivers them, then let the engine process the outcome.
fn confirm_tx(harness: &mut Harness, good_crc_id: u8) {
    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_TXSENT);
    let mut good_crc = Message::new_control(source_header_template(), ControlMessageType::GoodCRC);
    good_crc.set_header(good_crc.header().with_message_id(good_crc_id));
    harness.bus.inject_message(&good_crc);
    assert!(harness.sink.irq_occurred());
    pump(harness);
}

/// Parse the payload out of a captured TX FIFO frame (strip the SOP preamble
/// and the CRC/EOP trailer).
fn parse_frame(frame: &[u8]) -> Message {
    assert!(frame.len() > 9, "frame too short: {frame:02X?}");
    assert_eq!(&frame[..4], &[0x12, 0x12, 0x12, 0x13]);
    assert_eq!(frame[4], 0x80 | (frame.len() - 9) as u8);
    assert_eq!(&frame[frame.len() - 4..], &[0xFF, 0x14, 0xFE, 0xA1]);
    Message::from_bytes(&frame[5..frame.len() - 4])
}

/// Drive the happy SPR path up to the Ready state.
fn reach_ready(harness: &mut Harness, epr_capable: bool) {
    pump(harness);
    harness.bus.inject_message(&mock_capabilities(epr_capable));
    assert!(harness.sink.irq_occurred());
    pump(harness);
    harness.bus.take_tx();

    confirm_tx(harness, 0);
    inject_control(harness, ControlMessageType::Accept, 1);
    pump(harness);
    inject_control(harness, ControlMessageType::PsRdy, 2);
    pump(harness);
}

#[test]
fn negotiates_the_highest_pps_voltage() {
    let mut harness = harness(SinkConfig::default());

    // Startup runs through Discovery into the capability wait.
    pump(&mut harness);
    assert!(matches!(harness.sink.state, State::WaitingEvent));
    assert_eq!(harness.sink.wait.resume, State::WaitCap);

    harness.bus.inject_message(&mock_capabilities(false));
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);

    // The request for PPS 21 V at 2.25 A goes out as one exact bus frame.
    assert_eq!(
        harness.bus.take_tx(),
        vec![0x12, 0x12, 0x12, 0x13, 0x86, 0x82, 0x10, 0x2D, 0x34, 0x08, 0x73, 0xFF, 0x14, 0xFE, 0xA1]
    );

    confirm_tx(&mut harness, 0);
    assert_eq!(harness.sink.tx_message_id.value(), 1);
    assert_eq!(harness.sink.wait.resume, State::WaitCapabilityResponse);

    inject_control(&mut harness, ControlMessageType::Accept, 1);
    pump(&mut harness);
    assert_eq!(harness.sink.wait.resume, State::TransitionSink);

    inject_control(&mut harness, ControlMessageType::PsRdy, 2);
    pump(&mut harness);

    assert_eq!(harness.sink.wait.resume, State::Ready);
    assert!(harness.sink.has_explicit_contract());
    assert!(harness.sink.has_negotiated());
    assert!(harness.sink.pps_timer_enabled);
    assert_eq!(harness.sink.pps_index, Some(5));
    assert!(harness.sink.is_unconstrained());
    assert!(harness.sink.is_pd3());
    assert!(harness.sink.setup_complete_or_timed_out(0));
}

#[test]
fn frames_for_cable_plugs_are_drained_and_ignored() {
    let mut harness = harness(SinkConfig::default());
    pump(&mut harness);

    // A frame whose first FIFO token is not SOP must be drained, but must not
    // wake the engine.
    harness
        .bus
        .inject_frame_with_token(0xD0, mock_capabilities(false).wire_bytes());
    assert!(harness.sink.irq_occurred());

    assert!(!harness.sink.run_step());
    assert_eq!(harness.sink.wait.resume, State::WaitCap);
    assert!(harness.bus.rx_fifo_is_empty());
    assert_eq!(harness.sink.tx_message_id.value(), 0);
    assert!(harness.sink.incoming.is_empty());
}

#[test]
fn capability_timeout_sends_a_soft_reset() {
    let mut harness = harness(SinkConfig::default());
    pump(&mut harness);

    harness.clock.advance(311);
    assert!(harness.sink.run_step());
    assert_eq!(harness.sink.state, State::SendSoftReset);

    // The Soft_Reset goes out with the message ID counter reset to zero.
    assert!(harness.sink.run_step());
    let soft_reset = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        soft_reset.header().message_type(),
        MessageType::Control(ControlMessageType::SoftReset)
    );
    assert_eq!(soft_reset.header().message_id(), 0);
    assert_eq!(harness.sink.tx_message_id.value(), 0);
}

#[test]
fn overtemperature_in_ready_hard_resets() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);
    assert_eq!(harness.sink.hard_reset_counter.value(), 0);

    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_OCP_TEMP);
    harness.bus.set_status1(registers::STATUS1_OVRTEMP);
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);

    // Back at the start, one hard reset on the books, contract gone. Nothing
    // was signalled on the wire in the default configuration.
    assert_eq!(harness.sink.hard_reset_counter.value(), 1);
    assert!(!harness.sink.has_explicit_contract());
    assert_eq!(harness.sink.wait.resume, State::WaitCap);
    assert!(harness.bus.take_tx().is_empty());
}

#[test]
fn repeated_hard_resets_declare_the_source_unresponsive() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    // First hard reset: overtemperature.
    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_OCP_TEMP);
    harness.bus.set_status1(registers::STATUS1_OVRTEMP);
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);
    assert_eq!(harness.sink.hard_reset_counter.value(), 1);

    // Second: capability timeout, then the soft reset dies in transmission.
    harness.clock.advance(311);
    pump(&mut harness);
    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_RETRYFAIL);
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);
    assert_eq!(harness.sink.hard_reset_counter.value(), 2);

    // Third attempt exhausts the counter.
    harness.clock.advance(311);
    pump(&mut harness);
    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_RETRYFAIL);
    assert!(harness.sink.irq_occurred());
    for _ in 0..8 {
        if harness.sink.state == State::SourceUnresponsive {
            break;
        }
        harness.sink.run_step();
    }

    assert_eq!(harness.sink.state, State::SourceUnresponsive);
    assert!(!harness.sink.has_negotiated());
    assert!(harness.sink.setup_complete_or_timed_out(0));

    // The resting state loops in place.
    assert!(harness.sink.run_step());
    assert_eq!(harness.sink.state, State::SourceUnresponsive);
}

#[test]
fn good_crc_with_wrong_id_aborts_the_transmission() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    harness.sink.request_source_capabilities();
    pump(&mut harness);
    let request = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        request.header().message_type(),
        MessageType::Control(ControlMessageType::GetSourceCap)
    );
    assert_eq!(request.header().message_id(), 1);

    // Acknowledge with the wrong message ID.
    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_TXSENT);
    let mut good_crc = Message::new_control(source_header_template(), ControlMessageType::GoodCRC);
    good_crc.set_header(good_crc.header().with_message_id(5));
    harness.bus.inject_message(&good_crc);
    assert!(harness.sink.irq_occurred());

    assert!(harness.sink.run_step());
    assert!(harness.sink.run_step());
    assert_eq!(harness.sink.state, State::HardReset);
    assert!(harness.sink.events.contains(Notification::TransmitError));
    // The counter does not advance on a bad acknowledgement.
    assert_eq!(harness.sink.tx_message_id.value(), 1);
}

#[test]
fn rejection_without_contract_waits_for_new_capabilities() {
    let mut harness = harness(SinkConfig::default());
    pump(&mut harness);
    harness.bus.inject_message(&mock_capabilities(false));
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);
    harness.bus.take_tx();
    confirm_tx(&mut harness, 0);

    inject_control(&mut harness, ControlMessageType::Reject, 1);
    pump(&mut harness);

    assert!(!harness.sink.has_explicit_contract());
    assert_eq!(harness.sink.wait.resume, State::WaitCap);
}

#[test]
fn wire_soft_reset_restarts_negotiation() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    // A Soft_Reset on the wire becomes a Reset notification, not a queued
    // message, and restarts the machine through its default state.
    inject_control(&mut harness, ControlMessageType::SoftReset, 3);
    assert!(harness.sink.incoming.is_empty());
    pump(&mut harness);

    assert!(!harness.sink.has_explicit_contract());
    assert_eq!(harness.sink.wait.resume, State::WaitCap);
}

#[test]
fn pps_contract_rerequests_periodically() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    harness.clock.advance(1001);
    harness.sink.tick();
    pump(&mut harness);

    // The cached request is re-sent verbatim, with the next message ID.
    let request = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        request.header().message_type(),
        MessageType::Data(DataMessageType::Request)
    );
    assert_eq!(request.header().message_id(), 1);
    assert_eq!(request.object(0), 0x7308_342D);

    // Within the period, the tick stays quiet.
    confirm_tx(&mut harness, 1);
    inject_control(&mut harness, ControlMessageType::Accept, 4);
    pump(&mut harness);
    inject_control(&mut harness, ControlMessageType::PsRdy, 5);
    pump(&mut harness);
    harness.clock.advance(500);
    harness.sink.tick();
    assert!(harness.sink.events.is_empty());
}

#[test]
fn answers_get_sink_cap() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    inject_control(&mut harness, ControlMessageType::GetSinkCap, 3);
    pump(&mut harness);

    let capabilities = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        capabilities.header().message_type(),
        MessageType::Data(DataMessageType::SinkCapabilities)
    );
    // Stamped with the engine's current transmit counter.
    assert_eq!(capabilities.header().message_id(), 1);
    // Under PD 3.0 the advertisement is 5 V, 20 V and a PPS APDO.
    assert_eq!(capabilities.header().num_objects(), 3);

    let vsafe_5v = crate::protocol_layer::message::pdo::SinkFixedSupply(capabilities.object(0));
    assert_eq!(vsafe_5v.raw_voltage(), 100);
    assert!(vsafe_5v.usb_communications_capable());
    assert!(vsafe_5v.higher_capability());
}

#[test]
fn enters_epr_and_reassembles_chunked_capabilities() {
    let mut harness = harness(SinkConfig {
        device_epr_wattage: 140,
        signal_hard_reset: false,
    });

    // SPR negotiation against an EPR-capable source queues the mode upgrade.
    reach_ready(&mut harness, true);
    assert!(harness.sink.negotiating_epr);
    pump(&mut harness);

    // The engine asks to enter EPR mode with its wattage.
    let enter = parse_frame(&harness.bus.take_tx());
    assert_eq!(enter.header().message_type(), MessageType::Data(DataMessageType::EprMode));
    let mode = EprModeDataObject(enter.object(0));
    assert_eq!(mode.action_kind(), Some(Action::Enter));
    assert_eq!(mode.data(), 140);
    confirm_tx(&mut harness, 1);

    // The source reports successful entry.
    let mut succeeded = Message::new_data(source_header_template(), DataMessageType::EprMode, 1);
    succeeded.set_header(succeeded.header().with_message_id(3));
    succeeded.set_object(0, EprModeDataObject(0).with_action(Action::EnterSucceeded as u8).0);
    harness.bus.inject_message(&succeeded);
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);
    assert!(harness.sink.is_epr());

    // 40 bytes of EPR capabilities arrive in two chunks of 26 and 14 bytes.
    let mut full = [0u8; 40];
    for (index, byte) in full.iter_mut().enumerate() {
        *byte = index as u8;
    }
    full[..4].copy_from_slice(
        &crate::protocol_layer::message::pdo::FixedSupply(0)
            .with_raw_voltage(100)
            .with_raw_max_current(300)
            .0
            .to_le_bytes(),
    );

    let mut chunk_0 = Message::new_extended(source_header_template(), ExtendedMessageType::EprSourceCapabilities, 7);
    chunk_0.set_header(chunk_0.header().with_message_id(4));
    chunk_0.set_extended_header(ExtendedHeader::new(40).with_chunked(true).with_chunk_number(0));
    chunk_0.chunk_data_mut()[..26].copy_from_slice(&full[..26]);
    harness.bus.inject_message(&chunk_0);
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);

    // The engine requests chunk 1.
    let chunk_request = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        chunk_request.header().message_type(),
        MessageType::Extended(ExtendedMessageType::EprSourceCapabilities)
    );
    assert!(chunk_request.extended_header().request_chunk());
    assert!(chunk_request.extended_header().chunked());
    assert_eq!(chunk_request.extended_header().chunk_number(), 1);
    assert_eq!(chunk_request.header().num_objects(), 1);
    confirm_tx(&mut harness, 2);
    assert_eq!(harness.sink.wait.resume, State::WaitForEprChunk);

    let mut chunk_1 = Message::new_extended(source_header_template(), ExtendedMessageType::EprSourceCapabilities, 4);
    chunk_1.set_header(chunk_1.header().with_message_id(5));
    chunk_1.set_extended_header(ExtendedHeader::new(40).with_chunked(true).with_chunk_number(1));
    chunk_1.chunk_data_mut()[..14].copy_from_slice(&full[26..]);
    harness.bus.inject_message(&chunk_1);
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);

    // Reassembly is complete and the EPR request went out.
    assert_eq!(harness.sink.epr_capabilities.data_size(), 40);
    assert_eq!(&harness.sink.epr_capabilities.data()[..40], &full);

    let epr_request = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        epr_request.header().message_type(),
        MessageType::Data(DataMessageType::EprRequest)
    );
    assert_eq!(epr_request.header().num_objects(), 2);
    assert_eq!(epr_request.object(1), u32::from_le_bytes(full[..4].try_into().unwrap()));

    confirm_tx(&mut harness, 3);
    inject_control(&mut harness, ControlMessageType::Accept, 6);
    pump(&mut harness);
    inject_control(&mut harness, ControlMessageType::PsRdy, 7);
    pump(&mut harness);

    assert!(harness.sink.is_epr());
    assert!(harness.sink.has_explicit_contract());
    assert!(!harness.sink.negotiating_epr);
    assert_eq!(harness.sink.wait.resume, State::Ready);
}

#[test]
fn epr_contract_sends_keep_alive() {
    let mut harness = harness(SinkConfig {
        device_epr_wattage: 140,
        signal_hard_reset: false,
    });
    reach_ready(&mut harness, true);
    // Let the queued EPR_Mode (Enter) transmission complete.
    harness.bus.take_tx();
    confirm_tx(&mut harness, 1);

    // Fake an established EPR contract without the chunk dance.
    harness.sink.is_epr = true;
    harness.sink.negotiating_epr = false;

    harness.clock.advance(201);
    harness.sink.tick();
    pump(&mut harness);

    // A keep-alive extended control message goes out.
    let keep_alive = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        keep_alive.header().message_type(),
        MessageType::Extended(ExtendedMessageType::ExtendedControl)
    );
    assert_eq!(keep_alive.extended_header().data_size(), 2);
    assert_eq!(keep_alive.chunk_data()[0], ExtendedControlMessageType::EprKeepAlive as u8);
    assert!(harness.sink.negotiating_epr);

    // Acknowledge the transmission and answer with EPR_KeepAlive_Ack.
    harness.bus.raise_interrupt_a(registers::INTERRUPTA_I_TXSENT);
    let mut good_crc = Message::new_control(source_header_template(), ControlMessageType::GoodCRC);
    good_crc.set_header(good_crc.header().with_message_id(harness.sink.tx_message_id.value()));
    harness.bus.inject_message(&good_crc);

    let mut ack = Message::new_extended(source_header_template(), ExtendedMessageType::ExtendedControl, 1);
    ack.set_header(ack.header().with_message_id(4));
    ack.set_extended_header(ExtendedHeader::new(2).with_chunked(true));
    ack.chunk_data_mut()[0] = ExtendedControlMessageType::EprKeepAliveAck as u8;
    harness.bus.inject_message(&ack);

    assert!(harness.sink.irq_occurred());
    pump(&mut harness);

    assert!(!harness.sink.negotiating_epr);
    assert!(harness.sink.is_epr());
    assert_eq!(harness.sink.wait.resume, State::Ready);
}

#[test]
fn unsolicited_capabilities_in_ready_renegotiate() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    // The source advertises new capabilities; the engine re-requests.
    harness.bus.inject_message(&mock_capabilities(false));
    assert!(harness.sink.irq_occurred());
    pump(&mut harness);

    let request = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        request.header().message_type(),
        MessageType::Data(DataMessageType::Request)
    );
    assert_eq!(request.object(0), 0x7308_342D);
}

#[test]
fn minimal_device_requests_safe_5v() {
    let bus = DummyBus::new();
    let mut sink = Sink::new(
        Fusb302b::new(bus.clone(), TEST_ADDRESS),
        DummyClock::new(),
        crate::dummy::MinimalDevice,
        SinkConfig::default(),
    );

    while sink.run_step() {}
    bus.inject_message(&mock_capabilities(false));
    assert!(sink.irq_occurred());
    while sink.run_step() {}

    let frame = bus.take_tx();
    let request = Message::from_bytes(&frame[5..frame.len() - 4]);
    assert_eq!(
        request.header().message_type(),
        MessageType::Data(DataMessageType::Request)
    );

    let object = crate::protocol_layer::message::request::FixedVariableSupply(request.object(0));
    assert_eq!(object.object_position(), 1);
    assert_eq!(object.raw_operating_current(), 10);
    assert!(object.usb_communications_capable());
}

#[test]
fn unsupported_requests_are_rejected() {
    let mut harness = harness(SinkConfig::default());
    reach_ready(&mut harness, false);

    inject_control(&mut harness, ControlMessageType::DrSwap, 3);
    pump(&mut harness);

    // PD 3.0 answers with Not_Supported.
    let response = parse_frame(&harness.bus.take_tx());
    assert_eq!(
        response.header().message_type(),
        MessageType::Control(ControlMessageType::NotSupported)
    );
}
