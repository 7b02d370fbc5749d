mod common;

use common::{uid, SimBus, SimClock, SimResponder, LARGE_PARAMETER};
use dmx_rdm_node::consts::{INTER_FRAME_IDLE_MICROS, MIN_BREAK_MICROS, MIN_MAB_MICROS, SLOT_MICROS};
use dmx_rdm_node::dmx_port::{DmxError, DmxPort, DmxTiming, PortDirection};
use dmx_rdm_node::rdm_data::{RdmData, RdmRequestData};
use dmx_rdm_node::status::{PortFault, PortStatus};
use dmx_rdm_node::types::{DataPack, RequestCommandClass};
use dmx_rdm_node::unique_identifier::{PackageAddress, UniqueIdentifier};

fn port<'a>(clock: &SimClock, status: &'a PortStatus) -> DmxPort<'a, SimBus, SimClock> {
    DmxPort::new(
        SimBus::new(clock.clone(), vec![]),
        clock.clone(),
        DmxTiming::default(),
        status,
    )
}

/// Polls the port like the signal task does until `count` frames were sent.
fn run_frames(port: &mut DmxPort<'_, SimBus, SimClock>, clock: &SimClock, frame: &[u8], count: usize) {
    let mut sent = 0;
    while sent < count {
        match port.poll(frame) {
            Some(_) => sent += 1,
            None => clock.advance(port.time_until_next_event_us().max(1)),
        }
    }
}

#[test]
fn test_frame_timing() {
    let clock = SimClock::new(5_000);
    let status = PortStatus::new();
    let mut port = port(&clock, &status);
    let mut frame = [0u8; 513];
    frame[1..].fill(0x7F);

    let report = port.poll(&frame).unwrap();
    assert!(report.break_us >= MIN_BREAK_MICROS);
    assert!(report.mark_after_break_us >= MIN_MAB_MICROS);
    assert_eq!(report.slots, 513);

    let expected = report.break_us + report.mark_after_break_us + SLOT_MICROS * 513;
    assert!(report.duration_us.abs_diff(expected) <= SLOT_MICROS);

    let sent = &port.driver().frames[0];
    assert!(sent.timing.break_us as u64 >= MIN_BREAK_MICROS);
    assert!(sent.timing.mark_after_break_us as u64 >= MIN_MAB_MICROS);
    assert_eq!(sent.data, frame.to_vec());
}

#[test]
fn test_frames_are_spaced_by_the_period() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = port(&clock, &status);
    let frame = [0u8; 513];

    run_frames(&mut port, &clock, &frame, 5);

    let period = DmxTiming::default().frame_period_us(513);
    let frames = port.driver().dmx_frames();
    for pair in frames.windows(2) {
        assert_eq!(pair[1].started_us - pair[0].started_us, period);
    }
    assert_eq!(status.snapshot().frames_sent, 5);
}

#[test]
fn test_short_frames_respect_the_refresh_ceiling() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = port(&clock, &status);
    let frame = [0u8; 25];

    run_frames(&mut port, &clock, &frame, 3);

    let frames = port.driver().dmx_frames();
    for pair in frames.windows(2) {
        assert!(pair[1].started_us - pair[0].started_us >= 1_000_000 / 44);
    }
}

#[test]
fn test_driver_fault_abandons_frame() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = port(&clock, &status);
    let frame = [0u8; 513];

    port.driver_mut().fail_writes = true;
    assert!(port.poll(&frame).is_none());

    let snapshot = status.snapshot();
    assert_eq!(snapshot.frame_faults, 1);
    assert_eq!(snapshot.frames_sent, 0);
    assert_eq!(snapshot.last_fault, PortFault::FrameWrite);

    // no retry, the next frame keeps its slot
    assert_eq!(
        port.time_until_next_event_us(),
        DmxTiming::default().frame_period_us(513)
    );

    port.driver_mut().fail_writes = false;
    run_frames(&mut port, &clock, &frame, 1);
    assert_eq!(clock_of_first_frame(&port), DmxTiming::default().frame_period_us(513));
}

fn clock_of_first_frame(port: &DmxPort<'_, SimBus, SimClock>) -> u64 {
    port.driver().frames[0].started_us
}

#[test]
fn test_overrun_turnaround_is_reclaimed() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = port(&clock, &status);
    let frame = [0u8; 513];

    port.request_turnaround().unwrap();
    assert!(matches!(port.direction(), PortDirection::TurnedAround { .. }));
    assert!(matches!(
        port.transmit_frame(&frame),
        Err(DmxError::LineBusy)
    ));
    assert!(matches!(port.request_turnaround(), Err(DmxError::LineBusy)));
    assert_eq!(port.turnaround_window_us(), 0);

    clock.advance(1_000);
    assert!(port.poll(&frame).is_none());
    assert_eq!(status.snapshot().turnaround_timeouts, 0);

    clock.set(DmxTiming::default().turnaround_timeout_us());
    assert!(port.poll(&frame).is_none());
    assert_eq!(port.direction(), PortDirection::Framing);

    let snapshot = status.snapshot();
    assert_eq!(snapshot.turnaround_timeouts, 1);
    assert_eq!(snapshot.last_fault, PortFault::TurnaroundTimeout);
    assert_eq!(snapshot.frame_faults, 0);

    assert_eq!(port.time_until_next_event_us(), INTER_FRAME_IDLE_MICROS);
    clock.advance(INTER_FRAME_IDLE_MICROS);
    assert!(port.poll(&frame).is_some());
}

#[test]
fn test_rdm_receive_requires_turnaround() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = port(&clock, &status);

    assert!(matches!(port.rdm_receive(), Err(DmxError::NotTurnedAround)));

    port.request_turnaround().unwrap();
    assert!(matches!(port.rdm_receive(), Err(DmxError::TimeoutError)));
    port.release_turnaround();
    assert_eq!(port.direction(), PortDirection::Framing);
}

#[test]
fn test_oversized_response_does_not_delay_the_next_frame() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = DmxPort::new(
        SimBus::new(clock.clone(), vec![SimResponder::new(uid(7))]),
        clock.clone(),
        DmxTiming::default(),
        &status,
    );
    let frame = [0u8; 513];

    run_frames(&mut port, &clock, &frame, 1);
    port.request_turnaround().unwrap();

    let request = RdmRequestData {
        destination_uid: PackageAddress::Device(uid(7)),
        source_uid: UniqueIdentifier::PROTOTYPE,
        transaction_number: 1,
        port_id: 1,
        message_count: 0,
        sub_device: 0,
        command_class: RequestCommandClass::GetCommand,
        parameter_id: LARGE_PARAMETER,
        parameter_data: DataPack::new(),
    };
    port.rdm_send(&RdmData::Request(request)).unwrap();
    assert!(matches!(port.rdm_receive(), Err(DmxError::WindowExceeded)));
    port.release_turnaround();

    let snapshot = status.snapshot();
    assert_eq!(snapshot.last_fault, PortFault::WindowExceeded);

    run_frames(&mut port, &clock, &frame, 1);
    let frames = port.driver().dmx_frames();
    assert_eq!(
        frames[1].started_us - frames[0].started_us,
        DmxTiming::default().frame_period_us(513)
    );
}
