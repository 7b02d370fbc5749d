mod common;

use common::{uid, SimBus, SimClock, SimResponder, IDENTIFY_DEVICE};
use dmx_rdm_node::clock::Clock;
use dmx_rdm_node::dmx_port::{DmxPort, DmxTiming};
use dmx_rdm_node::rdm_controller::{RdmController, RdmControllerConfig, RdmEvent};
use dmx_rdm_node::rdm_types::DmxStartAddress;
use dmx_rdm_node::status::PortStatus;
use dmx_rdm_node::unique_identifier::UniqueIdentifier;

type SimPort<'a> = DmxPort<'a, SimBus, SimClock>;
type Event = RdmEvent<&'static str>;

const MAX_FRAMES: usize = 50_000;

fn setup<'a>(
    clock: &SimClock,
    status: &'a PortStatus,
    uids: &[UniqueIdentifier],
) -> SimPort<'a> {
    let responders = uids.iter().copied().map(SimResponder::new).collect();

    DmxPort::new(
        SimBus::new(clock.clone(), responders),
        clock.clone(),
        DmxTiming::default(),
        status,
    )
}

/// Runs frames with one controller step after each of them until `done` returns true for an
/// event. Returns every event seen.
fn run_until(
    port: &mut SimPort<'_>,
    controller: &mut RdmController<&'static str>,
    clock: &SimClock,
    mut done: impl FnMut(&Event) -> bool,
) -> Vec<Event> {
    let frame = [0u8; 513];
    let mut events = Vec::new();

    for _ in 0..MAX_FRAMES {
        if port.poll(&frame).is_none() {
            clock.advance(port.time_until_next_event_us().max(1));
            continue;
        }

        let mut finished = false;
        let mut event = controller.step(port);
        while let Some(current) = event {
            finished |= done(&current);
            events.push(current);
            event = controller.next_event();
        }

        if finished {
            return events;
        }
    }

    panic!("controller did not finish within {MAX_FRAMES} frames");
}

fn discovery_finished(event: &Event) -> bool {
    matches!(event, RdmEvent::DiscoveryFinished { .. })
}

fn found(events: &[Event]) -> Vec<UniqueIdentifier> {
    events
        .iter()
        .filter_map(|event| match event {
            RdmEvent::DeviceFound(uid) => Some(*uid),
            _ => None,
        })
        .collect()
}

#[test]
fn test_single_device() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(42)]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert_eq!(found(&events), vec![uid(42)]);
    assert!(matches!(
        events.last(),
        Some(RdmEvent::DiscoveryFinished {
            devices: 1,
            branch_requests: 2
        })
    ));
    assert_eq!(port.driver().responder(uid(42)).mute_count, 1);
    assert!(controller.device(uid(42)).unwrap().muted);
}

#[test]
fn test_finds_every_device_once() {
    let uids = [
        uid(1),
        uid(2),
        uid(3),
        uid(0x8000_0000),
        uid(0xFFFF_FFFF),
        UniqueIdentifier::new(0x0001, 0x0000_0001).unwrap(),
        UniqueIdentifier::new(0x7FF0, 0x1234_5678).unwrap(),
    ];
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &uids);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    let mut discovered = found(&events);
    discovered.sort();
    let mut expected = uids.to_vec();
    expected.sort();
    assert_eq!(discovered, expected);

    for uid in uids {
        assert_eq!(port.driver().responder(uid).mute_count, 1);
    }

    let branch_requests = match events.last() {
        Some(RdmEvent::DiscoveryFinished {
            devices,
            branch_requests,
        }) => {
            assert_eq!(*devices, uids.len());
            *branch_requests
        },
        event => panic!("unexpected event {event:?}"),
    };
    assert_eq!(branch_requests, port.driver().branch_requests);
    assert!(branch_requests as usize <= 2 * 48 * uids.len() + uids.len() + 1);

    // the bus never carried a frame while the line was turned around
    let snapshot = status.snapshot();
    assert_eq!(snapshot.turnaround_timeouts, 0);
    assert_eq!(snapshot.frame_faults, 0);
}

#[test]
fn test_empty_bus() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert!(found(&events).is_empty());
    assert!(controller.devices().is_empty());
    assert!(!controller.is_discovering());
}

#[test]
fn test_device_info_is_cached_after_discovery() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(7), uid(8)]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    run_until(&mut port, &mut controller, &clock, discovery_finished);
    assert_eq!(controller.pending_requests(), 2);

    let mut responses = 0;
    run_until(&mut port, &mut controller, &clock, |event| {
        if matches!(event, RdmEvent::Response { .. }) {
            responses += 1;
        }
        responses == 2
    });

    for uid in [uid(7), uid(8)] {
        let parameters = controller.device(uid).unwrap().parameters.unwrap();
        assert_eq!(parameters.dmx_footprint, 4);
        assert_eq!(parameters.dmx_personality_count, 2);
        assert_eq!(parameters.dmx_start_address, DmxStartAddress::Address(1));
    }
    assert!(controller.take_table_changed());

    controller.set_start_address(uid(7).into(), 100).unwrap();
    run_until(&mut port, &mut controller, &clock, |event| {
        matches!(event, RdmEvent::Response { result: Ok(_), .. })
    });
    assert_eq!(port.driver().responder(uid(7)).start_address, 100);
    assert_eq!(
        controller.device(uid(7)).unwrap().parameters.unwrap().dmx_start_address,
        DmxStartAddress::Address(100)
    );
}

#[test]
fn test_unreachable_device_is_removed() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(5), uid(6)]);
    let mut config = RdmControllerConfig::default();
    config.rediscovery_interval_us = 0;
    let mut controller = RdmController::new(config);

    run_until(&mut port, &mut controller, &clock, discovery_finished);
    let mut responses = 0;
    run_until(&mut port, &mut controller, &clock, |event| {
        if matches!(event, RdmEvent::Response { .. }) {
            responses += 1;
        }
        responses == 2
    });

    port.driver_mut().responder_mut(uid(5)).silent = true;
    controller.identify(uid(5).into(), true).unwrap();

    let events = run_until(&mut port, &mut controller, &clock, |event| {
        matches!(event, RdmEvent::Response { .. })
    });

    match events.last() {
        Some(RdmEvent::Response { result: Err(error), .. }) => assert!(error.is_timeout()),
        event => panic!("unexpected event {event:?}"),
    }
    assert!(events
        .iter()
        .any(|event| matches!(event, RdmEvent::DeviceLost(lost) if *lost == uid(5))));
    assert!(controller.device(uid(5)).is_none());
    assert!(controller.device(uid(6)).is_some());

    // the first attempt and both retries
    let attempts = port
        .driver()
        .rdm_requests
        .iter()
        .filter(|request| request.parameter_id == IDENTIFY_DEVICE)
        .count();
    assert_eq!(attempts, 3);
    assert_eq!(status.snapshot().rdm_timeouts, 3);

    // framing goes on within one period
    let failed_at = clock.now_us();
    let frame = [0u8; 513];
    while port.poll(&frame).is_none() {
        clock.advance(port.time_until_next_event_us().max(1));
    }
    let frames = port.driver().dmx_frames();
    let resumed_at = frames.last().unwrap().started_us;
    assert!(resumed_at - failed_at <= DmxTiming::default().frame_period_us(513));
}

#[test]
fn test_rediscovery_drops_missing_devices() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(10), uid(11), uid(12)]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    run_until(&mut port, &mut controller, &clock, discovery_finished);
    assert_eq!(controller.devices().len(), 3);

    port.driver_mut().responder_mut(uid(11)).silent = true;
    status.request_discovery();

    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert!(events
        .iter()
        .any(|event| matches!(event, RdmEvent::DeviceLost(lost) if *lost == uid(11))));
    // known devices are muted again but not reported twice
    assert!(found(&events).is_empty());
    assert_eq!(controller.devices().len(), 2);
    assert_eq!(port.driver().responder(uid(10)).mute_count, 2);
}

#[test]
fn test_periodic_rediscovery() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(20)]);
    let mut config = RdmControllerConfig::default();
    config.rediscovery_interval_us = 1_000_000;
    let mut controller = RdmController::new(config);

    run_until(&mut port, &mut controller, &clock, discovery_finished);
    let first_finished = clock.now_us();

    port.driver_mut().responders.push(SimResponder::new(uid(21)));
    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert!(clock.now_us() - first_finished >= 1_000_000);
    assert_eq!(found(&events), vec![uid(21)]);
    assert_eq!(controller.devices().len(), 2);
}

fn lost(events: &[Event]) -> Vec<UniqueIdentifier> {
    events
        .iter()
        .filter_map(|event| match event {
            RdmEvent::DeviceLost(uid) => Some(*uid),
            _ => None,
        })
        .collect()
}

#[test]
fn test_failed_branch_request_is_repeated() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(30), uid(31), uid(32)]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    run_until(&mut port, &mut controller, &clock, discovery_finished);
    assert_eq!(controller.devices().len(), 3);

    port.driver_mut().failing_branches = 1;
    status.request_discovery();
    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert!(lost(&events).is_empty());
    assert!(matches!(
        events.last(),
        Some(RdmEvent::DiscoveryFinished { devices: 3, .. })
    ));
    for uid in [uid(30), uid(31), uid(32)] {
        assert_eq!(port.driver().responder(uid).mute_count, 2);
    }
    assert_eq!(port.driver().failing_branches, 0);
}

#[test]
fn test_broken_branching_keeps_the_device_table() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(40), uid(41)]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    run_until(&mut port, &mut controller, &clock, discovery_finished);
    assert_eq!(controller.devices().len(), 2);

    port.driver_mut().failing_branches = u32::MAX;
    status.request_discovery();
    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert!(lost(&events).is_empty());
    assert!(matches!(
        events.last(),
        Some(RdmEvent::DiscoveryFinished { devices: 2, .. })
    ));
    assert!(controller.device(uid(40)).is_some());
    assert!(controller.device(uid(41)).is_some());
    // the first attempt and both retries
    assert_eq!(port.driver().failing_branches, u32::MAX - 3);

    // a working bus removes missing devices again
    port.driver_mut().failing_branches = 0;
    port.driver_mut().responder_mut(uid(41)).silent = true;
    status.request_discovery();
    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);
    assert_eq!(lost(&events), vec![uid(41)]);
}

#[test]
fn test_mute_response_binding_uid_is_recorded() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let primary = uid(50);
    let mut port = setup(&clock, &status, &[uid(51)]);
    let mut mute_response = vec![0, 0];
    mute_response.extend_from_slice(&primary.to_bytes());
    port.driver_mut().responder_mut(uid(51)).mute_response = mute_response;
    let mut controller = RdmController::new(RdmControllerConfig::default());

    run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert_eq!(controller.device(uid(51)).unwrap().binding_uid, Some(primary));
}

#[test]
fn test_malformed_mute_response_is_not_a_mute() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(60)]);
    port.driver_mut().responder_mut(uid(60)).mute_response = vec![0x01];
    let mut controller = RdmController::new(RdmControllerConfig::default());

    let events = run_until(&mut port, &mut controller, &clock, discovery_finished);

    assert!(found(&events).is_empty());
    assert!(controller.devices().is_empty());
    // the first attempt and both retries
    assert_eq!(port.driver().responder(uid(60)).mute_count, 3);
}

#[test]
fn test_stale_response_is_discarded_and_counted() {
    let clock = SimClock::new(0);
    let status = PortStatus::new();
    let mut port = setup(&clock, &status, &[uid(70)]);
    let mut controller = RdmController::new(RdmControllerConfig::default());

    run_until(&mut port, &mut controller, &clock, discovery_finished);

    port.driver_mut().stray_response = true;
    controller.identify(uid(70).into(), true).unwrap();
    let events = run_until(&mut port, &mut controller, &clock, |event| {
        matches!(event, RdmEvent::Response { request, .. } if request.parameter_id == IDENTIFY_DEVICE)
    });

    assert!(matches!(
        events.last(),
        Some(RdmEvent::Response { result: Ok(_), .. })
    ));
    assert!(port.driver().responder(uid(70)).identify);
    assert_eq!(status.snapshot().discarded_responses, 1);
}
