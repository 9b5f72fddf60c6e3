//! Tests for routing module

use super::*;
use crate::gateway::VirtualGateway;
use crate::stream::testing::Recorder;

fn ch(n: u8) -> Channel {
    Channel::new(n).unwrap()
}

fn make_routing(source: u8, voices: &[u8]) -> RoutingConfig {
    RoutingConfig {
        source_channel: ch(source),
        voices: voices.iter().map(|n| ch(*n)).collect(),
    }
}

fn make_gateway(sources: &[&str], destinations: &[&str]) -> (VirtualGateway, Arc<dyn MidiGateway>) {
    let devices = VirtualGateway::new();
    for name in sources {
        devices.add_source(name);
    }
    for name in destinations {
        devices.add_destination(name);
    }
    let shared: Arc<dyn MidiGateway> = Arc::new(devices.clone());
    (devices, shared)
}

#[test]
fn test_two_notes_split_across_voices() {
    let (devices, gateway) = make_gateway(&["keys"], &["synth"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1, 2]));
    let deliveries = Recorder::attach(&router.deliveries());

    devices.inject("keys", Command::note_on(ch(0), 60, 100, 1));
    devices.inject("keys", Command::note_on(ch(0), 64, 100, 2));
    devices.inject("keys", Command::note_off(ch(0), 60, 0, 3));
    devices.inject("keys", Command::note_off(ch(0), 64, 0, 4));

    assert_eq!(
        devices.sent_to("synth"),
        vec![
            Command::note_on(ch(1), 60, 100, 1),
            Command::note_on(ch(2), 64, 100, 2),
            Command::note_off(ch(1), 60, 0, 3),
            Command::note_off(ch(2), 64, 0, 4),
        ]
    );
    assert!(deliveries.values().iter().all(Delivery::is_ok));
}

#[test]
fn test_every_destination_receives_each_command() {
    let (devices, gateway) = make_gateway(&["keys"], &["a", "b"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1]));
    let deliveries = Recorder::attach(&router.deliveries());

    devices.inject("keys", Command::note_on(ch(0), 60, 100, 0));

    let expected = vec![Command::note_on(ch(1), 60, 100, 0)];
    assert_eq!(devices.sent_to("a"), expected);
    assert_eq!(devices.sent_to("b"), expected);
    assert_eq!(deliveries.values().len(), 2);
}

#[test]
fn test_failed_send_is_reported_and_pipeline_continues() {
    let (devices, gateway) = make_gateway(&["keys"], &["good", "bad"]);
    devices.fail_sends_to("bad");
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1]));
    let deliveries = Recorder::attach(&router.deliveries());

    devices.inject("keys", Command::control_change(ch(0), 7, 100, 0));
    devices.inject("keys", Command::control_change(ch(0), 7, 90, 1));

    assert_eq!(devices.sent_to("good").len(), 2);
    let failures: Vec<Delivery> = deliveries.values().into_iter().filter(|d| !d.is_ok()).collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|d| d.destination.name() == "bad"));
    assert!(matches!(failures[0].outcome, Err(MidiError::Send { .. })));
    assert!(deliveries.error().is_none());
    assert!(!deliveries.is_completed());
}

#[test]
fn test_endpoint_patterns_limit_routing() {
    let (devices, gateway) =
        make_gateway(&["Keystation", "X-Touch"], &["loopMIDI Port", "Speakers"]);
    let midi = MidiConfig {
        sources: EndpointPatterns::new(["keystation"]),
        destinations: EndpointPatterns::new(["loopmidi"]),
        ..MidiConfig::default()
    };
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1])).with_endpoints(&midi);
    let _deliveries = Recorder::attach(&router.deliveries());

    devices.inject("X-Touch", Command::note_on(ch(0), 1, 1, 0));
    devices.inject("Keystation", Command::note_on(ch(0), 2, 1, 0));

    assert_eq!(devices.sent_to("loopMIDI Port"), vec![Command::note_on(ch(1), 2, 1, 0)]);
    assert!(devices.sent_to("Speakers").is_empty());
}

#[test]
fn test_voice_channel_change_applies_to_next_note() {
    let (devices, gateway) = make_gateway(&["keys"], &["synth"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1, 2]));
    let _deliveries = Recorder::attach(&router.deliveries());

    router.set_voice_channel(0, ch(9)).unwrap();
    devices.inject("keys", Command::note_on(ch(0), 60, 100, 0));

    assert_eq!(devices.sent_to("synth"), vec![Command::note_on(ch(9), 60, 100, 0)]);
    assert_eq!(router.voice_channels(), vec![ch(9), ch(2)]);
}

#[test]
fn test_set_voice_channel_out_of_range() {
    let (_devices, gateway) = make_gateway(&[], &[]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1]));

    assert!(router.set_voice_channel(3, ch(4)).is_err());
    assert_eq!(router.voice_channels(), vec![ch(1)]);
}

#[test]
fn test_source_channel_change() {
    let (devices, gateway) = make_gateway(&["keys"], &["synth"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1]));
    let _deliveries = Recorder::attach(&router.deliveries());

    router.set_source_channel(ch(5));
    devices.inject("keys", Command::note_on(ch(0), 60, 100, 0));
    devices.inject("keys", Command::note_on(ch(5), 61, 100, 1));

    assert_eq!(
        devices.sent_to("synth"),
        vec![Command::note_on(ch(0), 60, 100, 0), Command::note_on(ch(1), 61, 100, 1)]
    );
}

#[test]
fn test_apply_adds_a_voice() {
    let (devices, gateway) = make_gateway(&["keys"], &["synth"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1]));
    let processed = Recorder::attach(&router.processed_commands());

    router.apply(&make_routing(0, &[1, 2])).unwrap();
    devices.inject("keys", Command::note_on(ch(0), 60, 100, 0));
    devices.inject("keys", Command::note_on(ch(0), 62, 100, 1));

    assert_eq!(
        processed.values(),
        vec![Command::note_on(ch(1), 60, 100, 0), Command::note_on(ch(2), 62, 100, 1)]
    );
    assert_eq!(devices.open_connections(), 1);
}

#[test]
fn test_apply_rejects_invalid_routing() {
    let (_devices, gateway) = make_gateway(&[], &[]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1, 2]));

    assert!(router.apply(&make_routing(3, &[3])).is_err());
    assert!(router.apply(&make_routing(0, &[])).is_err());
    assert_eq!(router.source_channel(), Some(ch(0)));
    assert_eq!(router.voice_channels(), vec![ch(1), ch(2)]);
}

#[test]
fn test_dispose_closes_sources() {
    let (devices, gateway) = make_gateway(&["a", "b"], &["synth"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1, 2, 3]));
    let deliveries = Recorder::attach(&router.deliveries());
    assert_eq!(devices.open_connections(), 2);

    deliveries.subscription.unsubscribe();
    deliveries.subscription.unsubscribe();
    assert_eq!(devices.open_connections(), 0);
    assert_eq!(devices.connections_closed(), 2);
}

#[test]
fn test_new_destination_joins_fan_out() {
    let (devices, gateway) = make_gateway(&["keys"], &["first"]);
    let router = VoiceRouter::new(gateway, &make_routing(0, &[1]));
    let _deliveries = Recorder::attach(&router.deliveries());

    devices.add_destination("second");
    devices.inject("keys", Command::control_change(ch(0), 1, 2, 0));

    assert_eq!(devices.sent_to("second"), vec![Command::control_change(ch(0), 1, 2, 0)]);
}

#[test]
fn test_polyphonic_split_without_voices_is_identity() {
    let source = LatestValue::with_value(ch(0));
    let split = polyphonic_split(source.observable(), &[]);
    let input = vec![Command::note_on(ch(0), 60, 100, 0)];

    let recorder = Recorder::attach(&Observable::from_iter(input.clone()).through(&split));
    assert_eq!(recorder.values(), input);
}

#[tokio::test]
async fn test_router_shared_across_tasks() {
    let (devices, gateway) = make_gateway(&["keys"], &["synth"]);
    let router = Arc::new(VoiceRouter::new(gateway, &make_routing(0, &[1])));
    let _deliveries = Recorder::attach(&router.deliveries());

    let remote = router.clone();
    tokio::spawn(async move { remote.set_voice_channel(0, ch(7)) })
        .await
        .unwrap()
        .unwrap();

    devices.inject("keys", Command::note_on(ch(0), 60, 100, 0));
    assert_eq!(devices.sent_to("synth"), vec![Command::note_on(ch(7), 60, 100, 0)]);
}
