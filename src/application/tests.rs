use super::*;
use crate::error::J1939Error;
use crate::network::spn::{Spn, SpnLayout, SpnNumeric, SpnStatus};
use crate::network::{build_identifier, parse_identifier, Frame, GenericFrame, J1939Frame};
use crate::physical::mock::{MockBus, MockHelper};
use crate::transport::{TransportConfig, TransportProtocol};
use crate::types::CanFrame;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const DATABASE: &str = r#"[
    {
        "pgn": 61444,
        "name": "Electronic Engine Controller 1",
        "spns": [
            {"number": 899, "name": "Engine Torque Mode", "byteOffset": 0, "bitWidth": 4,
             "kind": "status", "validCodes": {"0": "Low idle governor", "1": "Accelerator pedal"}},
            {"number": 190, "name": "Engine Speed", "byteOffset": 3, "bitWidth": 16,
             "kind": "numeric", "scale": 0.125, "units": "rpm"}
        ]
    },
    {
        "pgn": 65226,
        "name": "Active Diagnostic Trouble Codes",
        "length": 20,
        "spns": [
            {"number": 1213, "name": "Malfunction Indicator Lamp", "byteOffset": 0, "bitOffset": 6,
             "bitWidth": 2, "kind": "status", "validCodes": {"0": "Off", "1": "On"}},
            {"number": 1214, "name": "Suspect Parameter", "byteOffset": 2, "bitWidth": 32,
             "kind": "numeric"}
        ]
    },
    {
        "pgn": 65262,
        "name": "Engine Temperature 1",
        "spns": [
            {"number": 110, "name": "Coolant Temperature", "byteOffset": 0, "bitWidth": 8,
             "kind": "thermometer"}
        ]
    }
]"#;

fn registry() -> SharedRegistry {
    let descriptors: Vec<FrameDescriptor> = serde_json::from_str(DATABASE).unwrap();
    let registry = FrameRegistry::shared();
    {
        let mut registry = registry.write();
        registry.register_predefined_frames();
        let rejected = registry.load_descriptors(&descriptors);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 65262);
        assert_eq!(rejected[0].1, J1939Error::UnknownSpnType("thermometer".into()));
    }
    registry
}

fn sender() -> (FrameSender, MockBus) {
    let helper = MockHelper::new(&["can0", "can1"]);
    let bus = helper.bus();
    let sender = FrameSender::new(registry(), vec![Box::new(helper)], TransportConfig::default())
        .unwrap();
    (sender, bus)
}

fn engine_speed_frame(sender: &mut FrameSender) {
    sender
        .create_frame("eec1", FrameSelector::Pgn(0xF004))
        .unwrap();
}

mod registry_tests {
    use super::*;

    #[test]
    fn test_unknown_lookups_return_nothing() {
        let registry = registry();
        let registry = registry.read();
        let before = registry.len();
        assert!(registry.get_frame_by_title("UndefinedTitle").is_none());
        assert!(registry.get_frame(0xDEADBEEF).is_none());
        assert!(registry.get_frame(0xFEF1).is_none());
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn test_database_frames_are_registered() {
        let registry = registry();
        let registry = registry.read();
        assert_eq!(registry.len(), 6);
        let frame = registry
            .get_frame_by_title("Electronic Engine Controller 1")
            .unwrap();
        assert_eq!(frame.pgn(), 0xF004);
        assert!(registry.get_frame_by_title("Engine Temperature 1").is_none());
    }

    #[test]
    fn test_clones_are_independent() {
        let registry = registry();
        let registry = registry.read();
        let mut first = registry.get_frame(0xF004).unwrap();
        let second = registry.get_frame(0xF004).unwrap();

        first.set_source_address(0x17).unwrap();
        let generic = first.as_generic_mut().unwrap();
        let speed = generic.spn_mut(190).unwrap().as_numeric_mut().unwrap();
        assert!(speed.set_formatted_value(1500.0));

        assert_eq!(second.source_address(), 0);
        assert_eq!(
            second.as_generic().unwrap().spn(190).unwrap().raw_value(),
            0
        );
        let prototype = registry.get_frame(0xF004).unwrap();
        assert_eq!(prototype, second);
        assert_ne!(prototype, first);
    }

    #[test]
    fn test_overlap_then_disjoint_registration() {
        let layout = |byte| SpnLayout::bytes(byte, 2).unwrap();
        let spn = |number, byte| -> Spn {
            SpnNumeric::new(number, "value", layout(byte), 1.0, 0.0, "")
                .unwrap()
                .into()
        };

        let mut frame = GenericFrame::new(0xFEF1).unwrap();
        frame.register_spn(spn(84, 1)).unwrap();
        assert!(matches!(
            frame.register_spn(spn(85, 2)),
            Err(J1939Error::Overlap { .. })
        ));
        frame.register_spn(spn(85, 3)).unwrap();

        for (number, raw) in [(84, 0x1234), (85, 0xBEEF)] {
            let numeric = frame.spn_mut(number).unwrap().as_numeric_mut().unwrap();
            assert!(numeric.set_raw_value(raw));
        }
        let (id, data) = frame.encode().unwrap();
        let mut decoded = GenericFrame::new(0xFEF1).unwrap();
        decoded.register_spn(spn(84, 1)).unwrap();
        decoded.register_spn(spn(85, 3)).unwrap();
        decoded.decode(id, &data).unwrap();
        assert_eq!(decoded.spn(84).unwrap().raw_value(), 0x1234);
        assert_eq!(decoded.spn(85).unwrap().raw_value(), 0xBEEF);
    }
}

mod sender_tests {
    use super::*;

    #[test]
    fn test_create_frame_errors() {
        let (mut sender, _) = sender();
        engine_speed_frame(&mut sender);
        assert_eq!(
            sender
                .create_frame("eec1", FrameSelector::Pgn(0xF004))
                .unwrap_err(),
            J1939Error::NameInUse("eec1".into())
        );
        assert_eq!(
            sender
                .create_frame("x", FrameSelector::Pgn(0xDEADBEEF))
                .unwrap_err(),
            J1939Error::UnknownPgn(0xDEADBEEF)
        );
        assert_eq!(
            sender
                .create_frame("x", FrameSelector::Title("UndefinedTitle".into()))
                .unwrap_err(),
            J1939Error::UnknownTitle("UndefinedTitle".into())
        );
        sender
            .create_frame("req", FrameSelector::Title("Request".into()))
            .unwrap();
        assert_eq!(sender.frame_names(), vec!["eec1", "req"]);
    }

    #[test]
    fn test_send_requires_period_and_interface() {
        let (mut sender, bus) = sender();
        let now = Instant::now();
        engine_speed_frame(&mut sender);

        assert_eq!(
            sender.send("eec1", "can0", now),
            Err(J1939Error::PeriodNotDefined("eec1".into()))
        );
        sender.set_period("eec1", 100).unwrap();
        assert_eq!(
            sender.send("eec1", "vcan7", now),
            Err(J1939Error::UnknownInterface("vcan7".into()))
        );
        assert_eq!(
            sender.send("nope", "can0", now),
            Err(J1939Error::UnknownFrameName("nope".into()))
        );

        sender.send("eec1", "can0", now).unwrap();
        let sent = bus.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].interface, "can0");
        assert_eq!(sent[0].period_ms, 100);
        assert_eq!(sent[0].frame.id, 0x18F00400);
        assert_eq!(
            sent[0].frame.data,
            vec![0xFF, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_edits_refresh_frames_being_sent() {
        let (mut sender, bus) = sender();
        let now = Instant::now();
        engine_speed_frame(&mut sender);
        sender.set_period("eec1", 100).unwrap();
        sender.send("eec1", "can0", now).unwrap();
        sender.send("eec1", "can1", now).unwrap();

        sender.set_spn_value("eec1", 190, 1000.0).unwrap();
        sender.set_spn_value("eec1", 899, 1.0).unwrap();
        sender.set_priority("eec1", 3).unwrap();

        let sent = bus.lock();
        assert_eq!(sent.len(), 8);
        let last = &sent[7];
        assert_eq!(last.interface, "can1");
        assert_eq!(last.frame.id, 0x0CF00400);
        assert_eq!(last.frame.data[..5], [0xF1, 0xFF, 0xFF, 0x40, 0x1F]);
        drop(sent);

        let summary = &sender.list()[0];
        assert_eq!(summary.name, "eec1");
        assert_eq!(summary.id, 0x0CF00400);
        assert_eq!(summary.period_ms, Some(100));
        assert_eq!(summary.interfaces, vec!["can0", "can1"]);
    }

    #[test]
    fn test_unsend_stops_refreshes() {
        let (mut sender, bus) = sender();
        let now = Instant::now();
        engine_speed_frame(&mut sender);
        sender.set_period("eec1", 50).unwrap();
        sender.send("eec1", "can0", now).unwrap();
        sender.send("eec1", "can1", now).unwrap();

        sender.unsend("eec1", Some("can0")).unwrap();
        assert_eq!(sender.list()[0].interfaces, vec!["can1"]);
        sender.unsend("eec1", None).unwrap();
        assert!(sender.list()[0].interfaces.is_empty());

        sender.set_spn_value("eec1", 190, 800.0).unwrap();
        assert_eq!(bus.lock().len(), 2);
        assert!(sender.unsend("nope", None).is_err());
    }

    #[test]
    fn test_rejected_values_leave_frame_unchanged() {
        let (mut sender, _) = sender();
        engine_speed_frame(&mut sender);
        sender
            .create_frame("req", FrameSelector::Pgn(0xEA00))
            .unwrap();
        let before = sender.encode("eec1").unwrap();

        assert!(matches!(
            sender.set_spn_value("eec1", 899, 5.0),
            Err(J1939Error::Validation(_))
        ));
        assert!(sender.set_spn_value("eec1", 899, 0.5).is_err());
        assert!(sender.set_spn_value("eec1", 190, 1.0e6).is_err());
        assert!(sender.set_spn_value("eec1", 191, 1.0).is_err());
        assert!(matches!(
            sender.set_priority("eec1", 8),
            Err(J1939Error::Validation(_))
        ));
        assert!(sender.set_source_address("eec1", 0x100).is_err());
        assert_eq!(sender.encode("eec1").unwrap(), before);

        assert_eq!(
            sender.set_spn_value("req", 1, 1.0),
            Err(J1939Error::NotGenericFrame)
        );
    }

    #[test]
    fn test_long_frame_goes_through_transport() {
        let (mut sender, bus) = sender();
        let now = Instant::now();
        sender
            .create_frame(
                "dm1",
                FrameSelector::Title("Active Diagnostic Trouble Codes".into()),
            )
            .unwrap();
        sender.set_spn_value("dm1", 1213, 1.0).unwrap();

        sender.send("dm1", "can0", now).unwrap();
        {
            let sent = bus.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].frame.id, 0x18ECFF80);
            assert_eq!(
                sent[0].frame.data,
                vec![0x20, 0x14, 0x00, 0x03, 0xFF, 0xCA, 0xFE, 0x00]
            );
            assert_eq!(sent[0].period_ms, 0);
        }

        sender.poll(now + Duration::from_millis(150)).unwrap();
        let sent = bus.lock();
        assert_eq!(sent.len(), 4);
        assert!(sent[1..].iter().all(|entry| entry.frame.id == 0x18EBFF80));
        assert_eq!(sent[1].frame.data[..2], [0x01, 0x7F]);
        assert!(sender.list()[0].interfaces.is_empty());
    }

    #[test]
    fn test_unsend_cancels_transport_sessions() {
        let (mut sender, bus) = sender();
        let now = Instant::now();
        sender
            .create_frame("dm1", FrameSelector::Pgn(0xFECA))
            .unwrap();
        sender.send("dm1", "can0", now).unwrap();
        sender.send("dm1", "can1", now).unwrap();
        assert_eq!(bus.lock().len(), 2);

        sender.unsend("dm1", Some("can0")).unwrap();
        sender.poll(now + Duration::from_millis(150)).unwrap();
        {
            let sent = bus.lock();
            assert_eq!(sent.len(), 5);
            assert!(sent[2..].iter().all(|entry| entry.interface == "can1"));
        }

        sender.send("dm1", "can0", now).unwrap();
        sender.unsend("dm1", None).unwrap();
        sender.poll(now + Duration::from_millis(300)).unwrap();
        assert_eq!(bus.lock().len(), 6);
        assert!(sender.send("dm1", "can0", now).is_ok());
    }

    #[test]
    fn test_receive_single_frame() {
        let (mut sender, _) = sender();
        let now = Instant::now();
        let speed = (1000.0f64 / 0.125) as u16;
        let mut data = vec![0xF1, 0xFF, 0xFF, 0, 0, 0xFF, 0xFF, 0xFF];
        data[3..5].copy_from_slice(&speed.to_le_bytes());
        let frame = CanFrame::extended(0x0CF00417, data);

        let received = sender.handle_frame("can0", &frame, now).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].source_address(), 0x17);
        assert_eq!(received[0].priority(), 3);
        let generic = received[0].as_generic().unwrap();
        assert_eq!(
            generic.spn(190).unwrap().as_numeric().unwrap().formatted_value(),
            1000.0
        );
        assert_eq!(
            generic.spn(899).unwrap().as_status().unwrap().description(),
            Some("Accelerator pedal")
        );

        let unknown = CanFrame::extended(0x18FEF100, vec![0; 8]);
        assert_eq!(
            sender.handle_frame("can0", &unknown, now),
            Err(J1939Error::UnknownPgn(0xFEF1))
        );
    }

    #[test]
    fn test_receive_through_transport() {
        let (mut sender, bus) = sender();
        let now = Instant::now();
        let remote = TransportProtocol::new(TransportConfig {
            source_address: 0x00,
            ..Default::default()
        })
        .unwrap();

        let mut payload = vec![0xFF; 20];
        payload[2..6].copy_from_slice(&0xCAFEu32.to_le_bytes());
        let rts = remote.send(0x80, 0xFECA, 7, &payload, now).unwrap();
        assert!(sender.handle_frame("can0", &rts[0], now).unwrap().is_empty());

        let cts = bus.lock()[0].frame.clone();
        assert_eq!(cts.id, 0x1CEC0080);
        let packets: Vec<CanFrame> = remote
            .handle_frame(&cts, now)
            .unwrap()
            .into_iter()
            .filter_map(|event| match event {
                crate::transport::TransportEvent::Transmit(frame) => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(packets.len(), 3);

        let mut received = Vec::new();
        for packet in &packets {
            received.extend(sender.handle_frame("can0", packet, now).unwrap());
        }
        assert_eq!(received.len(), 1);
        let frame = received[0].as_generic().unwrap();
        assert_eq!(frame.spn(1214).unwrap().raw_value(), 0xCAFE);
        assert_eq!(bus.lock().last().unwrap().frame.data[0], 0x13);
    }

    #[test]
    fn test_backend_failures() {
        let now = Instant::now();
        let mut sender = FrameSender::new(registry(), Vec::new(), TransportConfig::default()).unwrap();
        engine_speed_frame(&mut sender);
        sender.set_period("eec1", 100).unwrap();
        assert_eq!(
            sender.send("eec1", "can0", now),
            Err(J1939Error::NoCanSupport("can0".into()))
        );
        assert!(sender.interfaces().is_empty());

        let helper = MockHelper::new_error(&["can0"]);
        let mut sender =
            FrameSender::new(registry(), vec![Box::new(helper)], TransportConfig::default())
                .unwrap();
        engine_speed_frame(&mut sender);
        sender.set_period("eec1", 100).unwrap();
        assert!(matches!(
            sender.send("eec1", "can0", now),
            Err(J1939Error::Backend(_))
        ));
        assert!(sender.list()[0].interfaces.is_empty());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let registry = registry();
        let helper = MockHelper::new(&["can0"]);
        let mut sender = FrameSender::new(
            registry.clone(),
            vec![Box::new(helper)],
            TransportConfig::default(),
        )
        .unwrap();
        engine_speed_frame(&mut sender);
        sender.set_period("eec1", 100).unwrap();
        sender.send("eec1", "can0", Instant::now()).unwrap();

        sender.shutdown().unwrap();
        assert!(sender.frame_names().is_empty());
        assert!(sender.list().is_empty());
        assert!(registry.read().is_empty());
        assert_eq!(
            sender
                .create_frame("eec1", FrameSelector::Pgn(0xF004))
                .unwrap_err(),
            J1939Error::UnknownPgn(0xF004)
        );
    }
}

fn status_codes() -> BTreeMap<u8, String> {
    [(0u8, "Off"), (1, "On"), (2, "Error")]
        .into_iter()
        .map(|(code, text)| (code, text.to_string()))
        .collect()
}

fn two_spn_frame(pgn: u32) -> GenericFrame {
    let mut frame = GenericFrame::new(pgn).unwrap();
    let speed = SpnNumeric::new(190, "speed", SpnLayout::bytes(3, 2).unwrap(), 0.125, 0.0, "rpm")
        .unwrap();
    let lamp = SpnStatus::new(1213, "lamp", SpnLayout::new(0, 6, 2).unwrap(), status_codes())
        .unwrap();
    frame.register_spn(speed.into()).unwrap();
    frame.register_spn(lamp.into()).unwrap();
    frame
}

proptest! {
    #[test]
    fn identifier_round_trip(priority in 0u8..=7, pgn in 0u32..=0x3FFFF, source in any::<u8>()) {
        let id = build_identifier(priority, pgn, source);
        prop_assert_eq!(parse_identifier(id), (priority, pgn, source));

        let mut frame = GenericFrame::new(pgn).unwrap();
        frame.set_priority(priority as u32).unwrap();
        frame.set_source_address(source as u32).unwrap();
        let (encoded, data) = frame.encode().unwrap();
        let mut decoded = GenericFrame::new(pgn).unwrap();
        decoded.decode(encoded, &data).unwrap();
        prop_assert_eq!(decoded.identifier(), encoded);
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn generic_data_round_trip(raw in 0u32..=0xFFFF, code in 0u8..=2) {
        let mut frame = two_spn_frame(0xF004);
        frame.spn_mut(190).unwrap().as_numeric_mut().unwrap().set_raw_value(raw);
        frame.spn_mut(1213).unwrap().as_status_mut().unwrap().set_value(code);
        let (id, data) = frame.encode().unwrap();

        let mut decoded = two_spn_frame(0xF004);
        decoded.decode(id, &data).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn numeric_value_within_resolution(value in 0.0f64..=8191.875) {
        let mut frame = two_spn_frame(0xF004);
        let speed = frame.spn_mut(190).unwrap().as_numeric_mut().unwrap();
        prop_assert!(speed.set_formatted_value(value));
        prop_assert!((speed.formatted_value() - value).abs() <= speed.scale());
    }

    #[test]
    fn numeric_out_of_range_is_rejected(value in 8192.0f64..1.0e9) {
        let mut frame = two_spn_frame(0xF004);
        let speed = frame.spn_mut(190).unwrap().as_numeric_mut().unwrap();
        prop_assert!(speed.set_formatted_value(100.0));
        prop_assert!(!speed.set_formatted_value(value));
        prop_assert!(!speed.set_formatted_value(-value));
        prop_assert_eq!(speed.formatted_value(), 100.0);
    }

    #[test]
    fn status_accepts_declared_codes_only(code in any::<u8>()) {
        let mut frame = two_spn_frame(0xF004);
        let lamp = frame.spn_mut(1213).unwrap().as_status_mut().unwrap();
        prop_assert!(lamp.set_value(1));
        if code <= 2 {
            prop_assert!(lamp.set_value(code));
            prop_assert_eq!(lamp.value(), code);
        } else {
            prop_assert!(!lamp.set_value(code));
            prop_assert_eq!(lamp.value(), 1);
        }
    }

    #[test]
    fn registry_clones_do_not_alias(raw in 1u32..=0xFFFF) {
        let mut registry = FrameRegistry::new();
        registry.register_frame(two_spn_frame(0xF004));
        let mut first = registry.get_frame(0xF004).unwrap();
        let second = registry.get_frame(0xF004).unwrap();
        first
            .as_generic_mut()
            .unwrap()
            .spn_mut(190)
            .unwrap()
            .as_numeric_mut()
            .unwrap()
            .set_raw_value(raw);
        prop_assert_eq!(&second, &registry.get_frame(0xF004).unwrap());
        prop_assert_ne!(&first, &second);
        prop_assert!(matches!(second, Frame::Generic(_)));
    }
}
