//! End-to-end scenarios from §8 (S1-S6), driven over `turmoil`'s simulated
//! TCP instead of a real socket.
//!
//! Both sides drive `sttp-core`'s sans-IO sessions directly; there is no
//! concurrent read/write interleaving to worry about since each side's
//! script is a strict request/response sequence, so a single unsplit
//! stream is read and written from in turn.

use std::time::Duration;

use bytes::Bytes;
use sttp_core::{
    Measurement, MeasurementValue, OperationalModes, PublisherAction, PublisherSession, ReconnectPolicy, StateFlags,
    SubscriberAction, SubscriberSession, SubscriberState, Tick,
};
use sttp_proto::frame::{CommandFrame, FrameAccumulator, ResponseFrame};
use sttp_proto::{CommandCode, CommandHeader, ResponseCode, ResponseHeader, bytecodec};
use sttp_server::MetadataStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use turmoil::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// Version 1, UTF-8, `CompressMetadata`, `ReceiveInternalMetadata` — the
/// literal §8 S1 handshake payload, also sent by the subscriber binary.
const BASE_MODES: u32 = 0x0400_0201;

async fn read_command(stream: &mut TcpStream, accumulator: &mut FrameAccumulator<CommandHeader>) -> CommandFrame {
    loop {
        if let Some(frame) = accumulator.try_take_frame().expect("well-formed command frame") {
            return frame;
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.expect("read command");
        assert!(n > 0, "peer closed before a full command frame arrived");
        accumulator.push(&buf[..n]);
    }
}

async fn read_responses(
    stream: &mut TcpStream,
    accumulator: &mut FrameAccumulator<ResponseHeader>,
    count: usize,
) -> Vec<sttp_proto::frame::ResponseFrame> {
    let mut frames = Vec::with_capacity(count);
    while frames.len() < count {
        if let Some(frame) = accumulator.try_take_frame().expect("well-formed response frame") {
            frames.push(frame);
            continue;
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.expect("read response");
        assert!(n > 0, "peer closed before the expected responses arrived");
        accumulator.push(&buf[..n]);
    }
    frames
}

async fn send_response(stream: &mut TcpStream, action: PublisherAction) {
    let PublisherAction::SendResponse { code, in_response_to, payload } = action else {
        panic!("expected a SendResponse action, got {action:?}");
    };
    let frame = ResponseFrame::response(code.to_byte(), in_response_to, payload).expect("encodable response");
    let mut bytes = Vec::new();
    frame.encode(&mut bytes);
    stream.write_all(&bytes).await.expect("write response");
}

async fn send_command(stream: &mut TcpStream, action: SubscriberAction) {
    let SubscriberAction::SendCommand { code, payload } = action else {
        panic!("expected a SendCommand action, got {action:?}");
    };
    let frame = CommandFrame::command(code, payload).expect("encodable command");
    let mut bytes = Vec::new();
    frame.encode(&mut bytes);
    stream.write_all(&bytes).await.expect("write command");
}

const SIGNAL_ID: u128 = 42;

fn demo_store() -> MetadataStore {
    let store = MetadataStore::new();
    store.register_measurement(Uuid::from_u128(SIGNAL_ID), "DEMO", 1, "DEMO:FREQ", "FREQ");
    store
}

#[test]
fn handshake_subscribe_and_deliver_one_measurement() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("publisher", || async {
        let listener = TcpListener::bind("0.0.0.0:6165").await?;
        let (mut stream, _peer) = listener.accept().await?;

        let store = demo_store();
        let mut session = PublisherSession::new();
        let mut accumulator = FrameAccumulator::<CommandHeader>::new();

        // DefineOperationalModes
        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        assert_eq!(actions.len(), 1);
        send_response(&mut stream, actions.into_iter().next().unwrap()).await;

        // MetadataRefresh
        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        let PublisherAction::MetadataRequested { filters } = actions.into_iter().next().unwrap() else {
            panic!("expected MetadataRequested");
        };
        let dataset = store.dataset_for_filters(&filters);
        let response = session.deliver_metadata(&dataset).expect("metadata encodes");
        send_response(&mut stream, response).await;

        // Subscribe
        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        let PublisherAction::SubscriptionRequested {
            requested_keys,
            compact,
            include_time,
            use_ms_resolution,
            udp_endpoint,
        } = actions.into_iter().next().unwrap()
        else {
            panic!("expected SubscriptionRequested");
        };
        let keys = store.resolve_keys(&requested_keys);
        assert_eq!(keys.len(), 1, "the one requested signal should resolve");
        let responses =
            session.complete_subscribe(keys.clone(), compact, include_time, use_ms_resolution, udp_endpoint).unwrap();
        for response in responses {
            send_response(&mut stream, response).await;
        }

        // One measurement batch, then done.
        let measurement = Measurement {
            key: keys[0].clone(),
            timestamp: Tick::now(),
            value: MeasurementValue::Scalar(59.97),
            state_flags: StateFlags::empty(),
        };
        if let Some(action) = session.publish_measurements(&[measurement]).unwrap() {
            send_response(&mut stream, action).await;
        }

        Ok(())
    });

    sim.client("subscriber", async {
        let mut stream = TcpStream::connect("publisher:6165").await?;
        let mut session = SubscriberSession::new(ReconnectPolicy::default());
        let mut accumulator = FrameAccumulator::<ResponseHeader>::new();

        session.begin_connect();
        let hello = session.handle_connected(OperationalModes::from_raw(BASE_MODES));
        send_command(&mut stream, hello).await;

        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        let actions = session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());
        assert!(actions.is_empty());

        let refresh = session.request_metadata_refresh(None);
        send_command(&mut stream, refresh).await;

        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        let actions = session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());
        let SubscriberAction::MetadataReceived(dataset) = &actions[0] else { panic!("expected MetadataReceived") };
        let table = dataset.table("MeasurementDetail").expect("MeasurementDetail table present");
        assert_eq!(table.rows.len(), 1);

        // Mirrors the real client's ordering (see sttp-client's driver):
        // resolve the requested keys from the metadata just received,
        // install the signal-index cache, then send Subscribe with the
        // resolved signal IDs in its connection string.
        use std::collections::HashSet;
        use sttp_core::SignalIndexCacheData;
        let signal_id = {
            let row = &table.rows[0];
            let signal_idx = table.columns.iter().position(|c| c == "SignalID").unwrap();
            let sttp_core::Value::Text(signal_id) = &row[signal_idx] else { panic!("SignalID is text") };
            Uuid::parse_str(signal_id).unwrap()
        };
        let intern = sttp_core::InternTable::new();
        let resolved_key = intern.get_or_intern(signal_id, "DEMO", 1);
        session.install_signal_index_cache(SignalIndexCacheData::new(
            vec![(0, resolved_key)],
            HashSet::new(),
            HashSet::new(),
        ));

        let connection_string = format!("inputMeasurementKeys={{{signal_id}}};includeTime=true");
        let subscribe = session.request_subscribe(&connection_string, true).unwrap();
        send_command(&mut stream, subscribe).await;

        // UpdateSignalIndexCache, Succeeded(Subscribe).
        let frames = read_responses(&mut stream, &mut accumulator, 2).await;
        for frame in &frames {
            let code = ResponseCode::from_byte(frame.header.response_code()).unwrap();
            let actions = session.handle_response(code, frame.header.in_response_to(), &frame.payload, Tick::now());
            assert!(actions.is_empty(), "setup responses carry no driver action");
        }

        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        let actions = session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());
        let SubscriberAction::DeliverMeasurements(measurements) = &actions[0] else {
            panic!("expected DeliverMeasurements, got {:?}", actions[0])
        };
        assert_eq!(measurements.len(), 1);
        match measurements[0].value {
            MeasurementValue::Scalar(v) => assert!((v - 59.97).abs() < 0.01),
            _ => panic!("expected a scalar value"),
        }

        Ok(())
    });

    sim.run().expect("simulation failed");
}

/// §8 S6: after the data-loss watchdog expires, the subscriber tears the
/// session down, reconnects, and ends up `Subscribed` again with a freshly
/// installed signal-index cache.
///
/// This one drives [`SubscriberSession`] directly rather than over
/// `turmoil`: the watchdog compares wall-clock [`Tick`]s
/// (`Tick::now()` is real time, not `tokio::time`, so it isn't
/// turmoil-virtualized), and the behavior under test — the session's own
/// timeout/reconnect/resubscribe state transitions — doesn't depend on
/// actual socket I/O the way S1-S5 do.
#[test]
fn data_loss_watchdog_triggers_reconnect_and_fresh_signal_index_cache() {
    use std::collections::HashSet;

    use sttp_core::{InternTable, ReconnectPolicy, SignalIndexCacheData};

    fn tick_secs(offset_secs: u64) -> Tick {
        Tick::new(1_000_000_000_000 + offset_secs * 10_000_000, false, false)
    }

    let policy = ReconnectPolicy { data_loss_interval_secs: 10.0, ..ReconnectPolicy::default() };
    let mut session = SubscriberSession::new(policy);

    session.begin_connect();
    session.handle_connected(OperationalModes::from_raw(BASE_MODES));
    session.handle_response(ResponseCode::Succeeded, CommandCode::DefineOperationalModes.to_byte(), &[], tick_secs(0));

    let intern = InternTable::new();
    let original_key = intern.get_or_intern(Uuid::from_u128(SIGNAL_ID), "DEMO", 1);
    session.install_signal_index_cache(SignalIndexCacheData::new(
        vec![(0, original_key.clone())],
        HashSet::new(),
        HashSet::new(),
    ));
    session.request_subscribe("inputMeasurementKeys={DEMO:1};includeTime=true", true).unwrap();
    session.handle_response(ResponseCode::Succeeded, CommandCode::Subscribe.to_byte(), &[], tick_secs(1));
    assert_eq!(session.state(), SubscriberState::Subscribed);
    session.note_bytes_received(tick_secs(1));

    // Data flow stops; the watchdog hasn't yet crossed the interval.
    assert!(session.check_data_loss_watchdog(tick_secs(5)).is_empty());

    // DataLossInterval + ε elapses with nothing received.
    let actions = session.check_data_loss_watchdog(tick_secs(12));
    assert!(matches!(actions[0], SubscriberAction::Reconnect { .. }));

    // Driver tears down and reconnects.
    let reconnect_actions = session.handle_disconnected("data-loss watchdog expired".into());
    assert!(matches!(reconnect_actions[0], SubscriberAction::Reconnect { .. }));

    session.begin_connect();
    session.handle_connected(OperationalModes::from_raw(BASE_MODES));
    session.handle_response(ResponseCode::Succeeded, CommandCode::DefineOperationalModes.to_byte(), &[], tick_secs(13));

    // The publisher's metadata catalog may have changed in the interim; the
    // reconnect resolves a different signal than before.
    let new_key = intern.get_or_intern(Uuid::from_u128(99), "DEMO", 2);
    session.install_signal_index_cache(SignalIndexCacheData::new(vec![(0, new_key.clone())], HashSet::new(), HashSet::new()));
    session.request_subscribe("inputMeasurementKeys={DEMO:2};includeTime=true", true).unwrap();
    session.handle_response(ResponseCode::Succeeded, CommandCode::Subscribe.to_byte(), &[], tick_secs(14));

    assert_eq!(session.state(), SubscriberState::Subscribed);
    let cache = session.signal_index_cache();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.key_for_index(0), Some(&new_key));
    assert_ne!(cache.key_for_index(0), Some(&original_key));
}

#[test]
fn unrecognized_command_byte_yields_failed_without_crashing() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("publisher", || async {
        let listener = TcpListener::bind("0.0.0.0:6165").await?;
        let (mut stream, _peer) = listener.accept().await?;
        let mut session = PublisherSession::new();
        let mut accumulator = FrameAccumulator::<CommandHeader>::new();

        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        assert_eq!(actions.len(), 1);
        send_response(&mut stream, actions.into_iter().next().unwrap()).await;
        Ok(())
    });

    sim.client("subscriber", async {
        let mut stream = TcpStream::connect("publisher:6165").await?;
        let frame = CommandFrame::command(0x42, Bytes::new()).unwrap();
        let mut bytes = Vec::new();
        frame.encode(&mut bytes);
        stream.write_all(&bytes).await?;

        let mut accumulator = FrameAccumulator::<ResponseHeader>::new();
        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        assert_eq!(code, ResponseCode::Failed, "an unrecognized command byte must yield Failed, not crash the session");
        Ok(())
    });

    sim.run().expect("simulation failed");
}

/// §8 S4: after an initial subscribe, `Unsubscribe` then `Subscribe` again
/// must restart the TSSC sequence at `0` for the first compressed
/// `DataPacket` that follows.
#[test]
fn resubscribe_resets_tssc_sequence_to_zero() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("publisher", || async {
        let listener = TcpListener::bind("0.0.0.0:6165").await?;
        let (mut stream, _peer) = listener.accept().await?;

        let store = demo_store();
        let mut session = PublisherSession::new();
        let mut accumulator = FrameAccumulator::<CommandHeader>::new();

        async fn subscribe_round(
            stream: &mut TcpStream,
            accumulator: &mut FrameAccumulator<CommandHeader>,
            session: &mut PublisherSession,
            store: &MetadataStore,
        ) -> Vec<sttp_core::MeasurementKey> {
            let frame = read_command(stream, accumulator).await;
            let actions = session.handle_command(frame.header.command_code(), &frame.payload);
            let PublisherAction::SubscriptionRequested {
                requested_keys,
                compact,
                include_time,
                use_ms_resolution,
                udp_endpoint,
            } = actions.into_iter().next().unwrap()
            else {
                panic!("expected SubscriptionRequested");
            };
            let keys = store.resolve_keys(&requested_keys);
            let responses =
                session.complete_subscribe(keys.clone(), compact, include_time, use_ms_resolution, udp_endpoint).unwrap();
            for response in responses {
                send_response(stream, response).await;
            }
            keys
        }

        // DefineOperationalModes, TSSC negotiated.
        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        send_response(&mut stream, actions.into_iter().next().unwrap()).await;

        // First subscribe; publish one measurement, discarding its bytes.
        let keys = subscribe_round(&mut stream, &mut accumulator, &mut session, &store).await;
        let measurement = Measurement {
            key: keys[0].clone(),
            timestamp: Tick::now(),
            value: MeasurementValue::Scalar(1.0),
            state_flags: StateFlags::empty(),
        };
        let action = session.publish_measurements(&[measurement]).unwrap().unwrap();
        send_response(&mut stream, action).await;

        // Unsubscribe, then subscribe again.
        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        send_response(&mut stream, actions.into_iter().next().unwrap()).await;

        let keys = subscribe_round(&mut stream, &mut accumulator, &mut session, &store).await;
        let measurement = Measurement {
            key: keys[0].clone(),
            timestamp: Tick::now(),
            value: MeasurementValue::Scalar(2.0),
            state_flags: StateFlags::empty(),
        };
        let action = session.publish_measurements(&[measurement]).unwrap().unwrap();
        send_response(&mut stream, action).await;

        Ok(())
    });

    sim.client("subscriber", async {
        let mut stream = TcpStream::connect("publisher:6165").await?;
        let mut session = SubscriberSession::new(ReconnectPolicy::default());
        let mut accumulator = FrameAccumulator::<ResponseHeader>::new();

        const USE_TSSC: u32 = 0x0000_0400;
        session.begin_connect();
        let hello = session.handle_connected(OperationalModes::from_raw(BASE_MODES | USE_TSSC));
        send_command(&mut stream, hello).await;
        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());

        use std::collections::HashSet;
        use sttp_core::{InternTable, SignalIndexCacheData};
        let intern = InternTable::new();
        let key = intern.get_or_intern(Uuid::from_u128(SIGNAL_ID), "DEMO", 1);
        session.install_signal_index_cache(SignalIndexCacheData::new(vec![(0, key)], HashSet::new(), HashSet::new()));

        let connection_string = "inputMeasurementKeys={DEMO:1};includeTime=true";
        let subscribe = session.request_subscribe(connection_string, true).unwrap();
        send_command(&mut stream, subscribe).await;

        // UpdateSignalIndexCache, Succeeded(Subscribe).
        let frames = read_responses(&mut stream, &mut accumulator, 2).await;
        for frame in &frames {
            let code = ResponseCode::from_byte(frame.header.response_code()).unwrap();
            session.handle_response(code, frame.header.in_response_to(), &frame.payload, Tick::now());
        }

        // First compressed DataPacket carries sequence 0 (a fresh encoder).
        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        assert_eq!(&frames[0].payload[2..4], &0u16.to_be_bytes(), "first packet after initial subscribe carries TSSC sequence 0");
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());

        // Unsubscribe, then subscribe again.
        let unsubscribe = session.request_unsubscribe().unwrap();
        send_command(&mut stream, unsubscribe).await;
        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());

        let subscribe = session.request_subscribe(connection_string, true).unwrap();
        send_command(&mut stream, subscribe).await;
        let frames = read_responses(&mut stream, &mut accumulator, 2).await;
        for frame in &frames {
            let code = ResponseCode::from_byte(frame.header.response_code()).unwrap();
            session.handle_response(code, frame.header.in_response_to(), &frame.payload, Tick::now());
        }

        // The resubscribe's first DataPacket must carry TSSC sequence 0
        // again, not 1.
        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        assert_eq!(&frames[0].payload[2..4], &0u16.to_be_bytes(), "first packet after resubscribe restarts TSSC sequence at 0");

        Ok(())
    });

    sim.run().expect("simulation failed");
}

/// §8 S5: buffer blocks arriving out of order (`0, 2, 1`) deliver `0`
/// immediately, cache `2`, then deliver `1` and `2` once the gap closes —
/// acknowledging each received sequence in arrival order regardless of
/// delivery order.
#[test]
fn buffer_block_gap_recovery_delivers_in_order_and_acks_arrival_order() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("publisher", || async {
        let listener = TcpListener::bind("0.0.0.0:6165").await?;
        let (mut stream, _peer) = listener.accept().await?;
        let mut session = PublisherSession::new();
        let mut accumulator = FrameAccumulator::<CommandHeader>::new();

        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        send_response(&mut stream, actions.into_iter().next().unwrap()).await;

        let frame = read_command(&mut stream, &mut accumulator).await;
        let actions = session.handle_command(frame.header.command_code(), &frame.payload);
        let PublisherAction::SubscriptionRequested { compact, include_time, use_ms_resolution, udp_endpoint, .. } =
            actions.into_iter().next().unwrap()
        else {
            panic!("expected SubscriptionRequested");
        };
        let responses = session.complete_subscribe(vec![], compact, include_time, use_ms_resolution, udp_endpoint).unwrap();
        for response in responses {
            send_response(&mut stream, response).await;
        }

        // Arrival order 0, 2, 1 — the wire doesn't reorder blocks the
        // publisher explicitly constructs out of sequence, only the
        // subscriber's reassembly is under test here.
        for (seq, tag) in [(0u32, b'0'), (2u32, b'2'), (1u32, b'1')] {
            let mut body = Vec::new();
            bytecodec::write_u32(&mut body, seq);
            body.push(tag);
            let frame =
                ResponseFrame::response(ResponseCode::BufferBlock.to_byte(), CommandCode::Subscribe.to_byte(), Bytes::from(body))
                    .unwrap();
            let mut bytes = Vec::new();
            frame.encode(&mut bytes);
            stream.write_all(&bytes).await.expect("write buffer block");

            let mut ack_accumulator = FrameAccumulator::<CommandHeader>::new();
            let ack = read_command(&mut stream, &mut ack_accumulator).await;
            assert_eq!(ack.header.command_code(), CommandCode::ConfirmBufferBlock.to_byte());
            assert_eq!(bytecodec::read_u32(&ack.payload).unwrap(), seq);
        }

        Ok(())
    });

    sim.client("subscriber", async {
        let mut stream = TcpStream::connect("publisher:6165").await?;
        let mut session = SubscriberSession::new(ReconnectPolicy::default());
        let mut accumulator = FrameAccumulator::<ResponseHeader>::new();

        session.begin_connect();
        let hello = session.handle_connected(OperationalModes::from_raw(BASE_MODES));
        send_command(&mut stream, hello).await;
        let frames = read_responses(&mut stream, &mut accumulator, 1).await;
        let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
        session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());

        let subscribe = session.request_subscribe("includeTime=true", true).unwrap();
        send_command(&mut stream, subscribe).await;
        let frames = read_responses(&mut stream, &mut accumulator, 2).await;
        for frame in &frames {
            let code = ResponseCode::from_byte(frame.header.response_code()).unwrap();
            session.handle_response(code, frame.header.in_response_to(), &frame.payload, Tick::now());
        }

        let mut delivered = Vec::new();
        for _ in 0..3 {
            let frames = read_responses(&mut stream, &mut accumulator, 1).await;
            let code = ResponseCode::from_byte(frames[0].header.response_code()).unwrap();
            let actions =
                session.handle_response(code, frames[0].header.in_response_to(), &frames[0].payload, Tick::now());
            for action in actions {
                match action {
                    SubscriberAction::DeliverBufferBlock(block) => delivered.push(block[0]),
                    SubscriberAction::SendCommand { code, payload } => {
                        send_command(&mut stream, SubscriberAction::SendCommand { code, payload }).await;
                    },
                    other => panic!("unexpected action {other:?}"),
                }
            }
        }
        assert_eq!(delivered, vec![b'0', b'1', b'2'], "blocks must deliver in sequence order: 0, then 1, then 2");

        Ok(())
    });

    sim.run().expect("simulation failed");
}
