//! Drives one accepted connection's [`PublisherSession`] against real
//! socket I/O, mirroring the teacher's `execute_actions`/`handle_stream`
//! split: a read loop feeds frames into the session state machine, a
//! separate writer task owns the socket's write half so responses and
//! broadcast measurement fan-out never interleave mid-frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sttp_core::{Environment, Measurement, PublisherAction, PublisherSession, PublisherState};
use sttp_crypto::KeyPair;
use sttp_proto::frame::{CommandFrame, FrameAccumulator, ResponseFrame};
use sttp_proto::{CommandHeader, ResponseCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

use crate::error::ServerError;
use crate::metadata_store::MetadataStore;
use crate::system_env::SystemEnv;
use crate::transport::Connection;

/// Runs one session to completion: until the peer disconnects, a framing
/// error occurs, or the session's own state machine asks to close.
pub async fn run_session(
    conn: Connection,
    peer: SocketAddr,
    metadata_store: Arc<MetadataStore>,
    mut measurements: broadcast::Receiver<Arc<Vec<Measurement>>>,
    env: SystemEnv,
    cipher_rotation: Duration,
    buffer_block_retransmit: Duration,
) -> Result<(), ServerError> {
    let (mut read_half, mut write_half) = tokio::io::split(conn);
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(error) = write_half.write_all(&bytes).await {
                tracing::debug!(%peer, %error, "write failed, closing session");
                break;
            }
        }
    });

    let mut session = PublisherSession::new();
    let mut accumulator = FrameAccumulator::<CommandHeader>::new();
    let mut read_buf = [0u8; 8192];
    let mut cipher_timer = tokio::time::interval(cipher_rotation);
    let mut buffer_block_timer = tokio::time::interval(buffer_block_retransmit);

    let result: Result<(), ServerError> = loop {
        tokio::select! {
            read_result = read_half.read(&mut read_buf) => {
                let n = match read_result {
                    Ok(0) => {
                        tracing::debug!(%peer, "peer closed the connection");
                        break Ok(());
                    },
                    Ok(n) => n,
                    Err(error) => break Err(ServerError::Transport(error.to_string())),
                };
                accumulator.push(&read_buf[..n]);
                let mut framing_failed = false;
                loop {
                    let frame = match accumulator.try_take_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(error) => {
                            tracing::warn!(%peer, %error, "framing error, closing connection");
                            framing_failed = true;
                            break;
                        },
                    };
                    if let Err(error) = handle_frame(frame, &mut session, &metadata_store, &env, &tx) {
                        framing_failed = true;
                        tracing::warn!(%peer, %error, "failed to handle frame, closing connection");
                        break;
                    }
                    if session.state() == PublisherState::Closed {
                        break;
                    }
                }
                if framing_failed || session.state() == PublisherState::Closed {
                    break Ok(());
                }
            },
            received = measurements.recv() => {
                match received {
                    Ok(batch) => {
                        match session.publish_measurements(&batch) {
                            Ok(Some(action)) => send_action(&tx, action)?,
                            Ok(None) => {},
                            Err(error) => tracing::warn!(%peer, %error, "failed to encode data packet"),
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%peer, skipped, "measurement broadcast lagged for this session");
                    },
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                }
            },
            _ = cipher_timer.tick() => {
                if session.state() == PublisherState::Subscribed {
                    let pair = generate_key_pair(&env);
                    let action = session.complete_cipher_rotation(pair);
                    send_action(&tx, action)?;
                }
            },
            _ = buffer_block_timer.tick() => {
                if session.state() == PublisherState::Subscribed {
                    for action in session.pending_retransmits() {
                        send_action(&tx, action)?;
                    }
                }
            },
        }
    };

    drop(tx);
    let _ = writer.await;
    result
}

fn handle_frame(
    frame: CommandFrame,
    session: &mut PublisherSession,
    metadata_store: &MetadataStore,
    env: &SystemEnv,
    tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<(), ServerError> {
    let actions = session.handle_command(frame.header.command_code(), &frame.payload);
    for action in actions {
        execute_action(action, session, metadata_store, env, tx)?;
    }
    Ok(())
}

fn execute_action(
    action: PublisherAction,
    session: &mut PublisherSession,
    metadata_store: &MetadataStore,
    env: &SystemEnv,
    tx: &mpsc::UnboundedSender<Bytes>,
) -> Result<(), ServerError> {
    match action {
        PublisherAction::SendResponse { code, in_response_to, payload } => {
            send_frame(tx, code, in_response_to, payload)
        },
        PublisherAction::MetadataRequested { filters } => {
            let dataset = metadata_store.dataset_for_filters(&filters);
            let response = session.deliver_metadata(&dataset)?;
            send_action(tx, response)
        },
        PublisherAction::SubscriptionRequested {
            requested_keys,
            compact,
            include_time,
            use_ms_resolution,
            udp_endpoint,
        } => {
            let keys = metadata_store.resolve_keys(&requested_keys);
            let responses = session.complete_subscribe(keys, compact, include_time, use_ms_resolution, udp_endpoint)?;
            for response in responses {
                send_action(tx, response)?;
            }
            Ok(())
        },
        PublisherAction::CipherRotationRequested => {
            let pair = generate_key_pair(env);
            let response = session.complete_cipher_rotation(pair);
            send_action(tx, response)
        },
        PublisherAction::NotifyConfigurationChanged => send_frame(tx, ResponseCode::Notify, 0xFF, Bytes::new()),
        PublisherAction::Close { reason } => {
            tracing::info!(%reason, "session requested close");
            Ok(())
        },
    }
}

fn send_action(tx: &mpsc::UnboundedSender<Bytes>, action: PublisherAction) -> Result<(), ServerError> {
    match action {
        PublisherAction::SendResponse { code, in_response_to, payload } => send_frame(tx, code, in_response_to, payload),
        other => {
            tracing::debug!(?other, "ignoring non-response action returned from a completion call");
            Ok(())
        },
    }
}

fn send_frame(
    tx: &mpsc::UnboundedSender<Bytes>,
    code: ResponseCode,
    in_response_to: u8,
    payload: Bytes,
) -> Result<(), ServerError> {
    let frame = ResponseFrame::response(code.to_byte(), in_response_to, payload)?;
    let mut bytes = Vec::new();
    frame.encode(&mut bytes);
    tx.send(Bytes::from(bytes)).map_err(|_| ServerError::Transport("writer task has exited".into()))
}

fn generate_key_pair(env: &SystemEnv) -> KeyPair {
    let mut key = [0u8; sttp_crypto::KEY_SIZE];
    let mut iv = [0u8; sttp_crypto::IV_SIZE];
    env.random_bytes(&mut key);
    env.random_bytes(&mut iv);
    KeyPair::new(key, iv)
}
