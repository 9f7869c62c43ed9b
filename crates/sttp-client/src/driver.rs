//! Drives a [`SubscriberSession`] against real socket I/O: connect,
//! handshake, metadata refresh, subscribe, and the receive/watchdog loop,
//! with automatic reconnect per the session's [`ReconnectPolicy`].

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use sttp_core::{
    Environment, InternTable, Measurement, MeasurementKey, OperationalModes, ReconnectPolicy, SignalIndexCacheData,
    SubscriberAction, SubscriberSession, SubscriberState, TabularDataSet, Tick, Value,
};
use sttp_proto::frame::FrameAccumulator;
use sttp_proto::{CommandFrame, ResponseCode, ResponseHeader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ClientError;
use crate::system_env::SystemEnv;
use crate::transport;

/// Static configuration for one subscriber run.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// `host:port` of the publisher's command channel.
    pub address: String,
    /// TLS server name to verify against, if TLS is configured.
    pub server_name: String,
    /// CA certificate for TLS, if the command channel is encrypted.
    pub ca_cert_path: Option<String>,
    /// Desired operational modes, before the version sub-field is merged in.
    pub desired_modes: OperationalModes,
    /// Requested measurement identifiers (signal IDs or `SOURCE:ID` pairs,
    /// resolved from the `MeasurementDetail` metadata table).
    pub requested_keys: Vec<String>,
    /// Whether to request the compact wire format.
    pub compact: bool,
    /// Whether to request timestamps on each measurement.
    pub include_time: bool,
    /// Reconnect/watchdog policy.
    pub reconnect: ReconnectPolicy,
}

/// Runs the subscriber until a permanent [`SubscriberAction::Disconnect`] is
/// reached (either reconnect is disabled, or the caller requested a
/// permanent disconnect). Delivered measurements, metadata, and reassembled
/// buffer blocks are handed to `on_measurements`/`on_metadata`/
/// `on_buffer_block`.
pub async fn run(
    config: SubscriberConfig,
    mut on_measurements: impl FnMut(Vec<Measurement>),
    mut on_metadata: impl FnMut(&TabularDataSet),
    mut on_buffer_block: impl FnMut(Bytes),
) -> Result<(), ClientError> {
    let env = SystemEnv::new();
    let mut session = SubscriberSession::new(config.reconnect);

    loop {
        match run_once(&config, &mut session, &mut on_measurements, &mut on_metadata, &mut on_buffer_block).await {
            Ok(()) => return Ok(()),
            Err(DriverOutcome::Reconnect(reason)) => {
                tracing::warn!(%reason, "connection lost, reconnecting");
                let actions = session.handle_disconnected(reason);
                if actions.iter().any(|a| matches!(a, SubscriberAction::Disconnect { .. })) {
                    return Ok(());
                }
                env.sleep(Duration::from_secs(1)).await;
            },
            Err(DriverOutcome::Fatal(error)) => return Err(error),
        }
    }
}

enum DriverOutcome {
    Reconnect(String),
    Fatal(ClientError),
}

impl From<ClientError> for DriverOutcome {
    fn from(error: ClientError) -> Self {
        DriverOutcome::Fatal(error)
    }
}

async fn run_once(
    config: &SubscriberConfig,
    session: &mut SubscriberSession,
    on_measurements: &mut impl FnMut(Vec<Measurement>),
    on_metadata: &mut impl FnMut(&TabularDataSet),
    on_buffer_block: &mut impl FnMut(Bytes),
) -> Result<(), DriverOutcome> {
    session.begin_connect();
    let conn = transport::connect(&config.address, &config.server_name, config.ca_cert_path.clone())
        .await
        .map_err(|e| DriverOutcome::Reconnect(e.to_string()))?;
    let (mut read_half, mut write_half) = tokio::io::split(conn);

    let hello = session.handle_connected(config.desired_modes);
    send_action(&mut write_half, hello).await?;

    let mut accumulator = FrameAccumulator::<ResponseHeader>::new();
    let mut read_buf = [0u8; 8192];
    let mut metadata_requested = false;
    let mut watchdog = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            read_result = read_half.read(&mut read_buf) => {
                let n = read_result.map_err(|e| DriverOutcome::Reconnect(e.to_string()))?;
                if n == 0 {
                    return Err(DriverOutcome::Reconnect("peer closed the connection".into()));
                }
                accumulator.push(&read_buf[..n]);
                loop {
                    let frame = match accumulator.try_take_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(error) => return Err(DriverOutcome::Reconnect(format!("framing error: {error}"))),
                    };
                    let code = match ResponseCode::from_byte(frame.header.response_code()) {
                        Ok(code) => code,
                        Err(error) => {
                            tracing::warn!(%error, "unrecognized response code, skipping frame");
                            continue;
                        },
                    };
                    let actions =
                        session.handle_response(code, frame.header.in_response_to(), &frame.payload, Tick::now());
                    for action in actions {
                        handle_action(
                            action,
                            session,
                            config,
                            &mut write_half,
                            &mut metadata_requested,
                            on_measurements,
                            on_metadata,
                            on_buffer_block,
                        )
                        .await?;
                    }
                }

                if !metadata_requested && session.state() == SubscriberState::ModesSent {
                    metadata_requested = true;
                    let action = session.request_metadata_refresh(None);
                    send_action(&mut write_half, action).await?;
                }
            },
            _ = watchdog.tick() => {
                for action in session.check_data_loss_watchdog(Tick::now()) {
                    if let SubscriberAction::Reconnect { reason } = action {
                        return Err(DriverOutcome::Reconnect(reason));
                    }
                }
            },
        }
    }
}

async fn handle_action(
    action: SubscriberAction,
    session: &mut SubscriberSession,
    config: &SubscriberConfig,
    write_half: &mut (impl tokio::io::AsyncWrite + Unpin),
    metadata_requested: &mut bool,
    on_measurements: &mut impl FnMut(Vec<Measurement>),
    on_metadata: &mut impl FnMut(&TabularDataSet),
    on_buffer_block: &mut impl FnMut(Bytes),
) -> Result<(), DriverOutcome> {
    match action {
        SubscriberAction::SendCommand { code, payload } => send_frame(write_half, code, payload).await,
        SubscriberAction::DeliverMeasurements(measurements) => {
            on_measurements(measurements);
            Ok(())
        },
        SubscriberAction::DeliverBufferBlock(block) => {
            on_buffer_block(block);
            Ok(())
        },
        SubscriberAction::MetadataReceived(dataset) => {
            on_metadata(&dataset);
            let keys = resolve_keys(&dataset, &config.requested_keys);
            install_cache(session, &keys);
            let connection_string = build_connection_string(&keys, config.include_time);
            let action = session.request_subscribe(&connection_string, config.compact).map_err(ClientError::from)?;
            send_action(write_half, action).await
        },
        SubscriberAction::Reconnect { reason } => Err(DriverOutcome::Reconnect(reason)),
        SubscriberAction::Disconnect { reason } => Err(DriverOutcome::Reconnect(reason)),
        SubscriberAction::ReportedError { message } => {
            tracing::warn!(%message, "parse exception");
            Ok(())
        },
        SubscriberAction::ConfigurationChanged => {
            *metadata_requested = true;
            let action = session.request_metadata_refresh(None);
            send_action(write_half, action).await
        },
    }
}

fn install_cache(session: &mut SubscriberSession, keys: &[MeasurementKey]) {
    let entries: Vec<(u16, MeasurementKey)> = keys.iter().cloned().enumerate().map(|(i, k)| (i as u16, k)).collect();
    session.install_signal_index_cache(SignalIndexCacheData::new(entries, HashSet::new(), HashSet::new()));
}

fn build_connection_string(keys: &[MeasurementKey], include_time: bool) -> String {
    let key_list = keys.iter().map(|k| k.signal_id().to_string()).collect::<Vec<_>>().join(";");
    format!("inputMeasurementKeys={{{key_list}}};includeTime={include_time}")
}

/// Resolves requested tokens (signal IDs or `SOURCE:ID` pairs) against the
/// `MeasurementDetail` table of a freshly received metadata dataset,
/// interning each into a local [`InternTable`] so the resulting keys'
/// identity is consistent across calls (assignment order into the
/// signal-index cache mirrors the order requested here).
fn resolve_keys(dataset: &TabularDataSet, tokens: &[String]) -> Vec<MeasurementKey> {
    let intern = InternTable::new();
    let Some(table) = dataset.table("MeasurementDetail") else { return Vec::new() };
    let col = |name: &str| table.columns.iter().position(|c| c == name);
    let (Some(signal_idx), Some(source_idx), Some(id_idx)) = (col("SignalID"), col("Source"), col("ID")) else {
        return Vec::new();
    };

    for row in &table.rows {
        let (Value::Text(signal_id), Value::Text(source), Value::Integer(id)) =
            (&row[signal_idx], &row[source_idx], &row[id_idx])
        else {
            continue;
        };
        let Ok(signal_id) = signal_id.parse() else { continue };
        intern.get_or_intern(signal_id, source, *id as u64);
    }

    tokens
        .iter()
        .filter_map(|token| {
            if let Ok(id) = token.parse() {
                return intern.lookup_by_signal_id(id);
            }
            let (source, numeric_id) = token.split_once(':')?;
            intern.lookup_by_source_numeric(source, numeric_id.parse().ok()?)
        })
        .collect()
}

async fn send_action(
    write_half: &mut (impl tokio::io::AsyncWrite + Unpin),
    action: SubscriberAction,
) -> Result<(), DriverOutcome> {
    match action {
        SubscriberAction::SendCommand { code, payload } => send_frame(write_half, code, payload).await,
        other => {
            tracing::debug!(?other, "ignoring non-command action passed to send_action");
            Ok(())
        },
    }
}

async fn send_frame(
    write_half: &mut (impl tokio::io::AsyncWrite + Unpin),
    code: u8,
    payload: Bytes,
) -> Result<(), DriverOutcome> {
    let frame = CommandFrame::command(code, payload).map_err(ClientError::from)?;
    let mut bytes = Vec::new();
    frame.encode(&mut bytes);
    write_half.write_all(&bytes).await.map_err(ClientError::Io)?;
    Ok(())
}
