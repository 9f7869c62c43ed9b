//! Subscriber session state machine (§4.11): handshake, subscription, data
//! decode, reconnect policy, parse-exception sliding window, and the
//! data-loss watchdog.
//!
//! Pure action-pattern state machine, mirroring [`crate::publisher_session`]'s
//! style. Unlike the publisher side, the subscriber never needs data it
//! cannot itself produce or decode from the wire — metadata arrives already
//! serialized, and signal indices resolve through the cache it installs
//! itself — so there is no two-phase completion pattern here.

use std::collections::VecDeque;

use bytes::Bytes;
use sttp_proto::commands::{
    DEFAULT_DATA_LOSS_INTERVAL_SECS, DEFAULT_PARSE_EXCEPTION_THRESHOLD, PARSE_EXCEPTION_WINDOW_SECS,
};
use sttp_proto::{CommandCode, DataPacketFlags, ResponseCode, TsscDecoder, bytecodec};
use sttp_crypto::{CipherKeyTable, KeyPair, Slot};

use crate::base_time::BaseTimeOffsets;
use crate::buffer_block::{BufferBlockReassembler, Delivery};
use crate::compact_measurement;
use crate::error::{Result, SessionError};
use crate::measurement::{Measurement, MeasurementValue, StateFlags};
use crate::metadata::TabularDataSet;
use crate::operational_modes::OperationalModes;
use crate::signal_index_cache::{SignalIndexCache, SignalIndexCacheData};
use crate::time::Tick;

/// Subscriber session lifecycle state (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// No transport connection exists.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport connected; operational modes not yet sent.
    Connected,
    /// `DefineOperationalModes` sent, awaiting acknowledgement.
    ModesSent,
    /// A `MetadataRefresh` is outstanding.
    MetadataPending,
    /// An active subscription is receiving data.
    Subscribed,
    /// A subscription existed but was torn down locally.
    Unsubscribed,
}

/// Side effects a driver must execute on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberAction {
    /// Send a framed command to the publisher.
    SendCommand {
        /// Command byte.
        code: u8,
        /// Command payload.
        payload: Bytes,
    },
    /// Freshly decoded measurements ready for the application.
    DeliverMeasurements(Vec<Measurement>),
    /// A buffer block was reassembled into order and is ready for the
    /// application.
    DeliverBufferBlock(Bytes),
    /// A metadata snapshot was received and decoded.
    MetadataReceived(TabularDataSet),
    /// The transport should be torn down and, if reconnect is enabled, a
    /// fresh connection attempted after the configured delay.
    Reconnect {
        /// Why the connection is being torn down.
        reason: String,
    },
    /// The connection should be torn down permanently; do not reconnect.
    Disconnect {
        /// Why the connection is being torn down.
        reason: String,
    },
    /// A non-fatal parse error occurred; reported but the session continues.
    ReportedError {
        /// Human-readable description.
        message: String,
    },
    /// A configuration-changed notification arrived; the caller should
    /// issue a fresh `MetadataRefresh`.
    ConfigurationChanged,
}

/// Reconnect policy configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Whether automatic reconnection is enabled at all.
    pub enabled: bool,
    /// Maximum parse exceptions tolerated within the sliding window before
    /// the session is torn down and restarted.
    pub parse_exception_threshold: u32,
    /// Width of the parse-exception sliding window, in seconds.
    pub parse_exception_window_secs: f64,
    /// Data-loss watchdog interval, in seconds.
    pub data_loss_interval_secs: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            parse_exception_threshold: DEFAULT_PARSE_EXCEPTION_THRESHOLD,
            parse_exception_window_secs: PARSE_EXCEPTION_WINDOW_SECS,
            data_loss_interval_secs: DEFAULT_DATA_LOSS_INTERVAL_SECS,
        }
    }
}

/// Subscriber-side session.
pub struct SubscriberSession {
    state: SubscriberState,
    policy: ReconnectPolicy,
    modes: OperationalModes,
    signal_index_cache: SignalIndexCache,
    base_times: Option<BaseTimeOffsets>,
    cipher_keys: CipherKeyTable,
    encryption_enabled: bool,
    tssc_decoder: TsscDecoder,
    pending_tssc_reset: bool,
    buffer_block_reassembler: BufferBlockReassembler,
    parse_failures: VecDeque<Tick>,
    last_byte_receive_time: Option<Tick>,
    last_command_receive_time: Option<Tick>,
    metadata_refresh_in_flight: bool,
    disconnect_was_requested: bool,
}

impl SubscriberSession {
    /// Creates a disconnected session with the given reconnect policy.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: SubscriberState::Disconnected,
            policy,
            modes: OperationalModes::from_raw(0),
            signal_index_cache: SignalIndexCache::new(),
            base_times: None,
            cipher_keys: CipherKeyTable::new(),
            encryption_enabled: false,
            tssc_decoder: TsscDecoder::new(),
            pending_tssc_reset: false,
            buffer_block_reassembler: BufferBlockReassembler::new(),
            parse_failures: VecDeque::new(),
            last_byte_receive_time: None,
            last_command_receive_time: None,
            metadata_refresh_in_flight: false,
            disconnect_was_requested: false,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        self.state
    }

    /// The currently installed signal-index cache snapshot.
    #[must_use]
    pub fn signal_index_cache(&self) -> std::sync::Arc<SignalIndexCacheData> {
        self.signal_index_cache.current()
    }

    /// Marks the transport as connecting (driver is dialing out).
    pub fn begin_connect(&mut self) {
        self.disconnect_was_requested = false;
        self.state = SubscriberState::Connecting;
    }

    /// The transport connected; sends `DefineOperationalModes` to begin the
    /// handshake.
    pub fn handle_connected(&mut self, desired_modes: OperationalModes) -> SubscriberAction {
        self.state = SubscriberState::Connected;
        let mut payload = Vec::new();
        bytecodec::write_u32(&mut payload, desired_modes.to_raw());
        self.state = SubscriberState::ModesSent;
        SubscriberAction::SendCommand { code: CommandCode::DefineOperationalModes.to_byte(), payload: Bytes::from(payload) }
    }

    /// Requests a subscription using a pre-built connection string (§4.5).
    pub fn request_subscribe(&mut self, connection_string: &str, compact: bool) -> Result<SubscriberAction> {
        self.require_state(
            &[SubscriberState::ModesSent, SubscriberState::Subscribed, SubscriberState::Unsubscribed],
            "Subscribe",
        )?;
        let mut payload = Vec::new();
        let flags = if compact { DataPacketFlags::COMPACT.bits() } else { 0 };
        payload.push(flags);
        bytecodec::write_i32(&mut payload, connection_string.len() as i32);
        payload.extend_from_slice(connection_string.as_bytes());
        Ok(SubscriberAction::SendCommand { code: CommandCode::Subscribe.to_byte(), payload: Bytes::from(payload) })
    }

    /// Requests a `MetadataRefresh`, optionally carrying filter expressions.
    pub fn request_metadata_refresh(&mut self, filter_text: Option<&str>) -> SubscriberAction {
        self.metadata_refresh_in_flight = true;
        let mut payload = Vec::new();
        if let Some(text) = filter_text {
            bytecodec::write_i32(&mut payload, text.len() as i32);
            payload.extend_from_slice(text.as_bytes());
        }
        SubscriberAction::SendCommand { code: CommandCode::MetadataRefresh.to_byte(), payload: Bytes::from(payload) }
    }

    /// Tears down the active subscription locally and notifies the
    /// publisher.
    pub fn request_unsubscribe(&mut self) -> Result<SubscriberAction> {
        self.require_state(&[SubscriberState::Subscribed], "Unsubscribe")?;
        self.state = SubscriberState::Unsubscribed;
        self.tssc_decoder.reset();
        Ok(SubscriberAction::SendCommand { code: CommandCode::Unsubscribe.to_byte(), payload: Bytes::new() })
    }

    fn require_state(&self, allowed: &[SubscriberState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: state_name(self.state), operation })
        }
    }

    /// Dispatches one received response frame. `now` drives the
    /// parse-exception sliding window.
    pub fn handle_response(
        &mut self,
        code: ResponseCode,
        in_response_to: u8,
        payload: &[u8],
        now: Tick,
    ) -> Vec<SubscriberAction> {
        self.last_command_receive_time = Some(now);
        self.note_bytes_received(now);

        match self.dispatch_response(code, in_response_to, payload, now) {
            Ok(actions) => actions,
            Err(err) => self.note_parse_failure(now, err.to_string()),
        }
    }

    fn dispatch_response(
        &mut self,
        code: ResponseCode,
        in_response_to: u8,
        payload: &[u8],
        now: Tick,
    ) -> Result<Vec<SubscriberAction>> {
        match code {
            ResponseCode::Succeeded if in_response_to == CommandCode::DefineOperationalModes.to_byte() => {
                Ok(vec![])
            },
            ResponseCode::Succeeded if in_response_to == CommandCode::Subscribe.to_byte() => {
                self.state = SubscriberState::Subscribed;
                self.tssc_decoder.reset();
                self.pending_tssc_reset = true;
                self.buffer_block_reassembler.reset();
                Ok(vec![])
            },
            ResponseCode::Succeeded if in_response_to == CommandCode::MetadataRefresh.to_byte() => {
                self.metadata_refresh_in_flight = false;
                let compressed = self.modes.compress_metadata();
                let dataset = TabularDataSet::from_wire_bytes(payload, compressed)?;
                Ok(vec![SubscriberAction::MetadataReceived(dataset)])
            },
            ResponseCode::Succeeded => Ok(vec![]),
            ResponseCode::Failed => {
                Ok(vec![SubscriberAction::ReportedError { message: format!("command {in_response_to:#04x} failed") }])
            },
            ResponseCode::UpdateSignalIndexCache => {
                // Index assignment is driver territory (it owns the
                // Subscribe request's measurement-key resolution mirror);
                // this response only carries the installed count in this
                // codec, so the driver is expected to rebuild the cache via
                // `install_signal_index_cache` once it has resolved the
                // accompanying key list out of band (metadata already on
                // hand from a prior refresh).
                let _count = bytecodec::read_u32(payload)?;
                Ok(vec![])
            },
            ResponseCode::UpdateBaseTimes => {
                let first = Tick::from_raw(bytecodec::read_u64(payload)?);
                let second = Tick::from_raw(bytecodec::read_u64(&payload[8..])?);
                self.base_times = Some(BaseTimeOffsets::new(first, second));
                Ok(vec![])
            },
            ResponseCode::UpdateCipherKeys => {
                if payload.len() < sttp_crypto::KEY_SIZE + sttp_crypto::IV_SIZE {
                    return Err(SessionError::MetadataMalformed("UpdateCipherKeys payload too short".into()));
                }
                let mut key = [0u8; sttp_crypto::KEY_SIZE];
                key.copy_from_slice(&payload[..sttp_crypto::KEY_SIZE]);
                let mut iv = [0u8; sttp_crypto::IV_SIZE];
                iv.copy_from_slice(&payload[sttp_crypto::KEY_SIZE..sttp_crypto::KEY_SIZE + sttp_crypto::IV_SIZE]);
                self.encryption_enabled = true;
                self.cipher_keys.rotate(KeyPair::new(key, iv));
                Ok(vec![])
            },
            ResponseCode::DataPacket => {
                let measurements = self.decode_data_packet(payload)?;
                Ok(vec![SubscriberAction::DeliverMeasurements(measurements)])
            },
            ResponseCode::ConfigurationChanged => Ok(vec![SubscriberAction::ConfigurationChanged]),
            ResponseCode::Notify => {
                Ok(vec![SubscriberAction::SendCommand { code: CommandCode::ConfirmNotification.to_byte(), payload: Bytes::new() }])
            },
            ResponseCode::BufferBlock => {
                let seq = bytecodec::read_u32(payload)?;
                let body = Bytes::copy_from_slice(&payload[4..]);

                let mut actions = match self.buffer_block_reassembler.receive(seq, body) {
                    Delivery::Ready(blocks) => {
                        blocks.into_iter().map(SubscriberAction::DeliverBufferBlock).collect()
                    },
                    Delivery::Cached | Delivery::DroppedRetransmission => Vec::new(),
                };

                // §4.9: every received block is acknowledged, in arrival
                // order, regardless of whether it was cached, delivered, or
                // a dropped retransmission.
                let mut ack = Vec::new();
                bytecodec::write_u32(&mut ack, seq);
                actions.push(SubscriberAction::SendCommand {
                    code: CommandCode::ConfirmBufferBlock.to_byte(),
                    payload: Bytes::from(ack),
                });
                Ok(actions)
            },
            ResponseCode::DataStartTime | ResponseCode::ProcessingComplete | ResponseCode::NoOp => {
                self.note_bytes_received(now);
                Ok(vec![])
            },
            ResponseCode::UserResponse(_) => Ok(vec![]),
            // `ResponseCode` is `#[non_exhaustive]`.
            #[allow(unreachable_patterns)]
            _ => Ok(vec![]),
        }
    }

    fn decode_data_packet(&mut self, payload: &[u8]) -> Result<Vec<Measurement>> {
        if payload.is_empty() {
            return Err(SessionError::Protocol(sttp_proto::ProtocolError::BufferUnderrun { needed: 1, available: 0 }));
        }
        let flags = DataPacketFlags::from_bits_truncate(payload[0]);
        let mut body = &payload[1..];

        let decrypted;
        if flags.contains(DataPacketFlags::CIPHER_INDEX) || self.encryption_enabled {
            let slot = Slot::from_flag(flags.contains(DataPacketFlags::CIPHER_INDEX));
            let pair = self.cipher_keys.get(slot).ok_or(SessionError::Cipher(sttp_crypto::CipherError::NoActiveKeyPair))?;
            decrypted = sttp_crypto::decrypt(&pair, body)?;
            body = &decrypted;
        }

        if flags.contains(DataPacketFlags::COMPRESSED) {
            self.decode_tssc_body(body)
        } else {
            self.decode_raw_measurements(body)
        }
    }

    fn decode_tssc_body(&mut self, body: &[u8]) -> Result<Vec<Measurement>> {
        let cache = self.signal_index_cache.current();
        match self.tssc_decoder.decode_packet(body) {
            Ok(points) => {
                self.pending_tssc_reset = false;
                points
                    .into_iter()
                    .map(|point| {
                        let key = cache
                            .key_for_index(point.signal_index as u16)
                            .ok_or(SessionError::CacheIndexMismatch(point.signal_index as u16))?
                            .clone();
                        Ok(Measurement {
                            key,
                            timestamp: Tick::from_raw(point.time as u64),
                            value: MeasurementValue::Scalar(f64::from(point.value)),
                            state_flags: StateFlags::from_bits_truncate(point.quality),
                        })
                    })
                    .collect()
            },
            Err(sttp_proto::ProtocolError::TsscSequenceError { .. }) if self.pending_tssc_reset => {
                // A resubscribe or cipher rotation already primed us to
                // expect a sequence restart; a stray stale-sequence packet
                // in flight from before that point is not a parse
                // exception, just discarded.
                self.tssc_decoder.reset();
                Ok(vec![])
            },
            Err(err) => Err(err.into()),
        }
    }

    fn decode_raw_measurements(&self, mut body: &[u8]) -> Result<Vec<Measurement>> {
        let cache = self.signal_index_cache.current();
        let mut out = Vec::new();
        while !body.is_empty() {
            let (measurement, consumed) =
                compact_measurement::decode(body, &cache, self.base_times.as_ref())?;
            out.push(measurement);
            body = &body[consumed..];
        }
        Ok(out)
    }

    /// Installs a freshly resolved signal-index cache (driver-built from the
    /// `Subscribe` request's own key list, mirroring the publisher's
    /// assignment order).
    pub fn install_signal_index_cache(&mut self, data: SignalIndexCacheData) {
        self.signal_index_cache.install(data);
    }

    /// Records that `now` bytes were just received on the data/command
    /// channel, resetting the data-loss watchdog's clock.
    pub fn note_bytes_received(&mut self, now: Tick) {
        self.last_byte_receive_time = Some(now);
    }

    /// Should be called periodically (roughly every `data_loss_interval_secs`)
    /// by the driver's timer. Falls back to the last command-channel receive
    /// time while a metadata refresh is in flight, since historical replay
    /// pauses can otherwise look like data loss.
    pub fn check_data_loss_watchdog(&mut self, now: Tick) -> Vec<SubscriberAction> {
        if self.state != SubscriberState::Subscribed {
            return vec![];
        }
        let reference = if self.metadata_refresh_in_flight {
            self.last_command_receive_time
        } else {
            self.last_byte_receive_time
        };
        let Some(reference) = reference else { return vec![] };

        let elapsed_secs = now.to_unix_nanos().saturating_sub(reference.to_unix_nanos()) as f64 / 1e9;
        if elapsed_secs >= self.policy.data_loss_interval_secs {
            vec![SubscriberAction::Reconnect { reason: "data-loss watchdog expired".into() }]
        } else {
            vec![]
        }
    }

    fn note_parse_failure(&mut self, now: Tick, message: String) -> Vec<SubscriberAction> {
        self.parse_failures.push_back(now);
        let window_start = now.to_unix_nanos() - (self.policy.parse_exception_window_secs * 1e9) as i64;
        while let Some(&front) = self.parse_failures.front() {
            if front.to_unix_nanos() < window_start {
                self.parse_failures.pop_front();
            } else {
                break;
            }
        }

        if self.parse_failures.len() as u32 >= self.policy.parse_exception_threshold {
            self.parse_failures.clear();
            vec![SubscriberAction::Reconnect { reason: format!("parse exception threshold exceeded: {message}") }]
        } else {
            vec![SubscriberAction::ReportedError { message }]
        }
    }

    /// The driver reports the transport dropped. Per §4.11, automatic
    /// reconnect fires only when enabled and the disconnect was not
    /// caller-initiated (i.e. not from [`SubscriberSession::request_disconnect`]).
    pub fn handle_disconnected(&mut self, reason: String) -> Vec<SubscriberAction> {
        let was_requested = self.disconnect_was_requested;
        self.state = SubscriberState::Disconnected;
        self.parse_failures.clear();
        self.metadata_refresh_in_flight = false;

        if was_requested {
            vec![]
        } else if self.policy.enabled {
            vec![SubscriberAction::Reconnect { reason }]
        } else {
            vec![SubscriberAction::Disconnect { reason }]
        }
    }

    /// Caller-initiated disconnect: suppresses the automatic reconnect that
    /// would otherwise follow the resulting transport-close notification.
    pub fn request_disconnect(&mut self) {
        self.disconnect_was_requested = true;
    }
}

fn state_name(state: SubscriberState) -> &'static str {
    match state {
        SubscriberState::Disconnected => "disconnected",
        SubscriberState::Connecting => "connecting",
        SubscriberState::Connected => "connected",
        SubscriberState::ModesSent => "modes-sent",
        SubscriberState::MetadataPending => "metadata-pending",
        SubscriberState::Subscribed => "subscribed",
        SubscriberState::Unsubscribed => "unsubscribed",
    }
}
