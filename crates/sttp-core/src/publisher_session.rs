//! Per-client publisher session state machine (§4.10).
//!
//! Pure action-pattern state machine: methods consume received commands and
//! return the responses/side-effects a driver must execute. No socket I/O,
//! no randomness, no external metadata lookup happens here — those are
//! supplied by the driver (see the `*Requested` actions below), matching the
//! "core consumes a metadata set and an ordered set of measurements" split
//! in the scope section.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use sttp_proto::{CommandCode, DataPacketFlags, ResponseCode, TsscEncoder, TsscPoint, bytecodec};
use sttp_crypto::{CipherKeyTable, KeyPair};
use uuid::Uuid;

use crate::base_time::BaseTimeOffsets;
use crate::connection_string::parse_connection_string;
use crate::error::{Result, SessionError};
use crate::measurement::{Measurement, MeasurementKey, MeasurementValue};
use crate::metadata::{FilterExpression, TabularDataSet, parse_filter_expressions};
use crate::operational_modes::OperationalModes;
use crate::signal_index_cache::{SignalIndexCache, SignalIndexCacheData};

/// Publisher session lifecycle state (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    /// Connection accepted, no modes negotiated yet.
    Accepted,
    /// `DefineOperationalModes` has been processed.
    ModesDefined,
    /// An active subscription is serving data.
    Subscribed,
    /// A subscription existed but was torn down by `Unsubscribe`.
    Unsubscribed,
    /// The session is closed; no further commands are accepted.
    Closed,
}

/// Side effects a driver must execute on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum PublisherAction {
    /// Send a framed response to the client.
    SendResponse {
        /// Response code.
        code: ResponseCode,
        /// The command byte this response answers (echoed verbatim for
        /// `Failed`, per §4.10).
        in_response_to: u8,
        /// Response payload.
        payload: Bytes,
    },
    /// The client asked for a metadata snapshot; the driver must build a
    /// [`TabularDataSet`] honoring `filters` and call
    /// [`PublisherSession::deliver_metadata`].
    MetadataRequested {
        /// Parsed filter expressions, if any were sent.
        filters: Vec<FilterExpression>,
    },
    /// The client asked to subscribe; the driver must resolve
    /// `requested_keys` against its metadata/registry and call
    /// [`PublisherSession::complete_subscribe`].
    SubscriptionRequested {
        /// Raw `inputMeasurementKeys` tokens (source-scoped identifiers or
        /// signal IDs), unresolved.
        requested_keys: Vec<String>,
        /// Whether the compact wire format was requested.
        compact: bool,
        /// Whether timestamps should be included in each measurement.
        include_time: bool,
        /// Whether ms-resolution base-offset timestamps were requested.
        use_ms_resolution: bool,
        /// `dataChannel={localport=N}` endpoint, if the client asked for an
        /// out-of-band UDP data channel instead of the TCP command channel.
        udp_endpoint: Option<String>,
    },
    /// The client asked to rotate cipher keys immediately; the driver must
    /// generate a fresh key pair and call
    /// [`PublisherSession::complete_cipher_rotation`].
    CipherRotationRequested,
    /// A configuration change should be announced to the client.
    NotifyConfigurationChanged,
    /// The session should be torn down.
    Close {
        /// Human-readable reason.
        reason: String,
    },
}

/// Per-client publisher session.
pub struct PublisherSession {
    state: PublisherState,
    modes: OperationalModes,
    subscribed_keys: HashSet<Uuid>,
    signal_index_cache: SignalIndexCache,
    base_times: Option<BaseTimeOffsets>,
    cipher_keys: CipherKeyTable,
    encryption_enabled: bool,
    tssc_encoder: TsscEncoder,
    compact: bool,
    include_time: bool,
    use_ms_resolution: bool,
    buffer_retransmit_queue: HashMap<u32, Bytes>,
    next_buffer_block_seq: u32,
    udp_endpoint: Option<String>,
}

impl PublisherSession {
    /// Creates a session in the `Accepted` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PublisherState::Accepted,
            modes: OperationalModes::from_raw(0),
            subscribed_keys: HashSet::new(),
            signal_index_cache: SignalIndexCache::new(),
            base_times: None,
            cipher_keys: CipherKeyTable::new(),
            encryption_enabled: false,
            tssc_encoder: TsscEncoder::new(),
            compact: true,
            include_time: true,
            use_ms_resolution: false,
            buffer_retransmit_queue: HashMap::new(),
            next_buffer_block_seq: 0,
            udp_endpoint: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PublisherState {
        self.state
    }

    /// The currently installed signal-index cache snapshot.
    #[must_use]
    pub fn signal_index_cache(&self) -> std::sync::Arc<SignalIndexCacheData> {
        self.signal_index_cache.current()
    }

    /// The negotiated operational modes, available once `DefineOperationalModes`
    /// has been processed.
    #[must_use]
    pub fn operational_modes(&self) -> OperationalModes {
        self.modes
    }

    /// The out-of-band UDP data-channel endpoint requested by the current
    /// subscription, if any (`dataChannel={localport=N}`, §6).
    #[must_use]
    pub fn udp_endpoint(&self) -> Option<&str> {
        self.udp_endpoint.as_deref()
    }

    /// Dispatches one received command. Unknown command bytes and dispatch
    /// errors both become a `Failed` response rather than propagating, per
    /// §4.10: "unknown command bytes yield a `Failed` response with the
    /// offending byte echoed."
    pub fn handle_command(&mut self, byte: u8, payload: &[u8]) -> Vec<PublisherAction> {
        let command = match CommandCode::from_byte(byte) {
            Ok(c) => c,
            Err(_) => return vec![failed(byte, format!("unknown command byte 0x{byte:02X}"))],
        };

        match self.dispatch(command, payload) {
            Ok(actions) => actions,
            Err(err) => vec![failed(byte, err.to_string())],
        }
    }

    fn dispatch(&mut self, command: CommandCode, payload: &[u8]) -> Result<Vec<PublisherAction>> {
        match command {
            CommandCode::Authenticate => {
                // No live authentication flow (see design notes): a no-op
                // success under both `Tls` and `None` transport modes.
                Ok(vec![succeeded(command, Bytes::new())])
            },
            CommandCode::DefineOperationalModes => self.handle_define_operational_modes(payload),
            CommandCode::MetadataRefresh => self.handle_metadata_refresh(payload),
            CommandCode::Subscribe => self.handle_subscribe_command(payload),
            CommandCode::Unsubscribe => self.handle_unsubscribe(),
            CommandCode::RotateCipherKeys => {
                self.require_state(&[PublisherState::Subscribed], "RotateCipherKeys")?;
                Ok(vec![PublisherAction::CipherRotationRequested])
            },
            CommandCode::UpdateProcessingInterval => Ok(vec![succeeded(command, Bytes::new())]),
            CommandCode::ConfirmNotification => Ok(vec![]),
            CommandCode::ConfirmBufferBlock => {
                let seq = bytecodec::read_u32(payload)?;
                self.buffer_retransmit_queue.remove(&seq);
                Ok(vec![])
            },
            CommandCode::PublishCommandMeasurements => Ok(vec![succeeded(command, Bytes::new())]),
            CommandCode::UserCommand(_) => Ok(vec![succeeded(command, Bytes::new())]),
            // `CommandCode` is `#[non_exhaustive]`; every variant known at
            // the time of writing is handled above.
            #[allow(unreachable_patterns)]
            _ => Ok(vec![succeeded(command, Bytes::new())]),
        }
    }

    fn require_state(&self, allowed: &[PublisherState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: state_name(self.state), operation })
        }
    }

    fn handle_define_operational_modes(&mut self, payload: &[u8]) -> Result<Vec<PublisherAction>> {
        self.require_state(&[PublisherState::Accepted], "DefineOperationalModes")?;
        let raw = bytecodec::read_u32(payload)?;
        self.modes = OperationalModes::from_raw(raw);
        // §4.3: an unrecognized version logs a warning but never aborts the
        // session — version mismatch is surfaced by the driver's logging,
        // not rejected here.
        self.state = PublisherState::ModesDefined;
        Ok(vec![succeeded(CommandCode::DefineOperationalModes, Bytes::new())])
    }

    fn handle_metadata_refresh(&mut self, payload: &[u8]) -> Result<Vec<PublisherAction>> {
        self.require_state(
            &[PublisherState::ModesDefined, PublisherState::Subscribed, PublisherState::Unsubscribed],
            "MetadataRefresh",
        )?;
        let filters = if payload.is_empty() {
            Vec::new()
        } else {
            let len = bytecodec::read_i32(payload)? as usize;
            let text = std::str::from_utf8(&payload[4..4 + len])
                .map_err(|_| SessionError::MetadataMalformed("filter text is not valid UTF-8".into()))?;
            parse_filter_expressions(text)?
        };
        Ok(vec![PublisherAction::MetadataRequested { filters }])
    }

    /// Builds the `Succeeded(MetadataRefresh)` response once the driver has
    /// assembled a dataset for the filters from
    /// [`PublisherAction::MetadataRequested`]. Compression follows the
    /// negotiated `CompressMetadata` operational mode.
    pub fn deliver_metadata(&self, dataset: &TabularDataSet) -> Result<PublisherAction> {
        let bytes = dataset.to_wire_bytes(self.modes.compress_metadata())?;
        Ok(succeeded(CommandCode::MetadataRefresh, Bytes::from(bytes)))
    }

    fn handle_subscribe_command(&mut self, payload: &[u8]) -> Result<Vec<PublisherAction>> {
        self.require_state(
            &[PublisherState::ModesDefined, PublisherState::Subscribed, PublisherState::Unsubscribed],
            "Subscribe",
        )?;
        let flags = bytecodec::read_u8(payload)?;
        let compact = flags & DataPacketFlags::COMPACT.bits() != 0;
        let conn_str_len = bytecodec::read_i32(&payload[1..])? as usize;
        let conn_str_bytes = payload.get(5..5 + conn_str_len).ok_or(SessionError::Protocol(
            sttp_proto::ProtocolError::BufferUnderrun { needed: conn_str_len, available: payload.len().saturating_sub(5) },
        ))?;
        let conn_str = std::str::from_utf8(conn_str_bytes)
            .map_err(|_| SessionError::MetadataMalformed("connection string is not valid UTF-8".into()))?;
        let options = parse_connection_string(conn_str);

        let requested_keys = options
            .get("inputMeasurementKeys")
            .map(|v| crate::connection_string::parse_key_list(v))
            .unwrap_or_default();
        let include_time = options.get("includeTime").map(|v| v == "true").unwrap_or(true);
        let use_ms_resolution =
            options.get("useMillisecondResolution").map(|v| v == "true").unwrap_or(false);
        let udp_endpoint = options.get("dataChannel").cloned();

        Ok(vec![PublisherAction::SubscriptionRequested {
            requested_keys,
            compact,
            include_time,
            use_ms_resolution,
            udp_endpoint,
        }])
    }

    /// Completes a subscription once the driver has resolved
    /// [`PublisherAction::SubscriptionRequested`]'s `requested_keys` into
    /// concrete [`MeasurementKey`]s, installing the signal-index cache and
    /// emitting the ordered setup responses required by §4.5.
    pub fn complete_subscribe(
        &mut self,
        keys: Vec<MeasurementKey>,
        compact: bool,
        include_time: bool,
        use_ms_resolution: bool,
        udp_endpoint: Option<String>,
    ) -> Result<Vec<PublisherAction>> {
        self.subscribed_keys = keys.iter().map(MeasurementKey::signal_id).collect();
        self.compact = compact;
        self.include_time = include_time;
        self.use_ms_resolution = use_ms_resolution;
        self.udp_endpoint = udp_endpoint;
        self.tssc_encoder.reset();
        // §4.9: a resubscribe starts a fresh buffer-block sequence space;
        // retransmits queued under the old subscription no longer apply.
        self.buffer_retransmit_queue.clear();
        self.next_buffer_block_seq = 0;

        let entries: Vec<(u16, MeasurementKey)> =
            keys.into_iter().enumerate().map(|(i, k)| (i as u16, k)).collect();
        let index_count = entries.len();
        self.signal_index_cache.install(SignalIndexCacheData::new(
            entries,
            HashSet::new(),
            HashSet::new(),
        ));

        let mut actions = vec![update_signal_index_cache_response(index_count)];
        if let Some(base) = self.base_times {
            actions.push(update_base_times_response(base));
        }
        if self.encryption_enabled {
            if let Some(pair) = self.cipher_keys.get(self.cipher_keys.active_slot()) {
                actions.push(update_cipher_keys_response(&pair));
            }
        }
        actions.push(succeeded(CommandCode::Subscribe, Bytes::new()));

        self.state = PublisherState::Subscribed;
        Ok(actions)
    }

    fn handle_unsubscribe(&mut self) -> Result<Vec<PublisherAction>> {
        self.require_state(&[PublisherState::Subscribed, PublisherState::Unsubscribed], "Unsubscribe")?;
        self.udp_endpoint = None;
        self.tssc_encoder.reset();
        self.state = PublisherState::Unsubscribed;
        Ok(vec![succeeded(CommandCode::Unsubscribe, Bytes::new())])
    }

    /// Completes a `RotateCipherKeys` request (or a periodic rotation
    /// driven by the orchestrator's timer) once the driver has generated a
    /// fresh [`KeyPair`].
    pub fn complete_cipher_rotation(&mut self, pair: KeyPair) -> PublisherAction {
        self.encryption_enabled = true;
        self.cipher_keys.rotate(pair.clone());
        update_cipher_keys_response(&pair)
    }

    /// Encodes a batch of freshly arrived measurements as a `DataPacket`
    /// response, keeping only the ones this session is subscribed to.
    /// Returns `Ok(None)` when none of `measurements` are subscribed here
    /// (the driver should simply skip sending anything in that case).
    /// Encoding follows the negotiated `UseTSSC` mode: TSSC-compressed
    /// points (§4.7) when set, otherwise the per-measurement compact
    /// format (§4.6).
    pub fn publish_measurements(&mut self, measurements: &[Measurement]) -> Result<Option<PublisherAction>> {
        let cache = self.signal_index_cache.current();
        let subscribed: Vec<&Measurement> =
            measurements.iter().filter(|m| self.subscribed_keys.contains(&m.key.signal_id())).collect();
        if subscribed.is_empty() {
            return Ok(None);
        }

        let mut flags = DataPacketFlags::empty();
        if self.include_time {
            flags |= DataPacketFlags::SYNCHRONIZED;
        }
        if self.compact {
            flags |= DataPacketFlags::COMPACT;
        }

        let body = if self.modes.use_tssc() {
            flags |= DataPacketFlags::COMPRESSED;
            let points: Vec<TsscPoint> = subscribed
                .iter()
                .filter_map(|m| {
                    let index = crate::compact_measurement::index_of(&cache, &m.key)?;
                    let MeasurementValue::Scalar(value) = m.value else { return None };
                    Some(TsscPoint {
                        signal_index: i32::from(index),
                        time: m.timestamp.to_raw() as i64,
                        quality: m.state_flags.bits(),
                        value: value as f32,
                    })
                })
                .collect();
            self.tssc_encoder.encode_packet(&points)
        } else {
            let mut body = Vec::new();
            bytecodec::write_i32(&mut body, subscribed.len() as i32);
            for measurement in &subscribed {
                crate::compact_measurement::encode(
                    &mut body,
                    measurement,
                    &cache,
                    self.base_times.as_ref(),
                    self.include_time,
                    self.use_ms_resolution,
                    !measurement.state_flags.is_empty(),
                    false,
                )?;
            }
            body
        };

        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(flags.bits());
        payload.extend_from_slice(&body);

        Ok(Some(PublisherAction::SendResponse {
            code: ResponseCode::DataPacket,
            in_response_to: CommandCode::Subscribe.to_byte(),
            payload: Bytes::from(payload),
        }))
    }

    /// Sends an arbitrary-payload buffer block (§4.9), assigning the next
    /// sequence number and queuing it for retransmission until the client's
    /// `ConfirmBufferBlock` drains it (see [`Self::pending_retransmits`]).
    pub fn send_buffer_block(&mut self, payload: Bytes) -> PublisherAction {
        let seq = self.next_buffer_block_seq;
        self.next_buffer_block_seq = self.next_buffer_block_seq.wrapping_add(1);
        self.buffer_retransmit_queue.insert(seq, payload.clone());
        buffer_block_response(seq, &payload)
    }

    /// Re-sends every buffer block still awaiting `ConfirmBufferBlock`, in
    /// sequence order. Called periodically by the driver's retransmit
    /// timer.
    #[must_use]
    pub fn pending_retransmits(&self) -> Vec<PublisherAction> {
        let mut pending: Vec<(u32, Bytes)> =
            self.buffer_retransmit_queue.iter().map(|(&seq, payload)| (seq, payload.clone())).collect();
        pending.sort_by_key(|(seq, _)| *seq);
        pending.into_iter().map(|(seq, payload)| buffer_block_response(seq, &payload)).collect()
    }

    /// Installs a new base-time offset pair (`UpdateBaseTimes`), called by
    /// the orchestrator's explicit `RotateBaseTimes` operation — never
    /// auto-scheduled (see the open-question resolution in the design
    /// notes).
    pub fn rotate_base_times(&mut self, new_offset: crate::time::Tick) -> PublisherAction {
        let base = self.base_times.get_or_insert_with(|| BaseTimeOffsets::new(new_offset, new_offset));
        base.rotate(new_offset);
        update_base_times_response(*base)
    }
}

impl Default for PublisherSession {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: PublisherState) -> &'static str {
    match state {
        PublisherState::Accepted => "accepted",
        PublisherState::ModesDefined => "modes-defined",
        PublisherState::Subscribed => "subscribed",
        PublisherState::Unsubscribed => "unsubscribed",
        PublisherState::Closed => "closed",
    }
}

fn succeeded(command: CommandCode, payload: Bytes) -> PublisherAction {
    PublisherAction::SendResponse { code: ResponseCode::Succeeded, in_response_to: command.to_byte(), payload }
}

fn failed(command_byte: u8, reason: String) -> PublisherAction {
    PublisherAction::SendResponse {
        code: ResponseCode::Failed,
        in_response_to: command_byte,
        payload: Bytes::from(reason.into_bytes()),
    }
}

fn update_signal_index_cache_response(index_count: usize) -> PublisherAction {
    let mut payload = Vec::new();
    bytecodec::write_u32(&mut payload, index_count as u32);
    PublisherAction::SendResponse {
        code: ResponseCode::UpdateSignalIndexCache,
        in_response_to: CommandCode::Subscribe.to_byte(),
        payload: Bytes::from(payload),
    }
}

fn update_base_times_response(base: BaseTimeOffsets) -> PublisherAction {
    let mut payload = Vec::new();
    for offset in base.offsets() {
        bytecodec::write_u64(&mut payload, offset.to_raw());
    }
    PublisherAction::SendResponse {
        code: ResponseCode::UpdateBaseTimes,
        in_response_to: CommandCode::Subscribe.to_byte(),
        payload: Bytes::from(payload),
    }
}

fn buffer_block_response(seq: u32, payload: &Bytes) -> PublisherAction {
    let mut body = Vec::with_capacity(4 + payload.len());
    bytecodec::write_u32(&mut body, seq);
    body.extend_from_slice(payload);
    PublisherAction::SendResponse {
        code: ResponseCode::BufferBlock,
        in_response_to: CommandCode::Subscribe.to_byte(),
        payload: Bytes::from(body),
    }
}

fn update_cipher_keys_response(pair: &KeyPair) -> PublisherAction {
    let mut payload = Vec::new();
    payload.extend_from_slice(pair.cipher_key().as_slice());
    payload.extend_from_slice(pair.iv());
    PublisherAction::SendResponse {
        code: ResponseCode::UpdateCipherKeys,
        in_response_to: CommandCode::RotateCipherKeys.to_byte(),
        payload: Bytes::from(payload),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::measurement::InternTable;

    fn modes_payload(version: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        bytecodec::write_u32(&mut buf, version);
        buf
    }

    fn subscribe_payload(compact: bool, conn_str: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(if compact { DataPacketFlags::COMPACT.bits() } else { 0 });
        bytecodec::write_i32(&mut buf, conn_str.len() as i32);
        buf.extend_from_slice(conn_str.as_bytes());
        buf
    }

    #[test]
    fn unknown_command_byte_yields_failed_with_echo() {
        let mut session = PublisherSession::new();
        let actions = session.handle_command(0x42, &[]);
        match &actions[0] {
            PublisherAction::SendResponse { code, in_response_to, .. } => {
                assert_eq!(*code, ResponseCode::Failed);
                assert_eq!(*in_response_to, 0x42);
            },
            _ => panic!("expected SendResponse"),
        }
    }

    #[test]
    fn subscribe_before_modes_defined_is_rejected() {
        let mut session = PublisherSession::new();
        let actions =
            session.handle_command(CommandCode::Subscribe.to_byte(), &subscribe_payload(true, ""));
        assert!(matches!(
            &actions[0],
            PublisherAction::SendResponse { code: ResponseCode::Failed, .. }
        ));
    }

    #[test]
    fn full_handshake_then_subscribe_installs_cache_in_order() {
        let mut session = PublisherSession::new();
        session.handle_command(CommandCode::DefineOperationalModes.to_byte(), &modes_payload(0x0400_0201));
        assert_eq!(session.state(), PublisherState::ModesDefined);

        let actions = session.handle_command(
            CommandCode::Subscribe.to_byte(),
            &subscribe_payload(true, "inputMeasurementKeys={G1;G2};includeTime=true"),
        );
        let requested = match &actions[0] {
            PublisherAction::SubscriptionRequested { requested_keys, compact, include_time, .. } => {
                assert!(compact);
                assert!(include_time);
                requested_keys.clone()
            },
            other => panic!("expected SubscriptionRequested, got {other:?}"),
        };
        assert_eq!(requested, vec!["G1".to_string(), "G2".to_string()]);

        let table = InternTable::new();
        let keys: Vec<_> = requested
            .iter()
            .enumerate()
            .map(|(i, _)| table.get_or_intern(Uuid::from_u128(i as u128 + 1), "DEV", i as u64))
            .collect();

        let actions = session.complete_subscribe(keys, true, true, false, None).unwrap();
        assert!(matches!(
            actions[0],
            PublisherAction::SendResponse { code: ResponseCode::UpdateSignalIndexCache, .. }
        ));
        assert!(matches!(
            actions.last().unwrap(),
            PublisherAction::SendResponse { code: ResponseCode::Succeeded, .. }
        ));
        assert_eq!(session.state(), PublisherState::Subscribed);
        assert_eq!(session.signal_index_cache().len(), 2);
    }

    #[test]
    fn resubscribe_resets_tssc_encoder_to_sequence_zero() {
        let mut session = PublisherSession::new();
        session.handle_command(CommandCode::DefineOperationalModes.to_byte(), &modes_payload(1));
        let table = InternTable::new();
        let key = table.get_or_intern(Uuid::from_u128(1), "DEV", 1);

        session.complete_subscribe(vec![key.clone()], true, true, false, None).unwrap();
        let first = session.tssc_encoder.encode_packet(&[]);
        assert_eq!(&first[1..3], &0u16.to_be_bytes());
        let second = session.tssc_encoder.encode_packet(&[]);
        assert_eq!(&second[1..3], &1u16.to_be_bytes());

        session.handle_command(CommandCode::Unsubscribe.to_byte(), &[]);
        session.complete_subscribe(vec![key], true, true, false, None).unwrap();
        let packet = session.tssc_encoder.encode_packet(&[]);
        assert_eq!(&packet[1..3], &0u16.to_be_bytes());
    }

    #[test]
    fn rotate_cipher_keys_requires_active_subscription() {
        let mut session = PublisherSession::new();
        let actions = session.handle_command(CommandCode::RotateCipherKeys.to_byte(), &[]);
        assert!(matches!(
            &actions[0],
            PublisherAction::SendResponse { code: ResponseCode::Failed, .. }
        ));
    }

    #[test]
    fn authenticate_is_always_a_no_op_success() {
        let mut session = PublisherSession::new();
        let actions = session.handle_command(CommandCode::Authenticate.to_byte(), &[]);
        assert!(matches!(
            &actions[0],
            PublisherAction::SendResponse { code: ResponseCode::Succeeded, .. }
        ));
    }

    #[test]
    fn publish_measurements_skips_unsubscribed_signals() {
        let mut session = PublisherSession::new();
        session.handle_command(CommandCode::DefineOperationalModes.to_byte(), &modes_payload(1));
        let table = InternTable::new();
        let subscribed_key = table.get_or_intern(Uuid::from_u128(1), "DEV", 1);
        let other_key = table.get_or_intern(Uuid::from_u128(2), "DEV", 2);
        session.complete_subscribe(vec![subscribed_key.clone()], true, true, false, None).unwrap();

        let measurements = vec![
            crate::measurement::Measurement {
                key: subscribed_key,
                timestamp: crate::time::Tick::now(),
                value: crate::measurement::MeasurementValue::Scalar(60.0),
                state_flags: crate::measurement::StateFlags::empty(),
            },
            crate::measurement::Measurement {
                key: other_key,
                timestamp: crate::time::Tick::now(),
                value: crate::measurement::MeasurementValue::Scalar(1.0),
                state_flags: crate::measurement::StateFlags::empty(),
            },
        ];

        let action = session.publish_measurements(&measurements).unwrap().expect("one measurement is subscribed");
        match action {
            PublisherAction::SendResponse { code, payload, .. } => {
                assert_eq!(code, ResponseCode::DataPacket);
                assert!(!payload.is_empty());
            },
            other => panic!("expected SendResponse, got {other:?}"),
        }
    }

    #[test]
    fn publish_measurements_returns_none_when_nothing_subscribed_matches() {
        let mut session = PublisherSession::new();
        session.handle_command(CommandCode::DefineOperationalModes.to_byte(), &modes_payload(1));
        let table = InternTable::new();
        let subscribed_key = table.get_or_intern(Uuid::from_u128(1), "DEV", 1);
        let other_key = table.get_or_intern(Uuid::from_u128(2), "DEV", 2);
        session.complete_subscribe(vec![subscribed_key], true, true, false, None).unwrap();

        let measurements = vec![crate::measurement::Measurement {
            key: other_key,
            timestamp: crate::time::Tick::now(),
            value: crate::measurement::MeasurementValue::Scalar(1.0),
            state_flags: crate::measurement::StateFlags::empty(),
        }];

        assert!(session.publish_measurements(&measurements).unwrap().is_none());
    }

    #[test]
    fn publish_measurements_uses_tssc_when_negotiated() {
        let mut session = PublisherSession::new();
        session.handle_command(CommandCode::DefineOperationalModes.to_byte(), &modes_payload(0x0000_0400 | 1));
        let table = InternTable::new();
        let key = table.get_or_intern(Uuid::from_u128(1), "DEV", 1);
        session.complete_subscribe(vec![key.clone()], true, true, false, None).unwrap();

        let measurements = vec![crate::measurement::Measurement {
            key,
            timestamp: crate::time::Tick::now(),
            value: crate::measurement::MeasurementValue::Scalar(60.0),
            state_flags: crate::measurement::StateFlags::empty(),
        }];

        let action = session.publish_measurements(&measurements).unwrap().unwrap();
        match action {
            PublisherAction::SendResponse { payload, .. } => {
                assert!(payload[0] & DataPacketFlags::COMPRESSED.bits() != 0);
            },
            other => panic!("expected SendResponse, got {other:?}"),
        }
    }

    fn subscribed_session() -> PublisherSession {
        let mut session = PublisherSession::new();
        session.handle_command(CommandCode::DefineOperationalModes.to_byte(), &modes_payload(1));
        session.complete_subscribe(vec![], true, true, false, None).unwrap();
        session
    }

    #[test]
    fn send_buffer_block_assigns_increasing_sequence_numbers_and_queues_for_retransmit() {
        let mut session = subscribed_session();

        let first = session.send_buffer_block(Bytes::from_static(b"a"));
        let second = session.send_buffer_block(Bytes::from_static(b"b"));

        for (action, seq, tag) in [(first, 0u32, b'a'), (second, 1u32, b'b')] {
            match action {
                PublisherAction::SendResponse { code, payload, .. } => {
                    assert_eq!(code, ResponseCode::BufferBlock);
                    assert_eq!(&payload[..4], &seq.to_be_bytes());
                    assert_eq!(payload[4], tag);
                },
                other => panic!("expected SendResponse, got {other:?}"),
            }
        }
        assert_eq!(session.pending_retransmits().len(), 2);
    }

    #[test]
    fn confirm_buffer_block_drains_the_retransmit_queue() {
        let mut session = subscribed_session();
        session.send_buffer_block(Bytes::from_static(b"a"));
        assert_eq!(session.pending_retransmits().len(), 1);

        let mut ack = Vec::new();
        bytecodec::write_u32(&mut ack, 0);
        session.handle_command(CommandCode::ConfirmBufferBlock.to_byte(), &ack);

        assert!(session.pending_retransmits().is_empty());
    }

    #[test]
    fn resubscribe_clears_outstanding_buffer_blocks_and_resets_sequence() {
        let mut session = subscribed_session();
        session.send_buffer_block(Bytes::from_static(b"a"));
        assert_eq!(session.pending_retransmits().len(), 1);

        session.handle_command(CommandCode::Unsubscribe.to_byte(), &[]);
        session.complete_subscribe(vec![], true, true, false, None).unwrap();

        assert!(session.pending_retransmits().is_empty());
        let action = session.send_buffer_block(Bytes::from_static(b"c"));
        match action {
            PublisherAction::SendResponse { payload, .. } => assert_eq!(&payload[..4], &0u32.to_be_bytes()),
            other => panic!("expected SendResponse, got {other:?}"),
        }
    }
}
