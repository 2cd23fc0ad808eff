//! Bus address mapper: a single-writer actor that learns which physical
//! node owns each of the 254 claimable source addresses by listening to
//! ISO Address Claims, and opportunistically queries Product Info,
//! Configuration Info and the PGN List of every node it discovers.
//!
//! Conflict resolution follows SAE J1939: when two nodes claim the same
//! address, the numerically lower NAME keeps it and the loser's current
//! source is set to the null address.

use crate::core::{
    CanBusHeader, RawMessage, ADDRESS_GLOBAL, ADDRESS_NULL, PGN_CONFIGURATION_INFO,
    PGN_ISO_ADDRESS_CLAIM, PGN_ISO_REQUEST, PGN_PGN_LIST, PGN_PRODUCT_INFO,
};
use crate::error::{FieldError, MapperError};
use crate::gateway::RawMessageWriter;
use crate::infra::codec::raw_data::RawData;
use crate::protocol::managment::iso_name::NodeName;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound request queue depth; enqueues beyond it are dropped. Broadcast
/// claims can trigger request bursts from a hundred nodes at once.
const REQUEST_QUEUE_SIZE: usize = 50;

/// One outgoing message is dequeued per tick, keeping request traffic from
/// crowding out application traffic on the bus.
const WRITE_TICK: Duration = Duration::from_millis(10);

//==================================================================================Node data

/// Product Information (PGN 126996), 134-byte fast-packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub nmea2000_version: u16,
    pub product_code: u16,
    pub model_id: String,
    pub software_version_code: String,
    pub model_version: String,
    pub model_serial_code: String,
    pub certification_level: u8,
    pub load_equivalency: u8,
}

impl ProductInfo {
    pub fn from_raw(raw: &RawMessage) -> Result<Self, MapperError> {
        if raw.header.pgn != PGN_PRODUCT_INFO {
            return Err(MapperError::UnexpectedPgn {
                what: "product info",
                expected: PGN_PRODUCT_INFO,
            });
        }
        if raw.data.len() != 134 {
            return Err(MapperError::InvalidLength {
                what: "product info",
                len: raw.data.len(),
            });
        }
        let data = RawData::new(&raw.data);

        // The two version words may legitimately be unset.
        let nmea2000_version = match data.decode_variable_uint(0, 16) {
            Ok(v) => v as u16,
            Err(FieldError::NoData) => 0,
            Err(e) => return Err(extraction("product info nmea2000 version", e)),
        };
        let product_code = match data.decode_variable_uint(16, 16) {
            Ok(v) => v as u16,
            Err(FieldError::NoData) => 0,
            Err(e) => return Err(extraction("product info product code", e)),
        };

        let model_id = data
            .decode_string_fix(32, 256)
            .map_err(|e| extraction("product info model id", e))?;
        let software_version_code = data
            .decode_string_fix(288, 256)
            .map_err(|e| extraction("product info software version code", e))?;
        let model_version = data
            .decode_string_fix(544, 256)
            .map_err(|e| extraction("product info model version", e))?;
        let model_serial_code = data
            .decode_string_fix(800, 256)
            .map_err(|e| extraction("product info model serial code", e))?;

        Ok(Self {
            nmea2000_version,
            product_code,
            model_id,
            software_version_code,
            model_version,
            model_serial_code,
            certification_level: raw.data[132],
            load_equivalency: raw.data[133],
        })
    }
}

/// Configuration Information (PGN 126998): three consecutive LAU strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    pub installation_description1: String,
    pub installation_description2: String,
    pub manufacturer_info: String,
}

impl ConfigurationInfo {
    pub fn from_raw(raw: &RawMessage) -> Result<Self, MapperError> {
        if raw.header.pgn != PGN_CONFIGURATION_INFO {
            return Err(MapperError::UnexpectedPgn {
                what: "configuration info",
                expected: PGN_CONFIGURATION_INFO,
            });
        }
        let data = RawData::new(&raw.data);
        let (installation_description1, offset) = data
            .decode_string_lau(0)
            .map_err(|e| extraction("configuration info installation description 1", e))?;
        let (installation_description2, read) = data
            .decode_string_lau(offset)
            .map_err(|e| extraction("configuration info installation description 2", e))?;
        let (manufacturer_info, _) = data
            .decode_string_lau(offset + read)
            .map_err(|e| extraction("configuration info manufacturer info", e))?;
        Ok(Self {
            installation_description1,
            installation_description2,
            manufacturer_info,
        })
    }
}

fn extraction(what: &'static str, source: FieldError) -> MapperError {
    MapperError::Extraction { what, source }
}

/// One logical device observed on the bus. The NAME is its immutable
/// identity; the source address may change over time.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Current source address; [`ADDRESS_NULL`] when the node lost its
    /// address in a claim conflict.
    pub source: u8,
    pub name: NodeName,
    pub product_info: Option<ProductInfo>,
    pub configuration_info: Option<ConfigurationInfo>,
}

//==================================================================================Slots

/// Per-slot timestamps as reported by
/// [`slot_activity`](AddressMapper::slot_activity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotActivity {
    pub claimed: Option<DateTime<Utc>>,
    pub product_info_requested: Option<DateTime<Utc>>,
    pub config_info_requested: Option<DateTime<Utc>>,
    pub pgn_list_requested: Option<DateTime<Utc>>,
    pub last_packet: Option<DateTime<Utc>>,
}

/// Ownership record for one claimable source address.
#[derive(Debug, Clone, Copy, Default)]
struct BusSlot {
    /// NAME key of the owning node, if any.
    owner: Option<u64>,
    claimed: Option<DateTime<Utc>>,
    product_info_requested: Option<DateTime<Utc>>,
    config_info_requested: Option<DateTime<Utc>>,
    pgn_list_requested: Option<DateTime<Utc>>,
    last_packet: Option<DateTime<Utc>>,
}

struct MapperState {
    nodes: HashMap<u64, Node>,
    /// Indexed by source address 0..=253; 254/255 are reserved.
    slots: Vec<BusSlot>,
    write_enabled: bool,
    is_running: bool,
}

//==================================================================================Mapper

/// The mapper actor. [`process`](AddressMapper::process) is called from the
/// reader task for every inbound message; [`run`](AddressMapper::run) owns
/// the paced outbound side; the getters snapshot under the same lock.
pub struct AddressMapper {
    state: Mutex<MapperState>,
    requests_tx: mpsc::Sender<RawMessage>,
    toggle_tx: mpsc::Sender<bool>,
    channels: Mutex<Option<RunChannels>>,
}

struct RunChannels {
    requests_rx: mpsc::Receiver<RawMessage>,
    toggle_rx: mpsc::Receiver<bool>,
}

impl Default for AddressMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressMapper {
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (toggle_tx, toggle_rx) = mpsc::channel(4);
        Self {
            state: Mutex::new(MapperState {
                nodes: HashMap::new(),
                slots: vec![BusSlot::default(); usize::from(ADDRESS_NULL)],
                write_enabled: false,
                is_running: false,
            }),
            requests_tx,
            toggle_tx,
            channels: Mutex::new(Some(RunChannels {
                requests_rx,
                toggle_rx,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MapperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable or disable the outbound side. While disabled the run loop
    /// stops its pacing timer and drains queued requests without sending.
    pub fn toggle_write(&self) {
        let enabled = {
            let mut st = self.lock();
            st.write_enabled = !st.write_enabled;
            if !st.is_running {
                return;
            }
            st.write_enabled
        };
        // Queue full means a toggle is already pending; last writer wins
        // anyway once the loop catches up.
        let _ = self.toggle_tx.try_send(enabled);
    }

    /// Queue a broadcast ISO Request for PGN 60928 so every node
    /// re-announces its address claim.
    pub fn broadcast_iso_address_claim_request(&self) {
        self.enqueue(create_iso_request(PGN_ISO_ADDRESS_CLAIM, ADDRESS_GLOBAL));
    }

    /// Non-blocking enqueue; the queue is bounded and overflow is dropped.
    fn enqueue(&self, message: RawMessage) {
        if self.requests_tx.try_send(message).is_err() {
            tracing::warn!("address mapper request queue full, dropping request");
        }
    }

    //==================================================================================Inbound

    /// Digest one inbound message. Returns `true` when a slot's owner
    /// changed. Reserved sources (254, 255) never claim a slot but their
    /// claims still register the node itself.
    pub fn process(&self, raw: &RawMessage) -> Result<bool, MapperError> {
        let mut guard = self.lock();
        let st = &mut *guard;

        let source = raw.header.source;
        if source < ADDRESS_NULL {
            st.slots[usize::from(source)].last_packet = Some(raw.time);
        }

        match raw.header.pgn {
            PGN_ISO_ADDRESS_CLAIM => self.process_address_claim(st, raw),
            PGN_PRODUCT_INFO => self.process_product_info(st, raw).map(|_| false),
            PGN_CONFIGURATION_INFO => self.process_configuration_info(st, raw).map(|_| false),
            PGN_PGN_LIST => self.process_pgn_list(st, raw).map(|_| false),
            _ => Ok(false),
        }
    }

    fn process_address_claim(
        &self,
        st: &mut MapperState,
        raw: &RawMessage,
    ) -> Result<bool, MapperError> {
        let bytes: [u8; 8] = raw.data.as_slice().try_into().map_err(|_| {
            MapperError::InvalidLength {
                what: "iso address claim",
                len: raw.data.len(),
            }
        })?;
        let name = NodeName::from_wire_bytes(bytes);
        let key = name.raw();
        let source = raw.header.source;

        st.nodes.entry(key).or_insert_with(|| Node {
            source,
            name,
            product_info: None,
            configuration_info: None,
        });

        if source >= ADDRESS_NULL {
            // A node answering from the null address is known but unplaced.
            return Ok(false);
        }

        let slot_owner = st.slots[usize::from(source)].owner;
        let mut changed = false;
        match slot_owner {
            None => {
                // Probably joined an already-settled bus: assume the
                // claimant owns the address.
                self.claim_slot(st, source, key);
                changed = true;
            }
            Some(incumbent) if key < incumbent => {
                // Lower NAME wins; the incumbent loses its address.
                if let Some(loser) = st.nodes.get_mut(&incumbent) {
                    loser.source = ADDRESS_NULL;
                }
                tracing::debug!(
                    source,
                    winner = %name,
                    loser = %NodeName::from_raw(incumbent),
                    "address claim conflict resolved"
                );
                self.claim_slot(st, source, key);
                changed = true;
            }
            Some(_) => {}
        }

        let slot = &mut st.slots[usize::from(source)];
        if st.write_enabled && slot.product_info_requested.is_none() {
            slot.product_info_requested = Some(Utc::now());
            self.enqueue(create_iso_request(PGN_PRODUCT_INFO, source));
        }
        Ok(changed)
    }

    fn claim_slot(&self, st: &mut MapperState, source: u8, key: u64) {
        if let Some(node) = st.nodes.get_mut(&key) {
            node.source = source;
        }
        let slot = &mut st.slots[usize::from(source)];
        slot.owner = Some(key);
        slot.claimed = Some(Utc::now());
    }

    fn process_product_info(&self, st: &mut MapperState, raw: &RawMessage) -> Result<(), MapperError> {
        let source = raw.header.source;
        if source >= ADDRESS_NULL {
            return Ok(());
        }
        let Some(owner) = st.slots[usize::from(source)].owner else {
            return Ok(());
        };
        let Some(node) = st.nodes.get_mut(&owner) else {
            return Ok(());
        };
        if node.product_info.is_none() {
            node.product_info = Some(ProductInfo::from_raw(raw)?);
        }

        let slot = &mut st.slots[usize::from(source)];
        if st.write_enabled && slot.config_info_requested.is_none() {
            slot.config_info_requested = Some(Utc::now());
            self.enqueue(create_iso_request(PGN_CONFIGURATION_INFO, source));
        }
        Ok(())
    }

    fn process_configuration_info(
        &self,
        st: &mut MapperState,
        raw: &RawMessage,
    ) -> Result<(), MapperError> {
        let source = raw.header.source;
        if source >= ADDRESS_NULL {
            return Ok(());
        }
        let Some(owner) = st.slots[usize::from(source)].owner else {
            return Ok(());
        };
        let Some(node) = st.nodes.get_mut(&owner) else {
            return Ok(());
        };
        if node.configuration_info.is_none() {
            node.configuration_info = Some(ConfigurationInfo::from_raw(raw)?);
        }

        let slot = &mut st.slots[usize::from(source)];
        if st.write_enabled && slot.pgn_list_requested.is_none() {
            slot.pgn_list_requested = Some(Utc::now());
            self.enqueue(create_iso_request(PGN_PGN_LIST, source));
        }
        Ok(())
    }

    /// PGN lists are acknowledged but not stored yet.
    fn process_pgn_list(&self, _st: &mut MapperState, raw: &RawMessage) -> Result<(), MapperError> {
        tracing::trace!(source = raw.header.source, "pgn list received");
        Ok(())
    }

    //==================================================================================Snapshots

    /// Every node ever observed, current and dethroned.
    pub fn nodes(&self) -> Vec<Node> {
        self.lock().nodes.values().cloned().collect()
    }

    /// Bookkeeping timestamps for one source address slot.
    pub fn slot_activity(&self, source: u8) -> Option<SlotActivity> {
        if source >= ADDRESS_NULL {
            return None;
        }
        let st = self.lock();
        let slot = &st.slots[usize::from(source)];
        Some(SlotActivity {
            claimed: slot.claimed,
            product_info_requested: slot.product_info_requested,
            config_info_requested: slot.config_info_requested,
            pgn_list_requested: slot.pgn_list_requested,
            last_packet: slot.last_packet,
        })
    }

    /// Nodes currently holding a claimable source address.
    pub fn nodes_in_use_by_source(&self) -> HashMap<u8, Node> {
        self.lock()
            .nodes
            .values()
            .filter(|n| n.source < ADDRESS_NULL)
            .map(|n| (n.source, n.clone()))
            .collect()
    }

    //==================================================================================Run loop

    /// Drive the outbound side until cancellation: dequeue at most one
    /// request per 10 ms tick and hand it to `writer`. Write failures are
    /// logged and the loop continues.
    pub async fn run<W>(
        &self,
        cancel: &CancellationToken,
        writer: &mut W,
    ) -> Result<(), MapperError>
    where
        W: RawMessageWriter + ?Sized,
    {
        let mut channels = {
            let mut st = self.lock();
            if st.is_running {
                return Err(MapperError::AlreadyRunning);
            }
            let channels = self
                .channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(MapperError::AlreadyRunning)?;
            st.is_running = true;
            channels
        };

        let result = self.run_loop(cancel, writer, &mut channels).await;

        let mut st = self.lock();
        st.is_running = false;
        *self.channels.lock().unwrap_or_else(PoisonError::into_inner) = Some(channels);
        result
    }

    async fn run_loop<W>(
        &self,
        cancel: &CancellationToken,
        writer: &mut W,
        channels: &mut RunChannels,
    ) -> Result<(), MapperError>
    where
        W: RawMessageWriter + ?Sized,
    {
        let mut enabled = self.lock().write_enabled;
        let mut queue: std::collections::VecDeque<RawMessage> =
            std::collections::VecDeque::with_capacity(REQUEST_QUEUE_SIZE);
        let mut ticker = tokio::time::interval(WRITE_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(MapperError::Cancelled),

                toggled = channels.toggle_rx.recv() => {
                    match toggled {
                        Some(value) => {
                            enabled = value;
                            if enabled {
                                ticker.reset();
                            }
                        }
                        None => return Err(MapperError::RequestChannelClosed),
                    }
                }

                request = channels.requests_rx.recv() => {
                    match request {
                        Some(message) => {
                            // Disabled: drain without sending.
                            if enabled {
                                if queue.len() < REQUEST_QUEUE_SIZE {
                                    queue.push_back(message);
                                } else {
                                    tracing::warn!("request queue overflow, dropping");
                                }
                            }
                        }
                        None => return Err(MapperError::RequestChannelClosed),
                    }
                }

                _ = ticker.tick(), if enabled => {
                    if let Some(message) = queue.pop_front() {
                        if let Err(e) = writer.write_raw_message(cancel, &message).await {
                            tracing::warn!(
                                pgn = message.header.pgn,
                                error = %e,
                                "address mapper write failed"
                            );
                        }
                    }
                }
            }
        }
    }
}

//==================================================================================Requests

/// Build an ISO Request (PGN 59904) for `for_pgn`.
///
/// A node that has not claimed an address must use the null address as
/// source, and this library never claims one.
pub fn create_iso_request(for_pgn: u32, destination: u8) -> RawMessage {
    RawMessage {
        time: Utc::now(),
        header: CanBusHeader {
            pgn: PGN_ISO_REQUEST,
            priority: 6,
            source: ADDRESS_NULL,
            destination,
        },
        data: vec![for_pgn as u8, (for_pgn >> 8) as u8, (for_pgn >> 16) as u8],
    }
}
