//! Handshake-time configuration (§9 SPEC_FULL: ambient, not in the
//! original distillation). Generalizes the teacher's inline
//! `enum_map! { ... }` settings literal in `connection.rs` into a reusable,
//! documented type.

use std::time::Duration;

use enum_map::{enum_map, EnumMap};

use crate::types::{
    SettingsParameter, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
};

pub type SettingsMap = EnumMap<SettingsParameter, u32>;

/// The settings a side advertises at handshake time, plus local
/// implementation bounds that never cross the wire (§9 "Default parameter
/// values", §5 "no internal timeouts are mandated except a
/// SETTINGS_TIMEOUT").
#[derive(Debug, Clone)]
pub struct Config {
    /// What we advertise to the peer as our local SETTINGS.
    pub local_settings: SettingsMap,
    /// Upper bound on a single outbound DATA frame's payload before the
    /// writer fragments it (§4.4 "Honor MAX_FRAME_SIZE").
    pub max_frame_size: u32,
    /// How long to wait for the peer's SETTINGS ACK after the handshake
    /// SETTINGS frame is sent before treating it as `SettingsTimeout`.
    pub settings_ack_timeout: Duration,
    /// Bound on the connection's outbound frame queue (writer side); this
    /// is purely a local resource cap, never sent on the wire.
    pub outbound_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_settings: enum_map! {
                SettingsParameter::HeaderTableSize => DEFAULT_HEADER_TABLE_SIZE,
                SettingsParameter::EnablePush => 1,
                SettingsParameter::MaxConcurrentStreams => u32::MAX,
                SettingsParameter::InitialWindowSize => DEFAULT_INITIAL_WINDOW_SIZE,
            },
            max_frame_size: crate::types::DEFAULT_MAX_FRAME_SIZE,
            settings_ack_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 1024,
        }
    }
}

impl Config {
    #[must_use]
    pub fn initial_window_size(&self) -> u32 {
        self.local_settings[SettingsParameter::InitialWindowSize]
    }

    #[must_use]
    pub fn header_table_size(&self) -> u32 {
        self.local_settings[SettingsParameter::HeaderTableSize]
    }
}
