use std::collections::HashMap;
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::persistence::FlushStatus;

/// Response for diagnostics information
#[derive(Serialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_rooms: u32,
    pub n_conn: u32,
    pub n_delivered: u64,
    pub n_dropped: u64,
    pub n_bridge_loops: u32,
    pub n_autosave_loops: u32,
    pub n_cached_docs: u32,
    pub persistence_enabled: bool,
    pub last_flush: HashMap<String, FlushStatus>,
    pub uptime_secs: u64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
