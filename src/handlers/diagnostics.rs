use crate::{models::DiagnosticsResponse, AppState};
use axum::{extract::State, Json};
use std::sync::Arc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Relay counters plus process-level system stats.
pub async fn diagnostics(State(state): State<Arc<AppState>>) -> Json<DiagnosticsResponse> {
    let stats = state.rooms.stats().await;
    let n_cached_docs = state.cache.len().await as u32;
    let last_flush = state.persistence.flush_statuses().await;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}, Dropped: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.sessions,
        stats.rooms,
        stats.dropped
    );

    Json(DiagnosticsResponse {
        n_rooms: stats.rooms as u32,
        n_conn: stats.sessions as u32,
        n_delivered: stats.delivered,
        n_dropped: stats.dropped,
        n_bridge_loops: state.bridge.active_count() as u32,
        n_autosave_loops: state.persistence.active_count() as u32,
        n_cached_docs,
        persistence_enabled: state.persistence.is_enabled(),
        last_flush,
        uptime_secs: state.started_at.elapsed().as_secs(),
        cpu_usage,
        memory_alloc,
        memory_total,
        memory_free,
    })
}
