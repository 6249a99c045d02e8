//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - The pipeline supervisor shared by all connections
//! - The registry of live publisher connections
//! - Server configuration

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::pipeline::{ConnectionInfo, PipelineSupervisor};

/// Application state shared across all connection tasks
pub struct AppState {
    /// Live connections (connection id -> info)
    pub connections: DashMap<Uuid, ConnectionInfo>,

    /// Runs one pipeline per connection
    pub supervisor: PipelineSupervisor,

    /// Server configuration
    pub config: ServerConfig,

    /// Connections accepted since start
    accepted: AtomicU64,

    /// Server shutdown flag
    shutdown: AtomicBool,
}

impl AppState {
    pub fn new(config: ServerConfig, supervisor: PipelineSupervisor) -> Self {
        Self {
            connections: DashMap::new(),
            supervisor,
            config,
            accepted: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Track a connection until the returned guard is dropped
    pub fn register(self: &Arc<Self>, info: &ConnectionInfo) -> ConnectionGuard {
        self.connections.insert(info.id, info.clone());
        self.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Registered connection {} from {} ({} active)",
            info.id,
            info.peer,
            self.active_count()
        );
        ConnectionGuard {
            state: Arc::clone(self),
            id: info.id,
        }
    }

    /// Drop a connection from the registry
    pub fn unregister(&self, id: &Uuid) -> Option<ConnectionInfo> {
        let removed = self.connections.remove(id).map(|(_, info)| info);
        if let Some(info) = &removed {
            let secs = (chrono::Utc::now() - info.connected_at).num_seconds();
            tracing::debug!(
                "Unregistered connection {} after {}s ({} active)",
                id,
                secs,
                self.active_count()
            );
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown is requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Removes its connection from the registry when dropped
pub struct ConnectionGuard {
    state: Arc<AppState>,
    id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.unregister(&self.id);
    }
}
