//! Transport registry and per-peer backend selector.
use omesh_common::error::Error;

use crate::backend::{Backend, TransportKind};

/// Maximum number of transports that can be simultaneously active.
pub const MAX_ACTIVE: usize = 6;

/// The priority policy used when a peer's preferred transport isn't active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// `stream-socket, serial, short-radio, datagram-socket, kernel-mesh, long-radio`.
    Default,
    /// `serial, short-radio, long-radio, kernel-mesh, stream-socket, datagram-socket`.
    PreferOffline,
    /// `stream-socket, datagram-socket, kernel-mesh, short-radio, serial, long-radio`.
    PreferInternet,
}

impl SelectionMode {
    fn priority_order(&self) -> [TransportKind; 6] {
        use TransportKind::*;
        match self {
            SelectionMode::Default => [
                StreamSocket,
                Serial,
                RadioShort,
                DatagramSocket,
                KernelMesh,
                RadioLongRange,
            ],
            SelectionMode::PreferOffline => [
                Serial,
                RadioShort,
                RadioLongRange,
                KernelMesh,
                StreamSocket,
                DatagramSocket,
            ],
            SelectionMode::PreferInternet => [
                StreamSocket,
                DatagramSocket,
                KernelMesh,
                RadioShort,
                Serial,
                RadioLongRange,
            ],
        }
    }
}

/// A registry of transport backends, tracking which are currently "active"
/// (i.e. initialized and usable for selection).
pub struct Registry {
    backends: Vec<Box<dyn Backend>>,
    active: Vec<TransportKind>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("active", &self.active).finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Register a backend. Re-registering the same kind is a no-op;
    /// registering when [`MAX_ACTIVE`] backends are already active is an
    /// error. The first backend added becomes the default for legacy
    /// single-transport callers.
    pub fn register(&mut self, backend: Box<dyn Backend>) -> Result<(), Error> {
        let kind = backend.kind();
        if self.active.contains(&kind) {
            return Ok(());
        }
        if self.active.len() >= MAX_ACTIVE {
            log::warn!(target: "transport", "registry is full, dropping {kind:?}");
            return Err(Error::argument("transport registry is full"));
        }
        log::info!(target: "transport", "{kind:?} backend active");
        self.active.push(kind);
        self.backends.push(backend);
        Ok(())
    }

    /// The default backend: the first one registered.
    pub fn default_backend(&self) -> Option<&dyn Backend> {
        self.backends.first().map(|b| b.as_ref())
    }

    /// Mutable access to a registered backend by kind.
    pub fn backend_mut(&mut self, kind: TransportKind) -> Option<&mut (dyn Backend + '_)> {
        self.backends
            .iter_mut()
            .find(|b| b.kind() == kind)
            .map(|b| b.as_mut())
    }

    /// Immutable access to a registered backend by kind.
    pub fn backend(&self, kind: TransportKind) -> Option<&dyn Backend> {
        self.backends.iter().find(|b| b.kind() == kind).map(|b| b.as_ref())
    }

    /// The currently active transport kinds, in registration order.
    pub fn active(&self) -> &[TransportKind] {
        &self.active
    }

    /// Select a transport for a peer whose preferred transport is
    /// `preferred` (may be [`TransportKind::None`]), per the policy in
    /// `mode`. Returns `None` ("none") if nothing active applies.
    pub fn select(&self, preferred: TransportKind, mode: SelectionMode) -> Option<TransportKind> {
        if preferred != TransportKind::None && self.active.contains(&preferred) {
            return Some(preferred);
        }
        mode.priority_order()
            .into_iter()
            .find(|kind| self.active.contains(kind))
    }

    /// Iterate over all registered backends mutably (used by the mesh
    /// reactor's pump to poll every active link each tick).
    pub fn backends_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Backend>> {
        self.backends.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, BackendPeer, BackendStats};
    use std::time::Duration;

    #[derive(Debug)]
    struct MockBackend(TransportKind);

    impl Backend for MockBackend {
        fn kind(&self) -> TransportKind {
            self.0
        }
        fn init(&mut self, _config: BackendConfig) -> Result<(), Error> {
            Ok(())
        }
        fn shutdown(&mut self) {}
        fn send(&mut self, _peer_id: u64, _data: &[u8]) -> Result<usize, Error> {
            Ok(0)
        }
        fn recv(&mut self, _max_len: usize, _timeout: Duration) -> Result<(Vec<u8>, u64), Error> {
            Err(Error::link("no data"))
        }
        fn get_peers(&self) -> Vec<BackendPeer> {
            Vec::new()
        }
        fn get_link_quality(&self, _peer_id: u64) -> Option<u8> {
            None
        }
        fn stats(&self) -> BackendStats {
            BackendStats::default()
        }
    }

    #[test]
    fn re_registering_same_kind_is_a_no_op() {
        let mut registry = Registry::new();
        registry.register(Box::new(MockBackend(TransportKind::StreamSocket))).unwrap();
        registry.register(Box::new(MockBackend(TransportKind::StreamSocket))).unwrap();
        assert_eq!(registry.active().len(), 1);
    }

    #[test]
    fn registering_past_capacity_fails() {
        let mut registry = Registry::new();
        let all = [
            TransportKind::StreamSocket,
            TransportKind::DatagramSocket,
            TransportKind::Serial,
            TransportKind::RadioShort,
            TransportKind::RadioLongRange,
            TransportKind::KernelMesh,
        ];
        for kind in all {
            registry.register(Box::new(MockBackend(kind))).unwrap();
        }
        assert_eq!(registry.active().len(), MAX_ACTIVE);
    }

    #[test]
    fn selection_prefers_peer_transport_when_active() {
        let mut registry = Registry::new();
        registry.register(Box::new(MockBackend(TransportKind::Serial))).unwrap();
        registry.register(Box::new(MockBackend(TransportKind::StreamSocket))).unwrap();

        assert_eq!(
            registry.select(TransportKind::Serial, SelectionMode::Default),
            Some(TransportKind::Serial)
        );
    }

    #[test]
    fn selection_falls_back_to_mode_priority_order() {
        let mut registry = Registry::new();
        registry.register(Box::new(MockBackend(TransportKind::DatagramSocket))).unwrap();
        registry.register(Box::new(MockBackend(TransportKind::StreamSocket))).unwrap();

        // Peer prefers a transport that isn't active; default mode picks
        // stream-socket over datagram-socket.
        assert_eq!(
            registry.select(TransportKind::RadioLongRange, SelectionMode::Default),
            Some(TransportKind::StreamSocket)
        );
    }

    #[test]
    fn selection_returns_none_when_nothing_active() {
        let registry = Registry::new();
        assert_eq!(registry.select(TransportKind::None, SelectionMode::Default), None);
    }
}
