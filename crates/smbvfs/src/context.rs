//! Process-level wiring of registry, discovery and filesystems.

use {
    crate::{
        discovery::{DiscoveryConfig, DiscoveryService},
        entry::ServerEntry,
        registry::ConnectionRegistry,
        transport::{NameService, Transport},
        utils::Result,
        vfs::VirtualFileSystem,
    },
    std::sync::Arc,
};

/// Owns the shared connection registry and the discovery service.
///
/// Every [`VirtualFileSystem`] handed out by [`filesystem`](Self::filesystem)
/// sees the same sessions but keeps its own current directory. Dropping the
/// context stops discovery; sessions live on until the last filesystem or
/// handle referencing them is gone.
pub struct SmbContext<T: Transport, N: NameService> {
    registry: Arc<ConnectionRegistry<T>>,
    discovery: DiscoveryService<N>,
}

impl<T: Transport, N: NameService> SmbContext<T, N> {
    pub fn new<F>(transport: T, name_service: F) -> SmbContext<T, N>
    where
        F: Fn() -> N + Send + Sync + 'static,
    {
        SmbContext::with_config(transport, name_service, DiscoveryConfig::default())
    }

    pub fn with_config<F>(transport: T, name_service: F, config: DiscoveryConfig) -> SmbContext<T, N>
    where
        F: Fn() -> N + Send + Sync + 'static,
    {
        SmbContext {
            registry: Arc::new(ConnectionRegistry::new(transport)),
            discovery: DiscoveryService::with_config(name_service, config),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<T>> {
        &self.registry
    }

    pub fn discovery(&self) -> &DiscoveryService<N> {
        &self.discovery
    }

    pub fn discovery_mut(&mut self) -> &mut DiscoveryService<N> {
        &mut self.discovery
    }

    /// A new filesystem view rooted at `/`.
    pub fn filesystem(&self) -> VirtualFileSystem<T> {
        VirtualFileSystem::new(self.registry.clone())
    }

    /// Reconnect to a stored server entry.
    pub async fn connect_entry(&self, entry: &ServerEntry) -> Result<()> {
        self.registry
            .connect(&entry.identity(), &entry.credentials())
            .await
    }
}
