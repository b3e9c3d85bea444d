//! Shared handles built once at startup and passed to the dispatcher.

use std::sync::Arc;

use taskline_core::registry::TaskRegistry;
use taskline_core::store::JobStore;
use taskline_core::workdir::WorkDirectoryManager;
use taskline_events::EventBus;

use crate::location::Locations;
use crate::retry::InfraRetryConfig;

#[derive(Clone)]
pub struct Services {
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<dyn JobStore>,
    pub workdirs: WorkDirectoryManager,
    pub locations: Arc<Locations>,
    pub events: Arc<EventBus>,
    pub retry: InfraRetryConfig,
}

impl Services {
    /// Only the `local` location, a fresh event bus and default retry.
    pub fn new(registry: Arc<TaskRegistry>, store: Arc<dyn JobStore>, workdirs: WorkDirectoryManager) -> Self {
        Self {
            registry,
            store,
            workdirs,
            locations: Arc::new(Locations::new()),
            events: Arc::new(EventBus::default()),
            retry: InfraRetryConfig::default(),
        }
    }

    pub fn with_locations(mut self, locations: Locations) -> Self {
        self.locations = Arc::new(locations);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry(mut self, retry: InfraRetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
