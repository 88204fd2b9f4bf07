use crate::{ClientBuilder, ClientConfig, FabricClient, Result};

/// Owns a client configuration and hands out clients built from it.
///
/// [`ClientRegistry::shared`] returns handles onto one default client, while
/// [`ClientRegistry::independent`] builds a fresh client with its own
/// pending-changes set. Nothing is global: the registry itself is passed
/// around explicitly.
#[derive(Clone, Debug)]
pub struct ClientRegistry {
    template: ClientBuilder,
    shared: FabricClient,
}

impl ClientRegistry {
    /// Builds the shared default client; fails on invalid configuration.
    pub fn new(template: ClientBuilder) -> Result<Self> {
        let shared = template.clone().build()?;
        Ok(Self { template, shared })
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::new(ClientBuilder::from_config(config))
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        self.template.config()
    }

    /// Handle onto the default client.
    pub fn shared(&self) -> FabricClient {
        self.shared.clone()
    }

    /// A new client that shares nothing mutable with the default one.
    pub fn independent(&self) -> Result<FabricClient> {
        self.template.clone().build()
    }
}
