// NATS JetStream key/value bus
// Lets assemblies on different machines share one communication layer

//! # NATS Communication
//!
//! [`NatsBus`] implements [`KeyValueBus`] over a JetStream key/value
//! bucket. Every assembly taking part in a deployment connects to the same
//! bucket; the key layout is the one defined in `communication::keys`.
//!
//! Unlike the in-memory bus, waiting for a marker does not poll: the bus
//! opens a watch on the key and is woken by the peer's `put`.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::communication::KeyValueBus;
use crate::{ConcertoError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsCommunicationConfig {
    pub url: String,
    pub bucket: String,
    pub connection_timeout: Duration,
    pub reconnect_attempts: usize,
    pub client_name: Option<String>,
    /// Values kept per key
    pub history: i64,
}

impl Default for NatsCommunicationConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            bucket: "concerto".to_string(),
            connection_timeout: Duration::from_secs(10),
            reconnect_attempts: 5,
            client_name: Some("concerto".to_string()),
            history: 1,
        }
    }
}

impl NatsCommunicationConfig {
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

fn bus_error<E: std::fmt::Display>(context: &str, key: &str, e: E) -> ConcertoError {
    ConcertoError::Communication(anyhow::anyhow!("{} {}: {}", context, key, e))
}

pub struct NatsBus {
    client: Client,
    store: kv::Store,
    config: NatsCommunicationConfig,
}

impl NatsBus {
    pub async fn connect(config: NatsCommunicationConfig) -> Result<Self> {
        info!("Connecting to NATS server at {}", config.url);
        let client = Self::connect_with_retry(&config).await?;
        let js = jetstream::new(client.clone());
        let store = Self::ensure_kv_bucket(&js, &config).await?;
        info!("NATS communication ready on bucket {}", config.bucket);
        Ok(Self {
            client,
            store,
            config,
        })
    }

    async fn connect_with_retry(config: &NatsCommunicationConfig) -> Result<Client> {
        let attempts = config.reconnect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let mut options = async_nats::ConnectOptions::new()
                .connection_timeout(config.connection_timeout)
                .request_timeout(Some(config.connection_timeout * attempts as u32));
            if let Some(name) = &config.client_name {
                options = options.name(name);
            }

            match options.connect(&config.url).await {
                Ok(client) => {
                    info!("Connected to NATS server after {} attempt(s)", attempt);
                    return Ok(client);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        warn!("NATS connection attempt {} failed: {}", attempt, e);
                        tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                    }
                }
            }
        }
        error!(
            "Failed to connect to NATS after {} attempts: {}",
            attempts, last_error
        );
        Err(ConcertoError::Communication(anyhow::anyhow!(
            "Failed to connect to NATS at {}: {}",
            config.url,
            last_error
        )))
    }

    async fn ensure_kv_bucket(
        js: &jetstream::Context,
        config: &NatsCommunicationConfig,
    ) -> Result<kv::Store> {
        match js.get_key_value(&config.bucket).await {
            Ok(store) => {
                debug!("Using existing KV bucket: {}", config.bucket);
                Ok(store)
            }
            Err(_) => {
                info!("Creating KV bucket: {}", config.bucket);
                js.create_key_value(kv::Config {
                    bucket: config.bucket.clone(),
                    history: config.history,
                    description: "Concerto assembly coordination".to_string(),
                    ..Default::default()
                })
                .await
                .map_err(|e| bus_error("Failed to create KV bucket", &config.bucket, e))
            }
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &NatsCommunicationConfig {
        &self.config
    }
}

#[async_trait]
impl KeyValueBus for NatsBus {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(key, value)
            .await
            .map(|_| ())
            .map_err(|e| bus_error("Failed to put", key, e))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|e| bus_error("Failed to get", key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| bus_error("Failed to delete", key, e))
    }

    async fn wait_for_key(&self, key: &str, within: Duration) -> Result<bool> {
        // watch before reading so a put landing in between is not missed
        let mut watch = self
            .store
            .watch(key)
            .await
            .map_err(|e| bus_error("Failed to watch", key, e))?;
        if self.get(key).await?.is_some() {
            return Ok(true);
        }

        let appeared = tokio::time::timeout(within, async {
            while let Some(entry) = watch.next().await {
                match entry {
                    Ok(entry) if matches!(entry.operation, kv::Operation::Put) => return true,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Watch on {} failed: {}", key, e);
                        return false;
                    }
                }
            }
            false
        })
        .await;
        Ok(appeared.unwrap_or(false))
    }
}
