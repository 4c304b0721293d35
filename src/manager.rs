//! # Device Manager
//!
//! Owns every configured channel: builds the transport, opens it, spawns
//! the channel task and routes host write commands to the channel an item
//! is bound to.

use crate::channel::{Channel, ChannelConfig, ChannelHandle, ChannelRunner, ValueSink};
use crate::config::{ChannelDef, ConfigFile, ItemRegistry, Value};
use crate::error::SimpleBinaryError;
use crate::transport::{SerialTransport, TcpTransport, Transport};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct ManagedChannel {
    channel: Arc<Channel>,
    handle: ChannelHandle,
    task: JoinHandle<()>,
}

pub struct DeviceManager {
    items: Arc<ItemRegistry>,
    sink: Arc<dyn ValueSink>,
    channels: HashMap<String, ManagedChannel>,
}

impl DeviceManager {
    pub fn new(items: Arc<ItemRegistry>, sink: Arc<dyn ValueSink>) -> Self {
        DeviceManager {
            items,
            sink,
            channels: HashMap::new(),
        }
    }

    /// Build the full manager from a parsed configuration file: registry,
    /// one transport and running task per declared channel.
    pub async fn from_config(
        config: ConfigFile,
        sink: Arc<dyn ValueSink>,
    ) -> Result<Self, SimpleBinaryError> {
        let items = Arc::new(ItemRegistry::from_descriptors(config.items)?);
        let mut manager = DeviceManager::new(items, sink);
        for def in &config.channels {
            manager.add_channel_def(def).await?;
        }
        Ok(manager)
    }

    fn channel_config(def: &ChannelDef) -> ChannelConfig {
        let mut config = ChannelConfig::new(&def.name, def.poll_mode);
        if let Some(ms) = def.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = def.response_timeout_ms {
            config.response_timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Instantiate one channel from its configuration file declaration.
    pub async fn add_channel_def(&mut self, def: &ChannelDef) -> Result<(), SimpleBinaryError> {
        let config = Self::channel_config(def);
        match (&def.serial, &def.tcp) {
            (Some(serial), None) => {
                self.add_serial_channel(config, &serial.port, serial.baudrate)
                    .await
            }
            (None, Some(address)) => self.add_tcp_channel(config, address).await,
            _ => Err(SimpleBinaryError::ConfigError(format!(
                "channel '{}' must declare exactly one of serial/tcp",
                def.name
            ))),
        }
    }

    pub async fn add_serial_channel(
        &mut self,
        config: ChannelConfig,
        port: &str,
        baudrate: u32,
    ) -> Result<(), SimpleBinaryError> {
        let (data_tx, data_rx) = mpsc::channel(32);
        let transport = Arc::new(SerialTransport::new(port, baudrate, data_tx));
        self.add_channel(config, transport, data_rx).await
    }

    pub async fn add_tcp_channel(
        &mut self,
        config: ChannelConfig,
        address: &str,
    ) -> Result<(), SimpleBinaryError> {
        let (data_tx, data_rx) = mpsc::channel(32);
        let transport = Arc::new(TcpTransport::new(address, data_tx));
        self.add_channel(config, transport, data_rx).await
    }

    async fn add_channel(
        &mut self,
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
        data: mpsc::Receiver<Vec<u8>>,
    ) -> Result<(), SimpleBinaryError> {
        let name = config.name.clone();
        if self.channels.contains_key(&name) {
            return Err(SimpleBinaryError::ConfigError(format!(
                "duplicate channel name '{name}'"
            )));
        }

        let channel = Arc::new(Channel::new(
            config,
            Arc::clone(&self.items),
            transport,
            Arc::clone(&self.sink),
        ));
        channel.open().await?;

        let (runner, handle) = ChannelRunner::new(Arc::clone(&channel), data);
        let task = tokio::spawn(runner.run());
        info!("{name} - channel started");

        self.channels.insert(
            name,
            ManagedChannel {
                channel,
                handle,
                task,
            },
        );
        Ok(())
    }

    /// Route a host write command to the channel the item is bound to.
    pub async fn send_value(&self, item: &str, value: Value) -> Result<(), SimpleBinaryError> {
        let descriptor = self.items.get(item).ok_or_else(|| {
            SimpleBinaryError::ConfigError(format!("unknown item '{item}'"))
        })?;
        let managed = self.channels.get(&descriptor.channel).ok_or_else(|| {
            SimpleBinaryError::ConfigError(format!(
                "item '{item}' is bound to undeclared channel '{}'",
                descriptor.channel
            ))
        })?;
        managed.handle.send_value(item, value).await
    }

    pub fn channel(&self, name: &str) -> Option<&Arc<Channel>> {
        self.channels.get(name).map(|m| &m.channel)
    }

    pub fn items(&self) -> &Arc<ItemRegistry> {
        &self.items
    }

    /// Stop every channel task and close the transports.
    pub async fn disconnect_all(&mut self) {
        for (name, managed) in self.channels.drain() {
            managed.handle.shutdown().await;
            let _ = managed.task.await;
            info!("{name} - channel stopped");
        }
    }
}
