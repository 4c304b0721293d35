//! TCP transport for devices reachable over an ethernet gateway.

use crate::error::SimpleBinaryError;
use crate::transport::{Transport, READ_CHUNK};
use async_trait::async_trait;
use log::{debug, error};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct TcpTransport {
    address: String,
    data: mpsc::Sender<Vec<u8>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// `address` is `host:port`; `data` receives raw chunks read from the
    /// connection once the transport is opened.
    pub fn new(address: &str, data: mpsc::Sender<Vec<u8>>) -> Self {
        TcpTransport {
            address: address.to_string(),
            data,
            writer: Mutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    fn spawn_reader(&self, mut reader: OwnedReadHalf) -> JoinHandle<()> {
        let data = self.data.clone();
        let address = self.address.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!("{address} - connection closed by peer");
                        break;
                    }
                    Ok(n) => {
                        if data.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("{address} - read error: {e}");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self) -> Result<(), SimpleBinaryError> {
        self.close().await;

        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            SimpleBinaryError::TransportError(format!("connecting to {}: {e}", self.address))
        })?;
        debug!("{} - connected", self.address);

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        *self.reader_task.lock().await = Some(self.spawn_reader(reader));
        Ok(())
    }

    async fn close(&self) {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        self.writer.lock().await.take();
    }

    async fn write(&self, data: &[u8]) -> Result<(), SimpleBinaryError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(|| {
            SimpleBinaryError::TransportError(format!("{} is not connected", self.address))
        })?;
        writer
            .write_all(data)
            .await
            .map_err(|e| SimpleBinaryError::TransportError(format!("tcp write: {e}")))
    }
}
