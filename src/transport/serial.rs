//! Serial line transport (RS-232/RS-485), 8N1.

use crate::error::SimpleBinaryError;
use crate::transport::{Transport, READ_CHUNK};
use async_trait::async_trait;
use log::{debug, error};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

pub struct SerialTransport {
    port: String,
    baudrate: u32,
    data: mpsc::Sender<Vec<u8>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// `data` receives raw chunks read from the line once the transport is
    /// opened.
    pub fn new(port: &str, baudrate: u32, data: mpsc::Sender<Vec<u8>>) -> Self {
        SerialTransport {
            port: port.to_string(),
            baudrate,
            data,
            writer: Mutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    fn spawn_reader(&self, mut reader: ReadHalf<SerialStream>) -> JoinHandle<()> {
        let data = self.data.clone();
        let port = self.port.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!("{port} - serial line closed");
                        break;
                    }
                    Ok(n) => {
                        if data.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("{port} - serial read error: {e}");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self) -> Result<(), SimpleBinaryError> {
        self.close().await;

        let stream = tokio_serial::new(&self.port, self.baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| {
                SimpleBinaryError::TransportError(format!(
                    "opening serial port {}: {e}",
                    self.port
                ))
            })?;
        debug!("{} - serial port opened at {} baud", self.port, self.baudrate);

        let (reader, writer) = tokio::io::split(stream);
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
            SimpleBinaryError::TransportError(format!("serial port {} is not open", self.port))
        })?;
        writer
            .write_all(data)
            .await
            .map_err(|e| SimpleBinaryError::TransportError(format!("serial write: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| SimpleBinaryError::TransportError(format!("serial flush: {e}")))
    }
}
