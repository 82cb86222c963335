//! BLE transport: one GATT characteristic used for both directions.
//!
//! Writes go out "without response" in chunks no larger than the link's
//! single-write payload, with a short pause after each. Reads poll the
//! characteristic and return whatever the link layer holds at that moment.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PrinterError, Result};
use crate::printer::Printer;
use crate::transport::Transport;

/// Characteristic the printer reads commands from and writes replies to.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xbef8d6c9_9c21_4c9e_b632_bd58c1009f9f);

/// Largest payload one unacknowledged BLE write carries.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Frames some printer variants expect before the first command: density 1
/// and label type 1.
pub const HANDSHAKE: [[u8; 8]; 2] = [
    [0x55, 0x55, 0x21, 0x01, 0x01, 0x21, 0xAA, 0xAA],
    [0x55, 0x55, 0x23, 0x01, 0x01, 0x23, 0xAA, 0xAA],
];

const HANDSHAKE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Bytes per GATT write.
    pub chunk_size: usize,
    /// Pause after each chunk.
    pub chunk_delay: Duration,
    /// How long to scan for the address before giving up.
    pub scan_timeout: Duration,
    pub characteristic: Uuid,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(10),
            scan_timeout: Duration::from_secs(10),
            characteristic: CHARACTERISTIC_UUID,
        }
    }
}

struct Link {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// Chunked-write, poll-read transport over a BLE characteristic.
pub struct BleTransport {
    address: String,
    config: BleConfig,
    link: Option<Link>,
}

impl BleTransport {
    /// `address` is the printer's Bluetooth address, e.g. `C3:08:13:07:15:85`.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(address, BleConfig::default())
    }

    pub fn with_config(address: impl Into<String>, config: BleConfig) -> Self {
        Self {
            address: address.into(),
            config,
            link: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    fn is_target(&self, peripheral: &Peripheral) -> bool {
        peripheral
            .address()
            .to_string()
            .eq_ignore_ascii_case(&self.address)
    }

    fn link(&self) -> Result<&Link> {
        self.link
            .as_ref()
            .ok_or_else(|| PrinterError::Connection("not connected".into()))
    }

    /// Resolve the address to a peripheral, scanning if the adapter has not
    /// seen it yet.
    async fn find_peripheral(&self, adapter: &Adapter) -> Result<Peripheral> {
        for peripheral in adapter.peripherals().await? {
            if self.is_target(&peripheral) {
                return Ok(peripheral);
            }
        }

        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        let found = tokio::time::timeout(self.config.scan_timeout, async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event
                {
                    let peripheral = adapter.peripheral(&id).await?;
                    if self.is_target(&peripheral) {
                        return Ok(Some(peripheral));
                    }
                }
            }
            Ok::<_, PrinterError>(None)
        })
        .await;
        // Scanning is only a means to resolve the address.
        if let Err(e) = adapter.stop_scan().await {
            debug!("failed to stop scan: {e}");
        }

        match found {
            Ok(Ok(Some(peripheral))) => Ok(peripheral),
            Ok(Err(e)) => Err(e),
            Ok(Ok(None)) | Err(_) => Err(PrinterError::Connection(format!(
                "printer {} not found",
                self.address
            ))),
        }
    }
}

async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PrinterError::Connection("no bluetooth adapter available".into()))
}

/// Splits a payload into link-sized writes. A zero size disables chunking.
pub fn chunk_data(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if chunk_size == 0 {
        return vec![data];
    }
    data.chunks(chunk_size).collect()
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<()> {
        if let Some(link) = &self.link {
            if link.peripheral.is_connected().await? {
                return Ok(());
            }
        }

        let peripheral = match self.link.take() {
            Some(link) => link.peripheral,
            None => {
                let adapter = default_adapter().await?;
                self.find_peripheral(&adapter).await?
            }
        };
        peripheral.connect().await.map_err(|e| {
            PrinterError::Connection(format!("failed to connect to {}: {e}", self.address))
        })?;
        peripheral.discover_services().await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.config.characteristic)
            .ok_or_else(|| {
                PrinterError::Connection(format!(
                    "characteristic {} not offered by printer",
                    self.config.characteristic
                ))
            })?;

        info!("connected to {} and discovered services", self.address);
        self.link = Some(Link {
            peripheral,
            characteristic,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(link) = self.link.take() {
            if link.peripheral.is_connected().await.unwrap_or(false) {
                link.peripheral.disconnect().await?;
            }
            info!("disconnected from {}", self.address);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.connect().await?;
        let link = self.link()?;
        for chunk in chunk_data(data, self.config.chunk_size) {
            link.peripheral
                .write(&link.characteristic, chunk, WriteType::WithoutResponse)
                .await?;
            tokio::time::sleep(self.config.chunk_delay).await;
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        self.connect().await?;
        let link = self.link()?;
        let data = link.peripheral.read(&link.characteristic).await?;
        debug!("read {} bytes from characteristic", data.len());
        Ok(data)
    }

    async fn handshake(&mut self) -> Result<()> {
        for frame in HANDSHAKE {
            self.write(&frame).await?;
            tokio::time::sleep(HANDSHAKE_DELAY).await;
        }
        Ok(())
    }
}

/// Connect to the printer at `address` over BLE and wrap it in a [`Printer`].
pub async fn connect(address: &str) -> Result<Printer<BleTransport>> {
    let mut transport = BleTransport::new(address);
    transport.connect().await?;
    Ok(Printer::new(transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, RequestCode};

    #[test]
    fn test_chunk_data_respects_link_ceiling() {
        let data: Vec<u8> = (0..45).collect();
        let chunks = chunk_data(&data, DEFAULT_CHUNK_SIZE);
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![20, 20, 5]
        );
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_chunk_data_zero_size_sends_whole_payload() {
        let data = [1u8, 2, 3];
        assert_eq!(chunk_data(&data, 0), vec![&data[..]]);
    }

    #[test]
    fn test_handshake_frames_are_density_and_label_type() {
        assert_eq!(
            HANDSHAKE[0].to_vec(),
            encode(RequestCode::SetLabelDensity.code(), &[1]).unwrap()
        );
        assert_eq!(
            HANDSHAKE[1].to_vec(),
            encode(RequestCode::SetLabelType.code(), &[1]).unwrap()
        );
    }

    #[test]
    fn test_default_config() {
        let transport = BleTransport::new("C3:08:13:07:15:85");
        assert_eq!(transport.config().chunk_size, 20);
        assert_eq!(transport.config().chunk_delay, Duration::from_millis(10));
        assert_eq!(
            transport.config().characteristic.to_string(),
            "bef8d6c9-9c21-4c9e-b632-bd58c1009f9f"
        );
        assert!(transport.link.is_none());
    }
}
