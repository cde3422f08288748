//! Serial port enumeration and slave address scanning.

use std::time::Duration;

use serde::Serialize;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tokio_modbus::slave::SlaveContext;
use tokio_serial::SerialPortType;
use tracing::debug;

/// USB product description of the FTDI adapter cable the controllers ship
/// with.
pub const FTDI_PRODUCT: &str = "FT231X USB UART";

/// Renogy controllers answer on 9600 8N1.
pub const BAUD_RATE: u32 = 9600;

/// Identity registers that hold readable ASCII on known controllers. Newer
/// firmware moved the model string, so both locations are probed.
const PROBE_REGISTERS: [(u16, u16); 2] = [(0x000C, 8), (0x1402, 8)];

/// A silent address times out; keep the scan over 247 addresses brisk.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Error type for discovery.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("No FTDI USB device found. Please connect the device.")]
    NoDevice,
    #[error("Multiple FTDI USB devices found ({0:?}). Please disconnect all but one.")]
    MultipleDevices(Vec<String>),
    #[error("No slave addresses answered. Please check the connection.")]
    NoSlaveAddress,
    #[error("Multiple slave addresses answered ({0:?}). Please check the connection.")]
    MultipleSlaveAddresses(Vec<u8>),
    #[error("Serial port error: {0}")]
    Serial(String),
}

/// The discovered pair, printed for manual transcription into the bridge's
/// `--device-address` and `--slave-address` flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModbusParameters {
    pub device: String,
    pub slave_address: u8,
}

/// Discover both parameters: the USB serial device, then the slave address
/// answering on it.
pub async fn find_modbus_parameters(
    device_override: Option<String>,
) -> Result<ModbusParameters, ProbeError> {
    let device = match device_override {
        Some(device) => device,
        None => find_usb_device()?,
    };

    let slave_address = find_slave_address(&device).await?;

    Ok(ModbusParameters {
        device,
        slave_address,
    })
}

/// Select the single serial port backed by the expected FTDI adapter.
pub fn find_usb_device() -> Result<String, ProbeError> {
    let ports = tokio_serial::available_ports().map_err(|e| ProbeError::Serial(e.to_string()))?;

    select_usb_device(ports.into_iter().map(|port| {
        let product = match port.port_type {
            SerialPortType::UsbPort(usb) => usb.product,
            _ => None,
        };
        (port.port_name, product)
    }))
}

/// Pure selection over (port name, USB product description) pairs, split out
/// so it is testable without hardware.
pub fn select_usb_device<I>(ports: I) -> Result<String, ProbeError>
where
    I: IntoIterator<Item = (String, Option<String>)>,
{
    let matches: Vec<String> = ports
        .into_iter()
        .filter(|(_, product)| {
            product
                .as_deref()
                .is_some_and(|p| p.contains(FTDI_PRODUCT))
        })
        .map(|(name, _)| name)
        .collect();

    match matches.as_slice() {
        [] => Err(ProbeError::NoDevice),
        [device] => Ok(device.clone()),
        _ => Err(ProbeError::MultipleDevices(matches)),
    }
}

/// Scan the bus for the device that returns readable identity registers.
///
/// Every address from 1 to 247 is tried; exactly one hit is expected on a
/// point-to-point USB link.
pub async fn find_slave_address(device: &str) -> Result<u8, ProbeError> {
    let builder = tokio_serial::new(device, BAUD_RATE);
    let serial = tokio_serial::SerialStream::open(&builder)
        .map_err(|e| ProbeError::Serial(e.to_string()))?;

    let mut ctx = rtu::attach(serial);
    let mut found = Vec::new();

    for address in 0x01..=0xF7u8 {
        ctx.set_slave(Slave(address));
        if probe_address(&mut ctx).await {
            debug!("Slave address {} answered", address);
            found.push(address);
        }
    }

    match found.as_slice() {
        [] => Err(ProbeError::NoSlaveAddress),
        [address] => Ok(*address),
        _ => Err(ProbeError::MultipleSlaveAddresses(found)),
    }
}

/// Try the identity registers at the context's current slave address.
async fn probe_address(ctx: &mut Context) -> bool {
    for (register, count) in PROBE_REGISTERS {
        let response =
            tokio::time::timeout(PROBE_TIMEOUT, ctx.read_holding_registers(register, count)).await;

        if let Ok(Ok(Ok(words))) = response {
            if is_ascii_identity(&words) {
                return true;
            }
        }
    }

    false
}

/// A register block counts as an identity string when every byte is ASCII;
/// a noise response of arbitrary binary fails this.
pub fn is_ascii_identity(words: &[u16]) -> bool {
    !words.is_empty()
        && words
            .iter()
            .flat_map(|word| word.to_be_bytes())
            .all(|byte| byte.is_ascii())
}
