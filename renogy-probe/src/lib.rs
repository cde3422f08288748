//! Discovery tool for Renogy USB parameters.
//!
//! Run once, interactively, before configuring the bridge: finds the FTDI
//! serial adapter the controller hangs off and scans the bus for the slave
//! address that answers.

pub mod probe;

pub use probe::{
    ModbusParameters, ProbeError, find_modbus_parameters, find_slave_address, find_usb_device,
};
