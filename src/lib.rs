//! btrescue: repairs a Bluetooth controller that reports a hardware error.
//!
//! Follows the kernel log, and when the controller's hardware-error line
//! appears, reloads its driver module and brings the dependent
//! NetworkManager connection back up.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod logging;

pub mod dmesg;
pub mod network;
pub mod uptime;

pub mod classifier;
pub mod recovery;

pub mod component;
pub mod registry;
pub mod supervisor;
