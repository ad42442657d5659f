//! `tracklink` - Detection pipe listener and takeoff/land sequencer
//!
//! This library subscribes to the perception service's detection channel,
//! decodes fixed-size detection records and hands them to a handler. It also
//! drives a short takeoff, hover and land sequence through an autopilot
//! client.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod autopilot;
pub mod channel;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod detection;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod reader;

pub use autopilot::{Autopilot, ConnectionUrl, FlightPlan, FlightReport};
pub use channel::{ChannelHandle, ChannelPath, ChannelTransport};
pub use config::Config;
pub use decoder::{DecodeStats, RecordDecoder, TailPolicy};
pub use detection::{DetectionRecord, FixedRecord};
pub use error::{Error, Result};
pub use lifecycle::ShutdownToken;
pub use logging::init_logging;
pub use reader::{ConsoleHandler, RecordFormat, StreamHandler, StreamReader};
