//! # Sonar Recorder Core Library
//!
//! This crate streams multi-channel sonar pages from an acquisition unit into
//! ordered recording files. The binary (`main.rs`) wires configuration,
//! logging and signal handling around the [`recorder::Recorder`] loop; the
//! library holds everything else so the pipeline can be driven against the
//! built-in simulator in tests.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, environment)
//!   loaded through `figment`. See `config::RecorderConfig`.
//! - **`device`**: The `Device` trait the acquisition unit driver implements,
//!   the value types it exchanges and the `sim` simulator.
//! - **`error`**: The `RecorderError` enum and its recovery dispositions.
//! - **`fetcher`**: Per-channel page polling with a ping cursor.
//! - **`page`**: Page header layout, channel variants and framing masks.
//! - **`recorder`**: The acquisition loop: settings sync, drain, flush, pacing,
//!   reconnect.
//! - **`sdfx`**: Page extension records and the bathymetry metadata splice.
//! - **`shutdown`**: Cooperative cancellation between the signal handler and
//!   the loop.
//! - **`telemetry`**: `tracing` subscriber setup.
//! - **`writer`**: Ping reassembly, the write cache, disk monitoring and the
//!   recording file lifecycle.

pub mod config;
pub mod device;
pub mod error;
pub mod fetcher;
pub mod page;
pub mod recorder;
pub mod sdfx;
pub mod shutdown;
pub mod telemetry;
pub mod writer;

pub use config::RecorderConfig;
pub use device::{ChannelType, Device, DeviceError, DeviceErrorCode};
pub use error::{Disposition, RecorderError, RecorderResult};
pub use recorder::Recorder;
pub use writer::PageWriter;
