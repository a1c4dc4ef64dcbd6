// Copyright (c) James Kassemi, SC, US. All rights reserved.

pub mod config;
pub mod record;
pub mod retry;

pub use config::{AppConfig, ExportConfig, RotationConfig, WriterConfig};
pub use record::{HourPeriod, Record, RecordKind, NANOS_PER_HOUR};
pub use retry::Backoff;
