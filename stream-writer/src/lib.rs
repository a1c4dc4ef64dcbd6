// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Per-stream write path with rotation-aware buffering.
//!
//! A [`StreamWriter`] normally appends straight to its active segment.
//! During a rotation the coordinator asks it to buffer; submissions are
//! queued in arrival order until the replacement segment is installed,
//! then drained front-first so no record is lost or reordered across
//! the swap.

mod error;
mod writer;

pub use error::{Result, WriterError};
pub use writer::{StreamWriter, WriterMode, WriterStats};
