// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Hourly rotation of active segments.
//!
//! One [`RotationCoordinator`] per stream drives a cycle ticket through
//! signal, swap, flush, export, and cleanup. Writers buffer while the
//! active segment is renamed out and a replacement is created; the
//! frozen segment is exported to parquet and only dropped once the
//! export is verified and logged. A failed cycle leaves the frozen
//! segment in place for the next cycle (or a restart) to recover.

mod coordinator;
mod error;
pub mod scheduler;

pub use coordinator::{RotationCoordinator, RotationOutcome, RotationTicket, TicketStatus};
pub use error::{Result, RotationError};
