// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Append-only segment storage.
//!
//! A segment is a named on-disk sequence of records with a role,
//! [`SegmentRole::Active`] or [`SegmentRole::Frozen`]. Each stream holds
//! at most one segment per role. Rotation renames the active segment to
//! the frozen role under the same lock that serializes appends, so an
//! append racing a rename either lands before the rename or fails with
//! [`SegmentError::SegmentNotFound`]; it is never silently lost or
//! silently applied to the old identity afterwards.

mod codec;
pub mod error;
mod store;

pub use error::{Result, SegmentError};
pub use store::{SegmentHandle, SegmentId, SegmentRole, SegmentStore};
