//! Data Export Pipeline
//!
//! Turns a cross-domain snapshot of a user's data into a downloadable
//! archive: collect (via the collector facade) → transform (JSON or
//! flattened CSV) → archive (zip) → publish (object store + signed URL).
//! Runs as a background job; failures are reported on the job record, never
//! propagated, so the user can always be told what happened.

pub mod archive;
pub mod collector;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod transform;
pub mod types;

pub use pipeline::{cleanup_expired_exports, process_export_job};
