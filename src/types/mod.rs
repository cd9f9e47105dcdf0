//! Data types shared across the queue, router and binary.
//!
//! - Outbound jobs, their status and the outcome reported to callers
//! - Inbound messages read from the modem

pub mod job;
pub mod message;

pub use job::{Destination, JobStatus, OutboundJob, SendOutcome, SendRequest};
pub use message::InboundMessage;
