//! # distill-cascade
//!
//! Interactive Cascade error reconciliation for QKD raw keys.
//!
//! Two parties hold long, partially mismatched bit strings. The initiator
//! drives a multi-pass protocol of batched parity comparison and
//! binary-search error localization against the responder's reference copy,
//! a final pairwise confirmation stage (BICONF) bounds the residual error
//! probability, and every disclosed bit is tallied so privacy amplification
//! can squeeze the leak back out of the final key.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ CascadeEngine (initiator)          CascadeResponder (reference)│
//! │   pass loop, bisection, BICONF  <->  parity service            │
//! ├────────────────────────────────────────────────────────────────┤
//! │ ParityLedger / LeakageAccountant / ErrorRateEstimator          │
//! ├────────────────────────────────────────────────────────────────┤
//! │ Envelope + Payload over a MessageChannel                       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each party owns its state exclusively; the only coupling is the message
//! channel. The caller supplies the transport and owns reconnection policy;
//! a dead channel is terminal here.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bisect;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod leakage;
pub mod ledger;
pub mod message;
mod qber;
pub mod responder;

pub use channel::{ChannelError, MemoryChannel, MessageChannel, memory_pair};
pub use config::CascadeConfig;
pub use engine::{
    CascadeEngine, CorrectionEvent, EngineState, InitialEstimate, ReconciliationReport,
};
pub use error::CascadeError;
pub use estimator::{ErrorRateEstimator, USELESS_ERRORBOUND};
pub use leakage::LeakageAccountant;
pub use ledger::{BlockState, ParityEntry, ParityLedger, PassRecord, RemoteParityCache};
pub use message::{BICONF_PASS, Envelope, Payload, Role};
pub use responder::{CascadeResponder, ResponderReport};
