//! # Message Pipelines
//!
//! Each connection runs one pipeline per direction over a shared socket:
//!
//! ```text
//! socket → [InboundPipeline] → PromiseTable (responses)
//!                            → Dispatch     (unsolicited messages)
//!
//! callers → [OutboundPipeline] → socket
//! ```
//!
//! Both pipelines borrow ops and buffers from the shared [`Pools`](crate::Pools)
//! for exactly one I/O step at a time.

pub mod inbound;
pub mod outbound;
pub mod promises;

pub use inbound::{Dispatch, InboundPipeline};
pub use outbound::OutboundPipeline;
pub use promises::{PendingResponse, PromiseTable};
