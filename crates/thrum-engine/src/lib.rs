//! Domain logic between the RPC surface and the projection: envelope
//! validation and stamping, group expansion, and subscription filter
//! matching.
//!
//! Everything here is pure over the [`Directory`] trait so the semantics
//! are testable against an in-memory fake; the daemon wires a
//! projection-backed implementation in at runtime.

mod directory;
mod filter;
mod groups;
mod router;

pub use directory::{Directory, ThreadInfo};
pub use filter::{CompiledFilter, MessageView};
pub use groups::GroupResolver;
pub use router::{Router, RouterConfig, SendRequest};
