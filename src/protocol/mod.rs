//! Request/response protocol between per-user masters and the broker.
//!
//! Every connection carries exactly one exchange:
//!
//! 1. The client sends an [`Envelope`]: the shared connection key and a
//!    [`Request`]
//! 2. The broker checks the key, dispatches the request and answers with a
//!    [`Response`]: a [`Status`] code and a message
//! 3. The connection closes
//!
//! Messages are JSON, one per length-delimited frame.
//!
//! # Status codes
//!
//! | Code | Meaning |
//! |---|---|
//! | `0` | success |
//! | `1` | soft failure (no free cores, no matching node, unknown job, divergent job list, bad file) |
//! | `2` | policy rejection (user not allowed) |
//! | `-1` | unknown user or invalid key |
//! | `-2` | malformed request or internal error |
//! | `-10` | fatal, the broker stops |

pub mod client;
pub mod handler;
pub mod message;
pub mod server;

pub use client::BrokerClient;
pub use handler::RequestHandler;
pub use message::{Envelope, Request, Response, Status};
pub use server::BrokerServer;
