//! Driver agent communication.
//!
//! Optional engines run in a separate executable, the driver agent, so the
//! main binary does not link their client libraries. The agent speaks
//! NDJSON over stdin/stdout: one request line in, one response line out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      dbnexus (main process)                     │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │         AgentDatabase -> AgentClient (one per binding)    │  │
//! │  │  - Spawns `<engine>-driver-agent --engine <engine>`       │  │
//! │  │  - Request ids correlate responses                        │  │
//! │  │  - Per-call deadline; stderr captured for error text      │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │               stdin (NDJSON) │ stdout (NDJSON)                  │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            driver agent: AgentWorker over one binding           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod error;
pub mod protocol;
mod worker;

pub use client::{AgentClient, AgentOptions, StderrBuffer};
pub use error::{AgentError, AgentResult};
pub use protocol::{methods, AgentRequest, AgentResponse};
pub use worker::AgentWorker;
