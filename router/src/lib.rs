//! Agent Routing Engine
//!
//! Routes classified tasks to AI coding agents over three transports
//! (async HTTP API, local CLI, local TUI) with a fallback chain, progress
//! reporting, cooperative cancellation, and per-agent circuit breakers.
//!
//! The transport seam is a single [`transport::AgentTransport`] trait; the
//! per-agent differences live in small typed command builders in
//! [`adapters`] rather than an adapter inheritance tree. The routing state
//! machine itself lives in [`router::AgentRouter`]:
//!
//! ```text
//!  SELECTING → PROBING → EXECUTING → SUCCESS
//!      │          │           │
//!      │          ▼           ▼
//!      └─►     UNAVAILABLE  FALLBACK → (EXECUTING | EXHAUSTED)
//! ```

pub mod adapters;
pub mod cancel;
pub mod progress;
pub mod router;
pub mod transport;

pub use adapters::{default_transports, probe_all, AsyncApiTransport, CliTransport, TuiTransport};
pub use cancel::CancelToken;
pub use progress::{NoopObserver, ProgressObserver, ProgressReporter, TracingObserver};
pub use router::{AgentListing, AgentRouter, RouterConfig, RouterOutcome};
pub use transport::{AgentOutcome, AgentTransport, ExecutionContext, ExecutionRequest};
