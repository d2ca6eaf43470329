//! # Core Session Logic
//!
//! Everything planstream knows about a session, independent of how frames
//! arrive or how the result is shown.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │         CORE            │
//!                    │  (this module)          │
//!                    │                         │
//!                    │  • classify (frames)    │
//!                    │  • State (per session)  │
//!                    │  • Action (events)      │
//!                    │  • update() (reducer)   │
//!                    │                         │
//!                    │  No sockets. No stdout. │
//!                    └───────────┬─────────────┘
//!                                │
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//!     ┌────────────┐      ┌────────────┐      ┌────────────┐
//!     │  runtime   │      │  console   │      │  backend   │
//!     │ (select!   │      │  (stdout/  │      │ (websocket │
//!     │   loop)    │      │   stdin)   │      │  + HTTP)   │
//!     └────────────┘      └────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`]: wire and domain types shared by everything else
//! - [`classifier`]: raw frame → stream event or plan request
//! - [`buffer`]: accumulates narration until a turn completes
//! - [`state`]: `SessionState`, the approval phases, snapshots
//! - [`action`]: the `Action` enum and the `update()` reducer
//! - [`approval`]: one-decision-in-flight approval bookkeeping
//! - [`errors`]: maps backend error payloads onto `ErrorKind`
//! - [`subscription`]: observer registry keyed by session
//! - [`config`]: layered configuration
//! - [`transcript`]: saved sessions on disk

pub mod action;
pub mod approval;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod state;
pub mod subscription;
pub mod transcript;
pub mod types;
