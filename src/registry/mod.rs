//! Session registry
//!
//! The registry holds every session that has not yet terminated and hands
//! the fan-out engine a snapshot of the connected ones.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                   ┌──────────────────────────┐
//!                   │ sessions: HashMap<Id,    │
//!                   │   Entry {                │
//!                   │     session: Arc<..>,    │
//!                   │     watcher: JoinHandle, │
//!                   │   }                      │
//!                   │ >                        │
//!                   └────────────┬─────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!   [Negotiation]           [FanOut]               [Watcher]
//!   registry.add()          registry.active()      state == terminal
//!                                                  └──► remove()
//! ```
//!
//! Removal is level-triggered and idempotent: a session reported terminal
//! several times is removed once.

pub mod store;

pub use store::SessionRegistry;
