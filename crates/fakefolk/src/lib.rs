//! Synthetic participants for a live game host.
//!
//! Each identity dials the host through its normal login path carrying a
//! one-shot correlation key. The host's login hook hands that key to a
//! [`HostAuthAdapter`], which turns it back into the identity; the later
//! world-join report promotes the identity and runs onboarding. All bookkeeping
//! lives on a single engine task reached through [`EngineHandle`].

pub mod autojoin;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod ident;
pub mod naming;
pub mod onboarding;
pub mod registry;
pub mod session;
pub mod timer;

pub use config::EngineConfig;
pub use correlation::CorrelationStore;
pub use engine::{BatchOutcome, Counts, EngineHandle, IdentitySummary};
pub use error::{ConfigError, EngineError};
pub use events::{EngineEvent, RemovalReason};
pub use host::{AuthDecision, HostAuthAdapter, HostRuntime};
pub use ident::{CorrelationKey, HostEntityRef, IdentityId};
pub use session::TcpDialer;
