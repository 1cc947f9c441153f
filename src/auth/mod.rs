//! Two-tier authentication: remote identity microservice with a local
//! degraded-mode fallback, guarded by a threat gate.

pub mod crypto;
pub mod gate;
pub mod orchestrator;
pub mod store;

pub use crypto::AuthCrypto;
pub use gate::{SlidingGate, ThreatGate};
pub use orchestrator::{AuthDecisionContext, AuthOrchestrator};
pub use store::{MemoryUserStore, UserStore};
