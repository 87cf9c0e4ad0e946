// ABOUTME: Session domain: identity, registry, relay engine, readiness polling, and lifecycle orchestration

pub mod key;
pub mod lifecycle;
pub mod readiness;
pub mod registry;
pub mod relay;

pub use key::SessionKey;
pub use lifecycle::{Session, SessionError, SessionLifecycleManager, SessionState};
pub use readiness::{HealthProbe, HttpHealthProbe, ReadinessError};
pub use registry::SessionRegistry;
pub use relay::{Relay, RelayMessage};
