pub mod bridge;
pub mod error;
pub mod message;
pub mod publisher;
pub mod pump;
pub mod registry;

pub use bridge::{Bridge, BridgeStatus};
pub use error::{FailureKind, RegistryError};
pub use message::{CorrelationId, Envelope, ResponseMessage};
pub use publisher::RequestPublisher;
pub use pump::{PumpHandle, PumpSettings, PumpState, ResponsePump};
pub use registry::{CorrelationRegistry, Outcome, PendingResponse, RegistryStats};
