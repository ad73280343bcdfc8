pub mod clock;
pub mod config;
pub mod error;
pub mod platform;
pub mod safety;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SafetyConfig;
pub use error::{LoginCodeRejection, PolicyDenial, SafetyError, SafetyResult};
pub use safety::{KidSafetyService, MaturityLevel};
pub use store::{JsonStore, SafetyStore, StorageError};
