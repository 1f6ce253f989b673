pub mod detect;
pub mod registry;

pub use detect::{CorridorDetector, DetectError};
pub use registry::{RegistryError, SignalRegistry};
