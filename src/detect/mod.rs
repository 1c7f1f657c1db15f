mod adapter;
mod backend;
mod backends;
mod registry;
mod result;

pub use adapter::DetectionAdapter;
pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractModel};
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{non_max_suppression, BoundingBox, Detection, DetectionResult, ObjectClass};
