pub mod codec;
pub mod config;
pub mod embedding;
pub mod enrollment;
pub mod identity;
pub mod provider;
pub mod quality;
pub mod runner;
pub mod storage;
pub mod uniqueness;
pub mod verification;

// Camera and ONNX inference adapters
#[cfg(feature = "vision")]
pub mod hardware;

pub use codec::{decode, encode, CodecError, EncodedProfile};
pub use embedding::{Embedding, EnrollmentSet};
pub use enrollment::{EnrollmentError, EnrollmentSession};
pub use provider::{CaptureError, EmbeddingProvider, Frame, FrameSource, ProviderError};
pub use quality::{FaceBox, QualityVerdict};
pub use runner::{run_enrollment, run_verification};
pub use verification::{VerificationError, VerificationSession};
