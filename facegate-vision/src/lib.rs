pub mod camera;
pub mod detector;
pub mod model;
pub mod pipeline;
pub mod recognizer;

// Re-export commonly used types
pub use camera::Camera;
pub use detector::Detection;
pub use pipeline::Pipeline;
