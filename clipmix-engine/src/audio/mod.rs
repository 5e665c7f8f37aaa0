//! Audio subsystem
//!
//! Decoding, loading and device output. Scheduling lives in `playback`.

pub mod decoder;
pub mod loader;
pub mod output;
pub mod types;

pub use decoder::SimpleDecoder;
pub use loader::{AssetLoader, FileLoader};
pub use output::{CpalBackend, OfflineBackend, OutputBackend};
pub use types::{AudioBuffer, CHANNELS};
