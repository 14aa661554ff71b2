//! Audio capture sources feeding the uplinks.

pub mod chunk_source;
pub mod mic_source;
pub mod system_source;

pub use chunk_source::ChunkSource;
pub use mic_source::MicChunkSource;
pub use system_source::SystemChunkSource;
