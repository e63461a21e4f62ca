pub mod local;
pub mod nats_object;
pub mod storage;
pub mod storage_factory;
pub mod writer;

pub use storage::ArtifactStore;
pub use writer::ArtifactWriter;
