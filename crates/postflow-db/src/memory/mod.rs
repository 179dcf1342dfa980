//! In-memory stores for tests and local dry runs.

pub mod credential;
pub mod media;
pub mod post;
pub mod video_job;

pub use credential::InMemoryCredentialStore;
pub use media::InMemoryMediaAssetStore;
pub use post::InMemoryPostStore;
pub use video_job::InMemoryVideoJobStore;
