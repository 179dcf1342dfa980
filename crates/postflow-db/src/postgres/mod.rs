//! Postgres-backed stores.

pub mod credential;
pub mod media;
pub mod post;
pub mod video_job;

pub use credential::CredentialRepository;
pub use media::MediaAssetRepository;
pub use post::PostRepository;
pub use video_job::VideoJobRepository;
