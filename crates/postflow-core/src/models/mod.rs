pub mod credential;
pub mod media;
pub mod platform;
pub mod post;
pub mod video_job;

pub use credential::PlatformCredential;
pub use media::{
    content_type_for_extension, extension_for_content_type, AssetMetadata, MediaAsset,
    MediaKind, Resolution,
};
pub use platform::Platform;
pub use post::{MediaRef, NewPost, Post, PostFailure, PostStatus};
pub use video_job::{
    NewVideoJob, PipelineStage, ResolutionProfile, Script, StageFailure, VideoJob, VideoStage,
};
