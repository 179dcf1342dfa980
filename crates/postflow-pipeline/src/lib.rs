//! Postflow Video Pipeline
//!
//! Turns a topic, a voice and a set of images into a video asset in three
//! stages: script generation, speech synthesis and assembly. Every stage
//! persists its output on the job before the next one starts, so a retry only
//! ever repeats the stage that failed.

pub mod ffmpeg;
pub mod openai;
pub mod runner;
pub mod services;
pub mod stages;
pub mod timeline;
pub mod worker;

#[cfg(test)]
pub mod test_support;

pub use ffmpeg::FfmpegCompositor;
pub use openai::{OpenAiConfig, OpenAiScriptGenerator, OpenAiSpeechSynthesizer};
pub use runner::{PipelineRunner, RunnerSettings};
pub use services::{
    Composition, ScriptGenerator, ScriptRequest, Speech, SpeechSynthesizer, VideoCompositor,
};
pub use stages::{StageHandler, StageHandlers};
pub use timeline::{even_split, Slide};
pub use worker::{PipelineWorker, PipelineWorkerHandle};
