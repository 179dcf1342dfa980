//! Platform publishers
//!
//! One [`Publisher`] per platform, looked up through the [`PublisherRegistry`].
//! Adapters share media constraint checks, text formatting and HTTP error
//! classification; everything they report is a [`PublishError`].

pub mod constraints;
pub mod email;
pub mod format;
pub mod http;
pub mod instagram;
pub mod linkedin;
pub mod publisher;
pub mod recipients;
pub mod registry;
pub mod whatsapp;
pub mod wordpress;

#[cfg(test)]
pub mod test_helpers;

pub use constraints::MediaConstraints;
pub use email::{GraphMailOptions, GraphMailPublisher};
pub use instagram::{InstagramOptions, InstagramPublisher};
pub use linkedin::{LinkedInOptions, LinkedInPublisher};
pub use publisher::{DeliveryReport, PublishReceipt, Publisher};
pub use registry::PublisherRegistry;
pub use whatsapp::{WhatsAppOptions, WhatsAppPublisher};
pub use wordpress::{WordPressOptions, WordPressPublisher};

pub use postflow_core::{PublishError, PublishErrorKind};
