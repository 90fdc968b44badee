//! Publishing - Hugging Face Hub uploads for a training run
//!
//! [`HubManager`] pushes the model card, validation preview images and the
//! trained weights (full pipeline or adapter file) to one repository. Remote
//! failures are retried a fixed number of times and reported, never raised.

pub mod hub;
pub mod images;
pub mod manager;
pub mod model_card;
pub mod notify;
pub mod token;

pub use hub::{HfHubClient, HubApi, RepoUrl};
pub use images::{plan_assets, PlannedAsset, PreviewImage, ValidationImages};
pub use manager::{AssetUpload, HubManager, PublishReport, UploadOutcome};
pub use model_card::ModelCard;
pub use notify::{Notifier, WebhookNotifier};
pub use token::resolve_token;
