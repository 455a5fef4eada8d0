pub mod config;
pub mod error;
pub mod layer;
pub mod layout;
pub mod pipeline;

pub use config::{PullConfig, Settings, SettingsOverrides};
pub use error::{DiffIdError, MaterializeError, PullError};
pub use layer::LayerMaterializer;
pub use pipeline::{LayerOutcome, PullReport, pull_image};
