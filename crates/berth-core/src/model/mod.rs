//! データモデル

mod access;
mod integration;
mod process;
mod status;

pub use access::{Permission, SubUser, Viewer};
pub use integration::DiscordIntegration;
pub use process::{PENDING_CONTAINER_ID, Process, ProcessType, validate_process_name};
pub use status::ProcessStatus;
