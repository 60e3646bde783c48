//! Annostore: stable-key, versioned persistence for image annotations.
//!
//! Annostore stores the annotations of an image-labeling tool as a set of
//! workspaces. Each workspace holds independent versions, and each version
//! is a complete snapshot of every image's records. Images are identified by
//! their path relative to the workspace's image root, so adding or removing
//! an image never re-attaches annotations to the wrong file.
//!
//! Annotations written by older releases used index-prefixed keys
//! (`0001_photo.jpg`). They are migrated on load without losing records.
//!
//! # Modules
//!
//! - [`model`]: Keys, records, identifiers and persisted documents
//! - [`validation`]: Shape validation run before every save
//! - [`migration`]: Legacy key migration and legacy cache import
//! - [`storage`]: Atomic document writes, strict reads, workspace locks
//! - [`version`]: Version creation, switching, deletion, listing and leases
//! - [`workspace`]: The [`WorkspaceManager`] entry point
//! - [`config`]: Store configuration
//! - [`error`]: Error types for annostore operations
//!
//! The library logs through [`tracing`] and never installs a subscriber.

pub mod config;
pub mod error;
pub mod migration;
pub mod model;
pub mod storage;
pub mod validation;
pub mod version;
pub mod workspace;

pub use config::StoreConfig;
pub use error::{AnnostoreError, Result};
pub use workspace::{LoadNotice, LoadedWorkspace, WorkspaceManager, WorkspaceOptions};
