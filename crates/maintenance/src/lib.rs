//!
//! # Maintenance
//!
//! Collection maintenance tools running on top of [`lumen_job_pool`]: thumbnail generation,
//! similarity fingerprints, metadata synchronization, autotagging, image quality sorting and
//! database housekeeping.
//!
//! Each batch loads its work items into one [`MaintenanceData`] and starts as many identical tasks
//! as there are workers, every task pulling items until none are left. Progress goes to a
//! [`MaintenanceObserver`] and the batch ends with exactly one [`BatchReport`].
//!
//! The tools never touch a database, a model or the file system themselves: they go through the
//! [`backend`] traits, with [`backend::fs`] and [`backend::memory`] providing ready made
//! implementations.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod backend;
mod batch;
mod data;
mod error;
mod observer;
mod settings;
pub mod tasks;
mod types;

pub use batch::{BatchCanceler, BatchHandle, BatchRequest, Maintenance};
pub use data::MaintenanceData;
pub use error::{BackendError, Error, NonCriticalError};
pub use observer::{
	Advance, BatchReport, BatchStatus, ChannelObserver, ItemOutcome, ItemRef, MaintenanceEvent,
	MaintenanceObserver, NoopObserver,
};
pub use settings::{MaintenanceSettings, QualitySettings, SettingsError};
pub use types::{
	AutotagModel, BatchId, DatabaseKind, FaceRegion, FingerprintAlgorithm, Identity, IdentityId,
	ItemId, ItemInfo, ItemMetadata, JunkReport, PickLabel, Preview, RemoveAction, ShrinkResult,
	SyncDirection, ThumbnailId,
};
