use std::{error::Error, fmt};

use thiserror::Error;

/// Bound for the error type returned by job bodies. Every job in a pool shares the same error
/// type, so callers get one unified error to handle.
pub trait RunError: Error + fmt::Debug + Send + Sync + 'static {}

impl<T: Error + fmt::Debug + Send + Sync + 'static> RunError for T {}

#[derive(Debug, Error)]
pub enum PoolError {
	#[error("job pool must be created inside a tokio runtime")]
	NoRuntime,
	#[error("job pool was shut down and accepts no more jobs")]
	Shutdown,
}
