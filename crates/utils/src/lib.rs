use std::{any::Any, num::NonZeroUsize};

use tracing::error;

pub mod error;

/// Number of workers that fits the hardware, never less than one.
pub fn available_parallelism() -> usize {
	std::thread::available_parallelism().map_or_else(
		|e| {
			error!(?e, "Failed to get available parallelism, falling back to a single worker");
			1
		},
		NonZeroUsize::get,
	)
}

/// Best effort extraction of the message carried by a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(|msg| (*msg).to_string())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "<non-string panic payload>".to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn panic_payloads_are_readable() {
		let static_payload: Box<dyn Any + Send> = Box::new("boom");
		let owned_payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
		let other_payload: Box<dyn Any + Send> = Box::new(42_u8);

		assert_eq!(panic_message(&*static_payload), "boom");
		assert_eq!(panic_message(&*owned_payload), "kaboom");
		assert_eq!(panic_message(&*other_payload), "<non-string panic payload>");
	}

	#[test]
	fn parallelism_is_never_zero() {
		assert!(available_parallelism() >= 1);
	}
}
