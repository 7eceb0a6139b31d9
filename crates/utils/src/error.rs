use std::{
	fmt::{self, Display},
	io,
	path::Path,
};

use thiserror::Error;

/// File I/O error that keeps the path which caused it
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<String>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "file I/O error")?;
		if let Some(ctx) = &self.maybe_context {
			write!(f, " ({ctx})")?;
		}
		write!(f, ": {}; path: '{}'", self.source, self.path.display())
	}
}

impl<P: AsRef<Path>> From<(P, io::Error)> for FileIOError {
	fn from((path, source): (P, io::Error)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}
}

impl<P: AsRef<Path>> From<(P, io::Error, &'static str)> for FileIOError {
	fn from((path, source, context): (P, io::Error, &'static str)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(context.into()),
		}
	}
}

impl FileIOError {
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		self.source.kind() == io::ErrorKind::NotFound
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_context_and_path() {
		let err = FileIOError::from((
			"/tmp/settings.json",
			io::Error::new(io::ErrorKind::NotFound, "gone"),
			"reading settings",
		));

		let msg = err.to_string();
		assert!(msg.contains("(reading settings)"));
		assert!(msg.contains("/tmp/settings.json"));
		assert!(err.is_not_found());
	}
}
