//! Terminal rendering of maintenance events.

use lumen_maintenance::{ItemOutcome, ItemRef, MaintenanceEvent};

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tracing::warn;

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

fn describe(item: &ItemRef) -> String {
	match item {
		ItemRef::Path(path) => path.display().to_string(),
		other => format!("{other:?}"),
	}
}

/// Drives a progress bar from `events` until the batch completes or the channel closes.
pub fn spawn_progress(events: async_channel::Receiver<MaintenanceEvent>, quiet: bool) -> JoinHandle<()> {
	let bar = if quiet {
		ProgressBar::hidden()
	} else {
		ProgressBar::new(0)
	};

	if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
		bar.set_style(style.progress_chars("#>-"));
	}
	bar.enable_steady_tick(Duration::from_millis(120));

	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			match event {
				MaintenanceEvent::Started { total, .. } => bar.set_length(total as u64),
				MaintenanceEvent::ItemsAdded(count) => bar.inc_length(count as u64),
				MaintenanceEvent::Advance(advance) => {
					if let ItemOutcome::Failed(e) = &advance.outcome {
						warn!(item = %describe(&advance.item), %e, "Item failed");
					}
					bar.set_message(describe(&advance.item));
					bar.inc(1);
				}
				MaintenanceEvent::RemovePending(item) => {
					warn!(path = %item.path.display(), "File is gone, item should be removed");
				}
				MaintenanceEvent::Completed(_) => break,
				MaintenanceEvent::JunkData(_) | MaintenanceEvent::ShrinkResult(_) => {}
			}
		}

		bar.finish_and_clear();
	})
}
