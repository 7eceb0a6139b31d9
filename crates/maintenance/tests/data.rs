use lumen_maintenance::{Identity, MaintenanceData};

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use rand::{seq::SliceRandom, Rng};

const WORKER_COUNTS: [usize; 4] = [1, 2, 4, 8];
const ITEM_COUNTS: [usize; 4] = [0, 1, 10, 1000];

/// Pulls concurrently from `workers` tasks until the supply runs dry, each task keeping what it got.
async fn drain_concurrently<T, F>(workers: usize, data: &Arc<MaintenanceData>, pull: F) -> Vec<Vec<T>>
where
	T: Send + 'static,
	F: Fn(&MaintenanceData) -> Option<T> + Copy + Send + 'static,
{
	let handles = (0..workers)
		.map(|_| {
			let data = Arc::clone(data);
			tokio::spawn(async move {
				let mut pulled = Vec::new();
				while let Some(item) = pull(&data) {
					pulled.push(item);
					tokio::task::yield_now().await;
				}
				pulled
			})
		})
		.collect::<Vec<_>>();

	let mut per_worker = Vec::with_capacity(workers);
	for handle in handles {
		per_worker.push(handle.await.unwrap());
	}

	per_worker
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn every_item_is_delivered_exactly_once() {
	let mut rng = rand::thread_rng();

	for _ in 0..4 {
		let workers = *WORKER_COUNTS.choose(&mut rng).unwrap();
		let items = *ITEM_COUNTS.choose(&mut rng).unwrap();

		let data = Arc::new(MaintenanceData::new());
		let ids = (0..items).map(|_| rng.gen::<i64>()).collect::<HashSet<_>>();
		data.set_image_ids(ids.iter().copied());

		let per_worker = drain_concurrently(workers, &data, MaintenanceData::image_id).await;

		let delivered = per_worker.iter().map(Vec::len).sum::<usize>();
		let union = per_worker.into_iter().flatten().collect::<HashSet<_>>();

		assert_eq!(delivered, ids.len(), "workers={workers} items={items}");
		assert_eq!(union, ids, "workers={workers} items={items}");
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn every_combination_keeps_per_worker_fifo() {
	for workers in WORKER_COUNTS {
		for items in ITEM_COUNTS {
			let data = Arc::new(MaintenanceData::new());
			data.set_image_paths((0..items).map(|i| PathBuf::from(format!("{i:05}.jpg"))));

			let per_worker = drain_concurrently(workers, &data, MaintenanceData::image_path).await;

			// Each worker sees a strictly increasing subsequence of the loaded order
			for pulled in &per_worker {
				assert!(pulled.windows(2).all(|pair| pair[0] < pair[1]));
			}

			let union = per_worker.into_iter().flatten().collect::<HashSet<_>>();
			assert_eq!(union.len(), items, "workers={workers} items={items}");
		}
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn micro_batches_never_overlap() {
	let data = Arc::new(MaintenanceData::new());
	data.set_image_paths((0..1000).map(|i| PathBuf::from(format!("{i}.jpg"))));

	let per_worker = drain_concurrently(8, &data, |data| {
		let batch = data.image_paths_batch(7);
		(!batch.is_empty()).then_some(batch)
	})
	.await;

	let batches = per_worker.into_iter().flatten().collect::<Vec<_>>();
	assert!(batches.iter().all(|batch| batch.len() <= 7));

	let paths = batches.into_iter().flatten().collect::<Vec<_>>();
	assert_eq!(paths.len(), 1000);
	assert_eq!(paths.iter().collect::<HashSet<_>>().len(), 1000);
}

#[test]
fn exhausted_supplies_stay_exhausted() {
	let data = MaintenanceData::new();
	data.set_image_ids([1, 2]);
	data.set_item_infos([]);
	data.set_thumbnail_ids([5]);
	data.set_identities([Identity::default()]);
	data.set_similarity_image_ids([9]);

	assert_eq!(data.image_id(), Some(1));
	assert_eq!(data.image_id(), Some(2));
	assert_eq!(data.thumbnail_id(), Some(5));
	assert!(data.identity().is_some());
	assert_eq!(data.similarity_image_id(), Some(9));

	for _ in 0..100 {
		assert_eq!(data.image_id(), None);
		assert_eq!(data.image_path(), None);
		assert!(data.image_paths_batch(3).is_empty());
		assert!(data.item_info().is_none());
		assert_eq!(data.thumbnail_id(), None);
		assert!(data.identity().is_none());
		assert_eq!(data.similarity_image_id(), None);
	}

	assert_eq!(data.remaining_image_ids(), 0);
}

#[test]
fn loading_replaces_previous_items() {
	let data = MaintenanceData::new();
	data.set_thumbnail_ids([1, 2, 3]);
	assert_eq!(data.thumbnail_id(), Some(1));

	data.set_thumbnail_ids([7]);
	assert_eq!(data.remaining_thumbnail_ids(), 1);
	assert_eq!(data.thumbnail_id(), Some(7));
	assert_eq!(data.thumbnail_id(), None);

	let mut ids = (0..50).collect::<Vec<i64>>();
	ids.shuffle(&mut rand::thread_rng());
	data.set_image_ids(ids.clone());
	assert_eq!((0..50).map_while(|_| data.image_id()).collect::<Vec<_>>(), ids);
}
