use lumen_maintenance::{
	backend::{
		fs::{Blake3Fingerprinter, FsImageLoader, FsThumbnailStore, THUMBNAIL_EXTENSION},
		Fingerprinter, ImageLoader, ThumbnailStore,
	},
	BackendError, MaintenanceSettings,
};

use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use tempfile::tempdir;
use tracing_test::traced_test;

fn gradient(width: u32, height: u32) -> DynamicImage {
	DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
		Rgb([(x % 256) as u8, (y % 256) as u8, 128])
	}))
}

#[test]
fn loader_decodes_and_reports_failures() {
	let dir = tempdir().unwrap();

	let good = dir.path().join("good.png");
	gradient(20, 10)
		.save_with_format(&good, ImageFormat::Png)
		.unwrap();

	let garbage = dir.path().join("garbage.png");
	std::fs::write(&garbage, b"definitely not a png").unwrap();

	let loader = FsImageLoader;

	assert_eq!(loader.load(&good).unwrap().dimensions(), (20, 10));
	assert!(matches!(
		loader.load(&garbage),
		Err(BackendError::Decode { path, .. }) if path == garbage
	));
	assert!(matches!(
		loader.load(&dir.path().join("missing.png")),
		Err(BackendError::FileIO(e)) if e.is_not_found()
	));
}

#[test]
fn thumbnails_land_in_hash_shards() {
	let dir = tempdir().unwrap();
	let store = FsThumbnailStore::new(dir.path());

	let source = dir.path().join("photos/wide.jpg");
	let thumbnail = store.store(&source, &gradient(1024, 512), 256).unwrap();
	assert_eq!(thumbnail.dimensions(), (256, 128));

	let path = store.thumbnail_path(&source);
	assert!(path.starts_with(dir.path()));
	assert_eq!(
		path.extension().and_then(|ext| ext.to_str()),
		Some(THUMBNAIL_EXTENSION)
	);

	let stem = path.file_stem().unwrap().to_str().unwrap().to_owned();
	let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
	assert_eq!(shard, &stem[0..3]);

	let stored = image::open(&path).unwrap();
	assert_eq!(stored.dimensions(), (256, 128));

	// Same source, same slot
	assert_eq!(store.thumbnail_path(&source), path);
	assert_ne!(store.thumbnail_path(&dir.path().join("photos/other.jpg")), path);
}

#[test]
fn small_images_are_stored_unscaled() {
	let dir = tempdir().unwrap();
	let store = FsThumbnailStore::new(dir.path());

	let thumbnail = store
		.store(&dir.path().join("tiny.png"), &gradient(30, 40), 256)
		.unwrap();

	assert_eq!(thumbnail.dimensions(), (30, 40));
}

#[test]
fn fingerprints_survive_rescaling() {
	let fingerprinter = Blake3Fingerprinter;

	let flat = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([90, 90, 90])));
	let flat_large = DynamicImage::ImageRgb8(RgbImage::from_pixel(256, 256, Rgb([90, 90, 90])));
	let other = gradient(64, 64);

	let fingerprint = fingerprinter.fingerprint(&flat).unwrap();

	assert_eq!(fingerprint, fingerprinter.fingerprint(&flat_large).unwrap());
	assert_ne!(fingerprint, fingerprinter.fingerprint(&other).unwrap());
	assert_eq!(fingerprint.len(), 64);
}

#[tokio::test]
#[traced_test]
async fn settings_default_when_missing_and_round_trip() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("maintenance.json");

	assert_eq!(
		MaintenanceSettings::load(&path).await.unwrap(),
		MaintenanceSettings::default()
	);

	let mut settings = MaintenanceSettings {
		use_multi_core: false,
		max_workers: Some(3),
		thumbnail_size: 512,
		..Default::default()
	};
	settings.quality.accepted_threshold = 75;

	settings.save(&path).await.unwrap();
	assert_eq!(MaintenanceSettings::load(&path).await.unwrap(), settings);
}

#[tokio::test]
async fn broken_settings_files_are_errors() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("maintenance.json");
	tokio::fs::write(&path, b"{ not json").await.unwrap();

	assert!(MaintenanceSettings::load(&path).await.is_err());
}
