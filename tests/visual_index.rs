use chrono::{DateTime, Duration, TimeZone, Utc};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use uilocate::index::store::INDEX_FILE;
use uilocate::{
    AutoCapture, CaptureOutcome, CaptureRequest, CaptureSource, Category, HealthPolicy,
    IndexPolicy, LocateError, MetadataTracker, PerceptualHash, Rect, TemplateStore, VisualIndex,
};

fn noise(seed: u64, width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |_, _| Rgb([rng.random(), rng.random(), rng.random()]))
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Harness {
    index: VisualIndex,
    tracker: MetadataTracker,
    capture: AutoCapture,
}

impl Harness {
    fn open(root: &Path, policy: IndexPolicy) -> Self {
        Self {
            index: VisualIndex::open(TemplateStore::new(root), policy),
            tracker: MetadataTracker::new(HealthPolicy::default()),
            capture: AutoCapture::default(),
        }
    }

    fn capture(
        &mut self,
        screen: &RgbImage,
        name: &str,
        region: Rect,
        source: CaptureSource,
        at: DateTime<Utc>,
    ) -> CaptureOutcome {
        let request = CaptureRequest::new(name, region, source);
        self.capture
            .capture(&mut self.index, &mut self.tracker, screen, &request, at)
            .unwrap()
    }
}

fn pngs_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .filter(|n| n.ends_with(".png"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn identical_captures_are_stored_once() {
    let dir = tempdir().unwrap();
    let mut h = Harness::open(dir.path(), IndexPolicy::default());
    let screen = noise(1, 200, 100);
    let region = Rect::new(10, 10, 60, 40);

    let first = h.capture(&screen, "Login", region, CaptureSource::Auto, t0());
    let stored = first.stored().expect("first capture stored").clone();
    let second = h.capture(&screen, "Login", region, CaptureSource::Auto, t0() + Duration::minutes(1));
    assert_eq!(second, CaptureOutcome::Duplicate { existing: stored.path.clone() });

    let current = dir.path().join("screens").join("current");
    assert_eq!(pngs_in(&current), vec!["Login_auto.png".to_string()]);
    assert!(current.join("Login_auto.json").exists());
    assert_eq!(h.index.len(), 1);
}

#[test]
fn only_the_newest_versions_survive() {
    let dir = tempdir().unwrap();
    let mut h = Harness::open(dir.path(), IndexPolicy::default());
    let screen = noise(2, 600, 100);

    for i in 0..5 {
        let region = Rect::new(i * 100 + 10, 20, 60, 40);
        let at = t0() + Duration::minutes(i as i64);
        let outcome = h.capture(&screen, "Login", region, CaptureSource::Auto, at);
        assert!(outcome.stored().is_some(), "capture {i} stored");
    }

    let current = dir.path().join("screens").join("current");
    assert_eq!(
        pngs_in(&current),
        vec!["Login_auto_v3.png", "Login_auto_v4.png", "Login_auto_v5.png"]
    );
    assert!(!current.join("Login_auto.json").exists());

    let versions: Vec<u32> = h
        .index
        .versions_of("Login", Category::Screens)
        .iter()
        .map(|t| t.version)
        .collect();
    assert_eq!(versions, vec![5, 4, 3]);
    assert_eq!(h.tracker.len(), 3);
}

#[test]
fn manual_templates_are_never_capped() {
    let dir = tempdir().unwrap();
    let mut h = Harness::open(dir.path(), IndexPolicy::default());
    let screen = noise(3, 600, 100);

    for i in 0..5 {
        let region = Rect::new(i * 100, 0, 50, 50);
        let at = t0() + Duration::minutes(i as i64);
        h.capture(&screen, "Logo", region, CaptureSource::Manual, at);
    }

    let manual = dir.path().join("manual_captured_images");
    assert_eq!(pngs_in(&manual).len(), 5);
    assert_eq!(h.index.versions_of("Logo", Category::Manual).len(), 5);

    let newest = h.index.require_named("Logo", &[Category::Screens, Category::Manual]).unwrap();
    assert!(newest.path.starts_with(&manual));
    assert_eq!(
        h.index.require_named("Logo", &[Category::Screens]).unwrap_err(),
        LocateError::TemplateNotFound {
            element: "Logo".into()
        }
    );
}

#[test]
fn index_survives_reopen_and_corruption() {
    let dir = tempdir().unwrap();
    let screen = noise(4, 400, 100);
    let expected_hash;
    {
        let mut h = Harness::open(dir.path(), IndexPolicy::default());
        h.capture(&screen, "Login", Rect::new(0, 0, 80, 40), CaptureSource::Auto, t0());
        let outcome = h.capture(
            &screen,
            "Mobile Number",
            Rect::new(200, 20, 120, 40),
            CaptureSource::Ai,
            t0(),
        );
        expected_hash = outcome.stored().unwrap().hash;
        assert_eq!(h.index.len(), 2);
    }

    let reopened = Harness::open(dir.path(), IndexPolicy::default());
    assert_eq!(reopened.index.len(), 2);
    let hit = reopened.index.find_exact(expected_hash, None).unwrap();
    assert_eq!(hit.element_name, "Mobile Number");

    let doc = dir.path().join("visual_index").join(INDEX_FILE);
    fs::write(&doc, "{ not json").unwrap();
    let rebuilt = Harness::open(dir.path(), IndexPolicy::default());
    assert_eq!(rebuilt.index.len(), 2);
    assert!(rebuilt.index.find_by_name("Login", Category::Screens).is_some());
    assert!(rebuilt.index.find_exact(expected_hash, Some("mobile")).is_some());
}

#[test]
fn fuzzy_lookup_tolerates_small_distances_only() {
    let dir = tempdir().unwrap();
    let mut h = Harness::open(dir.path(), IndexPolicy::default());
    let screen = noise(5, 200, 100);
    let stored = h
        .capture(&screen, "Submit Button", Rect::new(20, 20, 90, 40), CaptureSource::Auto, t0())
        .stored()
        .unwrap()
        .clone();

    let near = PerceptualHash(stored.hash.0 ^ 0b1);
    let hit = h.index.find_similar(near, Some("submit")).unwrap();
    assert_eq!(hit.template.path, stored.path);
    assert_eq!(hit.distance, 1);

    let exact = h.index.find_similar(stored.hash, None).unwrap();
    assert_eq!(exact.distance, 0);
    assert!((exact.similarity - 1.0).abs() < 1e-6);

    assert!(h.index.find_similar(PerceptualHash(stored.hash.0 ^ 0b111), None).is_none());
    assert!(h.index.find_similar(near, Some("cancel")).is_none());
}

#[test]
fn full_current_folder_rotates_into_a_version_folder() {
    let dir = tempdir().unwrap();
    let policy = IndexPolicy {
        max_folder_size_mb: 1.0,
        ..IndexPolicy::default()
    };
    let mut h = Harness::open(dir.path(), policy);
    let screen = noise(6, 1200, 500);

    let names = ["a", "b", "c"];
    let mut last = None;
    for (i, name) in names.iter().enumerate() {
        let region = Rect::new(i as i32 * 400, 0, 400, 400);
        last = Some(h.capture(&screen, name, region, CaptureSource::Auto, t0()));
    }

    let CaptureOutcome::Stored { template, rotation, .. } = last.unwrap() else {
        panic!("third capture must be stored");
    };
    let report = rotation.expect("third capture rotates");
    assert_eq!(report.moved.len(), 3);
    assert_eq!(
        report.version_dir,
        dir.path().join("screens").join("version_20260301_090000")
    );
    assert!(template.path.starts_with(&report.version_dir));

    let current = dir.path().join("screens").join("current");
    assert!(pngs_in(&current).is_empty());
    assert_eq!(pngs_in(&report.version_dir), vec!["a_auto.png", "b_auto.png", "c_auto.png"]);
    assert_eq!(h.index.len(), 3);
    assert!(h.index.get(&template.path).is_some());
    assert!(h.tracker.get(&template.path).is_some());

    // A fresh capture lands in `current` and takes priority over the rotated one.
    let later = t0() + Duration::hours(1);
    let fresh = h.capture(&screen, "a", Rect::new(0, 100, 400, 400), CaptureSource::Auto, later);
    let fresh = fresh.stored().unwrap().clone();
    assert_eq!(fresh.path, current.join("a_auto_v2.png"));
    assert_eq!(h.index.find_by_name("a", Category::Screens).unwrap().path, fresh.path);
    assert_eq!(h.index.versions_of("a", Category::Screens).len(), 2);
}

#[test]
fn old_version_folders_are_pruned() {
    let dir = tempdir().unwrap();
    let policy = IndexPolicy {
        max_folder_size_mb: 0.001,
        max_version_folders: 1,
        ..IndexPolicy::default()
    };
    let mut h = Harness::open(dir.path(), policy);
    let screen = noise(7, 200, 100);

    h.capture(&screen, "first", Rect::new(0, 0, 60, 40), CaptureSource::Auto, t0());
    let outcome = h.capture(
        &screen,
        "second",
        Rect::new(100, 0, 60, 40),
        CaptureSource::Auto,
        t0() + Duration::minutes(1),
    );
    let CaptureOutcome::Stored { rotation: Some(report), .. } = outcome else {
        panic!("second capture rotates");
    };
    assert_eq!(report.pruned_dirs.len(), 1);
    assert_eq!(report.dropped.len(), 1);
    assert!(!report.pruned_dirs[0].exists());

    assert_eq!(h.index.len(), 1);
    assert!(h.index.find_by_name("first", Category::Screens).is_none());
    assert!(h.index.find_by_name("second", Category::Screens).is_some());
    assert_eq!(h.tracker.len(), 1);
}
