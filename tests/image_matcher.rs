use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uilocate::image::io::crop;
use uilocate::{ImageMatcher, LocateError, MatchStrategy, Point, Rect};

/// Random 6x6 blocks: enough structure to survive the blur.
fn blocky(seed: u64, width: u32, height: u32, max: u8) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(6) as usize;
    let rows = height.div_ceil(6) as usize;
    let cells: Vec<u8> = (0..cols * rows).map(|_| rng.random_range(0..=max)).collect();
    RgbImage::from_fn(width, height, |x, y| {
        let v = cells[(y / 6) as usize * cols + (x / 6) as usize];
        Rgb([v, v, v])
    })
}

#[test]
fn exact_copy_is_found_by_the_first_strategy() {
    let screen = blocky(5, 160, 120, 255);
    let template = crop(&screen, Rect::new(40, 26, 32, 24)).unwrap();

    let outcome = ImageMatcher::new().find(&screen, &template).unwrap();
    let result = outcome.result.expect("match");
    assert_eq!(result.strategy, MatchStrategy::CcoeffNormed);
    assert_eq!(result.top_left, Point::new(40, 26));
    assert_eq!(result.center, Point::new(56, 38));
    assert!(result.confidence > 0.95, "confidence {}", result.confidence);
    assert_eq!(outcome.attempts.len(), 1);
}

#[test]
fn unreachable_threshold_falls_through_to_squared_difference() {
    let screen = blocky(9, 140, 100, 255);
    let template = crop(&screen, Rect::new(70, 30, 30, 24)).unwrap();
    let matcher = ImageMatcher::new().with_threshold(1.5);

    let outcome = matcher.find(&screen, &template).unwrap();
    assert_eq!(outcome.attempts.len(), 3);
    assert!(!outcome.attempts[0].accepted);
    assert!(!outcome.attempts[1].accepted);
    assert!(outcome.attempts[2].accepted);

    let result = outcome.result.expect("sqdiff match");
    assert_eq!(result.strategy, MatchStrategy::SqdiffNormed);
    assert_eq!(result.top_left, Point::new(70, 30));

    let single = matcher
        .run_strategy(MatchStrategy::SqdiffNormed, &screen, &template)
        .unwrap();
    assert_eq!(single, Some(result));
}

#[test]
fn missing_template_reports_best_region() {
    let screen = blocky(2, 120, 90, 60);
    let template = RgbImage::from_fn(24, 24, |x, y| {
        if x == 12 || y == 12 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    });

    let outcome = ImageMatcher::new()
        .with_threshold(1.2)
        .find(&screen, &template)
        .unwrap();
    assert!(!outcome.is_match());
    assert_eq!(outcome.attempts.len(), 3);
    assert!(outcome.confidence() < 0.8);

    let region = outcome.best_region().expect("diagnostic region");
    assert_eq!((region.width, region.height), (24, 24));
    assert!(region.x >= 0 && region.right() <= 120);

    match outcome.require("cross.png") {
        Err(LocateError::MatchNotFound {
            template,
            best_confidence,
        }) => {
            assert_eq!(template, std::path::PathBuf::from("cross.png"));
            assert_eq!(best_confidence, outcome.confidence());
        }
        other => panic!("expected MatchNotFound, got {other:?}"),
    }
}

#[test]
fn template_larger_than_screen_is_rejected() {
    let screen = blocky(1, 40, 40, 255);
    let template = blocky(1, 64, 20, 255);
    let err = ImageMatcher::new().find(&screen, &template).unwrap_err();
    assert!(matches!(err, LocateError::RoiOutOfBounds { .. }));
}
