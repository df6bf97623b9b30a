use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use uilocate::image::io::{crop, save_png};
use uilocate::resolve::RetryPolicy;
use uilocate::{
    Action, AutoCapture, CaptureOutcome, CaptureRequest, CaptureSource, Collaborators,
    ElementHandle, ElementQuery, ElementRequest, HealthPolicy, LocateError, LocateResult,
    MetadataTracker, OcrStrategy, OcrWord, Point, Rect, ResolutionMethod, ResolvedHandle,
    Resolver, ResolverConfig, ScreenSource, SessionContext, TapExecutor, TemplateStore,
    TextRecognizer, VisualIndex,
};

fn noise(seed: u64, width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |_, _| Rgb([rng.random(), rng.random(), rng.random()]))
}

const LOGIN_BOUNDS: Rect = Rect::new(20, 30, 100, 50);

#[derive(Default)]
struct Device {
    screen: RgbImage,
    after_tap: Option<RgbImage>,
    taps: Vec<Point>,
}

#[derive(Clone)]
struct Shared(Rc<RefCell<Device>>);

impl ScreenSource for Shared {
    fn capture(&self) -> LocateResult<RgbImage> {
        Ok(self.0.borrow().screen.clone())
    }
}

impl TapExecutor for Shared {
    fn tap(&self, point: Point) -> LocateResult<()> {
        let mut device = self.0.borrow_mut();
        device.taps.push(point);
        if let Some(next) = device.after_tap.take() {
            device.screen = next;
        }
        Ok(())
    }
}

/// Rejects every tap.
struct DeadTouch;

impl TapExecutor for DeadTouch {
    fn tap(&self, _point: Point) -> LocateResult<()> {
        Err(LocateError::CaptureFailed {
            reason: "device offline".into(),
        })
    }
}

/// Plays frames in order, repeating the last one, and counts reads.
#[derive(Clone)]
struct Frames {
    frames: Rc<Vec<RgbImage>>,
    reads: Rc<Cell<usize>>,
}

impl Frames {
    fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: Rc::new(frames),
            reads: Rc::new(Cell::new(0)),
        }
    }
}

impl ScreenSource for Frames {
    fn capture(&self) -> LocateResult<RgbImage> {
        let n = self.reads.get();
        self.reads.set(n + 1);
        Ok(self.frames[n.min(self.frames.len() - 1)].clone())
    }
}

struct LoginPage;

impl ElementQuery for LoginPage {
    fn find_by_name(&self, name: &str) -> Option<ElementHandle> {
        (name == "Login").then(|| ElementHandle::new("login", "button", LOGIN_BOUNDS))
    }
    fn active_element(&self) -> Option<ElementHandle> {
        None
    }
    fn find_focused(&self) -> Option<ElementHandle> {
        None
    }
    fn find_inputs(&self) -> Vec<ElementHandle> {
        Vec::new()
    }
}

struct FixedWords(Vec<OcrWord>);

impl TextRecognizer for FixedWords {
    fn recognize(&self, _screen: &RgbImage) -> LocateResult<Vec<OcrWord>> {
        Ok(self.0.clone())
    }
}

fn mobile_form() -> Vec<OcrWord> {
    vec![
        OcrWord::new("Mobile", Rect::new(100, 200, 60, 30)),
        OcrWord::new("Number", Rect::new(170, 202, 70, 28)),
        OcrWord::new("Enter", Rect::new(140, 260, 60, 20)),
    ]
}

struct Rig {
    _dir: TempDir,
    root: std::path::PathBuf,
    device: Shared,
    session: SessionContext,
}

impl Rig {
    fn new(screen: RgbImage) -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().join("templates");
        let device = Shared(Rc::new(RefCell::new(Device {
            screen,
            ..Device::default()
        })));
        Self {
            _dir: dir,
            root,
            device,
            session: SessionContext::new("run_test", chrono::Utc::now()),
        }
    }

    fn resolver(
        &self,
        query: Option<Box<dyn ElementQuery>>,
        recognizer: Option<Box<dyn TextRecognizer>>,
    ) -> Resolver {
        self.resolver_with(Collaborators {
            screen: Box::new(self.device.clone()),
            query,
            tapper: Box::new(self.device.clone()),
            recognizer,
        })
    }

    fn resolver_with(&self, collab: Collaborators) -> Resolver {
        let config = ResolverConfig {
            templates_root: self.root.clone(),
            debug_mode_enabled: false,
            ..ResolverConfig::default()
        };
        Resolver::new(config, collab, &self.session).with_retry(RetryPolicy {
            attempts: 1,
            delay: Duration::ZERO,
        })
    }

    fn taps(&self) -> Vec<Point> {
        self.device.0.borrow().taps.clone()
    }

    /// Stores a manual template cut from `screen` and returns its path.
    fn manual_template(&self, name: &str, screen: &RgbImage, region: Rect) -> std::path::PathBuf {
        let mut index = VisualIndex::open(TemplateStore::new(&self.root), Default::default());
        let mut tracker = MetadataTracker::new(HealthPolicy::default());
        let request = CaptureRequest::new(name, region, CaptureSource::Manual);
        let outcome = AutoCapture::default()
            .capture(&mut index, &mut tracker, screen, &request, chrono::Utc::now())
            .unwrap();
        index.save().unwrap();
        outcome.stored().unwrap().path.clone()
    }
}

#[test]
fn structural_tap_with_visible_change_resolves_and_captures() {
    let mut rig = Rig::new(noise(1, 160, 120));
    rig.device.0.borrow_mut().after_tap = Some(noise(2, 160, 120));
    let mut resolver = rig.resolver(Some(Box::new(LoginPage)), None);

    let request = ElementRequest::new("Login").with_action(Action::Tap);
    let resolution = resolver.resolve(&mut rig.session, &request).unwrap();

    assert_eq!(resolution.method, ResolutionMethod::Structural);
    assert_eq!(resolution.point, Point::new(70, 55));
    assert_eq!(resolution.attempted, vec!["structural"]);
    assert!(matches!(resolution.handle, ResolvedHandle::Element(ref h) if h.id == "login"));
    assert_eq!(rig.taps(), vec![Point::new(70, 55)]);

    let Some(CaptureOutcome::Stored { template, .. }) = &resolution.capture else {
        panic!("structural hit captures a template");
    };
    assert_eq!(template.path, rig.root.join("screens").join("current").join("Login_auto.png"));
    assert!(template.path.exists());
    assert_eq!(rig.session.captures_of("login"), 1);

    let meta = resolver.tracker().get(&template.path).unwrap();
    assert_eq!(meta.usage.successes, 1);
    assert_eq!(meta.performance.xpath.attempts, 1);
}

#[test]
fn unvalidated_tap_falls_back_to_the_captured_template() {
    let mut rig = Rig::new(noise(3, 160, 120));
    let mut resolver = rig.resolver(Some(Box::new(LoginPage)), None);

    let request = ElementRequest::new("Login").with_action(Action::Tap);
    let resolution = resolver.resolve(&mut rig.session, &request).unwrap();

    assert_eq!(
        resolution.attempted,
        vec!["structural", "action_validation", "named_template"]
    );
    let ResolutionMethod::NamedTemplate { template, .. } = &resolution.method else {
        panic!("expected a named template hit, got {:?}", resolution.method);
    };
    assert_eq!(resolution.point, Point::new(70, 55));
    assert!(resolution.confidence.is_some_and(|c| c > 0.9));
    assert_eq!(resolution.handle, ResolvedHandle::ActionAlreadyPerformed);
    assert_eq!(rig.taps().len(), 2);

    let meta = resolver.tracker().get(template).unwrap();
    assert_eq!(meta.usage.attempts, 2);
    assert_eq!(meta.performance.xpath.successes, 0);
    assert_eq!(meta.performance.opencv.successes, 1);
}

#[test]
fn text_label_resolves_without_a_driver_query() {
    let mut rig = Rig::new(RgbImage::from_pixel(1080, 800, Rgb([255, 255, 255])));
    let mut resolver = rig.resolver(None, Some(Box::new(FixedWords(mobile_form()))));

    let request = ElementRequest::new("Mobile Number")
        .with_ocr_text("Mobile Number")
        .with_action(Action::Tap);
    let resolution = resolver.resolve(&mut rig.session, &request).unwrap();

    assert_eq!(resolution.method, ResolutionMethod::Ocr(OcrStrategy::TwoPass));
    assert_eq!(resolution.point, Point::new(170, 280));
    assert_eq!(resolution.attempted, vec!["ocr"]);
    assert_eq!(resolution.handle, ResolvedHandle::ActionAlreadyPerformed);
    assert_eq!(rig.taps(), vec![Point::new(170, 280)]);
}

#[test]
fn exhausted_cascade_names_every_attempt() {
    let mut rig = Rig::new(RgbImage::from_pixel(200, 200, Rgb([255, 255, 255])));
    let mut resolver = rig.resolver(None, Some(Box::new(FixedWords(Vec::new()))));

    let request = ElementRequest::new("Password").with_ocr_text("Password");
    let err = resolver.resolve(&mut rig.session, &request).unwrap_err();
    match err {
        LocateError::ResolutionFailed { element, attempted } => {
            assert_eq!(element, "Password");
            assert_eq!(attempted, vec!["ocr"]);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(rig.taps().is_empty());
}

#[test]
fn reference_image_finds_a_template_by_hash() {
    let screen = noise(4, 160, 120);
    let mut rig = Rig::new(screen.clone());
    let region = Rect::new(40, 40, 80, 40);
    rig.manual_template("Submit Button", &screen, region);
    let reference = rig.root.join("reference.png");
    save_png(&crop(&screen, region).unwrap(), &reference).unwrap();

    let mut resolver = rig.resolver(None, None);
    let request = ElementRequest::new("submit").with_reference(&reference);
    let resolution = resolver.resolve(&mut rig.session, &request).unwrap();

    assert_eq!(resolution.attempted, vec!["visual_hash"]);
    let ResolutionMethod::VisualHash { template, distance, .. } = &resolution.method else {
        panic!("expected a hash hit, got {:?}", resolution.method);
    };
    assert_eq!(*distance, 0);
    assert!(template.ends_with("manual_captured_images/Submit_Button.png"));
    assert_eq!(resolution.point, Point::new(80, 60));
    assert_eq!(resolution.handle, ResolvedHandle::Located(Point::new(80, 60)));
    assert!(rig.taps().is_empty());
}

#[test]
fn failed_taps_advance_the_cascade() {
    let screen = noise(6, 160, 120);
    let mut rig = Rig::new(screen.clone());
    rig.manual_template("Submit", &screen, Rect::new(40, 40, 80, 40));
    let words = vec![OcrWord::new("Submit", Rect::new(40, 40, 80, 40))];
    let mut resolver = rig.resolver_with(Collaborators {
        screen: Box::new(rig.device.clone()),
        query: None,
        tapper: Box::new(DeadTouch),
        recognizer: Some(Box::new(FixedWords(words))),
    });

    let request = ElementRequest::new("Submit")
        .with_ocr_text("Submit")
        .with_action(Action::Tap);
    let err = resolver.resolve(&mut rig.session, &request).unwrap_err();
    match err {
        LocateError::ResolutionFailed { element, attempted } => {
            assert_eq!(element, "Submit");
            assert_eq!(
                attempted,
                vec!["named_template", "action_validation", "ocr", "action_validation"]
            );
        }
        other => panic!("unexpected error {other}"),
    }

    let located = resolver
        .resolve(&mut rig.session, &ElementRequest::new("Submit"))
        .unwrap();
    assert_eq!(located.handle, ResolvedHandle::Located(Point::new(80, 60)));
}

#[test]
fn oversized_template_counts_as_a_failed_match() {
    let mut rig = Rig::new(noise(8, 120, 90));
    let template = rig.manual_template("Banner", &noise(7, 200, 160), Rect::new(0, 0, 180, 140));
    let mut resolver = rig.resolver(None, None);

    let err = resolver
        .resolve(&mut rig.session, &ElementRequest::new("Banner"))
        .unwrap_err();
    match err {
        LocateError::ResolutionFailed { attempted, .. } => {
            assert_eq!(attempted, vec!["named_template"]);
        }
        other => panic!("unexpected error {other}"),
    }

    let meta = resolver.tracker().get(&template).unwrap();
    assert_eq!(meta.usage.attempts, 1);
    assert_eq!(meta.usage.successes, 0);
    assert_eq!(meta.performance.opencv.attempts, 1);
}

#[test]
fn wait_for_image_polls_until_the_template_appears() {
    let screen = noise(9, 160, 120);
    let template = crop(&screen, Rect::new(40, 30, 48, 32)).unwrap();
    let rig = Rig::new(screen.clone());
    let frames = Frames::new(vec![RgbImage::new(160, 120), screen]);
    let resolver = rig.resolver_with(Collaborators {
        screen: Box::new(frames.clone()),
        query: None,
        tapper: Box::new(rig.device.clone()),
        recognizer: None,
    });

    let hit = resolver
        .wait_for_image(&template, Duration::from_secs(5), Duration::from_millis(1))
        .expect("match on the second frame");
    assert_eq!(hit.center, Point::new(64, 46));
    assert_eq!(frames.reads.get(), 2);
}

#[test]
fn wait_for_image_gives_up_at_the_deadline() {
    let template = crop(&noise(10, 160, 120), Rect::new(10, 10, 40, 30)).unwrap();
    let rig = Rig::new(RgbImage::new(160, 120));
    let frames = Frames::new(vec![RgbImage::new(160, 120)]);
    let resolver = rig.resolver_with(Collaborators {
        screen: Box::new(frames.clone()),
        query: None,
        tapper: Box::new(rig.device.clone()),
        recognizer: None,
    });

    let timeout = Duration::from_millis(60);
    let start = Instant::now();
    assert_eq!(
        resolver.wait_for_image(&template, timeout, Duration::from_millis(10)),
        None
    );
    assert!(start.elapsed() >= timeout);
    assert!(frames.reads.get() >= 2);
}
