use face_capture::bootstrap::{Collection, CollectionBootstrapper};
use face_capture::camera::{CameraError, Frame, FrameSource};
use face_capture::config::{CollectionConfig, IdentityConfig, RecognitionConfig};
use face_capture::cv_utils::{CvUtilsError, EncodedFrame, FrameCodec};
use face_capture::decision::Decision;
use face_capture::display::{DisplayError, Renderer};
use face_capture::recognition::{
    CollectionStatus, Identity, MatchResult, RecognitionClient, RecognitionError,
};
use face_capture::recognition_loop::{RecognitionLoop, RecognitionLoopError, StopReason};
use opencv::core::{Mat, Scalar, CV_8UC3};
use std::collections::{HashSet, VecDeque};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use tonic::{async_trait, Status};

/// Frame `n` is a 1-row image `n` pixels wide, so its width identifies it.
fn frame(n: i32) -> Frame {
    let mat = Mat::new_rows_cols_with_default(1, n, CV_8UC3, Scalar::all(0.0)).unwrap();
    Frame::new(mat)
}

enum Capture {
    Frame(i32),
    Fail,
}

struct ScriptedCamera {
    script: VecDeque<Capture>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedCamera {
    fn new(script: Vec<Capture>) -> (Self, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let camera = Self {
            script: script.into(),
            releases: releases.clone(),
        };
        (camera, releases)
    }

    fn frames(ids: impl IntoIterator<Item = i32>) -> (Self, Arc<AtomicUsize>) {
        Self::new(ids.into_iter().map(Capture::Frame).collect())
    }
}

impl FrameSource for ScriptedCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.script.pop_front() {
            Some(Capture::Frame(n)) => Ok(Some(frame(n))),
            Some(Capture::Fail) => Err(CameraError::Released),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Encodes a frame as its width; refuses the widths in `fail_on`.
#[derive(Default)]
struct WidthCodec {
    fail_on: HashSet<i32>,
}

impl FrameCodec for WidthCodec {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, CvUtilsError> {
        if self.fail_on.contains(&frame.width()) {
            return Err(CvUtilsError::EmptyEncoding(frame.width(), frame.height()));
        }
        Ok(EncodedFrame {
            bytes: vec![frame.width() as u8],
        })
    }
}

/// Answers searches from a queue and remembers which frames it saw.
#[derive(Default)]
struct ScriptedService {
    responses: Mutex<VecDeque<Result<MatchResult, RecognitionError>>>,
    searched: Mutex<Vec<u8>>,
    collections: Mutex<HashSet<String>>,
}

impl ScriptedService {
    fn with_responses(responses: Vec<Result<MatchResult, RecognitionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RecognitionClient for ScriptedService {
    async fn ensure_collection(
        &self,
        collection_id: &str,
    ) -> Result<CollectionStatus, RecognitionError> {
        if self
            .collections
            .lock()
            .unwrap()
            .insert(collection_id.to_string())
        {
            Ok(CollectionStatus::Created {
                arn: collection_id.to_string(),
            })
        } else {
            Ok(CollectionStatus::AlreadyExists)
        }
    }

    async fn enroll(
        &self,
        _collection_id: &str,
        identity: &Identity,
    ) -> Result<Vec<String>, RecognitionError> {
        Ok(vec![format!("face-{}", identity.external_id)])
    }

    async fn search(
        &self,
        _collection_id: &str,
        frame: EncodedFrame,
        _threshold: f32,
        max_results: u32,
    ) -> Result<MatchResult, RecognitionError> {
        assert_eq!(max_results, 1);
        self.searched.lock().unwrap().extend(frame.bytes);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MatchResult::none()))
    }
}

/// Records what was shown; requests a stop on the `stop_on_poll`-th poll.
#[derive(Default)]
struct RecordingRenderer {
    shown: Arc<Mutex<Vec<(i32, Decision)>>>,
    polls: usize,
    stop_on_poll: Option<usize>,
    fail_on_show: Option<i32>,
    closes: Arc<AtomicUsize>,
}

impl Renderer for RecordingRenderer {
    fn show(&mut self, frame: Frame, decision: &Decision) -> Result<(), DisplayError> {
        if self.fail_on_show == Some(frame.width()) {
            return Err(DisplayError::ShowFailed(opencv::Error::new(
                opencv::core::StsError,
                "window gone",
            )));
        }
        self.shown
            .lock()
            .unwrap()
            .push((frame.width(), decision.clone()));
        Ok(())
    }

    fn stop_requested(&mut self) -> Result<bool, DisplayError> {
        self.polls += 1;
        Ok(self.stop_on_poll == Some(self.polls))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn collection() -> Collection {
    Collection {
        id: "faces".to_string(),
    }
}

fn recognition(max_consecutive_failures: Option<u32>) -> RecognitionConfig {
    RecognitionConfig {
        similarity_threshold: 85.0,
        max_consecutive_failures,
    }
}

fn unavailable() -> Result<MatchResult, RecognitionError> {
    Err(Status::unavailable("service down").into())
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let service = ScriptedService::with_responses(vec![
        Ok(MatchResult::found("jane", 91.2)),
        Ok(MatchResult::found("jane", 60.0)),
        Ok(MatchResult::none()),
    ]);

    let path = std::env::temp_dir().join("face_capture_e2e_jane.jpg");
    std::fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();
    let collection_config = CollectionConfig {
        id: "faces".to_string(),
    };
    let identity = IdentityConfig {
        external_id: "jane".to_string(),
        reference_image: path,
    };
    let collection = CollectionBootstrapper::new(&service, &collection_config, &identity)
        .run()
        .await
        .unwrap();

    let (camera, releases) = ScriptedCamera::frames([1, 2, 3]);
    let renderer = RecordingRenderer::default();
    let shown = renderer.shown.clone();
    let settings = recognition(None);

    let summary = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        renderer,
        &collection,
        &settings,
    )
    .run()
    .await
    .unwrap();

    let labels: Vec<String> = shown.lock().unwrap().iter().map(|(_, d)| d.label()).collect();
    assert_eq!(
        labels,
        vec!["Match: jane (91.2%)", "Low Match: jane (60.0%)", "No Match"]
    );
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfStream));
    assert_eq!(summary.matches, 1);
    assert_eq!(summary.low_matches, 1);
    assert_eq!(summary.no_matches, 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_search_failure_affects_only_its_frame() {
    let service = ScriptedService::with_responses(vec![
        unavailable(),
        Ok(MatchResult::found("jane", 99.0)),
    ]);
    let (camera, _) = ScriptedCamera::frames([1, 2]);
    let renderer = RecordingRenderer::default();
    let shown = renderer.shown.clone();
    let (collection, settings) = (collection(), recognition(None));

    let summary = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        renderer,
        &collection,
        &settings,
    )
    .run()
    .await
    .unwrap();

    let shown = shown.lock().unwrap();
    assert!(matches!(shown[0].1, Decision::SearchError { .. }));
    assert!(matches!(shown[1].1, Decision::Match { .. }));
    assert_eq!(summary.search_errors, 1);
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfStream));
}

#[tokio::test]
async fn test_decisions_follow_frame_order_and_skip_unencodable_frames() {
    let service = ScriptedService::with_responses(vec![
        Ok(MatchResult::found("a", 90.0)),
        Ok(MatchResult::found("b", 90.0)),
        Ok(MatchResult::found("d", 90.0)),
        Ok(MatchResult::found("e", 90.0)),
    ]);
    let (camera, _) = ScriptedCamera::frames([1, 2, 3, 4, 5]);
    let codec = WidthCodec {
        fail_on: HashSet::from([3]),
    };
    let renderer = RecordingRenderer::default();
    let shown = renderer.shown.clone();
    let (collection, settings) = (collection(), recognition(None));

    let summary = RecognitionLoop::new(camera, codec, &service, renderer, &collection, &settings)
        .run()
        .await
        .unwrap();

    let shown = shown.lock().unwrap();
    let widths: Vec<i32> = shown.iter().map(|(w, _)| *w).collect();
    let ids: Vec<String> = shown
        .iter()
        .map(|(_, d)| match d {
            Decision::Match { external_id, .. } => external_id.clone(),
            other => panic!("unexpected decision {:?}", other),
        })
        .collect();

    assert_eq!(widths, vec![1, 2, 4, 5]);
    assert_eq!(ids, vec!["a", "b", "d", "e"]);
    assert_eq!(*service.searched.lock().unwrap(), vec![1, 2, 4, 5]);
    assert_eq!(summary.frames, 5);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_quit_releases_camera_once() {
    let service = ScriptedService::default();
    let (camera, releases) = ScriptedCamera::frames(1..=10);
    let renderer = RecordingRenderer {
        stop_on_poll: Some(3),
        ..Default::default()
    };
    let shown = renderer.shown.clone();
    let closes = renderer.closes.clone();
    let (collection, settings) = (collection(), recognition(None));

    let summary = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        renderer,
        &collection,
        &settings,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Quit));
    assert_eq!(shown.lock().unwrap().len(), 3);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_quit_is_checked_after_encode_failure() {
    let service = ScriptedService::default();
    let (camera, releases) = ScriptedCamera::frames([1, 2, 3]);
    let codec = WidthCodec {
        fail_on: HashSet::from([1]),
    };
    let renderer = RecordingRenderer {
        stop_on_poll: Some(1),
        ..Default::default()
    };
    let shown = renderer.shown.clone();
    let (collection, settings) = (collection(), recognition(None));

    let summary = RecognitionLoop::new(camera, codec, &service, renderer, &collection, &settings)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Quit));
    assert!(shown.lock().unwrap().is_empty());
    assert!(service.searched.lock().unwrap().is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_camera_error_releases_camera_once() {
    let service = ScriptedService::default();
    let (camera, releases) =
        ScriptedCamera::new(vec![Capture::Frame(1), Capture::Fail, Capture::Frame(2)]);
    let renderer = RecordingRenderer::default();
    let closes = renderer.closes.clone();
    let (collection, settings) = (collection(), recognition(None));

    let result = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        renderer,
        &collection,
        &settings,
    )
    .run()
    .await;

    assert!(matches!(result, Err(RecognitionLoopError::Camera(_))));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_display_error_releases_camera_once() {
    let service = ScriptedService::default();
    let (camera, releases) = ScriptedCamera::frames([1, 2, 3]);
    let renderer = RecordingRenderer {
        fail_on_show: Some(2),
        ..Default::default()
    };
    let (collection, settings) = (collection(), recognition(None));

    let result = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        renderer,
        &collection,
        &settings,
    )
    .run()
    .await;

    assert!(matches!(result, Err(RecognitionLoopError::Display(_))));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failures_never_stop_loop_without_cap() {
    let service =
        ScriptedService::with_responses((0..20).map(|_| unavailable()).collect::<Vec<_>>());
    let (camera, _) = ScriptedCamera::frames(1..=20);
    let (collection, settings) = (collection(), recognition(None));

    let summary = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        RecordingRenderer::default(),
        &collection,
        &settings,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.search_errors, 20);
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfStream));
}

#[tokio::test]
async fn test_consecutive_failure_cap_stops_loop() {
    let service = ScriptedService::with_responses(vec![
        unavailable(),
        unavailable(),
        Ok(MatchResult::none()),
        unavailable(),
        unavailable(),
        unavailable(),
    ]);
    let (camera, releases) = ScriptedCamera::frames(1..=10);
    let renderer = RecordingRenderer::default();
    let shown = renderer.shown.clone();
    let (collection, settings) = (collection(), recognition(Some(3)));

    let summary = RecognitionLoop::new(
        camera,
        WidthCodec::default(),
        &service,
        renderer,
        &collection,
        &settings,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::ServiceUnavailable));
    assert_eq!(summary.frames, 6);
    // The frame that trips the cap is still rendered.
    assert_eq!(shown.lock().unwrap().len(), 6);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
