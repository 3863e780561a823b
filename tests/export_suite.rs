use chrono::{Local, TimeZone};
use glitchviz::export::{
    Artifact, ExportController, ExportError, ExportEvent, ExportFormat, ExportJob, GifJob,
    GifSettings, JobState, Palette, RecorderBackend, RecorderSettings, Recording, VideoCodec,
    VideoJob, VideoSettings, artifact_file_name, even_dims, fit_within, save_artifact,
};
use glitchviz::export::video::{bitrate_for, pick_codec};
use glitchviz::surface::Surface;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct Log {
    started: Arc<Mutex<Vec<RecorderSettings>>>,
    frames: Arc<Mutex<Vec<usize>>>,
    aborted: Arc<AtomicBool>,
}

/// In-memory recorder: supports the listed codecs, returns a fixed payload.
struct FakeRecorder {
    supported: Vec<VideoCodec>,
    log: Log,
}

struct FakeRecording {
    log: Log,
}

impl RecorderBackend for FakeRecorder {
    fn is_type_supported(&self, codec: VideoCodec) -> bool {
        self.supported.contains(&codec)
    }

    fn start(&self, settings: &RecorderSettings) -> Result<Box<dyn Recording>, ExportError> {
        self.log.started.lock().expect("lock").push(*settings);
        Ok(Box::new(FakeRecording {
            log: self.log.clone(),
        }))
    }
}

impl Recording for FakeRecording {
    fn push_frame(&mut self, rgba: &[u8]) -> Result<(), ExportError> {
        self.log.frames.lock().expect("lock").push(rgba.len());
        Ok(())
    }

    fn stop(self: Box<Self>) -> Result<Vec<u8>, ExportError> {
        Ok(b"\x1aE\xdf\xa3fake-webm".to_vec())
    }

    fn abort(self: Box<Self>) {
        self.log.aborted.store(true, Ordering::SeqCst);
    }
}

fn controller(supported: Vec<VideoCodec>, video_frames: u32) -> (ExportController, Log) {
    let log = Log::default();
    let ctl = ExportController::new(
        GifSettings::default(),
        VideoSettings {
            frames: video_frames,
            ..VideoSettings::default()
        },
        Box::new(FakeRecorder {
            supported,
            log: log.clone(),
        }),
    );
    (ctl, log)
}

fn gradient(w: usize, h: usize) -> Surface {
    let mut s = Surface::new(w, h);
    for y in 0..h {
        for x in 0..w {
            s.put(x, y, [(x * 255 / w.max(1)) as u8, (y * 255 / h.max(1)) as u8, 90, 255]);
        }
    }
    s
}

/// Tick until the active job finishes, advancing a virtual clock.
fn run_to_end(ctl: &mut ExportController, surface: &Surface, start: Instant) -> ExportEvent {
    let mut now = start;
    for _ in 0..10_000 {
        if let Some(event) = ctl.tick(surface, now) {
            return event;
        }
        now += Duration::from_millis(10);
    }
    panic!("export never finished");
}

#[test]
fn fit_within_keeps_aspect_ratio() {
    assert_eq!(fit_within(1920, 1080, 512), (512, 288));
    assert_eq!(fit_within(1080, 1920, 512), (288, 512));
    assert_eq!(fit_within(300, 200, 512), (300, 200));
    assert_eq!(fit_within(0, 200, 512), (0, 0));
    assert_eq!(even_dims((511, 287)), (510, 286));
    assert_eq!(even_dims((1, 1)), (2, 2));
}

#[test]
fn job_state_only_moves_forward() {
    let mut job = ExportJob::new(ExportFormat::Animation, 8, 10, 512);
    assert_eq!(job.state(), JobState::Idle);
    job.advance(JobState::Capturing).expect("idle -> capturing");
    assert!(job.advance(JobState::Idle).is_err());
    assert!(job.advance(JobState::Capturing).is_err());
    job.advance(JobState::Encoding).expect("capturing -> encoding");
    job.advance(JobState::Done).expect("encoding -> done");
    assert!(job.advance(JobState::Failed).is_err());
    assert_eq!(job.state(), JobState::Done);
}

#[test]
fn screenshot_is_a_png_of_the_surface() {
    let (mut ctl, _) = controller(vec![VideoCodec::Vp9], 3);
    let artifact = ctl.screenshot(&gradient(40, 30)).expect("screenshot");
    assert_eq!(artifact.extension, "png");
    assert_eq!((artifact.width, artifact.height), (40, 30));
    assert_eq!(&artifact.bytes[..8], b"\x89PNG\r\n\x1a\n");

    let decoded = image::load_from_memory(&artifact.bytes).expect("decode png");
    assert_eq!((decoded.width(), decoded.height()), (40, 30));
    assert_eq!(ctl.state(), JobState::Idle);
}

#[test]
fn screenshot_of_empty_surface_fails() {
    let (mut ctl, _) = controller(vec![VideoCodec::Vp9], 3);
    let err = ctl.screenshot(&Surface::default()).expect_err("empty");
    assert!(matches!(err, ExportError::Surface(_)));
}

#[test]
fn gif_from_full_hd_surface_is_scaled_to_max_size() {
    let job = GifJob::start(GifSettings::default(), (1920, 1080), Instant::now()).expect("start gif");
    assert_eq!(job.dims(), (512, 288));
    assert_eq!(job.job().state(), JobState::Capturing);
}

#[test]
fn gif_export_writes_all_frames_at_one_size() {
    let (mut ctl, _) = controller(vec![VideoCodec::Vp9], 3);
    let surface = gradient(96, 54);
    let start = Instant::now();

    for round in 0..2 {
        ctl.start_gif(&surface, start).expect("start gif");
        assert_eq!(ctl.active_format(), Some(ExportFormat::Animation));
        assert!(!ctl.cancel(), "gif exports have no cancel path");

        let ExportEvent::Finished(artifact) = run_to_end(&mut ctl, &surface, start) else {
            panic!("gif export round {round} failed");
        };
        assert_eq!(artifact.frames, 8);
        assert_eq!(&artifact.bytes[..6], b"GIF89a");

        let mut opts = gif::DecodeOptions::new();
        opts.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = opts.read_info(&artifact.bytes[..]).expect("gif header");
        assert_eq!((decoder.width(), decoder.height()), (96, 54));
        let table = decoder.global_palette().expect("global colour table").to_vec();
        assert!(!table.is_empty() && table.len() % 3 == 0);
        assert!(table.len() <= GifSettings::default().max_colors * 3, "{} bytes", table.len());
        let entries = table.len() / 3;

        let mut frames = 0;
        while let Some(frame) = decoder.read_next_frame().expect("gif frame") {
            assert_eq!((frame.width, frame.height), (96, 54));
            assert_eq!(frame.delay, 10);
            assert_eq!(frame.dispose, gif::DisposalMethod::Background);
            assert!(frame.palette.is_none(), "frames share the global table");
            assert!(frame.buffer.iter().all(|&i| (i as usize) < entries));
            frames += 1;
        }
        assert_eq!(frames, 8);
        assert_eq!(ctl.state(), JobState::Idle);
    }
}

#[test]
fn second_export_while_busy_is_refused() {
    let (mut ctl, _) = controller(vec![VideoCodec::Vp9], 3);
    let surface = gradient(32, 32);
    let now = Instant::now();
    ctl.start_gif(&surface, now).expect("start gif");

    assert!(matches!(ctl.start_gif(&surface, now), Err(ExportError::Busy)));
    assert!(matches!(ctl.start_video(&surface, now), Err(ExportError::Busy)));
    assert!(matches!(ctl.screenshot(&surface), Err(ExportError::Busy)));
    assert_eq!(ctl.state(), JobState::Capturing);
}

#[test]
fn unsupported_recorder_fails_immediately_and_stays_idle() {
    let (mut ctl, log) = controller(Vec::new(), 3);
    let err = ctl
        .start_video(&gradient(64, 64), Instant::now())
        .expect_err("no codec available");
    assert!(matches!(err, ExportError::Unsupported(_)));
    assert_eq!(ctl.state(), JobState::Idle);
    assert!(!ctl.is_busy());
    assert!(log.started.lock().expect("lock").is_empty());
}

#[test]
fn codec_preference_is_vp9_then_vp8_then_mp4() {
    let all = FakeRecorder {
        supported: vec![VideoCodec::Generic, VideoCodec::Vp8, VideoCodec::Vp9],
        log: Log::default(),
    };
    assert_eq!(pick_codec(&all), Some(VideoCodec::Vp9));
    let no_vp9 = FakeRecorder {
        supported: vec![VideoCodec::Generic, VideoCodec::Vp8],
        log: Log::default(),
    };
    assert_eq!(pick_codec(&no_vp9), Some(VideoCodec::Vp8));
    let mp4 = FakeRecorder {
        supported: vec![VideoCodec::Generic],
        log: Log::default(),
    };
    assert_eq!(pick_codec(&mp4), Some(VideoCodec::Generic));
    assert_eq!(VideoCodec::Generic.extension(), "mp4");
}

#[test]
fn bitrate_steps_up_at_720() {
    assert_eq!(bitrate_for(1280, 720), 8_000_000);
    assert_eq!(bitrate_for(640, 360), 4_000_000);
}

#[test]
fn video_export_records_requested_frames() {
    let (mut ctl, log) = controller(vec![VideoCodec::Vp8], 5);
    let surface = gradient(1920, 1080);
    let start = Instant::now();
    ctl.start_video(&surface, start).expect("start video");

    let started = log.started.lock().expect("lock").clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].codec, VideoCodec::Vp8);
    assert_eq!((started[0].width, started[0].height), (720, 404));
    assert_eq!(started[0].fps, 30);
    assert_eq!(started[0].bits_per_second, 8_000_000);

    let ExportEvent::Finished(artifact) = run_to_end(&mut ctl, &gradient(1920, 1080), start) else {
        panic!("video export failed");
    };
    assert_eq!(artifact.format, ExportFormat::Video);
    assert_eq!(artifact.extension, "webm");
    assert_eq!(artifact.frames, 5);
    let frames = log.frames.lock().expect("lock").clone();
    assert_eq!(frames, vec![720 * 404 * 4; 5]);
    assert_eq!(ctl.state(), JobState::Idle);
}

#[test]
fn cancelled_video_aborts_recording() {
    let (mut ctl, log) = controller(vec![VideoCodec::Vp9], 100);
    let surface = gradient(64, 48);
    let start = Instant::now();
    ctl.start_video(&surface, start).expect("start video");
    assert!(ctl.tick(&surface, start).is_none());

    assert!(ctl.cancel());
    let event = ctl
        .tick(&surface, start + Duration::from_millis(5))
        .expect("cancel is reported on the next tick");
    assert!(matches!(
        event,
        ExportEvent::Failed {
            format: ExportFormat::Video,
            error: ExportError::Cancelled
        }
    ));
    assert!(log.aborted.load(Ordering::SeqCst));
    assert_eq!(ctl.state(), JobState::Idle);
}

#[test]
fn video_job_respects_frame_pacing() {
    let log = Log::default();
    let backend = FakeRecorder {
        supported: vec![VideoCodec::Vp9],
        log: log.clone(),
    };
    let settings = VideoSettings {
        frames: 10,
        fps: 10,
        max_dimension: 64,
    };
    let surface = gradient(64, 64);
    let start = Instant::now();
    let mut job = VideoJob::start(&backend, settings, surface.dims(), start).expect("start");

    assert!(job.tick(&surface, start).is_none());
    assert!(job.tick(&surface, start + Duration::from_millis(20)).is_none());
    assert_eq!(job.captured(), 1);
    assert!(job.tick(&surface, start + Duration::from_millis(100)).is_none());
    assert_eq!(job.captured(), 2);
}

#[test]
fn palette_is_bounded_and_maps_exact_colours() {
    let mut rgba = Vec::new();
    for i in 0..200u32 {
        rgba.extend_from_slice(&[(i % 256) as u8, (i * 7 % 256) as u8, (i * 13 % 256) as u8, 255]);
    }
    let palette = Palette::median_cut(&rgba, 16);
    assert!(palette.len() <= 16 && !palette.is_empty());

    let mut exact = Palette::from_colors(vec![[0, 0, 0], [255, 0, 0], [0, 0, 255]]);
    let indices = exact.map_frame(&[250, 5, 5, 255, 3, 3, 240, 255]);
    assert_eq!(indices, vec![1, 2]);
}

#[test]
fn artifact_names_are_timestamped() {
    let when = Local
        .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
        .single()
        .expect("valid local time");
    assert_eq!(artifact_file_name("gif", when), "glitchviz-20240309-070501.gif");
}

#[test]
fn saving_never_overwrites() {
    let dir = tempfile::tempdir().expect("tempdir");
    let when = Local
        .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
        .single()
        .expect("valid local time");
    let artifact = Artifact {
        format: ExportFormat::Screenshot,
        extension: "png",
        width: 1,
        height: 1,
        frames: 1,
        bytes: vec![1, 2, 3],
    };

    let first = save_artifact(dir.path(), &artifact, when).expect("first save");
    let second = save_artifact(dir.path(), &artifact, when).expect("second save");
    assert_ne!(first, second);
    assert_eq!(
        first.file_name().and_then(|n| n.to_str()),
        Some("glitchviz-20240102-030405.png")
    );
    assert_eq!(
        second.file_name().and_then(|n| n.to_str()),
        Some("glitchviz-20240102-030405-1.png")
    );
    assert_eq!(std::fs::read(&second).expect("read back"), vec![1, 2, 3]);
}
