//! `RecordingSession` — one display, one program, one output file.
//!
//! ```text
//! driver (async, console lines)          capture worker (spawn_blocking)
//! ─────────────────────────────          ──────────────────────────────────
//!                                        acquire display + program
//! [wait for Enter unless auto]           wait for phase != Pending
//! phase = Recording ───────────────────► start source
//! [wait for "s"]                         loop while Recording:
//!                                          grab → RGBx→BGRx → encoder
//! phase = Stopped ─────────────────────► finalize encoder (if opened)
//! join worker ◄──────────────────────── release program, then display
//! ```
//!
//! The phase travels over a `tokio::sync::watch` channel, so the worker never
//! grabs before `Recording` is published and stops once `Stopped` is seen.
//! `run` consumes the session: a finished session cannot be restarted.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use xscreenrec_core::{EncodingError, Frame, RecorderError, ResourceError, SessionConfig};

use crate::console;
use crate::encoder::EncoderSpec;

/// Console line that ends the recording.
pub const STOP_TOKEN: &str = "s";

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Something bitmaps can be grabbed from.
pub trait FrameSource {
    /// Begin reading the display. Called once, after the start signal.
    fn start(&mut self) -> Result<(), ResourceError>;

    /// Newest bitmap, or `None` if nothing was available in time.
    fn grab(&mut self) -> Result<Option<Frame>, ResourceError>;
}

/// Consumes BGRx frames and turns them into a video file.
pub trait FrameSink: Sized {
    fn push_frame(&mut self, frame: Frame) -> Result<(), EncodingError>;
    /// Flush and close the file. Called at most once.
    fn finalize(self) -> Result<(), EncodingError>;
}

/// Factory for the session's external collaborators. Moved onto the
/// capture worker, which owns everything it creates.
pub trait CaptureBackend: Send + 'static {
    type Source: FrameSource;
    type Sink: FrameSink;

    /// Bring up the display and the recorded program.
    fn acquire(&mut self, config: &SessionConfig) -> Result<Self::Source, ResourceError>;

    fn open_sink(&mut self, spec: &EncoderSpec) -> Result<Self::Sink, EncodingError>;
}

// ── Phase / report ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Display and program are up; waiting for the start signal.
    Pending,
    Recording,
    /// Terminal.
    Stopped,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_written: u64,
    /// Set only when at least one frame reached the encoder.
    pub output: Option<PathBuf>,
    /// Size the encoder was opened with.
    pub frame_size: Option<(u32, u32)>,
}

impl SessionReport {
    fn empty() -> Self {
        Self { frames_written: 0, output: None, frame_size: None }
    }
}

// ── RecordingSession ──────────────────────────────────────────────────────────

pub struct RecordingSession<B> {
    config:  SessionConfig,
    backend: B,
}

impl<B: CaptureBackend> RecordingSession<B> {
    pub fn new(config: SessionConfig, backend: B) -> Self {
        Self { config, backend }
    }

    /// Drive the session to completion.
    ///
    /// `input` yields console lines. Unless `auto_start` is set, the first
    /// line starts the recording; afterwards [`STOP_TOKEN`] stops it and any
    /// other line is ignored. A closed `input` counts as a stop. Returns once
    /// the encoder is finalized and the display and program are gone.
    pub async fn run(self, mut input: mpsc::Receiver<String>) -> Result<SessionReport, RecorderError> {
        let Self { config, backend } = self;
        let auto_start = config.auto_start;

        let (phase_tx, phase_rx) = watch::channel(Phase::Pending);
        let rt = Handle::current();
        let mut capture =
            tokio::task::spawn_blocking(move || capture_task(config, backend, phase_rx, rt));

        if !auto_start {
            console::prompt("press enter to start recording: ");
            tokio::select! {
                line = input.recv() => {
                    if line.is_none() {
                        info!("Input closed before recording started");
                        phase_tx.send_replace(Phase::Stopped);
                        return join(capture.await);
                    }
                }
                res = &mut capture => return join(res),
            }
        }

        phase_tx.send_replace(Phase::Recording);
        console::say("recording started!");
        info!("Recording started");

        loop {
            console::prompt("press s to stop recording: ");
            tokio::select! {
                line = input.recv() => match line {
                    Some(line) if line.trim() == STOP_TOKEN => break,
                    Some(line) => debug!("Ignoring input {:?}", line),
                    None => {
                        warn!("Input closed, stopping");
                        break;
                    }
                },
                res = &mut capture => return join(res),
            }
        }

        phase_tx.send_replace(Phase::Stopped);
        info!("Stop requested");
        join(capture.await)
    }
}

fn join(
    res: Result<Result<SessionReport, RecorderError>, tokio::task::JoinError>,
) -> Result<SessionReport, RecorderError> {
    res.map_err(|e| RecorderError::CaptureAborted { reason: e.to_string() })?
}

// ── Capture worker ────────────────────────────────────────────────────────────

fn capture_task<B: CaptureBackend>(
    config: SessionConfig,
    mut backend: B,
    mut phase_rx: watch::Receiver<Phase>,
    rt: Handle,
) -> Result<SessionReport, RecorderError> {
    let mut source = backend.acquire(&config)?;

    let start = rt.block_on(async {
        matches!(
            phase_rx.wait_for(|p| *p != Phase::Pending).await.as_deref(),
            Ok(Phase::Recording)
        )
    });
    if !start {
        info!("Session stopped before recording began");
        return Ok(SessionReport::empty());
    }

    let mut recorder = LazyRecorder::new(&config);
    let outcome = record_frames(&config, &mut backend, &mut source, &phase_rx, &mut recorder);
    if let Err(e) = &outcome {
        error!("Capture loop failed: {}; finalizing what was written", e);
    }

    let finalized = recorder.finalize();
    // Program first, then display.
    drop(source);

    outcome?;
    Ok(finalized?)
}

fn is_recording(phase_rx: &watch::Receiver<Phase>) -> bool {
    *phase_rx.borrow() == Phase::Recording
}

fn record_frames<B: CaptureBackend>(
    config: &SessionConfig,
    backend: &mut B,
    source: &mut B::Source,
    phase_rx: &watch::Receiver<Phase>,
    recorder: &mut LazyRecorder<B::Sink>,
) -> Result<(), RecorderError> {
    source.start()?;

    let interval = config.frame_interval();
    let mut next_tick = Instant::now();

    while is_recording(phase_rx) {
        if let Some(frame) = source.grab()? {
            if !frame.is_empty() {
                recorder.write(frame, |spec| backend.open_sink(spec))?;
            }
        }

        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
    Ok(())
}

// ── LazyRecorder ──────────────────────────────────────────────────────────────

/// Opens the encoder on the first frame, sized from that frame.
struct LazyRecorder<S> {
    sink:        Option<S>,
    size:        Option<(u32, u32)>,
    frames:      u64,
    path:        PathBuf,
    fps:         u32,
    bitrate:     u32,
    preset:      String,
    size_warned: bool,
}

impl<S: FrameSink> LazyRecorder<S> {
    fn new(config: &SessionConfig) -> Self {
        Self {
            sink:        None,
            size:        None,
            frames:      0,
            path:        config.output_path.clone(),
            fps:         config.frame_rate,
            bitrate:     config.encoder.bitrate_kbps,
            preset:      config.encoder.speed_preset.clone(),
            size_warned: false,
        }
    }

    fn write(
        &mut self,
        frame: Frame,
        open: impl FnOnce(&EncoderSpec) -> Result<S, EncodingError>,
    ) -> Result<(), EncodingError> {
        let size = (frame.width, frame.height);
        match self.size {
            None => {
                let spec = EncoderSpec {
                    path:         self.path.clone(),
                    width:        frame.width,
                    height:       frame.height,
                    fps:          self.fps,
                    bitrate_kbps: self.bitrate,
                    speed_preset: self.preset.clone(),
                };
                info!("First frame {}x{}, opening encoder", frame.width, frame.height);
                self.sink = Some(open(&spec)?);
                self.size = Some(size);
            }
            Some(expected) if expected != size => {
                if !self.size_warned {
                    warn!(
                        "Display size changed to {}x{} (encoder is {}x{}); dropping such frames",
                        size.0, size.1, expected.0, expected.1
                    );
                    self.size_warned = true;
                }
                return Ok(());
            }
            Some(_) => {}
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.push_frame(frame.into_bgrx())?;
            self.frames += 1;
        }
        Ok(())
    }

    fn finalize(self) -> Result<SessionReport, EncodingError> {
        match self.sink {
            Some(sink) => {
                sink.finalize()?;
                Ok(SessionReport {
                    frames_written: self.frames,
                    output: Some(self.path),
                    frame_size: self.size,
                })
            }
            None => {
                info!("No frames captured; {} not written", self.path.display());
                Ok(SessionReport::empty())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use xscreenrec_core::PixelFormat;

    // ── Fakes ─────────────────────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct Log {
        grabs:     u64,
        opened:    Vec<EncoderSpec>,
        pushed:    Vec<PixelFormat>,
        finalized: u32,
        started:   bool,
        released:  bool,
    }

    type SharedLog = Arc<Mutex<Log>>;

    #[derive(Clone)]
    struct FakeBackend {
        log:          SharedLog,
        /// Size of the frames the fake display produces; `None` = no frames.
        frame_size:   Option<(u32, u32)>,
        fail_acquire: bool,
        fail_push_at: Option<usize>,
    }

    impl FakeBackend {
        fn new(frame_size: Option<(u32, u32)>) -> Self {
            Self {
                log: SharedLog::default(),
                frame_size,
                fail_acquire: false,
                fail_push_at: None,
            }
        }

        fn log(&self) -> std::sync::MutexGuard<'_, Log> {
            self.log.lock().unwrap()
        }
    }

    struct FakeSource {
        log:        SharedLog,
        frame_size: Option<(u32, u32)>,
    }

    impl FrameSource for FakeSource {
        fn start(&mut self) -> Result<(), ResourceError> {
            let mut log = self.log.lock().unwrap();
            assert!(!log.started, "source started twice");
            log.started = true;
            Ok(())
        }

        fn grab(&mut self) -> Result<Option<Frame>, ResourceError> {
            let mut log = self.log.lock().unwrap();
            assert!(!log.released, "grab after release");
            assert!(log.started, "grab before start");
            log.grabs += 1;
            Ok(self.frame_size.map(|(w, h)| {
                let data = [10u8, 20, 30, 0].repeat((w * h) as usize);
                Frame::new(w, h, PixelFormat::Rgbx, data)
            }))
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.log.lock().unwrap().released = true;
        }
    }

    struct FakeSink {
        log:     SharedLog,
        fail_at: Option<usize>,
    }

    impl FrameSink for FakeSink {
        fn push_frame(&mut self, frame: Frame) -> Result<(), EncodingError> {
            let mut log = self.log.lock().unwrap();
            if Some(log.pushed.len()) == self.fail_at {
                return Err(EncodingError::WriteFailed {
                    index: log.pushed.len() as u64,
                    reason: "disk full".into(),
                });
            }
            assert_eq!(&frame.data[..4], &[30, 20, 10, 0]);
            log.pushed.push(frame.format);
            Ok(())
        }

        fn finalize(self) -> Result<(), EncodingError> {
            self.log.lock().unwrap().finalized += 1;
            Ok(())
        }
    }

    impl CaptureBackend for FakeBackend {
        type Source = FakeSource;
        type Sink = FakeSink;

        fn acquire(&mut self, _config: &SessionConfig) -> Result<FakeSource, ResourceError> {
            if self.fail_acquire {
                return Err(ResourceError::DisplayStart {
                    program: "Xvfb".into(),
                    reason: "not installed".into(),
                });
            }
            Ok(FakeSource { log: Arc::clone(&self.log), frame_size: self.frame_size })
        }

        fn open_sink(&mut self, spec: &EncoderSpec) -> Result<FakeSink, EncodingError> {
            self.log().opened.push(spec.clone());
            Ok(FakeSink { log: Arc::clone(&self.log), fail_at: self.fail_push_at })
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn config(auto_start: bool) -> SessionConfig {
        SessionConfig::configure("fake-app --flag", "800x800", auto_start, "t", 500)
            .expect("valid config")
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..1_000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn spawn_session(
        config: SessionConfig,
        backend: FakeBackend,
    ) -> (
        mpsc::Sender<String>,
        tokio::task::JoinHandle<Result<SessionReport, RecorderError>>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(RecordingSession::new(config, backend).run(rx));
        (tx, handle)
    }

    // ── Tests ─────────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_start_records_until_stop() {
        let backend = FakeBackend::new(Some((320, 200)));
        let (tx, handle) = spawn_session(config(true), backend.clone());

        wait_until("a few grabs", || backend.log().grabs >= 3).await;
        tx.send(STOP_TOKEN.into()).await.unwrap();
        let report = handle.await.unwrap().expect("session ok");

        let log = backend.log();
        assert_eq!(log.opened.len(), 1);
        let spec = &log.opened[0];
        assert_eq!((spec.width, spec.height), (320, 200));
        assert_eq!(spec.fps, 500);
        assert_eq!(spec.path, PathBuf::from("t.mp4"));
        assert_eq!(log.finalized, 1);
        assert!(log.released);
        assert!(log.pushed.iter().all(|f| *f == PixelFormat::Bgrx));
        assert_eq!(report.frames_written, log.pushed.len() as u64);
        assert_eq!(report.output, Some(PathBuf::from("t.mp4")));
        assert_eq!(report.frame_size, Some((320, 200)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_start_grabs_nothing_before_confirmation() {
        let backend = FakeBackend::new(Some((64, 48)));
        let (tx, handle) = spawn_session(config(false), backend.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let log = backend.log();
            assert!(!log.started, "display read before confirmation");
            assert_eq!(log.grabs, 0);
        }

        tx.send(String::new()).await.unwrap();
        wait_until("first grab", || backend.log().grabs > 0).await;
        tx.send(STOP_TOKEN.into()).await.unwrap();

        let report = handle.await.unwrap().expect("session ok");
        assert!(report.frames_written > 0);
        assert_eq!(backend.log().finalized, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn other_input_does_not_stop() {
        let backend = FakeBackend::new(Some((16, 16)));
        let (tx, handle) = spawn_session(config(true), backend.clone());

        tx.send("stop".into()).await.unwrap();
        tx.send("S".into()).await.unwrap();
        let seen = {
            wait_until("grabs", || backend.log().grabs > 0).await;
            backend.log().grabs
        };
        wait_until("more grabs", || backend.log().grabs > seen + 5).await;
        assert!(!handle.is_finished());

        tx.send(" s ".into()).await.unwrap();
        handle.await.unwrap().expect("session ok");
        assert_eq!(backend.log().finalized, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_frames_means_no_encoder() {
        let backend = FakeBackend::new(None);
        let (tx, handle) = spawn_session(config(true), backend.clone());

        wait_until("grabs", || backend.log().grabs >= 3).await;
        tx.send(STOP_TOKEN.into()).await.unwrap();
        let report = handle.await.unwrap().expect("session ok");

        assert_eq!(report, SessionReport::empty());
        let log = backend.log();
        assert!(log.opened.is_empty());
        assert_eq!(log.finalized, 0);
        assert!(log.released);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_frames_are_skipped() {
        let backend = FakeBackend::new(Some((0, 0)));
        let (tx, handle) = spawn_session(config(true), backend.clone());

        wait_until("grabs", || backend.log().grabs >= 3).await;
        tx.send(STOP_TOKEN.into()).await.unwrap();
        let report = handle.await.unwrap().expect("session ok");

        assert_eq!(report.output, None);
        assert!(backend.log().opened.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closing_input_before_start_ends_cleanly() {
        let backend = FakeBackend::new(Some((16, 16)));
        let (tx, handle) = spawn_session(config(false), backend.clone());

        drop(tx);
        let report = handle.await.unwrap().expect("session ok");

        assert_eq!(report, SessionReport::empty());
        let log = backend.log();
        assert!(!log.started);
        assert_eq!(log.grabs, 0);
        assert!(log.released);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closing_input_while_recording_stops() {
        let backend = FakeBackend::new(Some((16, 16)));
        let (tx, handle) = spawn_session(config(true), backend.clone());

        wait_until("grabs", || backend.log().grabs > 0).await;
        drop(tx);
        handle.await.unwrap().expect("session ok");
        assert_eq!(backend.log().finalized, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resource_failure_aborts_without_waiting_for_input() {
        let mut backend = FakeBackend::new(Some((16, 16)));
        backend.fail_acquire = true;
        let (_tx, handle) = spawn_session(config(false), backend.clone());

        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session returns on its own")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RecorderError::Resource(ResourceError::DisplayStart { .. })));
        assert!(backend.log().opened.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn encoding_failure_still_finalizes() {
        let mut backend = FakeBackend::new(Some((16, 16)));
        backend.fail_push_at = Some(2);
        let (_tx, handle) = spawn_session(config(true), backend.clone());

        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session returns on its own")
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Encoding(EncodingError::WriteFailed { index: 2, .. })
        ));
        let log = backend.log();
        assert_eq!(log.pushed.len(), 2);
        assert_eq!(log.finalized, 1);
        assert!(log.released);
    }

    #[test]
    fn lazy_recorder_drops_frames_of_a_different_size() {
        let log = SharedLog::default();
        let mut recorder = LazyRecorder::<FakeSink>::new(&config(true));
        let frame = |w: u32, h: u32| {
            Frame::new(w, h, PixelFormat::Rgbx, [10u8, 20, 30, 0].repeat((w * h) as usize))
        };
        let open = |_: &EncoderSpec| Ok(FakeSink { log: Arc::clone(&log), fail_at: None });

        recorder.write(frame(4, 4), open).unwrap();
        recorder.write(frame(8, 8), |_| panic!("encoder opened twice")).unwrap();
        recorder.write(frame(4, 4), |_| panic!("encoder opened twice")).unwrap();

        let report = recorder.finalize().unwrap();
        assert_eq!(report.frames_written, 2);
        assert_eq!(report.frame_size, Some((4, 4)));
        assert_eq!(log.lock().unwrap().finalized, 1);
    }
}
