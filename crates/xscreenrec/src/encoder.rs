//! GStreamer H.264 → MP4 file encoder.
//!
//! # Encoder priority (highest to lowest)
//!
//! | Encoder        | Backend  | Notes |
//! |----------------|----------|-------|
//! | `x264enc`      | Software | Best quality per bit for offline files |
//! | `openh264enc`  | Software | Cisco OpenH264, when gst-plugins-ugly is missing |
//! | `vaapih264enc` | VA-API HW | Intel / AMD iGPU |
//!
//! # Pipeline
//!
//! ```text
//! appsrc (BGRx, WxH, fps/1)
//!   → videoconvert → videoscale
//!   → video/x-raw,format=I420   (even dimensions for 4:2:0)
//!   → <best-encoder>
//!   → h264parse
//!   → mp4mux
//!   → filesink
//! ```

use std::path::PathBuf;

use anyhow::Context;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use tracing::{debug, info, warn};
use xscreenrec_core::{EncodingError, Frame, PixelFormat};

use crate::session::FrameSink;

/// How long finalization may take to drain the muxer.
const FINALIZE_TIMEOUT_S: u64 = 30;

// ── Encoder selection ─────────────────────────────────────────────────────────

/// Return the element name of the best available H.264 encoder plus the
/// property string to place after it.
fn select_encoder(spec: &EncoderSpec) -> Option<(&'static str, String)> {
    let kbps = spec.bitrate_kbps;
    let candidates: [(&'static str, String); 3] = [
        (
            "x264enc",
            format!(
                "speed-preset={} bitrate={kbps} key-int-max={}",
                spec.speed_preset,
                spec.fps * 2
            ),
        ),
        ("openh264enc", format!("bitrate={}", kbps * 1000)),
        ("vaapih264enc", format!("bitrate={kbps}")),
    ];
    for (name, props) in candidates {
        if gst::ElementFactory::find(name).is_some() {
            info!("H.264 encoder selected: {}", name);
            return Some((name, props));
        }
        debug!("H.264 encoder '{}' not found, trying next", name);
    }
    None
}

// ── EncoderSpec ───────────────────────────────────────────────────────────────

/// Parameters an encoder is opened with. Width and height come from the
/// first captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSpec {
    pub path:         PathBuf,
    pub width:        u32,
    pub height:       u32,
    pub fps:          u32,
    pub bitrate_kbps: u32,
    pub speed_preset: String,
}

impl EncoderSpec {
    /// Encoded size. 4:2:0 chroma needs both sides even.
    pub fn output_size(&self) -> (u32, u32) {
        (even(self.width), even(self.height))
    }

    /// Presentation timestamp of the `index`-th frame, in nanoseconds.
    pub fn pts_ns(&self, index: u64) -> u64 {
        index * 1_000_000_000 / self.fps as u64
    }

    pub fn frame_duration_ns(&self) -> u64 {
        1_000_000_000 / self.fps as u64
    }
}

fn even(v: u32) -> u32 {
    (v & !1).max(2)
}

// ── Mp4Encoder ────────────────────────────────────────────────────────────────

/// Writes BGRx frames into an H.264 MP4 file at a constant frame rate.
///
/// The file is only playable after [`FrameSink::finalize`]; dropping the
/// encoder without it tears the pipeline down and leaves a truncated file.
pub struct Mp4Encoder {
    pipeline:  gst::Pipeline,
    appsrc:    AppSrc,
    spec:      EncoderSpec,
    frames:    u64,
    finalized: bool,
}

impl Mp4Encoder {
    /// Build and start the encode pipeline for `spec`.
    pub fn create(spec: &EncoderSpec) -> Result<Self, EncodingError> {
        gst::init().map_err(|e| EncodingError::GStreamerPipeline(e.to_string()))?;
        let (enc_name, enc_props) = select_encoder(spec).ok_or(EncodingError::EncoderUnavailable)?;
        build(spec, enc_name, &enc_props)
            .map_err(|e| EncodingError::GStreamerPipeline(format!("{e:#}")))
    }
}

fn build(spec: &EncoderSpec, enc_name: &str, enc_props: &str) -> anyhow::Result<Mp4Encoder> {
    let EncoderSpec { width, height, fps, .. } = *spec;
    let (out_w, out_h) = spec.output_size();
    let format = PixelFormat::Bgrx.caps_name();

    let desc = format!(
        "appsrc name=src is-live=false block=true format=time \
             caps=\"video/x-raw,format={format},width={width},height={height},framerate={fps}/1\" \
         ! videoconvert \
         ! videoscale \
         ! video/x-raw,format=I420,width={out_w},height={out_h} \
         ! {enc_name} {enc_props} \
         ! h264parse \
         ! mp4mux \
         ! filesink name=sink"
    );
    debug!("Encoder pipeline: {}", desc);

    let pipeline = gst::parse::launch(&desc)
        .context("Parsing encoder pipeline")?
        .downcast::<gst::Pipeline>()
        .map_err(|_| anyhow::anyhow!("Expected a Pipeline"))?;

    let appsrc: AppSrc = pipeline
        .by_name("src")
        .context("Finding appsrc 'src'")?
        .downcast::<AppSrc>()
        .map_err(|_| anyhow::anyhow!("Expected AppSrc"))?;

    let sink = pipeline.by_name("sink").context("Finding filesink 'sink'")?;
    sink.set_property("location", spec.path.display().to_string());

    pipeline
        .set_state(gst::State::Playing)
        .context("Starting encoder pipeline")?;

    info!(
        "Encoding {}x{} @ {} fps into {}",
        out_w,
        out_h,
        fps,
        spec.path.display()
    );
    Ok(Mp4Encoder {
        pipeline,
        appsrc,
        spec: spec.clone(),
        frames: 0,
        finalized: false,
    })
}

impl FrameSink for Mp4Encoder {
    fn push_frame(&mut self, frame: Frame) -> Result<(), EncodingError> {
        let index = self.frames;
        let write_failed = |reason: String| EncodingError::WriteFailed { index, reason };

        let mut buffer = gst::Buffer::from_mut_slice(frame.data);
        {
            let buf_mut = buffer
                .get_mut()
                .ok_or_else(|| write_failed("buffer not writable".into()))?;
            buf_mut.set_pts(gst::ClockTime::from_nseconds(self.spec.pts_ns(index)));
            buf_mut.set_duration(gst::ClockTime::from_nseconds(self.spec.frame_duration_ns()));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| write_failed(format!("appsrc push_buffer: {e:?}")))?;
        self.frames += 1;
        Ok(())
    }

    fn finalize(mut self) -> Result<(), EncodingError> {
        self.finalized = true;
        let path = self.spec.path.display().to_string();
        let finalize_failed = |reason: String| EncodingError::FinalizeFailed {
            path: path.clone(),
            reason,
        };

        let drained = self
            .appsrc
            .end_of_stream()
            .map_err(|e| finalize_failed(format!("appsrc end_of_stream: {e:?}")))
            .and_then(|_| {
                let bus = self
                    .pipeline
                    .bus()
                    .ok_or_else(|| finalize_failed("pipeline has no bus".into()))?;
                let msg = bus
                    .timed_pop_filtered(
                        gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_S),
                        &[gst::MessageType::Eos, gst::MessageType::Error],
                    )
                    .ok_or_else(|| finalize_failed(format!("no EOS after {FINALIZE_TIMEOUT_S}s")))?;
                match msg.view() {
                    gst::MessageView::Error(e) => Err(finalize_failed(format!(
                        "{} ({:?})",
                        e.error(),
                        e.debug()
                    ))),
                    _ => Ok(()),
                }
            });

        let _ = self.pipeline.set_state(gst::State::Null);
        drained?;
        info!("Wrote {} frames to {}", self.frames, path);
        Ok(())
    }
}

impl Drop for Mp4Encoder {
    fn drop(&mut self) {
        if !self.finalized {
            warn!(
                "Encoder for {} dropped without finalize; file is incomplete",
                self.spec.path.display()
            );
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}
