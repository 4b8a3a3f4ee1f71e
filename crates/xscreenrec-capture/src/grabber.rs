//! On-demand framebuffer grabs from an X display via GStreamer `ximagesrc`.

use std::time::Duration;

use anyhow::Context;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use tracing::{debug, info};
use xscreenrec_core::{Frame, PixelFormat, ResourceError};

/// Holds an `ximagesrc` pipeline and hands out its newest bitmap on each
/// [`FrameGrabber::grab`].
///
/// The pipeline is only prepared by [`FrameGrabber::open`]; nothing is read
/// from the display until [`FrameGrabber::start`].
///
/// ```text
/// ximagesrc(display-name=:N) → videoconvert → video/x-raw,format=RGBx
///   → appsink (max-buffers=1, drop=true)
/// ```
pub struct FrameGrabber {
    pipeline: gst::Pipeline,
    appsink:  AppSink,
    timeout:  gst::ClockTime,
    display:  String,
}

impl FrameGrabber {
    /// Prepare grabbing from `display` at roughly `fps` bitmaps per second.
    pub fn open(display: &str, fps: u32, timeout: Duration) -> Result<Self, ResourceError> {
        build(display, fps, timeout).map_err(|e| ResourceError::Grab(format!("{e:#}")))
    }

    /// Begin reading the display.
    pub fn start(&mut self) -> Result<(), ResourceError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| {
                ResourceError::Grab(format!("starting grab pipeline on {}: {e}", self.display))
            })?;
        info!("Grabbing {}", self.display);
        Ok(())
    }

    /// Newest bitmap, or `None` if the display produced nothing within the
    /// grab timeout.
    pub fn grab(&mut self) -> Result<Option<Frame>, ResourceError> {
        match self.appsink.try_pull_sample(self.timeout) {
            Some(sample) => frame_from_sample(&sample).map(Some),
            None => {
                self.check_bus()?;
                if self.appsink.is_eos() {
                    return Err(ResourceError::Grab(format!(
                        "ximagesrc on {} reached end of stream",
                        self.display
                    )));
                }
                Ok(None)
            }
        }
    }

    fn check_bus(&self) -> Result<(), ResourceError> {
        let Some(bus) = self.pipeline.bus() else { return Ok(()) };
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(e) = msg.view() {
                return Err(ResourceError::Grab(format!(
                    "{}: {} ({:?})",
                    self.display,
                    e.error(),
                    e.debug()
                )));
            }
        }
        Ok(())
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        debug!("Grabber on {} stopped", self.display);
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

fn build(display: &str, fps: u32, timeout: Duration) -> anyhow::Result<FrameGrabber> {
    gst::init().context("GStreamer init")?;

    let format = PixelFormat::Rgbx.caps_name();
    let desc = format!(
        "ximagesrc name=src use-damage=false show-pointer=true \
         ! videoconvert \
         ! video/x-raw,format={format},framerate={fps}/1 \
         ! appsink name=sink max-buffers=1 drop=true sync=false emit-signals=false"
    );
    debug!("Grab pipeline: {}", desc);

    let pipeline = gst::parse::launch(&desc)
        .context("Parsing grab pipeline")?
        .downcast::<gst::Pipeline>()
        .map_err(|_| anyhow::anyhow!("Expected a Pipeline"))?;

    let src = pipeline.by_name("src").context("Finding ximagesrc 'src'")?;
    src.set_property("display-name", display);

    let appsink: AppSink = pipeline
        .by_name("sink")
        .context("Finding appsink 'sink'")?
        .downcast::<AppSink>()
        .map_err(|_| anyhow::anyhow!("Expected AppSink"))?;

    pipeline
        .set_state(gst::State::Ready)
        .context("Preparing grab pipeline")?;

    let display_name = display;
    debug!("Grab pipeline for {} ready at {} fps", display_name, fps);
    Ok(FrameGrabber {
        pipeline,
        appsink,
        timeout: gst::ClockTime::from_mseconds(timeout.as_millis() as u64),
        display: display.to_owned(),
    })
}

fn frame_from_sample(sample: &gst::Sample) -> Result<Frame, ResourceError> {
    let caps = sample
        .caps()
        .ok_or_else(|| ResourceError::Grab("sample without caps".into()))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| ResourceError::Grab(format!("unexpected caps: {e}")))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| ResourceError::Grab("sample without buffer".into()))?;
    let map = buffer
        .map_readable()
        .map_err(|_| ResourceError::Grab("buffer map failed".into()))?;

    let stride = info.stride()[0].max(0) as usize;
    let data = pack_rows(map.as_slice(), info.width(), info.height(), stride).ok_or_else(|| {
        ResourceError::Grab(format!(
            "buffer of {} bytes too short for {}x{} with stride {}",
            map.len(),
            info.width(),
            info.height(),
            stride
        ))
    })?;
    Ok(Frame::new(info.width(), info.height(), PixelFormat::Rgbx, data))
}

/// Copy `height` rows of `width` pixels out of a buffer whose rows are
/// `stride` bytes apart, dropping the padding. `None` if `src` cannot hold
/// that many rows.
fn pack_rows(src: &[u8], width: u32, height: u32, stride: usize) -> Option<Vec<u8>> {
    let row_bytes = width as usize * PixelFormat::BYTES_PER_PIXEL;
    let height = height as usize;
    if height == 0 || row_bytes == 0 {
        return Some(Vec::new());
    }
    if stride < row_bytes || src.len() < stride * (height - 1) + row_bytes {
        return None;
    }
    if stride == row_bytes {
        return Some(src[..row_bytes * height].to_vec());
    }

    let mut out = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        out.extend_from_slice(&src[start..start + row_bytes]);
    }
    Some(out)
}
