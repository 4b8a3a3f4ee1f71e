use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// MARK: - Resolution

/// Requested size of the virtual display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const DEFAULT: Self = Self { width: 800, height: 800 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parses `WIDTHxHEIGHT`. Both sides must be positive integers.
impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidResolution { value: s.to_owned() };

        let (w, h) = s.split_once('x').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

// MARK: - PixelFormat

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Red, Green, Blue, unused. What `ximagesrc` hands out.
    Rgbx,
    /// 4 bytes per pixel: Blue, Green, Red, unused. What the encoder consumes.
    Bgrx,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// GStreamer caps name for this layout.
    pub fn caps_name(self) -> &'static str {
        match self {
            Self::Rgbx => "RGBx",
            Self::Bgrx => "BGRx",
        }
    }
}

// MARK: - Frame

/// One bitmap grabbed from the virtual display. Rows are tightly packed.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data:   Vec<u8>,
    pub width:  u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self { data, width, height, format }
    }

    /// A zero-sized grab, e.g. while the display has no drawable yet.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Swap red and blue in place so the frame is laid out as BGRx.
    pub fn into_bgrx(mut self) -> Self {
        if self.format == PixelFormat::Rgbx {
            for px in self.data.chunks_exact_mut(PixelFormat::BYTES_PER_PIXEL) {
                px.swap(0, 2);
            }
            self.format = PixelFormat::Bgrx;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_resolutions() {
        assert_eq!("800x800".parse::<Resolution>().unwrap(), Resolution::new(800, 800));
        assert_eq!("640x480".parse::<Resolution>().unwrap(), Resolution::new(640, 480));
        assert_eq!("1x1".parse::<Resolution>().unwrap(), Resolution::new(1, 1));
    }

    #[test]
    fn rejects_malformed_resolutions() {
        for bad in ["0x100", "100x0", "800", "800x", "x600", "axb", "-1x5", "800*600", "1x2x3", ""] {
            let err = bad.parse::<Resolution>().unwrap_err();
            assert_eq!(err, ConfigError::InvalidResolution { value: bad.to_owned() }, "{bad}");
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let res = Resolution::new(1024, 768);
        assert_eq!(res.to_string().parse::<Resolution>().unwrap(), res);
    }

    #[test]
    fn into_bgrx_swaps_red_and_blue() {
        let frame = Frame::new(2, 1, PixelFormat::Rgbx, vec![1, 2, 3, 0, 10, 20, 30, 0]);
        let out = frame.into_bgrx();
        assert_eq!(out.format, PixelFormat::Bgrx);
        assert_eq!(out.data, vec![3, 2, 1, 0, 30, 20, 10, 0]);
    }

    #[test]
    fn into_bgrx_leaves_bgrx_alone() {
        let frame = Frame::new(1, 1, PixelFormat::Bgrx, vec![1, 2, 3, 0]);
        assert_eq!(frame.into_bgrx().data, vec![1, 2, 3, 0]);
    }

    #[test]
    fn zero_sized_frames_are_empty() {
        assert!(Frame::new(0, 10, PixelFormat::Rgbx, vec![]).is_empty());
        assert!(Frame::new(10, 0, PixelFormat::Rgbx, vec![]).is_empty());
        assert!(!Frame::new(1, 1, PixelFormat::Rgbx, vec![0; 4]).is_empty());
    }
}
