//! Screen-region capture: the region selector protocol and the cropping of
//! a full screenshot down to the selected rectangle.

use super::CaptureError;
use crate::constants::{CROPPING_STARTED, MAX_CROP_SIDE_PX, MIN_SELECTION_PX};
use image::{imageops, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::process::{Command, Stdio};
use tokio::sync::mpsc::UnboundedSender;

/// Message sent to the region selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SelectorRequest {
    StartCrop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorResponse {
    pub status: String,
}

impl SelectorResponse {
    pub fn started() -> Self {
        Self {
            status: CROPPING_STARTED.to_string(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.status == CROPPING_STARTED
    }
}

/// Out-of-band event delivered once the user finishes or cancels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SelectorEvent {
    CropComplete {
        #[serde(rename = "cropData")]
        crop_data: CropData,
    },
}

fn unit_ratio() -> f64 {
    1.0
}

/// Selection in logical pixels plus the device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropData {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(rename = "devicePixelRatio", alias = "dpr", default = "unit_ratio")]
    pub device_pixel_ratio: f64,
}

/// Crop rectangle in physical screenshot pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl CropData {
    pub fn cancelled() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            device_pixel_ratio: 1.0,
        }
    }

    /// Scales by the device pixel ratio and truncates to whole pixels.
    /// `None` when either side ends up empty.
    pub fn physical(&self) -> Option<PixelRect> {
        let dpr = if self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio
        } else {
            1.0
        };
        let width = (self.width * dpr).trunc();
        let height = (self.height * dpr).trunc();
        if !(width >= 1.0 && height >= 1.0) {
            return None;
        }
        Some(PixelRect {
            x: (self.x * dpr).trunc() as i64,
            y: (self.y * dpr).trunc() as i64,
            width: width.min(u32::MAX as f64) as u32,
            height: height.min(u32::MAX as f64) as u32,
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.physical().is_none()
    }
}

/// Copies `rect` out of a PNG screenshot into a new transparent bitmap of
/// exactly the rectangle's size. Parts of the rectangle outside the
/// screenshot stay transparent.
pub fn crop_screenshot(png: &[u8], rect: PixelRect) -> Result<Vec<u8>, CaptureError> {
    if rect.width > MAX_CROP_SIDE_PX || rect.height > MAX_CROP_SIDE_PX {
        return Err(CaptureError::InvalidImage(format!(
            "selection {}x{} is too large",
            rect.width, rect.height
        )));
    }
    let screenshot = image::load_from_memory_with_format(png, ImageFormat::Png)
        .map_err(|e| CaptureError::InvalidImage(e.to_string()))?
        .to_rgba8();

    let mut canvas = RgbaImage::new(rect.width, rect.height);
    let x0 = rect.x.max(0);
    let y0 = rect.y.max(0);
    let x1 = (rect.x + rect.width as i64).min(screenshot.width() as i64);
    let y1 = (rect.y + rect.height as i64).min(screenshot.height() as i64);
    if x1 > x0 && y1 > y0 {
        let region = imageops::crop_imm(
            &screenshot,
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        )
        .to_image();
        imageops::replace(&mut canvas, &region, x0 - rect.x, y0 - rect.y);
    }

    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Captures the visible screen as PNG bytes.
pub trait ScreenCapturer: Send + Sync {
    fn capture_visible(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Overlay that lets the user drag a rectangle.
///
/// `start` answers the request right away; the selection (or a zero
/// rectangle on cancel) arrives later on `events`.
pub trait RegionSelector: Send + Sync {
    fn start(
        &self,
        request: SelectorRequest,
        events: UnboundedSender<SelectorEvent>,
    ) -> Result<SelectorResponse, CaptureError>;
}

/// Wayland screenshot through `grim`, written to stdout.
#[derive(Debug, Default, Clone)]
pub struct GrimCapturer;

impl ScreenCapturer for GrimCapturer {
    fn capture_visible(&self) -> Result<Vec<u8>, CaptureError> {
        let output = Command::new("grim")
            .args(["-t", "png", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| CaptureError::CommandIo {
                command: "grim".to_string(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CaptureError::Platform(if stderr.is_empty() {
                format!("grim exited with status: {}", output.status)
            } else {
                stderr
            }));
        }
        Ok(output.stdout)
    }
}

/// Region selection through `slurp`. Coordinates come back in logical
/// pixels; `device_pixel_ratio` maps them onto the screenshot.
#[derive(Debug, Clone)]
pub struct SlurpSelector {
    pub device_pixel_ratio: f64,
}

impl Default for SlurpSelector {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
        }
    }
}

impl SlurpSelector {
    fn select(&self) -> Result<CropData, CaptureError> {
        let output = Command::new("slurp")
            .args(["-f", "%x,%y %wx%h"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| CaptureError::CommandIo {
                command: "slurp".to_string(),
                source,
            })?;
        // slurp exits non-zero when the user presses Escape.
        if !output.status.success() {
            tracing::debug!("Region selection cancelled");
            return Ok(CropData::cancelled());
        }
        let geometry = String::from_utf8_lossy(&output.stdout);
        let mut crop = parse_geometry(geometry.trim())?;
        crop.device_pixel_ratio = self.device_pixel_ratio;
        Ok(filter_small(crop))
    }
}

impl RegionSelector for SlurpSelector {
    fn start(
        &self,
        request: SelectorRequest,
        events: UnboundedSender<SelectorEvent>,
    ) -> Result<SelectorResponse, CaptureError> {
        let SelectorRequest::StartCrop = request;
        let selector = self.clone();
        std::thread::Builder::new()
            .name("region-selector".to_string())
            .spawn(move || {
                let crop_data = selector.select().unwrap_or_else(|e| {
                    tracing::error!("Region selection failed: {}", e);
                    CropData::cancelled()
                });
                let _ = events.send(SelectorEvent::CropComplete { crop_data });
            })
            .map_err(|source| CaptureError::CommandIo {
                command: "slurp".to_string(),
                source,
            })?;
        Ok(SelectorResponse::started())
    }
}

/// Selections at or below the minimum size count as a cancelled crop.
fn filter_small(crop: CropData) -> CropData {
    if crop.width <= MIN_SELECTION_PX || crop.height <= MIN_SELECTION_PX {
        CropData::cancelled()
    } else {
        crop
    }
}

/// Parses `"x,y wxh"`.
fn parse_geometry(geometry: &str) -> Result<CropData, CaptureError> {
    let invalid = || CaptureError::CommandFailed {
        command: "slurp".to_string(),
        message: format!("invalid region geometry: {geometry}"),
    };
    let (position, size) = geometry.split_once(' ').ok_or_else(invalid)?;
    let (x, y) = position.split_once(',').ok_or_else(invalid)?;
    let (width, height) = size.trim().split_once('x').ok_or_else(invalid)?;
    let num = |s: &str| s.trim().parse::<f64>().map_err(|_| invalid());
    Ok(CropData {
        x: num(x)?,
        y: num(y)?,
        width: num(width)?,
        height: num(height)?,
        device_pixel_ratio: 1.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn screenshot(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 10) as u8, (y * 10) as u8, 0, 255])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn decode(png: &[u8]) -> RgbaImage {
        image::load_from_memory(png).unwrap().to_rgba8()
    }

    #[test]
    fn wire_messages_match_protocol() {
        assert_eq!(
            serde_json::to_string(&SelectorRequest::StartCrop).unwrap(),
            r#"{"action":"startCrop"}"#
        );
        let response: SelectorResponse =
            serde_json::from_str(r#"{"status":"cropping_started"}"#).unwrap();
        assert!(response.is_started());

        let event: SelectorEvent = serde_json::from_str(
            r#"{"action":"cropComplete","cropData":{"x":1,"y":2,"width":3,"height":4,"devicePixelRatio":2}}"#,
        )
        .unwrap();
        let SelectorEvent::CropComplete { crop_data } = event;
        assert_eq!(crop_data.device_pixel_ratio, 2.0);
        assert_eq!(crop_data.width, 3.0);
    }

    #[test]
    fn short_ratio_key_is_accepted() {
        let crop: CropData =
            serde_json::from_str(r#"{"x":0,"y":0,"width":5,"height":5,"dpr":1.5}"#).unwrap();
        assert_eq!(crop.device_pixel_ratio, 1.5);
        let crop: CropData = serde_json::from_str(r#"{"x":0,"y":0,"width":5,"height":5}"#).unwrap();
        assert_eq!(crop.device_pixel_ratio, 1.0);
    }

    #[test]
    fn zero_or_negative_sizes_are_cancellations() {
        assert!(CropData::cancelled().is_cancelled());
        let mut crop = CropData {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: -1.0,
            device_pixel_ratio: 1.0,
        };
        assert!(crop.is_cancelled());
        crop.height = 0.4;
        assert!(crop.is_cancelled());
        crop.height = 3.0;
        assert!(!crop.is_cancelled());
    }

    #[test]
    fn physical_rect_scales_by_ratio() {
        let crop = CropData {
            x: 10.0,
            y: 5.5,
            width: 20.0,
            height: 7.3,
            device_pixel_ratio: 2.0,
        };
        assert_eq!(
            crop.physical(),
            Some(PixelRect {
                x: 20,
                y: 11,
                width: 40,
                height: 14
            })
        );
    }

    #[test]
    fn crop_copies_selected_pixels() {
        let png = screenshot(20, 20);
        let rect = PixelRect {
            x: 4,
            y: 6,
            width: 5,
            height: 3,
        };
        let out = decode(&crop_screenshot(&png, rect).unwrap());
        assert_eq!(out.dimensions(), (5, 3));
        assert_eq!(out.get_pixel(0, 0).0, [40, 60, 0, 255]);
        assert_eq!(out.get_pixel(4, 2).0, [80, 80, 0, 255]);
    }

    #[test]
    fn out_of_bounds_area_stays_transparent() {
        let png = screenshot(10, 10);
        let rect = PixelRect {
            x: 8,
            y: -2,
            width: 4,
            height: 4,
        };
        let out = decode(&crop_screenshot(&png, rect).unwrap());
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(0, 2).0, [80, 0, 0, 255]);
        assert_eq!(out.get_pixel(3, 3).0[3], 0);
    }

    #[test]
    fn corrupt_screenshot_is_rejected() {
        let rect = PixelRect {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        assert!(matches!(
            crop_screenshot(b"not a png", rect),
            Err(CaptureError::InvalidImage(_))
        ));
    }

    #[test]
    fn geometry_parsing_and_small_selection_filter() {
        let crop = parse_geometry("320,240 640x360").unwrap();
        assert_eq!((crop.x, crop.y, crop.width, crop.height), (320.0, 240.0, 640.0, 360.0));
        assert!(parse_geometry("320,240").is_err());
        assert!(parse_geometry("a,b 1x2").is_err());

        let tiny = CropData {
            width: 10.0,
            ..crop
        };
        assert!(filter_small(tiny).is_cancelled());
        assert!(!filter_small(crop).is_cancelled());
    }
}
