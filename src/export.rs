//! Rasterizes the preview SVG into the PNG used for clipboard and download.

use crate::constants::{EXPORT_FILE_PREFIX, MAX_EXPORT_SIDE_PX, PNG_MIME};
use crate::settings::ImageSettings;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::error::{ParameterError, ParameterErrorKind};
use image::{DynamicImage, ImageError, ImageFormat, RgbaImage};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use resvg::tiny_skia::{Color, Pixmap, Transform};
use resvg::usvg;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{0}")]
    NotReady(String),
    #[error("invalid SVG: {0}")]
    Svg(String),
    #[error("rasterization failed: {0}")]
    Rasterize(String),
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] ImageError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The encoded export. `png` and `data_url` carry the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    pub png: Vec<u8>,
    pub data_url: String,
    pub width: u32,
    pub height: u32,
}

/// Inlines `color` on the root element and makes sure the SVG namespace is
/// declared, so `currentColor` fills survive serialization.
pub fn prepare_svg(svg: &str, color: &str) -> Result<String, ExportError> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut found_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ExportError::Svg(e.to_string()))?;
        let event = match event {
            Event::Eof => break,
            Event::Start(e) if !found_root && e.local_name().as_ref() == b"svg" => {
                found_root = true;
                Event::Start(restyle_root(&e, color)?)
            }
            Event::Empty(e) if !found_root && e.local_name().as_ref() == b"svg" => {
                found_root = true;
                Event::Empty(restyle_root(&e, color)?)
            }
            other => other,
        };
        writer
            .write_event(event)
            .map_err(|e| ExportError::Svg(e.to_string()))?;
    }

    if !found_root {
        return Err(ExportError::Svg("missing <svg> root element".to_string()));
    }
    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| ExportError::Svg(e.to_string()))
}

fn restyle_root(root: &BytesStart<'_>, color: &str) -> Result<BytesStart<'static>, ExportError> {
    let name = String::from_utf8_lossy(root.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut style = None;
    let mut has_xmlns = false;

    for attr in root.attributes() {
        let attr = attr.map_err(|e| ExportError::Svg(e.to_string()))?;
        match attr.key.as_ref() {
            b"color" => {}
            b"style" => {
                let value = attr
                    .unescape_value()
                    .map_err(|e| ExportError::Svg(e.to_string()))?;
                style = Some(value.trim().trim_end_matches(';').to_string());
            }
            key => {
                if key == b"xmlns" {
                    has_xmlns = true;
                }
                out.push_attribute(attr);
            }
        }
    }

    if !has_xmlns {
        out.push_attribute(("xmlns", SVG_NAMESPACE));
    }
    out.push_attribute(("color", color));
    let style = match style.filter(|s| !s.is_empty()) {
        Some(existing) => format!("{}; color: {}", existing, color),
        None => format!("color: {}", color),
    };
    out.push_attribute(("style", style.as_str()));
    Ok(out.into_owned())
}

/// Renders `svg` with the configured color, scale, padding and background.
///
/// The bitmap is `(w*scale + 2p) x (h*scale + 2p)`, with the image drawn
/// at `(p, p)`. A transparent export leaves the background unfilled.
pub fn render_svg(svg: &str, settings: &ImageSettings) -> Result<RenderArtifact, ExportError> {
    let settings = settings.clone().sanitized();
    let svg = prepare_svg(svg, &settings.font_rgba().to_hex())?;
    let tree = usvg::Tree::from_str(&svg, &usvg::Options::default())
        .map_err(|e| ExportError::Svg(e.to_string()))?;

    let size = tree.size();
    let scale = settings.scale as f32;
    let padding = settings.padding as f32;
    let width = (size.width() * scale + 2.0 * padding).ceil();
    let height = (size.height() * scale + 2.0 * padding).ceil();
    if !(width >= 1.0 && height >= 1.0)
        || width > MAX_EXPORT_SIDE_PX as f32
        || height > MAX_EXPORT_SIDE_PX as f32
    {
        return Err(ExportError::Rasterize(format!(
            "bitmap size {}x{} is out of range",
            width, height
        )));
    }
    let (width, height) = (width as u32, height as u32);

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| ExportError::Rasterize(format!("cannot allocate {}x{} bitmap", width, height)))?;
    if !settings.transparent {
        let bg = settings.bg_rgba();
        pixmap.fill(Color::from_rgba8(bg.r, bg.g, bg.b, bg.a));
    }
    resvg::render(
        &tree,
        Transform::from_row(scale, 0.0, 0.0, scale, padding, padding),
        &mut pixmap.as_mut(),
    );

    let png = encode_pixmap(&pixmap)?;
    let data_url = format!("data:{};base64,{}", PNG_MIME, STANDARD.encode(&png));
    tracing::debug!(width, height, bytes = png.len(), "Rendered export bitmap");
    Ok(RenderArtifact {
        png,
        data_url,
        width,
        height,
    })
}

/// Encodes a premultiplied pixmap as straight-alpha RGBA PNG.
pub(crate) fn encode_pixmap(pixmap: &Pixmap) -> Result<Vec<u8>, ImageError> {
    let mut rgba = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let c = pixel.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    let image = RgbaImage::from_raw(pixmap.width(), pixmap.height(), rgba).ok_or_else(|| {
        ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// `latex-equation-<unix millis>.png`
pub fn download_file_name(now: SystemTime) -> String {
    let millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}{}.png", EXPORT_FILE_PREFIX, millis)
}

/// Writes the artifact into `dir` under `file_name` via a temp file and
/// rename.
pub fn save_png(dir: &Path, file_name: &str, artifact: &RenderArtifact) -> Result<PathBuf, ExportError> {
    let path = dir.join(file_name);
    let io_err = |source| ExportError::Io {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let temp_path = path.with_extension("png.tmp");
    let mut file = fs::File::create(&temp_path).map_err(io_err)?;
    file.write_all(&artifact.png).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    fs::rename(&temp_path, &path).map_err(io_err)?;
    tracing::info!(path = %path.display(), "Image saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FRACTION_SVG;
    use std::time::Duration;
    use tempfile::tempdir;

    fn decode(artifact: &RenderArtifact) -> RgbaImage {
        image::load_from_memory(&artifact.png).unwrap().to_rgba8()
    }

    #[test]
    fn root_gets_color_and_namespace() {
        let out = prepare_svg(FRACTION_SVG, "#112233").unwrap();
        assert!(out.contains(r#"xmlns="http://www.w3.org/2000/svg""#));
        assert!(out.contains(r##"color="#112233""##));
        assert!(out.contains(r##"style="color: #112233""##));
        assert!(out.contains(r#"fill="currentColor""#));
    }

    #[test]
    fn existing_style_and_namespace_are_kept() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" color="red" style="vertical-align: -1ex;" width="1" height="1"/>"#;
        let out = prepare_svg(svg, "#000000").unwrap();
        assert_eq!(out.matches("xmlns=").count(), 1);
        assert!(!out.contains(r#"color="red""#));
        assert!(out.contains(r##"style="vertical-align: -1ex; color: #000000""##));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(matches!(prepare_svg("<g/>", "#000"), Err(ExportError::Svg(_))));
    }

    #[test]
    fn bitmap_is_scaled_and_padded() {
        let artifact = render_svg(FRACTION_SVG, &ImageSettings::default()).unwrap();
        assert_eq!((artifact.width, artifact.height), (60, 80));
        let img = decode(&artifact);
        assert_eq!(img.dimensions(), (60, 80));
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(30, 40).0, [0, 0, 0, 255]);
        assert!(artifact.width > 2 * 10 && artifact.height > 2 * 10);
    }

    #[test]
    fn font_color_is_applied() {
        let settings = ImageSettings {
            font_color: "#ff0000".to_string(),
            ..ImageSettings::default()
        };
        let img = decode(&render_svg(FRACTION_SVG, &settings).unwrap());
        assert_eq!(img.get_pixel(30, 40).0, [255, 0, 0, 255]);
    }

    #[test]
    fn transparent_background_keeps_alpha() {
        let settings = ImageSettings {
            padding: 20,
            scale: 1.5,
            font_color: "#111111".to_string(),
            bg_color: "#eeeeee".to_string(),
            transparent: true,
        };
        let artifact = render_svg(FRACTION_SVG, &settings).unwrap();
        assert_eq!((artifact.width, artifact.height), (70, 85));
        let img = decode(&artifact);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
        assert_eq!(img.get_pixel(35, 42).0, [17, 17, 17, 255]);
    }

    #[test]
    fn data_url_matches_png_bytes() {
        let artifact = render_svg(FRACTION_SVG, &ImageSettings::default()).unwrap();
        let encoded = artifact.data_url.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), artifact.png);
    }

    #[test]
    fn rendering_is_idempotent() {
        let settings = ImageSettings::default();
        let a = render_svg(FRACTION_SVG, &settings).unwrap();
        let b = render_svg(FRACTION_SVG, &settings).unwrap();
        assert_eq!(decode(&a), decode(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn file_name_uses_unix_millis() {
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(download_file_name(now), "latex-equation-1700000000123.png");
    }

    #[test]
    fn save_png_writes_artifact() {
        let dir = tempdir().unwrap();
        let artifact = render_svg(FRACTION_SVG, &ImageSettings::default()).unwrap();
        let path = save_png(dir.path(), "latex-equation-1.png", &artifact).unwrap();
        assert_eq!(path, dir.path().join("latex-equation-1.png"));
        assert_eq!(fs::read(&path).unwrap(), artifact.png);
        assert!(!dir.path().join("latex-equation-1.png.tmp").exists());
    }
}
