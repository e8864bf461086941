use ab_glyph::{FontArc, PxScale};
use chrono::NaiveDate;
use image::{Rgba, RgbaImage, imageops};
use tracing::{debug, warn};

use super::color::{average_color_in, flatten_onto};
use super::decode::{decode_rgba8_apply_exif, resize_rgba};
use super::font::load_font;
use super::layout::{Placement, place};
use super::overlay::{
    FrameLabels, contrasting_text_color, draw_text, effective_margin, label_scale_factor,
    layout_labels, text_size,
};
use crate::config::OverlayOptions;
use crate::error::FrameError;

const CANVAS_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
/// Labels smaller than this are unreadable on the panel and are not drawn.
const MIN_LABEL_PX: f32 = 8.0;

/// A canvas-sized frame plus where the photo landed on it.
#[derive(Debug, Clone)]
pub struct ComposedFrame {
    pub image: RgbaImage,
    pub placement: Placement,
}

/// Turns downloaded bytes into a finished frame: fit, letterbox, then labels.
#[derive(Clone)]
pub struct Composer {
    options: OverlayOptions,
    font: Option<FontArc>,
}

impl Composer {
    pub fn new(options: OverlayOptions) -> Self {
        Self {
            options,
            font: None,
        }
    }

    /// Uses an already loaded font instead of resolving one from the system.
    pub fn with_font(options: OverlayOptions, font: FontArc) -> Self {
        Self {
            options,
            font: Some(font),
        }
    }

    pub fn options(&self) -> &OverlayOptions {
        &self.options
    }

    /// Decodes, shrinks to fit `target` (never enlarging), centers the photo
    /// and paints each letterbox band with the mean color of the adjacent edge.
    pub fn compose(&self, raw: &[u8], target: (u32, u32)) -> Result<ComposedFrame, FrameError> {
        let (canvas_w, canvas_h) = target;
        if canvas_w == 0 || canvas_h == 0 {
            return Err(FrameError::ComposeFailed(
                "target resolution must be positive".to_string(),
            ));
        }
        let mut source = decode_rgba8_apply_exif(raw)
            .map_err(|err| FrameError::ComposeFailed(format!("{err:#}")))?;
        flatten_onto(&mut source, CANVAS_BACKGROUND);
        let placement = place(canvas_w, canvas_h, source.width(), source.height());
        let fitted = resize_rgba(&source, placement.width, placement.height)
            .map_err(|err| FrameError::ComposeFailed(format!("{err:#}")))?;

        let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, CANVAS_BACKGROUND);
        fill_letterbox(&mut canvas, &fitted, placement, self.options.edge_sample_px);
        imageops::replace(
            &mut canvas,
            &fitted,
            i64::from(placement.x_offset),
            i64::from(placement.y_offset),
        );
        debug!(
            source_w = source.width(),
            source_h = source.height(),
            fitted_w = placement.width,
            fitted_h = placement.height,
            "composed frame"
        );
        Ok(ComposedFrame {
            image: canvas,
            placement,
        })
    }

    /// Draws the date and "years ago" labels inside the photo's rectangle,
    /// shrinking the font when the photo is too small for the configured size.
    pub fn overlay(
        &mut self,
        mut frame: ComposedFrame,
        today: NaiveDate,
        created: NaiveDate,
        used_fallback: bool,
    ) -> Result<ComposedFrame, FrameError> {
        if !self.options.enabled {
            return Ok(frame);
        }
        let labels = FrameLabels::new(today, created, used_fallback, &self.options.fallback_marker);
        let font = self.font()?.clone();
        let photo = frame.placement;
        let margin = effective_margin(photo, self.options.margin_px);

        let configured = PxScale::from(self.options.font_size_px);
        let factor = label_scale_factor(
            photo,
            text_size(&labels.date, &font, configured),
            text_size(&labels.relative, &font, configured),
            margin,
        );
        let font_px = self.options.font_size_px * factor;
        if font_px < MIN_LABEL_PX {
            debug!(font_px, width = photo.width, height = photo.height, "photo too small for labels");
            return Ok(frame);
        }
        let scale = PxScale::from(font_px);

        let date_size = text_size(&labels.date, &font, scale);
        let relative_size = text_size(&labels.relative, &font, scale);
        let layout = layout_labels(photo, date_size, relative_size, margin);

        // Sample both colors before drawing so the first label cannot skew the second.
        let placed: Vec<_> = [(&labels.date, layout.date), (&labels.relative, layout.relative)]
            .into_iter()
            .filter(|(text, area)| {
                let fits = area.fits_inside(photo);
                if !fits {
                    debug!(label = %text, "label does not fit on the photo; skipped");
                }
                fits
            })
            .map(|(text, area)| {
                let color = contrasting_text_color(&frame.image, area.clipped_to(photo));
                (text, area, color)
            })
            .collect();
        for (text, area, color) in placed {
            draw_text(
                &mut frame.image,
                &font,
                text,
                color,
                area.x as f32,
                area.y as f32,
                scale,
                photo,
            );
        }
        Ok(frame)
    }

    fn font(&mut self) -> Result<&FontArc, FrameError> {
        if self.font.is_none() {
            let loaded = load_font(
                self.options.font_path.as_deref(),
                self.options.font_family.as_deref(),
            )
            .map_err(|err| {
                warn!(error = %format!("{err:#}"), "overlay font unavailable");
                FrameError::ComposeFailed(format!("{err:#}"))
            })?;
            self.font = Some(loaded);
        }
        self.font
            .as_ref()
            .ok_or_else(|| FrameError::ComposeFailed("overlay font missing".to_string()))
    }
}

/// Fills the bands around `placement` with the average color of a strip of at
/// most `sample_px` pixels along the matching edge of `fitted`.
pub fn fill_letterbox(canvas: &mut RgbaImage, fitted: &RgbaImage, placement: Placement, sample_px: u32) {
    let (fw, fh) = fitted.dimensions();
    let (cw, ch) = canvas.dimensions();
    let strip = sample_px.clamp(1, 10);

    if placement.y_offset > 0 || placement.bottom() < ch {
        let top = average_color_in(fitted, 0, 0, fw, strip.min(fh));
        let bottom = average_color_in(fitted, 0, fh.saturating_sub(strip), fw, strip.min(fh));
        fill_rect(canvas, 0, 0, cw, placement.y_offset, top);
        fill_rect(canvas, 0, placement.bottom(), cw, ch.saturating_sub(placement.bottom()), bottom);
    }
    if placement.x_offset > 0 || placement.right() < cw {
        let left = average_color_in(fitted, 0, 0, strip.min(fw), fh);
        let right = average_color_in(fitted, fw.saturating_sub(strip), 0, strip.min(fw), fh);
        fill_rect(canvas, 0, 0, placement.x_offset, ch, left);
        fill_rect(canvas, placement.right(), 0, cw.saturating_sub(placement.right()), ch, right);
    }
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}
