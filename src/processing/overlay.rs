use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use chrono::{Datelike, NaiveDate};
use image::{Rgba, RgbaImage};

use super::color::mean_luminance_in;
use super::layout::Placement;

const LUMINANCE_MIDPOINT: f32 = 127.5;
const DARK_TEXT: Rgba<u8> = Rgba([20, 20, 20, 255]);
const LIGHT_TEXT: Rgba<u8> = Rgba([245, 245, 245, 255]);

/// Day of month with its English ordinal suffix: 1 -> "1st", 12 -> "12th".
pub fn format_date_ordinal(day: u32) -> String {
    let suffix = match day % 100 {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{day}{suffix}")
}

/// Text drawn over a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLabels {
    /// "July 4th", or "*October 19th" (today) when showing a prior day.
    pub date: String,
    /// "14 years ago...", "Last year...".
    pub relative: String,
}

impl FrameLabels {
    pub fn new(today: NaiveDate, created: NaiveDate, used_fallback: bool, marker: &str) -> Self {
        let date = if used_fallback {
            format!("{marker}{}", month_day_label(today))
        } else {
            month_day_label(created)
        };
        Self {
            date,
            relative: years_ago_label(today.year() - created.year()),
        }
    }
}

fn month_day_label(date: NaiveDate) -> String {
    format!("{} {}", date.format("%B"), format_date_ordinal(date.day()))
}

fn years_ago_label(years: i32) -> String {
    match years {
        i32::MIN..=0 => "Earlier this year...".to_string(),
        1 => "Last year...".to_string(),
        n => format!("{n} years ago..."),
    }
}

/// Rectangle a label occupies on the canvas, in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl LabelBox {
    /// Whether the whole box lies on the photo.
    pub fn fits_inside(&self, photo: Placement) -> bool {
        self.x >= photo.x_offset
            && self.y >= photo.y_offset
            && self.x.saturating_add(self.width) <= photo.right()
            && self.y.saturating_add(self.height) <= photo.bottom()
    }

    /// The part of the box that lies on the photo (possibly empty).
    pub fn clipped_to(&self, photo: Placement) -> LabelBox {
        let x = self.x.clamp(photo.x_offset, photo.right());
        let y = self.y.clamp(photo.y_offset, photo.bottom());
        let right = self.x.saturating_add(self.width).clamp(x, photo.right());
        let bottom = self.y.saturating_add(self.height).clamp(y, photo.bottom());
        LabelBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelLayout {
    pub date: LabelBox,
    pub relative: LabelBox,
}

/// Anchors the date label to the photo's bottom-left corner and the relative
/// label to its bottom-right, inset by `margin`. When the photo is too narrow
/// for both on one line the date label moves to the top-left corner.
pub fn layout_labels(
    photo: Placement,
    date_size: (u32, u32),
    relative_size: (u32, u32),
    margin: u32,
) -> LabelLayout {
    let left = photo.x_offset.saturating_add(margin);
    let right = photo.right().saturating_sub(margin);
    let top = photo.y_offset.saturating_add(margin);
    let bottom = photo.bottom().saturating_sub(margin);

    let relative = LabelBox {
        x: right.saturating_sub(relative_size.0).max(photo.x_offset),
        y: bottom.saturating_sub(relative_size.1).max(photo.y_offset),
        width: relative_size.0,
        height: relative_size.1,
    };

    let bottom_left_fits = left.saturating_add(date_size.0).saturating_add(margin) <= relative.x;
    let date = LabelBox {
        x: left.min(photo.right()),
        y: if bottom_left_fits {
            bottom.saturating_sub(date_size.1).max(photo.y_offset)
        } else {
            top.min(photo.bottom())
        },
        width: date_size.0,
        height: date_size.1,
    };

    LabelLayout { date, relative }
}

/// Margin shrunk for small photos so the labels keep most of the room.
pub fn effective_margin(photo: Placement, margin: u32) -> u32 {
    margin.min(photo.width / 10).min(photo.height / 10)
}

/// Factor (at most 1) to apply to the font size so both labels fit inside
/// the photo, either side by side on the bottom edge or stacked in the left
/// and right corners. Sizes are measured at the unscaled font size.
pub fn label_scale_factor(
    photo: Placement,
    date_size: (u32, u32),
    relative_size: (u32, u32),
    margin: u32,
) -> f32 {
    // One pixel of slack per rounded-up measurement.
    let room = |total: u32, margins: u32, rounded: u32| {
        total.saturating_sub(margins).saturating_sub(rounded) as f32
    };
    let line_h = date_size.1.max(relative_size.1).max(1) as f32;
    let side_by_side_w = date_size.0.saturating_add(relative_size.0).max(1) as f32;
    let widest = date_size.0.max(relative_size.0).max(1) as f32;

    let side_by_side = (room(photo.width, 3 * margin, 2) / side_by_side_w)
        .min(room(photo.height, 2 * margin, 1) / line_h);
    let stacked = (room(photo.width, 2 * margin, 1) / widest)
        .min(room(photo.height, 3 * margin, 2) / (2.0 * line_h));
    side_by_side.max(stacked).min(1.0)
}

/// Dark text over bright backgrounds, light text over dark ones.
pub fn contrasting_text_color(img: &RgbaImage, area: LabelBox) -> Rgba<u8> {
    if mean_luminance_in(img, area.x, area.y, area.width, area.height) > LUMINANCE_MIDPOINT {
        DARK_TEXT
    } else {
        LIGHT_TEXT
    }
}

struct LineMetrics {
    ascent: f32,
    descent: f32,
}

fn line_metrics(font: &FontArc, scale: PxScale) -> LineMetrics {
    let scaled = font.as_scaled(scale);
    LineMetrics {
        ascent: scaled.ascent(),
        descent: scaled.descent().abs(),
    }
}

fn measure_text(text: &str, font: &FontArc, scale: PxScale) -> f32 {
    let scaled_font = font.as_scaled(scale);
    let mut width = 0.0f32;
    let mut previous = None;
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let glyph_id = scaled_font.glyph_id(ch);
        if let Some(prev) = previous {
            width += scaled_font.kern(prev, glyph_id);
        }
        width += scaled_font.h_advance(glyph_id);
        previous = Some(glyph_id);
    }
    width.max(0.0)
}

/// Pixel box a single line of `text` needs.
pub fn text_size(text: &str, font: &FontArc, scale: PxScale) -> (u32, u32) {
    let metrics = line_metrics(font, scale);
    (
        measure_text(text, font, scale).ceil() as u32,
        (metrics.ascent + metrics.descent).ceil() as u32,
    )
}

/// Draws one line of text with its top-left corner at `(left, top)`. Pixels
/// outside `clip` are left alone.
#[allow(clippy::too_many_arguments)]
pub fn draw_text(
    img: &mut RgbaImage,
    font: &FontArc,
    text: &str,
    color: Rgba<u8>,
    left: f32,
    top: f32,
    scale: PxScale,
    clip: Placement,
) {
    let scaled = font.as_scaled(scale);
    let baseline = top + scaled.ascent();
    let mut cursor_x = left;
    let mut previous = None;
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let glyph = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            cursor_x += scaled.kern(prev, glyph);
        }
        let advance = scaled.h_advance(glyph);
        let mut positioned = scaled.scaled_glyph(ch);
        positioned.position = point(cursor_x, baseline);
        if let Some(outline) = font.outline_glyph(positioned) {
            let bounds = outline.px_bounds();
            outline.draw(|x, y, coverage| {
                blend_pixel(
                    img,
                    clip,
                    bounds.min.x + x as f32,
                    bounds.min.y + y as f32,
                    color,
                    coverage,
                );
            });
        }
        cursor_x += advance;
        previous = Some(glyph);
    }
}

fn blend_pixel(
    img: &mut RgbaImage,
    clip: Placement,
    x: f32,
    y: f32,
    color: Rgba<u8>,
    coverage: f32,
) {
    if coverage <= 0.0 {
        return;
    }
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    let x_end = i64::from(clip.right().min(img.width()));
    let y_end = i64::from(clip.bottom().min(img.height()));
    if xi < i64::from(clip.x_offset) || yi < i64::from(clip.y_offset) || xi >= x_end || yi >= y_end
    {
        return;
    }
    let alpha = coverage.clamp(0.0, 1.0);
    let dst = img.get_pixel_mut(xi as u32, yi as u32);
    for c in 0..3 {
        let blended = f32::from(color[c]) * alpha + f32::from(dst[c]) * (1.0 - alpha);
        dst[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn ordinal_suffixes_for_every_day() {
        let expected = [
            "1st", "2nd", "3rd", "4th", "5th", "6th", "7th", "8th", "9th", "10th", "11th", "12th",
            "13th", "14th", "15th", "16th", "17th", "18th", "19th", "20th", "21st", "22nd", "23rd",
            "24th", "25th", "26th", "27th", "28th", "29th", "30th", "31st",
        ];
        for (day, want) in (1..=31).zip(expected) {
            assert_eq!(format_date_ordinal(day), want, "day {day}");
        }
    }

    #[test]
    fn same_day_labels() {
        let labels = FrameLabels::new(date(2024, 7, 4), date(2010, 7, 4), false, "*");
        assert_eq!(labels.date, "July 4th");
        assert_eq!(labels.relative, "14 years ago...");
    }

    #[test]
    fn fallback_labels_show_today_with_marker() {
        let labels = FrameLabels::new(date(2024, 10, 19), date(2023, 10, 16), true, "*");
        assert_eq!(labels.date, "*October 19th");
        assert_eq!(labels.relative, "Last year...");
    }

    #[test]
    fn same_year_fallback() {
        let labels = FrameLabels::new(date(2024, 3, 2), date(2024, 2, 28), true, "*");
        assert_eq!(labels.relative, "Earlier this year...");
    }

    #[test]
    fn labels_stay_inside_photo() {
        let photo = Placement {
            x_offset: 220,
            y_offset: 0,
            width: 360,
            height: 480,
        };
        let layout = layout_labels(photo, (100, 30), (120, 30), 10);
        assert_eq!(layout.date, LabelBox { x: 230, y: 440, width: 100, height: 30 });
        assert_eq!(layout.relative, LabelBox { x: 450, y: 440, width: 120, height: 30 });
    }

    #[test]
    fn narrow_photo_moves_date_label_to_top() {
        let photo = Placement {
            x_offset: 300,
            y_offset: 40,
            width: 200,
            height: 400,
        };
        let layout = layout_labels(photo, (120, 30), (120, 30), 10);
        assert_eq!(layout.date.x, 310);
        assert_eq!(layout.date.y, 50);
        assert_eq!(layout.relative.y, 400);
    }

    #[test]
    fn labels_shrink_to_fit_a_small_photo() {
        let photo = Placement {
            x_offset: 340,
            y_offset: 210,
            width: 120,
            height: 60,
        };
        let margin = effective_margin(photo, 16);
        assert_eq!(margin, 6);
        let factor = label_scale_factor(photo, (125, 38), (230, 38), margin);
        assert!(factor < 1.0);
        let date = ((125.0 * factor).ceil() as u32, (38.0 * factor).ceil() as u32);
        let relative = ((230.0 * factor).ceil() as u32, (38.0 * factor).ceil() as u32);
        let layout = layout_labels(photo, date, relative, margin);
        assert!(layout.date.fits_inside(photo), "{layout:?}");
        assert!(layout.relative.fits_inside(photo), "{layout:?}");
    }

    #[test]
    fn roomy_photo_keeps_the_configured_size() {
        let photo = Placement {
            x_offset: 0,
            y_offset: 0,
            width: 800,
            height: 480,
        };
        assert_eq!(label_scale_factor(photo, (125, 38), (230, 38), 16), 1.0);
    }

    #[test]
    fn label_box_clipping() {
        let photo = Placement {
            x_offset: 10,
            y_offset: 10,
            width: 20,
            height: 20,
        };
        let spilling = LabelBox { x: 20, y: 25, width: 30, height: 10 };
        assert!(!spilling.fits_inside(photo));
        assert_eq!(
            spilling.clipped_to(photo),
            LabelBox { x: 20, y: 25, width: 10, height: 5 }
        );
        let inside = LabelBox { x: 12, y: 12, width: 5, height: 5 };
        assert!(inside.fits_inside(photo));
        assert_eq!(inside.clipped_to(photo), inside);
    }

    #[test]
    fn text_color_contrasts_with_background() {
        let mut img = RgbaImage::from_pixel(100, 50, Rgba([250, 250, 250, 255]));
        for y in 0..50 {
            for x in 50..100 {
                img.put_pixel(x, y, Rgba([10, 10, 30, 255]));
            }
        }
        let bright = LabelBox { x: 0, y: 0, width: 50, height: 50 };
        let dark = LabelBox { x: 50, y: 0, width: 50, height: 50 };
        assert_eq!(contrasting_text_color(&img, bright), DARK_TEXT);
        assert_eq!(contrasting_text_color(&img, dark), LIGHT_TEXT);
    }
}
