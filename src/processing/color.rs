use image::{Rgba, RgbaImage};

/// Arithmetic mean of the RGB channels inside the rectangle, clipped to the
/// image. An empty rectangle yields black.
pub fn average_color_in(img: &RgbaImage, x: u32, y: u32, w: u32, h: u32) -> Rgba<u8> {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    let mut accum = [0u64; 3];
    let mut n = 0u64;
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            let pixel = img.get_pixel(px, py);
            for c in 0..3 {
                accum[c] += u64::from(pixel[c]);
            }
            n += 1;
        }
    }
    if n == 0 {
        return Rgba([0, 0, 0, 255]);
    }
    Rgba([
        ((accum[0] + n / 2) / n) as u8,
        ((accum[1] + n / 2) / n) as u8,
        ((accum[2] + n / 2) / n) as u8,
        255,
    ])
}

/// Composites every pixel over an opaque `background` so the result carries
/// no transparency. Fully transparent pixels become the background.
pub fn flatten_onto(img: &mut RgbaImage, background: Rgba<u8>) {
    for pixel in img.pixels_mut() {
        let alpha = u32::from(pixel[3]);
        if alpha == 255 {
            continue;
        }
        for c in 0..3 {
            let fg = u32::from(pixel[c]) * alpha;
            let bg = u32::from(background[c]) * (255 - alpha);
            pixel[c] = ((fg + bg + 127) / 255) as u8;
        }
        pixel[3] = 255;
    }
}

/// Rec. 601 luma on the 0..=255 scale.
pub fn luminance(color: Rgba<u8>) -> f32 {
    0.299 * f32::from(color[0]) + 0.587 * f32::from(color[1]) + 0.114 * f32::from(color[2])
}

/// Mean luminance of the pixels inside the rectangle, clipped to the image.
pub fn mean_luminance_in(img: &RgbaImage, x: u32, y: u32, w: u32, h: u32) -> f32 {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    let mut total = 0f64;
    let mut n = 0u64;
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            total += f64::from(luminance(*img.get_pixel(px, py)));
            n += 1;
        }
    }
    if n == 0 {
        return 0.0;
    }
    (total / n as f64) as f32
}
