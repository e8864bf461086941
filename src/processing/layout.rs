/// Where the fitted photo sits on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    pub fn right(&self) -> u32 {
        self.x_offset + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y_offset + self.height
    }
}

/// Largest size that fits inside the canvas with the source aspect ratio,
/// never larger than the source itself. The limiting dimension lands exactly
/// on the canvas edge.
pub fn fit_within(canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> (u32, u32) {
    let cw = u64::from(canvas_w.max(1));
    let ch = u64::from(canvas_h.max(1));
    let iw = u64::from(src_w.max(1));
    let ih = u64::from(src_h.max(1));

    if iw <= cw && ih <= ch {
        return (iw as u32, ih as u32);
    }

    // iw/ih >= cw/ch, compared without division.
    if iw * ch >= ih * cw {
        let h = ((ih * cw + iw / 2) / iw).clamp(1, ch);
        (cw as u32, h as u32)
    } else {
        let w = ((iw * ch + ih / 2) / ih).clamp(1, cw);
        (w as u32, ch as u32)
    }
}

pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (u32, u32) {
    let ox = outer_w.saturating_sub(inner_w) / 2;
    let oy = outer_h.saturating_sub(inner_h) / 2;
    (ox, oy)
}

pub fn place(canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> Placement {
    let (width, height) = fit_within(canvas_w, canvas_h, src_w, src_h);
    let (x_offset, y_offset) = center_offset(width, height, canvas_w, canvas_h);
    Placement {
        x_offset,
        y_offset,
        width,
        height,
    }
}
