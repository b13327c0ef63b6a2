use image::{Rgb, RgbImage};

/// True when `angle_deg` is large enough to be worth correcting.
pub fn needs_deskew(angle_deg: f64, threshold_deg: f64) -> bool {
    angle_deg.abs() > threshold_deg
}

/// Rotate `frame` about its center so a grid detected at `angle_deg` comes
/// out axis-aligned. Bilinear sampling, borders replicate the edge pixels.
pub fn deskew(frame: &RgbImage, angle_deg: f64) -> RgbImage {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 || angle_deg == 0.0 {
        return frame.clone();
    }
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;

    RgbImage::from_fn(w, h, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        sample_bilinear(frame, sx, sy)
    })
}

fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let max_x = (w - 1) as i64;
    let max_y = (h - 1) as i64;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let clamp = |v: i64, max: i64| v.clamp(0, max) as u32;
    let (xa, xb) = (clamp(x0 as i64, max_x), clamp(x0 as i64 + 1, max_x));
    let (ya, yb) = (clamp(y0 as i64, max_y), clamp(y0 as i64 + 1, max_y));

    let p00 = img.get_pixel(xa, ya);
    let p10 = img.get_pixel(xb, ya);
    let p01 = img.get_pixel(xa, yb);
    let p11 = img.get_pixel(xb, yb);

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *slot = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
