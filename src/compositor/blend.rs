use image::{imageops, RgbaImage};

pub type StraightRgba8 = [u8; 4];

/// Porter-Duff "over" on straight (un-premultiplied) alpha.
pub fn over(dst: StraightRgba8, src: StraightRgba8) -> StraightRgba8 {
    let sa = u32::from(src[3]);
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }

    let da = u32::from(dst[3]);
    // Scaled by 255 * 255.
    let dst_weight = da * (255 - sa);
    let out_a = sa * 255 + dst_weight;

    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = u32::from(src[i]) * sa * 255 + u32::from(dst[i]) * dst_weight;
        out[i] = ((c + out_a / 2) / out_a) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    out
}

/// Blend `src` over `dst` pixel by pixel. Both must have the same dimensions.
pub fn over_in_place(dst: &mut RgbaImage, src: &RgbaImage) {
    debug_assert_eq!(dst.dimensions(), src.dimensions());
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out);
    }
}

/// Scale `src` so it covers `width`×`height`, cropping the overflow evenly.
pub fn cover(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = src.dimensions();
    if (sw, sh) == (width, height) {
        return src.clone();
    }

    let scale = (f64::from(width) / f64::from(sw)).max(f64::from(height) / f64::from(sh));
    let scaled_w = ((f64::from(sw) * scale).ceil() as u32).max(width);
    let scaled_h = ((f64::from(sh) * scale).ceil() as u32).max(height);
    let scaled = imageops::resize(src, scaled_w, scaled_h, imageops::FilterType::Triangle);

    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn transparent_src_is_noop() {
        let dst = [10, 20, 30, 255];
        assert_eq!(over(dst, [255, 0, 0, 0]), dst);
    }

    #[test]
    fn opaque_src_replaces_dst() {
        assert_eq!(over([10, 20, 30, 255], [1, 2, 3, 255]), [1, 2, 3, 255]);
    }

    #[test]
    fn half_alpha_over_opaque_mixes_evenly() {
        let out = over([0, 0, 0, 255], [255, 255, 255, 128]);
        assert_eq!(out[3], 255);
        assert!((127..=129).contains(&out[0]), "{out:?}");
    }

    #[test]
    fn over_transparent_dst_keeps_src_color() {
        let out = over([0, 0, 0, 0], [200, 100, 50, 100]);
        assert_eq!(out, [200, 100, 50, 100]);
    }

    #[test]
    fn cover_fills_target_exactly() {
        let src = RgbaImage::from_pixel(16, 9, Rgba([1, 2, 3, 255]));
        let out = cover(&src, 8, 8);
        assert_eq!(out.dimensions(), (8, 8));
        let out = cover(&src, 64, 20);
        assert_eq!(out.dimensions(), (64, 20));
    }
}
