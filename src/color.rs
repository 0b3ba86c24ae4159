//! Color helpers shared by every keying backend.
//!
//! Distance from the key color is measured in a U/V-style chroma plane so
//! that brightness changes across a lit green screen do not affect the key.

/// Normalized RGB color, each channel nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Build from 8-bit channel values.
    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: f32::from(r) / 255.0,
            g: f32::from(g) / 255.0,
            b: f32::from(b) / 255.0,
        }
    }

    /// Parse `#RRGGBB` (case-insensitive). Anything else is `None`.
    pub fn parse_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::from_u8(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", q(self.r), q(self.g), q(self.b))
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

/// Convert a `#RRGGBB` string to normalized RGB. Malformed input maps to black.
pub fn hex_color_to_rgb(hex: &str) -> Rgb {
    Rgb::parse_hex(hex).unwrap_or(Rgb::BLACK)
}

/// Project a color onto the chroma plane, returning `(u, v)`.
pub fn to_chroma_plane(rgb: Rgb) -> (f32, f32) {
    let u = -0.169 * rgb.r - 0.331 * rgb.g + 0.5 * rgb.b + 0.5;
    let v = 0.5 * rgb.r - 0.419 * rgb.g - 0.081 * rgb.b + 0.5;
    (u, v)
}

/// Euclidean distance between two colors in the chroma plane.
pub fn chroma_distance(a: Rgb, b: Rgb) -> f32 {
    let (au, av) = to_chroma_plane(a);
    let (bu, bv) = to_chroma_plane(b);
    (au - bu).hypot(av - bv)
}

/// Rec. 709 luma, clamped to `[0, 1]`.
pub fn luma(rgb: Rgb) -> f32 {
    (0.2126 * rgb.r + 0.7152 * rgb.g + 0.0722 * rgb.b).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn hex_parses_to_normalized_channels() {
        let c = hex_color_to_rgb("#11ff05");
        assert!(close(c.r, 17.0 / 255.0));
        assert!(close(c.g, 1.0));
        assert!(close(c.b, 5.0 / 255.0));

        assert_eq!(hex_color_to_rgb("#11FF05"), c);
    }

    #[test]
    fn malformed_hex_is_black() {
        for bad in ["blue", "#11ff0", "11ff05", "#11ff05ff", "#gg0000", ""] {
            assert_eq!(hex_color_to_rgb(bad), Rgb::BLACK, "{bad}");
        }
    }

    #[test]
    fn hex_survives_formatting() {
        assert_eq!(hex_color_to_rgb("#11ff05").to_hex(), "#11ff05");
    }

    #[test]
    fn gray_sits_at_plane_center() {
        let (u, v) = to_chroma_plane(Rgb::new(0.5, 0.5, 0.5));
        assert!(close(u, 0.5));
        assert!(close(v, 0.5));
    }

    #[test]
    fn distance_ignores_luminance_for_neutrals() {
        let d = chroma_distance(Rgb::new(0.1, 0.1, 0.1), Rgb::new(0.9, 0.9, 0.9));
        assert!(d < 1e-5);
    }

    #[test]
    fn distance_to_self_is_zero() {
        let key = hex_color_to_rgb("#11ff05");
        assert_eq!(chroma_distance(key, key), 0.0);
    }

    #[test]
    fn luma_is_clamped() {
        assert!(close(luma(Rgb::new(1.0, 1.0, 1.0)), 1.0));
        assert_eq!(luma(Rgb::new(2.0, 2.0, 2.0)), 1.0);
        assert_eq!(luma(Rgb::new(-1.0, 0.0, 0.0)), 0.0);
    }
}
