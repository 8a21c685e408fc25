//! Colours and the colour spaces a window colour can be given in.

use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::errors::{PsywinError, Result};

/// How the numbers of a [`ColorValue`] are to be read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    /// Signed RGB, -1 is black and 1 is full intensity.
    #[default]
    Rgb,
    /// RGB in 0..1.
    Rgb1,
    /// RGB in 0..255.
    Rgb255,
    /// Hue in degrees, saturation and value in 0..1.
    Hsv,
    /// `#rrggbb` strings.
    Hex,
    /// CSS colour names.
    Named,
}

/// A colour as the user wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorValue {
    Scalar(f64),
    Triplet([f64; 3]),
    Quad([f64; 4]),
    Text(String),
}

impl From<f64> for ColorValue {
    fn from(v: f64) -> Self {
        ColorValue::Scalar(v)
    }
}

impl From<[f64; 3]> for ColorValue {
    fn from(v: [f64; 3]) -> Self {
        ColorValue::Triplet(v)
    }
}

impl From<(f64, f64, f64)> for ColorValue {
    fn from((r, g, b): (f64, f64, f64)) -> Self {
        ColorValue::Triplet([r, g, b])
    }
}

impl From<[f64; 4]> for ColorValue {
    fn from(v: [f64; 4]) -> Self {
        ColorValue::Quad(v)
    }
}

impl From<&str> for ColorValue {
    fn from(v: &str) -> Self {
        ColorValue::Text(v.to_string())
    }
}

impl From<String> for ColorValue {
    fn from(v: String) -> Self {
        ColorValue::Text(v)
    }
}

impl Default for ColorValue {
    fn default() -> Self {
        ColorValue::Triplet([0.0, 0.0, 0.0])
    }
}

/// A resolved RGBA colour with components in 0..1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    rgba: [f64; 4],
}

impl Default for Color {
    /// Mid grey, i.e. `(0, 0, 0)` in signed RGB.
    fn default() -> Self {
        Self::from_rgb1(0.5, 0.5, 0.5)
    }
}

impl Color {
    pub fn from_rgb1(r: f64, g: f64, b: f64) -> Self {
        Self {
            rgba: [r, g, b, 1.0],
        }
    }

    pub fn with_alpha(mut self, a: f64) -> Self {
        self.rgba[3] = a;
        self
    }

    /// Resolve a user-supplied value. Strings are always parsed as hex codes or CSS
    /// names, whatever `space` says.
    pub fn parse(value: &ColorValue, space: ColorSpace) -> Result<Self> {
        let from_triplet = |[a, b, c]: [f64; 3]| -> Result<Color> {
            match space {
                ColorSpace::Rgb => Ok(Color::from_rgb1((a + 1.0) / 2.0, (b + 1.0) / 2.0, (c + 1.0) / 2.0)),
                ColorSpace::Rgb1 => Ok(Color::from_rgb1(a, b, c)),
                ColorSpace::Rgb255 => Ok(Color::from_rgb1(a / 255.0, b / 255.0, c / 255.0)),
                ColorSpace::Hsv => {
                    let rgb = Srgb::from_color(Hsv::<palette::encoding::Srgb, f64>::new(a, b, c));
                    Ok(Color::from_rgb1(rgb.red, rgb.green, rgb.blue))
                }
                ColorSpace::Hex | ColorSpace::Named => Err(PsywinError::InvalidOptionError(
                    format!("numeric colour {:?} given for colour space `{}`", [a, b, c], space),
                )),
            }
        };

        let color = match value {
            ColorValue::Scalar(v) => from_triplet([*v, *v, *v])?,
            ColorValue::Triplet(rgb) => from_triplet(*rgb)?,
            ColorValue::Quad([a, b, c, alpha]) => from_triplet([*a, *b, *c])?.with_alpha(*alpha),
            ColorValue::Text(text) => {
                let parsed = csscolorparser::parse(text.trim()).map_err(|e| {
                    PsywinError::InvalidOptionError(format!("invalid colour {text:?}: {e}"))
                })?;
                Color {
                    rgba: [
                        parsed.r as f64,
                        parsed.g as f64,
                        parsed.b as f64,
                        parsed.a as f64,
                    ],
                }
            }
        };

        if color.rgba.iter().any(|v| !v.is_finite()) {
            return Err(PsywinError::InvalidOptionError(format!(
                "colour {value:?} is not finite"
            )));
        }
        Ok(color)
    }

    /// Components in 0..1.
    pub fn rgba1(&self) -> [f64; 4] {
        self.rgba
    }

    /// Components in signed RGB, -1..1.
    pub fn rgb(&self) -> [f64; 3] {
        [
            self.rgba[0] * 2.0 - 1.0,
            self.rgba[1] * 2.0 - 1.0,
            self.rgba[2] * 2.0 - 1.0,
        ]
    }

    /// Clamped to the displayable range.
    pub fn clamped_rgba1(&self) -> [f64; 4] {
        self.rgba.map(|v| v.clamp(0.0, 1.0))
    }
}

impl From<Color> for wgpu::Color {
    fn from(color: Color) -> Self {
        let [r, g, b, a] = color.clamped_rgba1();
        wgpu::Color { r, g, b, a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f64; 4], b: [f64; 4]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn numeric_spaces() {
        let grey = Color::parse(&[0.0, 0.0, 0.0].into(), ColorSpace::Rgb).unwrap();
        assert!(close(grey.rgba1(), [0.5, 0.5, 0.5, 1.0]));
        assert_eq!(grey, Color::default());

        let white = Color::parse(&1.0.into(), ColorSpace::Rgb).unwrap();
        assert!(close(white.rgba1(), [1.0, 1.0, 1.0, 1.0]));

        let red = Color::parse(&[255.0, 0.0, 0.0].into(), ColorSpace::Rgb255).unwrap();
        assert!(close(red.rgba1(), [1.0, 0.0, 0.0, 1.0]));

        let green = Color::parse(&[120.0, 1.0, 1.0].into(), ColorSpace::Hsv).unwrap();
        assert!(close(green.rgba1(), [0.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn strings_are_hex_or_names() {
        let red = Color::parse(&"#ff0000".into(), ColorSpace::Hex).unwrap();
        assert!(close(red.rgba1(), [1.0, 0.0, 0.0, 1.0]));
        let navy = Color::parse(&"navy".into(), ColorSpace::Rgb).unwrap();
        assert!(close(navy.rgba1(), [0.0, 0.0, 128.0 / 255.0, 1.0]));
        assert!(Color::parse(&"not a colour".into(), ColorSpace::Named).is_err());
    }

    #[test]
    fn numbers_in_string_spaces_are_rejected() {
        assert!(Color::parse(&[1.0, 0.0, 0.0].into(), ColorSpace::Hex).is_err());
        assert!(Color::parse(&f64::NAN.into(), ColorSpace::Rgb).is_err());
    }

    #[test]
    fn signed_rgb_round_trip() {
        let c = Color::parse(&[-1.0, 0.5, 1.0].into(), ColorSpace::Rgb).unwrap();
        let rgb = c.rgb();
        assert!((rgb[0] + 1.0).abs() < 1e-12);
        assert!((rgb[1] - 0.5).abs() < 1e-12);
        let wgpu_color: wgpu::Color = c.into();
        assert_eq!(wgpu_color.r, 0.0);
    }
}
