//! Coordinate units and the view transform.

use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::errors::{PsywinError, Result};
use crate::monitor::Monitor;

/// Coordinate systems stimuli can be specified in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Normalised device coordinates, -1..1 on both axes.
    #[default]
    Norm,
    /// Fractions of the window height.
    Height,
    #[strum(to_string = "pix", serialize = "pixels")]
    #[serde(alias = "pixels")]
    Pix,
    Cm,
    #[strum(to_string = "deg", serialize = "degs")]
    #[serde(alias = "degs")]
    Deg,
}

/// Per-axis factors converting a coordinate in `units` to normalised device coordinates.
///
/// `cm` and `deg` need the monitor's physical width; `deg` also needs its viewing
/// distance. The monitor's pixel width defaults to the window width.
pub fn units_scale(units: Units, size: (u32, u32), monitor: Option<&Monitor>) -> Result<[f64; 2]> {
    let (w, h) = (size.0.max(1) as f64, size.1.max(1) as f64);
    let pix_to_norm = [2.0 / w, 2.0 / h];
    let pix_per_cm = || -> Result<f64> {
        let monitor = monitor.ok_or_else(|| missing("a monitor profile"))?;
        let width_cm = monitor
            .width_cm
            .filter(|cm| *cm > 0.0)
            .ok_or_else(|| missing("the monitor width in cm"))?;
        let width_pix = monitor.size_pix.map(|(pw, _)| pw as f64).unwrap_or(w);
        Ok(width_pix / width_cm)
    };
    Ok(match units {
        Units::Norm => [1.0, 1.0],
        Units::Height => [2.0 * h / w, 2.0],
        Units::Pix => pix_to_norm,
        Units::Cm => {
            let k = pix_per_cm()?;
            [pix_to_norm[0] * k, pix_to_norm[1] * k]
        }
        Units::Deg => {
            let k = pix_per_cm()?;
            let cm_per_deg = monitor
                .and_then(Monitor::cm_per_deg)
                .ok_or_else(|| missing("the viewing distance in cm"))?;
            [pix_to_norm[0] * k * cm_per_deg, pix_to_norm[1] * k * cm_per_deg]
        }
    })
}

fn missing(what: &str) -> PsywinError {
    PsywinError::InvalidOptionError(format!(
        "these units need {what}; provide it in the window's monitor profile"
    ))
}

/// View transform: scale, then translate by `pos` (already in normalised coordinates),
/// then rotate clockwise by `ori_deg`.
pub fn view_matrix(scale: Option<(f64, f64)>, pos_norm: Option<(f64, f64)>, ori_deg: f64) -> Matrix4<f32> {
    let mut m = Matrix4::<f32>::identity();
    if let Some((sx, sy)) = scale {
        m *= Matrix4::new_nonuniform_scaling(&Vector3::new(sx as f32, sy as f32, 1.0));
    }
    if let Some((x, y)) = pos_norm {
        m *= Matrix4::new_translation(&Vector3::new(x as f32, y as f32, 0.0));
    }
    if ori_deg != 0.0 {
        m *= Matrix4::from_axis_angle(&Vector3::z_axis(), -(ori_deg as f32).to_radians());
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn simple_units() {
        assert_eq!(units_scale(Units::Norm, (800, 600), None).unwrap(), [1.0, 1.0]);
        assert_eq!(
            units_scale(Units::Pix, (800, 600), None).unwrap(),
            [2.0 / 800.0, 2.0 / 600.0]
        );
        let height = units_scale(Units::Height, (800, 600), None).unwrap();
        assert!((height[0] - 1.5).abs() < 1e-12);
        assert_eq!(height[1], 2.0);
    }

    #[test]
    fn physical_units_need_a_calibrated_monitor() {
        assert!(units_scale(Units::Cm, (800, 600), None).is_err());
        let no_distance = Monitor::new("m").with_width_cm(40.0);
        assert!(units_scale(Units::Cm, (800, 600), Some(&no_distance)).is_ok());
        assert!(units_scale(Units::Deg, (800, 600), Some(&no_distance)).is_err());

        let mon = Monitor::new("m")
            .with_width_cm(40.0)
            .with_distance_cm(57.0)
            .with_size_pix(800, 600);
        let cm = units_scale(Units::Cm, (800, 600), Some(&mon)).unwrap();
        // 1 cm = 20 px = 0.05 norm units horizontally
        assert!((cm[0] - 0.05).abs() < 1e-12);
        let deg = units_scale(Units::Deg, (800, 600), Some(&mon)).unwrap();
        assert!((deg[0] - 0.05 * 57.0 * 0.017455).abs() < 1e-12);
    }

    #[test]
    fn unit_names() {
        assert_eq!(Units::from_str("pixels").unwrap(), Units::Pix);
        assert_eq!(Units::from_str("degs").unwrap(), Units::Deg);
        assert_eq!(Units::Height.to_string(), "height");
    }

    #[test]
    fn view_matrix_composes_scale_and_translation() {
        let m = view_matrix(Some((2.0, 2.0)), Some((0.5, 0.0)), 0.0);
        let p = m.transform_point(&nalgebra::Point3::new(0.0, 0.0, 0.0));
        assert!((p.x - 1.0).abs() < 1e-6);

        let r = view_matrix(None, None, 90.0);
        let q = r.transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        // clockwise: +x goes to -y
        assert!((q.y + 1.0).abs() < 1e-6);
        assert_eq!(view_matrix(None, None, 0.0), Matrix4::identity());
    }
}
