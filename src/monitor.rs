//! Monitor calibration profiles.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::gamma::Gamma;

/// Physical description of a display, used for unit conversion and gamma correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub name: String,
    /// Width of the visible screen area in centimetres.
    pub width_cm: Option<f64>,
    /// Distance between the observer's eyes and the screen in centimetres.
    pub distance_cm: Option<f64>,
    /// Native resolution in pixels.
    pub size_pix: Option<(u32, u32)>,
    /// Measured display gamma. `None` leaves the display's own table alone.
    pub gamma: Option<Gamma>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new("__blank__")
    }
}

impl Monitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width_cm: None,
            distance_cm: None,
            size_pix: None,
            gamma: None,
        }
    }

    pub fn with_width_cm(mut self, width_cm: f64) -> Self {
        self.width_cm = Some(width_cm);
        self
    }

    pub fn with_distance_cm(mut self, distance_cm: f64) -> Self {
        self.distance_cm = Some(distance_cm);
        self
    }

    pub fn with_size_pix(mut self, width: u32, height: u32) -> Self {
        self.size_pix = Some((width, height));
        self
    }

    pub fn with_gamma(mut self, gamma: impl Into<Gamma>) -> Self {
        self.gamma = Some(gamma.into());
        self
    }

    /// Load a profile saved with [`Monitor::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Degrees of visual angle per centimetre on screen (small-angle approximation).
    pub fn cm_per_deg(&self) -> Option<f64> {
        self.distance_cm.map(|d| d * 0.017455)
    }

    /// Pixels per centimetre along the horizontal axis.
    pub fn pix_per_cm(&self) -> Option<f64> {
        match (self.size_pix, self.width_cm) {
            (Some((w, _)), Some(cm)) if cm > 0.0 => Some(w as f64 / cm),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_factors_need_calibration() {
        let blank = Monitor::default();
        assert!(blank.cm_per_deg().is_none());
        assert!(blank.pix_per_cm().is_none());

        let mon = Monitor::new("testMonitor")
            .with_width_cm(40.0)
            .with_distance_cm(57.0)
            .with_size_pix(1024, 768);
        assert!((mon.cm_per_deg().unwrap() - 0.994935).abs() < 1e-6);
        assert!((mon.pix_per_cm().unwrap() - 25.6).abs() < 1e-12);
    }

    #[test]
    fn profiles_survive_a_save_and_load() {
        let path = std::env::temp_dir().join(format!("psywin-monitor-{}.json", std::process::id()));
        let mon = Monitor::new("lab").with_width_cm(52.0).with_gamma([2.1, 2.2, 2.3]);
        mon.save(&path).unwrap();
        let loaded = Monitor::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, mon);
    }
}
