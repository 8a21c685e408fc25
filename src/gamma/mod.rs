// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gamma lookup tables: construction, driver quirks and the error policy.
//!
//! A [`GammaRamp`] always holds three channels of equal length with values in `0..=1`.
//! Which flavour of "linear" a display expects depends on the OS and GPU driver, see
//! [`RampType`]. Reading and writing the tables of real displays lives in [`hardware`].

pub mod hardware;

use std::cmp::Ordering;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

use crate::errors::{PsywinError, Result};

/// Ramp size used when a driver reports none.
pub const DEFAULT_RAMP_SIZE: usize = 256;

/// Requested display gamma, either one value for all channels or one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Gamma {
    Uniform(f64),
    Rgb([f64; 3]),
}

impl Gamma {
    pub fn per_channel(&self) -> [f64; 3] {
        match *self {
            Gamma::Uniform(g) => [g, g, g],
            Gamma::Rgb(rgb) => rgb,
        }
    }
}

impl From<f64> for Gamma {
    fn from(g: f64) -> Self {
        Gamma::Uniform(g)
    }
}

impl From<[f64; 3]> for Gamma {
    fn from(rgb: [f64; 3]) -> Self {
        Gamma::Rgb(rgb)
    }
}

impl From<(f64, f64, f64)> for Gamma {
    fn from((r, g, b): (f64, f64, f64)) -> Self {
        Gamma::Rgb([r, g, b])
    }
}

/// Driver-specific shapes of an identity ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RampType {
    /// `0..=1` over the display's ramp size.
    Plain = 0,
    /// `1/256..=1` over 256 entries (older ATI drivers on macOS).
    Offset256 = 1,
    /// `0..=1023/1024` over 1024 entries (10-bit NVIDIA tables on macOS).
    TenBit = 2,
    /// Like `TenBit`, with 1/256 subtracted from the upper half.
    TenBitCorrected = 3,
}

/// The host operating system family, as far as gamma handling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostOs::Windows
        } else if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else if cfg!(target_os = "linux") {
            HostOs::Linux
        } else {
            HostOs::Other
        }
    }
}

impl RampType {
    /// Pick the ramp type from the OS, its version string and the GPU driver description.
    pub fn detect(os: HostOs, os_version: Option<&str>, driver: Option<&str>) -> Self {
        match (os, driver) {
            (HostOs::MacOs, Some(driver)) if driver.contains("NVIDIA") => {
                let version = os_version.map(parse_version).unwrap_or_default();
                let leopard = [10, 5];
                let snow_leopard = [10, 6];
                if compare_versions(&version, &leopard) == Ordering::Greater
                    && compare_versions(&version, &snow_leopard) == Ordering::Less
                {
                    RampType::TenBit
                } else if compare_versions(&version, &snow_leopard) == Ordering::Greater {
                    RampType::TenBitCorrected
                } else {
                    RampType::Offset256
                }
            }
            (HostOs::MacOs, _) => RampType::Offset256,
            _ => RampType::Plain,
        }
    }

    /// Like [`RampType::detect`], for the machine we are running on.
    pub fn for_current_system(driver: Option<&str>) -> Self {
        let version = current_os_version();
        Self::detect(HostOs::current(), version.as_deref(), driver)
    }
}

#[cfg(target_os = "macos")]
fn current_os_version() -> Option<String> {
    let output = std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(not(target_os = "macos"))]
fn current_os_version() -> Option<String> {
    None
}

fn parse_version(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

// numeric, with missing components treated as zero ("10.6" == "10.6.0")
fn compare_versions(a: &[u32], b: &[u32]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// One channel of an identity ramp. `ramp_size` only applies to [`RampType::Plain`],
/// the other types have a fixed length.
pub fn create_linear_ramp(ramp_size: usize, ramp_type: RampType) -> Vec<f64> {
    match ramp_type {
        RampType::Plain => linspace(0.0, 1.0, ramp_size),
        RampType::Offset256 => linspace(1.0 / 256.0, 1.0, 256),
        RampType::TenBit => linspace(0.0, 1023.0 / 1024.0, 1024),
        RampType::TenBitCorrected => {
            let mut ramp = linspace(0.0, 1023.0 / 1024.0, 1024);
            for v in ramp[512..].iter_mut() {
                *v -= 1.0 / 256.0;
            }
            ramp
        }
    }
}

/// Replace a reported ramp size of zero with the default.
pub fn sanitize_ramp_size(size: usize) -> usize {
    if size == 0 {
        log::warn!(
            "The size of the gamma ramp was reported as 0. This can mean that gamma settings \
             have no effect. Proceeding with a default gamma ramp size of {}.",
            DEFAULT_RAMP_SIZE
        );
        DEFAULT_RAMP_SIZE
    } else {
        size
    }
}

/// A three-channel gamma lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaRamp {
    channels: [Vec<f64>; 3],
}

impl GammaRamp {
    /// Build from three channels (the 3×N layout).
    pub fn from_channels(red: Vec<f64>, green: Vec<f64>, blue: Vec<f64>) -> Result<Self> {
        if red.is_empty() || red.len() != green.len() || red.len() != blue.len() {
            return Err(PsywinError::InvalidOptionError(format!(
                "gamma ramp channels must be non-empty and of equal length (got {}, {}, {})",
                red.len(),
                green.len(),
                blue.len()
            )));
        }
        Ok(Self {
            channels: [red, green, blue],
        })
    }

    /// Build from one `[r, g, b]` row per entry (the N×3 layout).
    pub fn from_rows(rows: &[[f64; 3]]) -> Result<Self> {
        let column = |c: usize| rows.iter().map(|row| row[c]).collect::<Vec<_>>();
        Self::from_channels(column(0), column(1), column(2))
    }

    /// Identity ramp for the given driver quirk.
    pub fn linear(ramp_size: usize, ramp_type: RampType) -> Self {
        let channel = create_linear_ramp(ramp_size.max(1), ramp_type);
        Self {
            channels: [channel.clone(), channel.clone(), channel],
        }
    }

    /// Identity ramp raised to `1/gamma` per channel.
    pub fn from_gamma(ramp_size: usize, ramp_type: RampType, gamma: [f64; 3]) -> Result<Self> {
        if let Some(bad) = gamma.iter().find(|g| !(g.is_finite() && **g > 0.0)) {
            return Err(PsywinError::InvalidOptionError(format!(
                "gamma must be a positive number, got {bad}"
            )));
        }
        let mut ramp = Self::linear(ramp_size, ramp_type);
        if gamma.iter().any(|g| *g != 1.0) {
            for (channel, g) in ramp.channels.iter_mut().zip(gamma) {
                for v in channel.iter_mut() {
                    *v = v.max(0.0).powf(1.0 / g);
                }
            }
        }
        Ok(ramp)
    }

    /// Build from 16-bit hardware tables.
    pub fn from_u16(red: &[u16], green: &[u16], blue: &[u16]) -> Result<Self> {
        let scale = |c: &[u16]| c.iter().map(|v| *v as f64 / 65535.0).collect::<Vec<_>>();
        Self::from_channels(scale(red), scale(green), scale(blue))
    }

    /// Channels as 16-bit hardware values.
    pub fn to_u16(&self) -> [Vec<u16>; 3] {
        let quantize = |c: &Vec<f64>| {
            c.iter()
                .map(|v| (v.clamp(0.0, 1.0) * 65535.0).round() as u16)
                .collect::<Vec<_>>()
        };
        [
            quantize(&self.channels[0]),
            quantize(&self.channels[1]),
            quantize(&self.channels[2]),
        ]
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn red(&self) -> &[f64] {
        &self.channels[0]
    }

    pub fn green(&self) -> &[f64] {
        &self.channels[1]
    }

    pub fn blue(&self) -> &[f64] {
        &self.channels[2]
    }

    pub fn channels(&self) -> &[Vec<f64>; 3] {
        &self.channels
    }

    /// Entry-wise comparison with an absolute tolerance.
    pub fn approx_eq(&self, other: &GammaRamp, tolerance: f64) -> bool {
        self.len() == other.len()
            && self
                .channels
                .iter()
                .zip(other.channels.iter())
                .all(|(a, b)| a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance))
    }

    /// Linearly interpolate to a different number of entries.
    pub fn resampled(&self, size: usize) -> GammaRamp {
        if size == self.len() || size == 0 {
            return self.clone();
        }
        let resample = |c: &Vec<f64>| {
            let last = (c.len() - 1) as f64;
            (0..size)
                .map(|i| {
                    let x = if size == 1 {
                        0.0
                    } else {
                        i as f64 * last / (size - 1) as f64
                    };
                    let lo = x.floor() as usize;
                    let hi = (lo + 1).min(c.len() - 1);
                    let frac = x - lo as f64;
                    c[lo] * (1.0 - frac) + c[hi] * frac
                })
                .collect::<Vec<_>>()
        };
        GammaRamp {
            channels: [
                resample(&self.channels[0]),
                resample(&self.channels[1]),
                resample(&self.channels[2]),
            ],
        }
    }
}

/// What to do when the hardware refuses a gamma operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, StrumDisplay, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GammaErrorPolicy {
    #[default]
    #[strum(to_string = "raise", serialize = "abort")]
    #[serde(alias = "abort")]
    Raise,
    Warn,
    Ignore,
}

impl GammaErrorPolicy {
    /// Turn a failed `operation` ("set", "read", ...) into an error, a warning or nothing.
    pub fn handle(self, operation: &str, detail: impl Display) -> Result<()> {
        match self {
            GammaErrorPolicy::Raise => {
                log::error!("Failed to {} the gamma table: {}", operation, detail);
                Err(PsywinError::GammaError(format!("failed to {operation}: {detail}")))
            }
            GammaErrorPolicy::Warn => {
                log::warn!("Failed to {} the gamma table: {}", operation, detail);
                Ok(())
            }
            GammaErrorPolicy::Ignore => {
                log::debug!("Ignoring gamma failure ({}): {}", operation, detail);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ramp_type_table() {
        let plain = create_linear_ramp(4, RampType::Plain);
        assert_eq!(plain.len(), 4);
        assert_eq!(plain[0], 0.0);
        assert!((plain[3] - 1.0).abs() < 1e-12);

        let offset = create_linear_ramp(4, RampType::Offset256);
        assert_eq!(offset.len(), 256);
        assert!((offset[0] - 1.0 / 256.0).abs() < 1e-12);
        assert!((offset[255] - 1.0).abs() < 1e-12);

        let ten_bit = create_linear_ramp(4, RampType::TenBit);
        assert_eq!(ten_bit.len(), 1024);
        assert!((ten_bit[1023] - 1023.0 / 1024.0).abs() < 1e-12);

        let corrected = create_linear_ramp(4, RampType::TenBitCorrected);
        assert_eq!(corrected[511], ten_bit[511]);
        assert!((ten_bit[512] - corrected[512] - 1.0 / 256.0).abs() < 1e-12);
    }

    #[test]
    fn detection_follows_os_and_driver() {
        let nvidia = Some("NVIDIA GeForce 9400M OpenGL Engine");
        assert_eq!(
            RampType::detect(HostOs::MacOs, Some("10.5.8"), nvidia),
            RampType::TenBit
        );
        assert_eq!(
            RampType::detect(HostOs::MacOs, Some("10.6.3"), nvidia),
            RampType::TenBitCorrected
        );
        // exactly 10.6 is neither inside (10.5, 10.6) nor above 10.6
        assert_eq!(
            RampType::detect(HostOs::MacOs, Some("10.6"), nvidia),
            RampType::Offset256
        );
        assert_eq!(
            RampType::detect(HostOs::MacOs, Some("10.4.11"), nvidia),
            RampType::Offset256
        );
        assert_eq!(
            RampType::detect(HostOs::MacOs, Some("12.1"), Some("AMD Radeon")),
            RampType::Offset256
        );
        assert_eq!(RampType::detect(HostOs::MacOs, None, None), RampType::Offset256);
        assert_eq!(
            RampType::detect(HostOs::Windows, Some("10"), nvidia),
            RampType::Plain
        );
        assert_eq!(RampType::detect(HostOs::Linux, None, None), RampType::Plain);
    }

    #[test]
    fn version_comparison_is_numeric() {
        assert_eq!(
            compare_versions(&parse_version("10.10"), &parse_version("10.6")),
            Ordering::Greater
        );
        assert_eq!(
            compare_versions(&parse_version("10.6.0"), &parse_version("10.6")),
            Ordering::Equal
        );
    }

    #[test]
    fn gamma_exponent_applies_per_channel() {
        let ramp = GammaRamp::from_gamma(5, RampType::Plain, [2.0, 1.0, 0.5]).unwrap();
        assert!((ramp.red()[2] - 0.5f64.powf(0.5)).abs() < 1e-12);
        assert!((ramp.green()[2] - 0.5).abs() < 1e-12);
        assert!((ramp.blue()[2] - 0.25).abs() < 1e-12);
        assert!(GammaRamp::from_gamma(5, RampType::Plain, [0.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn rows_and_channels_describe_the_same_ramp() {
        let rows = [[0.0, 0.1, 0.2], [1.0, 0.9, 0.8]];
        let from_rows = GammaRamp::from_rows(&rows).unwrap();
        let from_channels =
            GammaRamp::from_channels(vec![0.0, 1.0], vec![0.1, 0.9], vec![0.2, 0.8]).unwrap();
        assert_eq!(from_rows, from_channels);
        assert!(GammaRamp::from_channels(vec![0.0], vec![], vec![0.0]).is_err());
    }

    #[test]
    fn u16_conversion_round_trips() {
        let ramp = GammaRamp::from_gamma(256, RampType::Plain, [2.2; 3]).unwrap();
        let [r, g, b] = ramp.to_u16();
        let back = GammaRamp::from_u16(&r, &g, &b).unwrap();
        assert!(back.approx_eq(&ramp, 1.0 / 65535.0));
        let [r2, _, _] = back.to_u16();
        assert_eq!(r, r2);
    }

    #[test]
    fn resampling_keeps_the_end_points() {
        let ramp = GammaRamp::linear(1024, RampType::Plain).resampled(256);
        assert_eq!(ramp.len(), 256);
        assert_eq!(ramp.red()[0], 0.0);
        assert!((ramp.red()[255] - 1.0).abs() < 1e-12);
        assert!((ramp.red()[128] - 128.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn error_policy_parsing_and_handling() {
        assert_eq!(
            GammaErrorPolicy::from_str("abort").unwrap(),
            GammaErrorPolicy::Raise
        );
        assert_eq!(GammaErrorPolicy::from_str("warn").unwrap(), GammaErrorPolicy::Warn);
        assert!(GammaErrorPolicy::from_str("explode").is_err());

        assert!(matches!(
            GammaErrorPolicy::Raise.handle("set", "driver said no"),
            Err(PsywinError::GammaError(_))
        ));
        assert!(GammaErrorPolicy::Warn.handle("set", "driver said no").is_ok());
        assert!(GammaErrorPolicy::Ignore.handle("set", "driver said no").is_ok());
    }

    #[test]
    fn zero_ramp_size_falls_back_to_default() {
        assert_eq!(sanitize_ramp_size(0), DEFAULT_RAMP_SIZE);
        assert_eq!(sanitize_ramp_size(1024), 1024);
    }
}
