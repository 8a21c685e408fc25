// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading and writing the gamma tables of physical displays through the OS.
//!
//! These calls report failures as plain errors. Applying the window's
//! [`GammaErrorPolicy`](super::GammaErrorPolicy) is up to the caller.

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "linux")]
mod xlib;

use super::{GammaErrorPolicy, GammaRamp, RampType};
use crate::errors::{PsywinError, Result};

/// Environment variables that mark a virtual machine or CI runner, where gamma writes are skipped.
pub const VIRTUAL_HOST_VARS: [&str; 4] = ["PSYWIN_VM", "CI", "GITHUB_ACTIONS", "TRAVIS"];

/// Number of times a Windows gamma write is attempted before giving up.
pub const SET_ATTEMPTS: usize = 3;

/// The display a gamma table belongs to, in the OS's own terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaTarget {
    /// A window handle; its device context selects the display.
    #[cfg(target_os = "windows")]
    Win32 { hwnd: isize },
    /// A CoreGraphics display id.
    #[cfg(target_os = "macos")]
    Quartz { display_id: u32 },
    /// An Xlib display connection and screen number.
    #[cfg(target_os = "linux")]
    Xlib {
        display: *mut std::ffi::c_void,
        screen: i32,
    },
    /// No gamma access (Wayland, web, unknown platforms).
    Unsupported,
}

/// True when running inside a VM or on a CI runner.
pub fn is_virtual_host() -> bool {
    VIRTUAL_HOST_VARS
        .iter()
        .any(|var| std::env::var_os(var).map_or(false, |v| !v.is_empty() && v != "0"))
}

fn unsupported(operation: &str) -> PsywinError {
    PsywinError::NotImplementedError(format!("{operation} on this display"))
}

/// Read the display's current gamma table.
pub fn get_gamma_ramp(target: &GammaTarget) -> Result<GammaRamp> {
    match *target {
        #[cfg(target_os = "windows")]
        GammaTarget::Win32 { hwnd } => windows::get_gamma_ramp(hwnd),
        #[cfg(target_os = "macos")]
        GammaTarget::Quartz { display_id } => macos::get_gamma_ramp(display_id),
        #[cfg(target_os = "linux")]
        GammaTarget::Xlib { display, screen } => xlib::get_gamma_ramp(display, screen),
        GammaTarget::Unsupported => Err(unsupported("reading the gamma table")),
    }
}

/// Write a gamma table. The ramp is resampled if the display expects a different size.
pub fn set_gamma_ramp(target: &GammaTarget, ramp: &GammaRamp) -> Result<()> {
    if is_virtual_host() {
        log::warn!("It looks like we are running in a virtual machine or on CI. Hardware gamma table cannot be set.");
        return Ok(());
    }
    match *target {
        #[cfg(target_os = "windows")]
        GammaTarget::Win32 { hwnd } => windows::set_gamma_ramp(hwnd, ramp, SET_ATTEMPTS),
        #[cfg(target_os = "macos")]
        GammaTarget::Quartz { display_id } => macos::set_gamma_ramp(display_id, ramp),
        #[cfg(target_os = "linux")]
        GammaTarget::Xlib { display, screen } => xlib::set_gamma_ramp(display, screen, ramp),
        GammaTarget::Unsupported => Err(unsupported("setting the gamma table")),
    }
}

/// Number of entries per channel the display's gamma table holds.
pub fn get_gamma_ramp_size(target: &GammaTarget) -> Result<usize> {
    if is_virtual_host() {
        return Ok(super::DEFAULT_RAMP_SIZE);
    }
    let size = match *target {
        #[cfg(target_os = "windows")]
        GammaTarget::Win32 { .. } => windows::RAMP_SIZE,
        #[cfg(target_os = "macos")]
        GammaTarget::Quartz { display_id } => macos::get_gamma_ramp_size(display_id),
        #[cfg(target_os = "linux")]
        GammaTarget::Xlib { display, screen } => xlib::get_gamma_ramp_size(display, screen)?,
        GammaTarget::Unsupported => return Err(unsupported("querying the gamma ramp size")),
    };
    Ok(super::sanitize_ramp_size(size))
}


/// Gamma access for one window on a physical display. Remembers the table found when the
/// window opened so it can be put back on close, and routes failures through the policy.
#[derive(Debug)]
pub struct DisplayGamma {
    target: GammaTarget,
    policy: GammaErrorPolicy,
    ramp_type: RampType,
    original: Option<GammaRamp>,
}

impl DisplayGamma {
    pub fn open(target: GammaTarget, policy: GammaErrorPolicy, ramp_type: RampType) -> Result<Self> {
        let original = match get_gamma_ramp(&target) {
            Ok(ramp) => Some(ramp),
            Err(e) => {
                policy.handle("read", e)?;
                None
            }
        };
        Ok(Self {
            target,
            policy,
            ramp_type,
            original,
        })
    }

    pub fn target(&self) -> GammaTarget {
        self.target
    }

    pub fn original(&self) -> Option<&GammaRamp> {
        self.original.as_ref()
    }

    pub fn ramp(&self) -> Result<GammaRamp> {
        get_gamma_ramp(&self.target)
    }

    /// Table size, or the default size when the display will not say.
    pub fn size(&self) -> Result<usize> {
        match get_gamma_ramp_size(&self.target) {
            Ok(size) => Ok(size),
            Err(e) => {
                self.policy.handle("query the size of", e)?;
                Ok(super::DEFAULT_RAMP_SIZE)
            }
        }
    }

    pub fn set_ramp(&self, ramp: &GammaRamp) -> Result<()> {
        match set_gamma_ramp(&self.target, ramp) {
            Ok(()) => Ok(()),
            Err(e) => self.policy.handle("set", e),
        }
    }

    pub fn set_gamma(&self, gamma: [f64; 3]) -> Result<()> {
        let ramp = GammaRamp::from_gamma(self.size()?, self.ramp_type, gamma)?;
        self.set_ramp(&ramp)
    }

    /// Put back the table found at open time. Only the first call writes anything.
    pub fn restore(&mut self) -> Result<()> {
        match self.original.take() {
            Some(original) => self.set_ramp(&original),
            None => Ok(()),
        }
    }
}
