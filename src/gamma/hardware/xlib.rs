//! XF86VidMode gamma access. libXxf86vm is opened at run time, so building does not
//! need the X11 development headers and Wayland-only hosts simply get an error.

use std::ffi::c_void;
use std::os::raw::{c_int, c_ushort};

use x11_dl::xf86vmode::Xf86vmode;
use x11_dl::xlib::Display;

use crate::errors::{PsywinError, Result};
use crate::gamma::GammaRamp;

fn open() -> Result<Xf86vmode> {
    Xf86vmode::open().map_err(|e| PsywinError::GammaError(format!("could not load libXxf86vm: {e}")))
}

fn check_display(display: *mut c_void) -> Result<*mut Display> {
    if display.is_null() {
        return Err(PsywinError::GammaError("no X display connection".into()));
    }
    Ok(display as *mut Display)
}

pub(super) fn get_gamma_ramp_size(display: *mut c_void, screen: i32) -> Result<usize> {
    let display = check_display(display)?;
    let vm = open()?;
    let mut size: c_int = 0;
    let ok = unsafe { (vm.XF86VidModeGetGammaRampSize)(display, screen, &mut size) };
    if ok == 0 {
        return Err(PsywinError::GammaError("XF86VidModeGetGammaRampSize failed".into()));
    }
    Ok(size.max(0) as usize)
}

pub(super) fn get_gamma_ramp(display: *mut c_void, screen: i32) -> Result<GammaRamp> {
    let size = super::super::sanitize_ramp_size(get_gamma_ramp_size(display, screen)?);
    let display = check_display(display)?;
    let vm = open()?;
    let mut red: Vec<c_ushort> = vec![0; size];
    let mut green: Vec<c_ushort> = vec![0; size];
    let mut blue: Vec<c_ushort> = vec![0; size];
    let ok = unsafe {
        (vm.XF86VidModeGetGammaRamp)(
            display,
            screen,
            size as c_int,
            red.as_mut_ptr(),
            green.as_mut_ptr(),
            blue.as_mut_ptr(),
        )
    };
    if ok == 0 {
        return Err(PsywinError::GammaError("XF86VidModeGetGammaRamp failed".into()));
    }
    GammaRamp::from_u16(&red, &green, &blue)
}

pub(super) fn set_gamma_ramp(display: *mut c_void, screen: i32, ramp: &GammaRamp) -> Result<()> {
    let size = super::super::sanitize_ramp_size(get_gamma_ramp_size(display, screen)?);
    let display = check_display(display)?;
    let vm = open()?;
    let [mut red, mut green, mut blue] = ramp.resampled(size).to_u16();
    let ok = unsafe {
        (vm.XF86VidModeSetGammaRamp)(
            display,
            screen,
            size as c_int,
            red.as_mut_ptr(),
            green.as_mut_ptr(),
            blue.as_mut_ptr(),
        )
    };
    if ok == 0 {
        return Err(PsywinError::GammaError("XF86VidModeSetGammaRamp failed".into()));
    }
    Ok(())
}
