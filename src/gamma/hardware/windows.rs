use winapi::shared::windef::HWND;
use winapi::um::wingdi::{GetDeviceGammaRamp, SetDeviceGammaRamp};
use winapi::um::winuser::{GetDC, ReleaseDC};

use crate::errors::{PsywinError, Result};
use crate::gamma::GammaRamp;

/// GDI gamma tables always have 256 entries per channel.
pub(super) const RAMP_SIZE: usize = 256;

type Table = [[u16; RAMP_SIZE]; 3];

fn with_device_context<T>(hwnd: isize, f: impl FnOnce(winapi::shared::windef::HDC) -> T) -> Result<T> {
    unsafe {
        let hwnd = hwnd as HWND;
        let hdc = GetDC(hwnd);
        if hdc.is_null() {
            return Err(PsywinError::GammaError("could not acquire a device context".into()));
        }
        let out = f(hdc);
        ReleaseDC(hwnd, hdc);
        Ok(out)
    }
}

pub(super) fn get_gamma_ramp(hwnd: isize) -> Result<GammaRamp> {
    let mut table: Table = [[0; RAMP_SIZE]; 3];
    let ok = with_device_context(hwnd, |hdc| unsafe {
        GetDeviceGammaRamp(hdc, table.as_mut_ptr() as *mut _)
    })?;
    if ok == 0 {
        return Err(PsywinError::GammaError("GetDeviceGammaRamp failed".into()));
    }
    GammaRamp::from_u16(&table[0], &table[1], &table[2])
}

pub(super) fn set_gamma_ramp(hwnd: isize, ramp: &GammaRamp, attempts: usize) -> Result<()> {
    let [r, g, b] = ramp.resampled(RAMP_SIZE).to_u16();
    let mut table: Table = [[0; RAMP_SIZE]; 3];
    table[0].copy_from_slice(&r);
    table[1].copy_from_slice(&g);
    table[2].copy_from_slice(&b);

    // the driver occasionally rejects a valid ramp right after a mode switch
    for attempt in 1..=attempts {
        let ok = with_device_context(hwnd, |hdc| unsafe {
            SetDeviceGammaRamp(hdc, table.as_mut_ptr() as *mut _)
        })?;
        if ok != 0 {
            return Ok(());
        }
        log::debug!("SetDeviceGammaRamp failed (attempt {} of {})", attempt, attempts);
    }
    Err(PsywinError::GammaError(format!("SetDeviceGammaRamp failed {attempts} times")))
}
