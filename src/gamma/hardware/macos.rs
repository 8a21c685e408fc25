use crate::errors::{PsywinError, Result};
use crate::gamma::GammaRamp;

type CGDirectDisplayID = u32;
type CGError = i32;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGDisplayGammaTableCapacity(display: CGDirectDisplayID) -> u32;
    fn CGGetDisplayTransferByTable(
        display: CGDirectDisplayID,
        capacity: u32,
        red: *mut f32,
        green: *mut f32,
        blue: *mut f32,
        sample_count: *mut u32,
    ) -> CGError;
    fn CGSetDisplayTransferByTable(
        display: CGDirectDisplayID,
        table_size: u32,
        red: *const f32,
        green: *const f32,
        blue: *const f32,
    ) -> CGError;
}

pub(super) fn get_gamma_ramp_size(display_id: u32) -> usize {
    unsafe { CGDisplayGammaTableCapacity(display_id) as usize }
}

pub(super) fn get_gamma_ramp(display_id: u32) -> Result<GammaRamp> {
    let capacity = get_gamma_ramp_size(display_id).max(1);
    let mut red = vec![0f32; capacity];
    let mut green = vec![0f32; capacity];
    let mut blue = vec![0f32; capacity];
    let mut count = 0u32;
    let err = unsafe {
        CGGetDisplayTransferByTable(
            display_id,
            capacity as u32,
            red.as_mut_ptr(),
            green.as_mut_ptr(),
            blue.as_mut_ptr(),
            &mut count,
        )
    };
    if err != 0 {
        return Err(PsywinError::GammaError(format!(
            "CGGetDisplayTransferByTable returned {err}"
        )));
    }
    let widen = |c: Vec<f32>| c[..count as usize].iter().map(|v| *v as f64).collect();
    GammaRamp::from_channels(widen(red), widen(green), widen(blue))
}

pub(super) fn set_gamma_ramp(display_id: u32, ramp: &GammaRamp) -> Result<()> {
    let narrow = |c: &[f64]| c.iter().map(|v| *v as f32).collect::<Vec<_>>();
    let (red, green, blue) = (narrow(ramp.red()), narrow(ramp.green()), narrow(ramp.blue()));
    let err = unsafe {
        CGSetDisplayTransferByTable(
            display_id,
            ramp.len() as u32,
            red.as_ptr(),
            green.as_ptr(),
            blue.as_ptr(),
        )
    };
    if err != 0 {
        return Err(PsywinError::GammaError(format!(
            "CGSetDisplayTransferByTable returned {err}"
        )));
    }
    Ok(())
}
