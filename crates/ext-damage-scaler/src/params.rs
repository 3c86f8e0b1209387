//! Native parameter block of `TakeDamage`.

use std::ffi::c_void;

/// Parameters the host passes to `TakeDamage`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageParams {
    /// Incoming damage.
    pub amount: f32,
    /// Object that dealt the damage, or null.
    pub instigator: *mut c_void,
}

impl DamageParams {
    pub fn new(amount: f32) -> Self {
        Self {
            amount,
            instigator: std::ptr::null_mut(),
        }
    }
}
