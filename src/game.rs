//! In-process stand-in for a host application.
//!
//! Owns one actor and a virtual-dispatch table whose dispatch slot routes
//! every named call. Calls are made the way native code would make them: by
//! loading the slot on every call and jumping through it, so a patched slot
//! takes effect immediately.

use std::ffi::{CStr, c_void};
use std::ptr::NonNull;

use ext_damage_scaler::DamageParams;
use talon_core::error::AppError;
use talon_core::result::AppResult;
use talon_intercept::function::DispatchFn;
use talon_intercept::site::vtable::DispatchTable;

/// Slots in the simulated dispatch table.
pub const DISPATCH_SLOTS: usize = 96;

pub const TAKE_DAMAGE: &CStr = c"TakeDamage";
pub const HEAL: &CStr = c"Heal";

/// The simulated actor.
#[repr(C)]
#[derive(Debug)]
pub struct Actor {
    pub health: f32,
}

/// Dispatch function the table slot points at before any hook is bound.
unsafe extern "C" fn process_event(object: *mut c_void, function: *mut c_void, params: *mut c_void) {
    if object.is_null() || function.is_null() || params.is_null() {
        return;
    }
    let actor = unsafe { &mut *object.cast::<Actor>() };
    let name = unsafe { CStr::from_ptr(function.cast_const().cast()) };

    if name == TAKE_DAMAGE {
        let params = unsafe { &*params.cast::<DamageParams>() };
        actor.health = (actor.health - params.amount).max(0.0);
    } else if name == HEAL {
        let amount = unsafe { *params.cast::<f32>() };
        actor.health += amount;
    }
}

unsafe extern "C" fn unused_slot(_: *mut c_void, _: *mut c_void, _: *mut c_void) {}

pub struct Game {
    table: Box<[*const ()]>,
    dispatch_index: usize,
    player: Box<Actor>,
}

impl Game {
    /// Creates a game whose dispatch function lives at `dispatch_index`.
    pub fn new(dispatch_index: u16, health: f32) -> AppResult<Self> {
        let dispatch_index = usize::from(dispatch_index);
        if dispatch_index >= DISPATCH_SLOTS {
            return Err(AppError::configuration(format!(
                "interception.dispatch_index {dispatch_index} is outside the {DISPATCH_SLOTS}-slot table"
            )));
        }

        let unused: DispatchFn = unused_slot;
        let process: DispatchFn = process_event;
        let mut table = vec![unused as *const (); DISPATCH_SLOTS].into_boxed_slice();
        table[dispatch_index] = process as *const ();

        Ok(Self {
            table,
            dispatch_index,
            player: Box::new(Actor { health }),
        })
    }

    /// Describes the dispatch table for a patcher.
    pub fn dispatch_table(&mut self) -> DispatchTable {
        let base = NonNull::from(&mut self.table[0]);
        // SAFETY: the table is boxed and outlives every patcher in this process.
        unsafe { DispatchTable::new(base, self.table.len()) }
    }

    pub fn health(&self) -> f32 {
        self.player.health
    }

    /// Calls `TakeDamage` through the dispatch slot and returns the new health.
    pub fn take_damage(&mut self, amount: f32) -> f32 {
        let mut params = DamageParams::new(amount);
        self.call(TAKE_DAMAGE, (&raw mut params).cast());
        self.player.health
    }

    /// Calls `Heal` through the dispatch slot and returns the new health.
    pub fn heal(&mut self, amount: f32) -> f32 {
        let mut amount = amount;
        self.call(HEAL, (&raw mut amount).cast());
        self.player.health
    }

    fn call(&mut self, function: &CStr, params: *mut c_void) {
        let entry = unsafe { std::ptr::read_volatile(&self.table[self.dispatch_index]) };
        // SAFETY: every slot holds a function with the dispatch signature.
        let dispatch = unsafe { std::mem::transmute::<*const (), DispatchFn>(entry) };
        let object = (&raw mut *self.player).cast::<c_void>();
        unsafe { dispatch(object, function.as_ptr().cast_mut().cast(), params) };
    }
}
