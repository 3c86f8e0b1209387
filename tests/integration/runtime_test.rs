//! End-to-end tests: a real dispatch-table patcher, the runtime, and the
//! damage-scaler extension linked into the test binary.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

use ext_damage_scaler::DamageParams;
use talon_core::config::RuntimeConfig;
use talon_core::error::ErrorKind;
use talon_core::result::AppResult;
use talon_intercept::function::{DispatchFn, NulTerminatedNameResolver};
use talon_intercept::site::vtable::{DispatchTable, VTablePatcher};
use talon_plugin::api::{ConfigStore, MemoryConfigStore};
use talon_plugin::ffi::abi::{CreateExtensionFn, DestroyExtensionFn};
use talon_plugin::{ExtensionLibrary, ExtensionState, LibraryOpener};
use talon_runtime::Runtime;

const SLOT: u16 = 2;
const SCALER: &str = "linked/damage-scaler";
const TAKE_DAMAGE: &CStr = c"TakeDamage";
const JUMP: &CStr = c"Jump";

thread_local! {
    static CALLS: Cell<u32> = const { Cell::new(0) };
    static LAST_AMOUNT: Cell<Option<f32>> = const { Cell::new(None) };
}

unsafe extern "C" fn original(_: *mut c_void, _: *mut c_void, params: *mut c_void) {
    CALLS.with(|c| c.set(c.get() + 1));
    let amount = unsafe { params.cast::<DamageParams>().as_ref() }.map(|p| p.amount);
    LAST_AMOUNT.with(|last| last.set(amount));
}

unsafe extern "C" fn filler(_: *mut c_void, _: *mut c_void, _: *mut c_void) {}

fn calls() -> u32 {
    CALLS.with(Cell::get)
}

fn last_amount() -> Option<f32> {
    LAST_AMOUNT.with(Cell::get)
}

fn original_ptr() -> *const () {
    let f: DispatchFn = original;
    f as *const ()
}

fn table() -> Box<[*const ()]> {
    let f: DispatchFn = filler;
    let mut table = vec![f as *const (); 4].into_boxed_slice();
    table[usize::from(SLOT)] = original_ptr();
    table
}

fn describe(table: &mut [*const ()]) -> DispatchTable {
    unsafe { DispatchTable::new(NonNull::from(&mut table[0]), table.len()) }
}

fn call(table: &[*const ()], function: &CStr, amount: f32) {
    let entry = unsafe { std::ptr::read_volatile(&table[usize::from(SLOT)]) };
    let dispatch = unsafe { std::mem::transmute::<*const (), DispatchFn>(entry) };
    let mut params = DamageParams::new(amount);
    unsafe {
        dispatch(
            std::ptr::null_mut(),
            function.as_ptr().cast_mut().cast(),
            (&raw mut params).cast(),
        )
    };
}

struct Linked {
    path: PathBuf,
}

impl ExtensionLibrary for Linked {
    fn path(&self) -> &Path {
        &self.path
    }

    fn factory(&self) -> AppResult<CreateExtensionFn> {
        Ok(ext_damage_scaler::talon_extension_create as CreateExtensionFn)
    }

    fn destructor(&self) -> AppResult<DestroyExtensionFn> {
        Ok(ext_damage_scaler::talon_extension_destroy as DestroyExtensionFn)
    }
}

struct LinkedOpener;

impl LibraryOpener for LinkedOpener {
    fn open(&self, path: &Path) -> AppResult<Box<dyn ExtensionLibrary>> {
        Ok(Box::new(Linked {
            path: path.to_path_buf(),
        }))
    }
}

fn config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.interception.dispatch_index = SLOT;
    config.interception.bring_up_delay_ms = 0;
    config.extensions.auto_load = false;
    config
}

fn runtime(patcher: VTablePatcher, settings: HashMap<&str, f32>) -> Runtime {
    let store = MemoryConfigStore::new();
    for (key, value) in settings {
        store
            .set(&format!("damage-scaler.{key}"), serde_json::json!(value))
            .expect("set");
    }
    let resolver = unsafe { NulTerminatedNameResolver::new() };
    Runtime::builder(config(), Box::new(patcher), resolver)
        .opener(LinkedOpener)
        .config_store(Rc::new(store))
        .build()
}

#[test]
fn test_scaler_halves_damage_through_patched_slot() {
    let mut table = table();
    let mut runtime = runtime(VTablePatcher::with_table(describe(&mut table)), HashMap::new());

    assert_eq!(runtime.start().expect("start"), 0);
    assert!(runtime.load_extension(Path::new(SCALER)));
    let loaded = runtime.loaded_extensions();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].info.name, "damage-scaler");
    assert_eq!(loaded[0].state, ExtensionState::Registered);

    call(&table, TAKE_DAMAGE, 10.0);
    assert_eq!(last_amount(), Some(5.0));

    call(&table, JUMP, 10.0);
    assert_eq!(last_amount(), Some(10.0));

    // The scaler queues a notice while registering; it runs on the first tick.
    assert_eq!(runtime.tick(0.016).actions, 1);

    runtime.shutdown();
    assert_eq!(table[usize::from(SLOT)], original_ptr());
    assert!(runtime.loaded_extensions().is_empty());

    call(&table, TAKE_DAMAGE, 10.0);
    assert_eq!(last_amount(), Some(10.0));
}

#[test]
fn test_zero_factor_suppresses_the_original() {
    let mut table = table();
    let settings = HashMap::from([("factor", 0.0)]);
    let mut runtime = runtime(VTablePatcher::with_table(describe(&mut table)), settings);
    runtime.start().expect("start");
    assert!(runtime.load_extension(Path::new(SCALER)));

    let before = calls();
    call(&table, TAKE_DAMAGE, 10.0);
    assert_eq!(calls(), before);

    call(&table, JUMP, 3.0);
    assert_eq!(calls(), before + 1);
}

#[test]
fn test_cap_and_factor_from_config_store() {
    let mut table = table();
    let settings = HashMap::from([("factor", 2.0), ("cap", 15.0)]);
    let mut runtime = runtime(VTablePatcher::with_table(describe(&mut table)), settings);
    runtime.start().expect("start");
    assert!(runtime.load_extension(Path::new(SCALER)));

    call(&table, TAKE_DAMAGE, 5.0);
    assert_eq!(last_amount(), Some(10.0));
    call(&table, TAKE_DAMAGE, 20.0);
    assert_eq!(last_amount(), Some(15.0));
}

#[test]
fn test_bring_up_waits_for_dispatch_table() {
    let mut table = table();
    let located = describe(&mut table);
    let mut lookups = 0;
    let patcher = VTablePatcher::new(Box::new(move || {
        lookups += 1;
        (lookups >= 3).then_some(located)
    }));
    let runtime = runtime(patcher, HashMap::new());

    runtime.bring_up().expect("third lookup finds the table");
    assert!(runtime.interceptor().is_initialized());
    assert_ne!(table[usize::from(SLOT)], original_ptr());
}

#[test]
fn test_bring_up_failure_leaves_slot_untouched() {
    let table = table();
    let patcher = VTablePatcher::new(Box::new(|| None));
    let mut runtime = runtime(patcher, HashMap::new());

    let err = runtime.start().expect_err("no table");
    assert_eq!(err.kind, ErrorKind::HookFailed);
    assert!(!runtime.interceptor().is_initialized());

    // Extensions still load; their hooks simply never fire.
    assert!(runtime.load_extension(Path::new(SCALER)));
    assert_eq!(runtime.interceptor().hook_count("TakeDamage"), 1);
    call(&table, TAKE_DAMAGE, 8.0);
    assert_eq!(last_amount(), Some(8.0));
}
