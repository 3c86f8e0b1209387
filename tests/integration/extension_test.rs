//! Extension lifecycle through the runtime: discovery, registration, ticks
//! and the ordered shutdown sequence.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use talon_core::config::RuntimeConfig;
use talon_core::error::AppError;
use talon_core::result::AppResult;
use talon_intercept::function::DispatchFn;
use talon_intercept::site::fake::{FakeSiteHandle, FakeSiteInterceptor};
use talon_intercept::site::{EntryPoint, SiteKey};
use talon_plugin::events::{ExtensionsRegistered, ShutdownEvent, TickEvent};
use talon_plugin::ffi::abi::{CreateExtensionFn, DestroyExtensionFn, ExtensionHandle};
use talon_plugin::ffi::safety;
use talon_plugin::{Extension, ExtensionContext, ExtensionInfo, ExtensionLibrary, ExtensionState, LibraryOpener};
use talon_runtime::Runtime;

const SITE: SiteKey = SiteKey::Index(68);

thread_local! {
    static JOURNAL: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static ORIGINAL_CALLS: Cell<u32> = const { Cell::new(0) };
}

fn log(entry: impl Into<String>) {
    JOURNAL.with(|j| j.borrow_mut().push(entry.into()));
}

fn take_journal() -> Vec<String> {
    JOURNAL.with(|j| std::mem::take(&mut *j.borrow_mut()))
}

unsafe extern "C" fn original(_: *mut c_void, _: *mut c_void, _: *mut c_void) {
    ORIGINAL_CALLS.with(|c| c.set(c.get() + 1));
}

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Ok,
    Fail,
    PanicOnTick,
}

struct Journaled {
    name: &'static str,
    behavior: Behavior,
}

impl Extension for Journaled {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo::new(self.name, "1.0.0")
    }

    fn on_register(&mut self, ctx: &ExtensionContext) -> AppResult<()> {
        let name = self.name;
        let behavior = self.behavior;

        ctx.add_hook("TakeDamage", move |_| {
            log(format!("hook:{name}"));
            true
        });
        ctx.subscribe(move |tick: &mut TickEvent| {
            if behavior == Behavior::PanicOnTick {
                panic!("tick handler bug");
            }
            log(format!("tick:{name}:{}", tick.frame_number));
        });
        ctx.subscribe(move |_: &mut ShutdownEvent| log(format!("shutdown-event:{name}")));
        ctx.enqueue(move || log(format!("action:{name}")));

        if behavior == Behavior::Fail {
            return Err(AppError::registration_failed("refused"));
        }
        log(format!("register:{name}"));
        Ok(())
    }

    fn on_unregister(&mut self) -> AppResult<()> {
        log(format!("unregister:{}", self.name));
        Ok(())
    }
}

impl Drop for Journaled {
    fn drop(&mut self) {
        log(format!("destroy:{}", self.name));
    }
}

macro_rules! factory {
    ($fn_name:ident, $name:literal, $behavior:expr) => {
        extern "C" fn $fn_name() -> *mut ExtensionHandle {
            safety::into_raw_handle(Box::new(Journaled {
                name: $name,
                behavior: $behavior,
            }))
        }
    };
}

factory!(create_alpha, "alpha", Behavior::Ok);
factory!(create_beta, "beta", Behavior::Ok);
factory!(create_broken, "broken", Behavior::Fail);
factory!(create_faulty, "faulty", Behavior::PanicOnTick);

extern "C" fn destroy(handle: *mut ExtensionHandle) {
    unsafe { safety::drop_raw_handle(handle) };
}

struct TestLibrary {
    path: PathBuf,
    create: CreateExtensionFn,
}

impl ExtensionLibrary for TestLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn factory(&self) -> AppResult<CreateExtensionFn> {
        Ok(self.create)
    }

    fn destructor(&self) -> AppResult<DestroyExtensionFn> {
        Ok(destroy as DestroyExtensionFn)
    }
}

impl Drop for TestLibrary {
    fn drop(&mut self) {
        let stem = self.path.file_stem().and_then(|s| s.to_str()).unwrap_or("?");
        log(format!("close:{stem}"));
    }
}

/// Serves libraries by file stem, whatever directory they were found in.
struct StemOpener;

impl LibraryOpener for StemOpener {
    fn open(&self, path: &Path) -> AppResult<Box<dyn ExtensionLibrary>> {
        let create: CreateExtensionFn = match path.file_stem().and_then(|s| s.to_str()) {
            Some("alpha") => create_alpha,
            Some("beta") => create_beta,
            Some("broken") => create_broken,
            Some("faulty") => create_faulty,
            _ => return Err(AppError::load_failed(format!("unknown library {}", path.display()))),
        };
        Ok(Box::new(TestLibrary {
            path: path.to_path_buf(),
            create,
        }))
    }
}

fn runtime_over(dir: &Path, libraries: &[&str]) -> (Runtime, FakeSiteHandle) {
    for name in libraries {
        std::fs::write(dir.join(format!("{name}.ext")), b"").expect("write");
    }

    let mut config = RuntimeConfig::default();
    config.extensions.directory = dir.to_path_buf();
    config.extensions.library_extension = "ext".to_string();
    config.interception.bring_up_delay_ms = 0;

    let original: DispatchFn = original;
    let site = FakeSiteInterceptor::new().with_original(SITE, EntryPoint::from_ptr(original as *const ()));
    let handle = site.handle();
    let runtime = Runtime::builder(config, Box::new(site), |f: *mut c_void| -> Option<String> {
        (!f.is_null()).then(|| "TakeDamage".to_string())
    })
    .opener(StemOpener)
    .build();
    (runtime, handle)
}

#[test]
fn test_full_lifecycle_ordering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut runtime, handle) = runtime_over(dir.path(), &["alpha", "beta", "broken"]);
    take_journal();

    let announced = std::rc::Rc::new(Cell::new(None));
    let seen = announced.clone();
    runtime
        .events()
        .subscribe(move |event: &mut ExtensionsRegistered| seen.set(Some(event.count)));

    assert_eq!(runtime.start().expect("start"), 2);
    assert_eq!(announced.get(), Some(2));
    let states: Vec<ExtensionState> = runtime.loaded_extensions().iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![ExtensionState::Registered, ExtensionState::Registered, ExtensionState::Loaded]
    );
    assert_eq!(take_journal(), vec!["register:alpha", "register:beta"]);

    // Actions queued during registration run before the first tick event.
    let stats = runtime.tick(0.5);
    assert_eq!(stats.actions, 3);
    assert_eq!(
        take_journal(),
        vec!["action:alpha", "action:beta", "action:broken", "tick:alpha:1", "tick:beta:1"]
    );

    runtime.action_sender().enqueue(|| log("late"));
    runtime.shutdown();
    assert_eq!(
        take_journal(),
        vec![
            "shutdown-event:alpha",
            "shutdown-event:beta",
            "destroy:broken",
            "close:broken",
            "unregister:beta",
            "destroy:beta",
            "close:beta",
            "unregister:alpha",
            "destroy:alpha",
            "close:alpha",
        ]
    );
    assert_eq!(runtime.interceptor().total_hooks(), 0);
    assert!(!handle.is_initialized());

    runtime.shutdown();
    assert!(take_journal().is_empty());
}

#[test]
fn test_hooks_from_every_extension_run_in_registration_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut runtime, handle) = runtime_over(dir.path(), &["alpha", "beta"]);
    runtime.start().expect("start");
    take_journal();

    let detour = handle.detour_at(SITE).expect("dispatch site bound");
    let dispatch = unsafe { std::mem::transmute::<*const (), DispatchFn>(detour.as_ptr()) };
    let before = ORIGINAL_CALLS.with(Cell::get);
    let mut marker = 0u8;
    unsafe {
        dispatch(
            std::ptr::null_mut(),
            (&raw mut marker).cast(),
            std::ptr::null_mut(),
        )
    };

    assert_eq!(take_journal(), vec!["hook:alpha", "hook:beta"]);
    assert_eq!(ORIGINAL_CALLS.with(Cell::get), before + 1);
}

#[test]
fn test_panicking_subscriber_does_not_starve_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut runtime, _) = runtime_over(dir.path(), &["alpha", "faulty"]);
    assert_eq!(runtime.start().expect("start"), 2);
    take_journal();

    let stats = runtime.tick(0.1);
    assert_eq!(stats.subscribers, 2);
    let journal = take_journal();
    assert!(journal.contains(&"tick:alpha:1".to_string()));
    assert_eq!(runtime.tick(0.1).frame_number, 2);
}

#[test]
fn test_missing_directory_loads_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut runtime, _) = runtime_over(&dir.path().join("absent"), &[]);

    assert_eq!(runtime.start().expect("start"), 0);
    assert!(runtime.loaded_extensions().is_empty());
}
