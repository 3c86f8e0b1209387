//! Loads the damage-scaler `cdylib` from the build directory through the
//! platform loader, next to hooks and subscriptions the host made itself.
//!
//! The library carries its own copies of the Talon crates and of `tracing`,
//! so everything it does must still land in the host's hook table, event bus
//! and log output.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::{CStr, c_void};
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use ext_damage_scaler::DamageParams;
use talon_core::types::QueuedAction;
use talon_intercept::function::NulTerminatedNameResolver;
use talon_intercept::site::SiteKey;
use talon_intercept::site::fake::FakeSiteInterceptor;
use talon_intercept::{DispatchOutcome, FunctionInterceptor};
use talon_plugin::api::{ConfigStore, MemoryConfigStore};
use talon_plugin::events::{ShutdownEvent, TickEvent};
use talon_plugin::{ActionSink, EventBus, ExtensionLoader, ExtensionState, HostContext, NativeOpener};

const TAKE_DAMAGE: &CStr = c"TakeDamage";

/// Finds the scaler library next to the test binary.
fn scaler_library() -> Option<PathBuf> {
    let stem = format!("{DLL_PREFIX}ext_damage_scaler");
    let deps = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let profile = deps.parent()?.to_path_buf();

    let exact = profile.join(format!("{stem}{DLL_SUFFIX}"));
    if exact.is_file() {
        return Some(exact);
    }
    std::fs::read_dir(&deps)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&stem) && n.ends_with(DLL_SUFFIX))
        })
}

#[derive(Default)]
struct CollectingSink {
    actions: Mutex<Vec<QueuedAction>>,
}

impl CollectingSink {
    fn take(&self) -> Vec<QueuedAction> {
        std::mem::take(&mut *self.actions.lock().expect("lock"))
    }
}

impl ActionSink for CollectingSink {
    fn enqueue(&self, action: QueuedAction) {
        self.actions.lock().expect("lock").push(action);
    }
}

/// Log output captured from the host's `tracing` subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn take_damage(interceptor: &FunctionInterceptor, amount: f32) -> (DispatchOutcome, f32) {
    let mut params = DamageParams::new(amount);
    let outcome = interceptor.evaluate(
        std::ptr::null_mut(),
        TAKE_DAMAGE.as_ptr().cast_mut().cast::<c_void>(),
        (&raw mut params).cast(),
    );
    (outcome, params.amount)
}

#[test]
fn test_library_extension_shares_host_ids_logging_and_cleanup() {
    let Some(library) = scaler_library() else {
        eprintln!("ext-damage-scaler cdylib not built next to the test binary; skipping");
        return;
    };

    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let resolver = unsafe { NulTerminatedNameResolver::new() };
        let interceptor = FunctionInterceptor::new(Box::new(FakeSiteInterceptor::new()), SiteKey::Index(68), resolver);
        let events = Rc::new(EventBus::new());
        let store = MemoryConfigStore::new();
        store
            .set("damage-scaler.report_every", serde_json::json!(1))
            .expect("set");
        let sink = Arc::new(CollectingSink::default());
        let host = HostContext::new(events.clone(), interceptor.clone(), Rc::new(store), sink.clone());

        let host_hook = interceptor.add_hook("HostOnly", |_| true);
        events.subscribe(|_: &mut TickEvent| {});

        let mut loader = ExtensionLoader::new(Box::new(NativeOpener), DLL_SUFFIX.trim_start_matches('.'));
        assert!(loader.load(&library), "load {}", library.display());
        assert_eq!(loader.register_all(&host), 1);
        assert_eq!(loader.get_loaded()[0].state, ExtensionState::Registered);
        assert_eq!(interceptor.hooked_functions(), vec!["HostOnly", "TakeDamage"]);
        assert_eq!(events.subscriber_count::<TickEvent>(), 2);

        let (outcome, amount) = take_damage(&interceptor, 10.0);
        assert!(outcome.calls_original());
        assert_eq!(amount, 5.0);

        // Removing the host's hook must not touch the library's.
        interceptor.remove_hook(host_hook).expect("host hook");
        assert_eq!(interceptor.hook_count("TakeDamage"), 1);
        let host_hook = interceptor.add_hook("HostOnly", |_| true);

        drive_subscribers(&events);
        let pending = sink.take();
        assert_eq!(pending.len(), 1);

        loader.unload_all();
        assert!(loader.is_empty());
        assert_eq!(interceptor.hooked_functions(), vec!["HostOnly"]);
        assert_eq!(interceptor.hook_count("HostOnly"), 1);
        assert_eq!(events.subscriber_count::<TickEvent>(), 1);
        assert_eq!(events.subscriber_count::<ShutdownEvent>(), 0);
        assert!(interceptor.remove_hook(host_hook).is_ok());

        // The library queued this during registration and is closed now; the
        // action is skipped and leaked rather than run or dropped.
        for action in pending {
            action();
        }
    });

    let logs = captured.text();
    assert!(logs.contains("scaling TakeDamage by 0.5"), "{logs}");
    assert!(!logs.contains("active with factor"), "{logs}");
    assert!(logs.contains("final: 1 hits scaled"), "{logs}");
    assert!(logs.contains("damage-scaler"), "{logs}");
}

/// Drives the library's subscribers: a tick report and the shutdown summary.
fn drive_subscribers(events: &EventBus) {
    events.emit(&mut TickEvent {
        frame_number: 1,
        delta_seconds: 0.016,
    });
    events.emit(&mut ShutdownEvent);
}
