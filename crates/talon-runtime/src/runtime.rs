//! Host runtime context.
//!
//! [`Runtime`] is the single owner of every host-side service: the action
//! queue, the event bus, the function interceptor, the extension loader and
//! the configuration store. The host drives it from one thread:
//!
//! 1. [`Runtime::bring_up`] binds the dispatch hook, retrying while the
//!    dispatch table is not available yet.
//! 2. [`Runtime::load_extensions`] discovers and registers extensions.
//! 3. [`Runtime::tick`] once per host frame.
//! 4. [`Runtime::shutdown`] (or drop) tears everything down in order.

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use talon_core::config::RuntimeConfig;
use talon_core::error::{AppError, ErrorKind};
use talon_core::result::AppResult;
use talon_intercept::{CallSiteInterceptor, FunctionInterceptor, IdentityResolver, SiteKey};
use talon_plugin::api::config::{ConfigStore, MemoryConfigStore};
use talon_plugin::events::{EventBus, ExtensionsRegistered, ShutdownEvent, TickEvent};
use talon_plugin::{ExtensionLoader, ExtensionSnapshot, HostContext, LibraryOpener};

use crate::queue::{ActionQueue, ActionSender};

/// What one [`Runtime::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    /// Frame number carried by the emitted [`TickEvent`].
    pub frame_number: u64,
    /// Queued actions executed before the event.
    pub actions: usize,
    /// Subscribers the event reached.
    pub subscribers: usize,
}

/// Assembles a [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    interceptor: Rc<FunctionInterceptor>,
    opener: Option<Box<dyn LibraryOpener>>,
    store: Option<Rc<dyn ConfigStore>>,
}

impl RuntimeBuilder {
    /// Opens extension libraries through `opener` instead of the platform loader.
    pub fn opener(mut self, opener: impl LibraryOpener + 'static) -> Self {
        self.opener = Some(Box::new(opener));
        self
    }

    /// Serves extension configuration from `store` instead of memory.
    pub fn config_store(mut self, store: Rc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Runtime {
        let loader = match self.opener {
            Some(opener) => ExtensionLoader::new(opener, self.config.extensions.library_extension.clone()),
            None => ExtensionLoader::native(&self.config.extensions),
        };
        let store = self
            .store
            .unwrap_or_else(|| Rc::new(MemoryConfigStore::new()));

        let queue = ActionQueue::new();
        let events = Rc::new(EventBus::new());
        let host = HostContext::new(
            events.clone(),
            self.interceptor.clone(),
            store,
            Arc::new(queue.sender()),
        );

        Runtime {
            config: self.config,
            queue,
            events,
            interceptor: self.interceptor,
            loader,
            host,
            frame: 0,
            shut_down: false,
        }
    }
}

/// Host-owned runtime context.
pub struct Runtime {
    config: RuntimeConfig,
    queue: ActionQueue,
    events: Rc<EventBus>,
    interceptor: Rc<FunctionInterceptor>,
    loader: ExtensionLoader,
    host: HostContext,
    frame: u64,
    shut_down: bool,
}

impl Runtime {
    /// Starts building a runtime that intercepts the dispatch slot named by
    /// `config.interception.dispatch_index` through `site`, naming calls with
    /// `resolver`.
    pub fn builder(
        config: RuntimeConfig,
        site: Box<dyn CallSiteInterceptor>,
        resolver: impl IdentityResolver + 'static,
    ) -> RuntimeBuilder {
        let dispatch_site = SiteKey::Index(config.interception.dispatch_index);
        RuntimeBuilder {
            interceptor: FunctionInterceptor::new(site, dispatch_site, resolver),
            config,
            opener: None,
            store: None,
        }
    }

    /// Binds the dispatch hook, retrying up to `bring_up_attempts` times with
    /// a fixed delay.
    ///
    /// Exhausting the attempts is logged at error level and returned as
    /// `HookFailed`; the host decides whether to continue without hooks.
    pub fn bring_up(&self) -> AppResult<()> {
        let attempts = self.config.interception.bring_up_attempts.max(1);
        let delay = self.config.interception.bring_up_delay();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.interceptor.initialize() {
                Ok(()) => {
                    info!(attempt, site = %self.interceptor.dispatch_site(), "Dispatch hook is up");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Dispatch hook bring-up attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        thread::sleep(delay);
                    }
                }
            }
        }

        error!(
            attempts,
            site = %self.interceptor.dispatch_site(),
            "Dispatch hook bring-up failed; function hooks will not fire"
        );
        let message = format!("Dispatch hook bring-up failed after {attempts} attempts");
        Err(match last_error {
            Some(cause) => AppError::with_source(ErrorKind::HookFailed, message, cause),
            None => AppError::hook_failed(message),
        })
    }

    /// Discovers extensions in the configured directory, registers them and
    /// emits [`ExtensionsRegistered`]. Returns how many registered.
    pub fn load_extensions(&mut self) -> usize {
        let directory = self.config.extensions.directory.clone();
        self.loader.discover_and_load(&directory);
        self.register_pending()
    }

    /// Loads and registers the single library at `path`. Returns whether it
    /// reached the registered state.
    pub fn load_extension(&mut self, path: &Path) -> bool {
        self.loader.load(path) && self.register_pending() > 0
    }

    fn register_pending(&mut self) -> usize {
        let count = self.loader.register_all(&self.host);
        self.events.emit(&mut ExtensionsRegistered { count });
        count
    }

    /// Brings the dispatch hook up, then loads extensions when
    /// `extensions.auto_load` is set.
    ///
    /// A failed bring-up is returned after extensions have been loaded, so a
    /// host that tolerates it still gets events and queued actions.
    pub fn start(&mut self) -> AppResult<usize> {
        let bring_up = self.bring_up();
        let registered = if self.config.extensions.auto_load {
            self.load_extensions()
        } else {
            debug!("Extension auto-load disabled");
            0
        };
        bring_up.map(|()| registered)
    }

    /// Runs one host frame: drains the action queue, then emits [`TickEvent`].
    pub fn tick(&mut self, delta_seconds: f32) -> TickStats {
        let actions = self.queue.drain();
        self.frame += 1;
        let subscribers = self.events.emit(&mut TickEvent {
            frame_number: self.frame,
            delta_seconds,
        });
        TickStats {
            frame_number: self.frame,
            actions,
            subscribers,
        }
    }

    /// Tears the runtime down. Idempotent.
    ///
    /// Order: emit [`ShutdownEvent`], discard queued actions, unload every
    /// extension, drop leftover hooks and subscriptions, unbind the dispatch
    /// hook. Queued actions are discarded before unloading because they may
    /// hold code owned by an extension library.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!(frames = self.frame, "Runtime shutting down");

        self.events.emit(&mut ShutdownEvent);
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!(discarded, "Pending actions discarded at shutdown");
        }
        self.loader.unload_all();
        let hooks = self.interceptor.clear_all_hooks();
        self.events.clear();
        self.interceptor.shutdown();

        info!(leftover_hooks = hooks, "Runtime shut down");
    }

    /// Returns whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Number of ticks run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    pub fn interceptor(&self) -> &Rc<FunctionInterceptor> {
        &self.interceptor
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Producer handle for worker threads.
    pub fn action_sender(&self) -> ActionSender {
        self.queue.sender()
    }

    /// Services handed to extensions.
    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// Snapshots of the loaded extensions, in load order.
    pub fn loaded_extensions(&self) -> Vec<ExtensionSnapshot> {
        self.loader.get_loaded()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("frame", &self.frame)
            .field("queue", &self.queue)
            .field("interceptor", &self.interceptor)
            .field("loader", &self.loader)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use talon_intercept::function::DispatchFn;
    use talon_intercept::site::EntryPoint;
    use talon_intercept::site::fake::{FakeSiteHandle, FakeSiteInterceptor};

    unsafe extern "C" fn noop_original(_: *mut c_void, _: *mut c_void, _: *mut c_void) {}

    fn config(attempts: u32) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.interception.bring_up_attempts = attempts;
        config.interception.bring_up_delay_ms = 0;
        config.extensions.auto_load = false;
        config
    }

    fn site(fake: FakeSiteInterceptor) -> (Box<dyn CallSiteInterceptor>, FakeSiteHandle) {
        let original: DispatchFn = noop_original;
        let fake = fake.with_original(SiteKey::Index(68), EntryPoint::from_ptr(original as *const ()));
        let handle = fake.handle();
        (Box::new(fake), handle)
    }

    fn runtime(fake: FakeSiteInterceptor, attempts: u32) -> (Runtime, FakeSiteHandle) {
        let (site, handle) = site(fake);
        let runtime = Runtime::builder(config(attempts), site, |_: *mut c_void| -> Option<String> {
            Some("TakeDamage".to_string())
        })
        .build();
        (runtime, handle)
    }

    #[test]
    fn test_bring_up_retries_until_table_is_available() {
        let (runtime, handle) = runtime(FakeSiteInterceptor::new().failing_initializations(2), 5);

        runtime.bring_up().expect("bring up");
        assert_eq!(handle.init_attempts(), 3);
        assert!(runtime.interceptor().is_initialized());
    }

    #[test]
    fn test_bring_up_gives_up_loudly() {
        let (runtime, handle) = runtime(FakeSiteInterceptor::new().failing_initializations(10), 3);

        let err = runtime.bring_up().expect_err("exhausted");
        assert_eq!(err.kind, ErrorKind::HookFailed);
        assert!(err.source.is_some());
        assert_eq!(handle.init_attempts(), 3);
        assert!(!runtime.interceptor().is_initialized());
    }

    #[test]
    fn test_tick_drains_before_emitting() {
        let (mut runtime, _) = runtime(FakeSiteInterceptor::new(), 1);
        let drained = Arc::new(AtomicUsize::new(0));
        let seen_at_tick = Rc::new(Cell::new(usize::MAX));

        let counter = drained.clone();
        let seen = seen_at_tick.clone();
        runtime.events().subscribe(move |tick: &mut TickEvent| {
            assert!(tick.frame_number >= 1);
            seen.set(counter.load(Ordering::SeqCst));
        });

        for _ in 0..3 {
            let drained = drained.clone();
            runtime.action_sender().enqueue(move || {
                drained.fetch_add(1, Ordering::SeqCst);
            });
        }

        let stats = runtime.tick(0.016);
        assert_eq!(
            stats,
            TickStats {
                frame_number: 1,
                actions: 3,
                subscribers: 1
            }
        );
        assert_eq!(seen_at_tick.get(), 3);
        assert_eq!(runtime.tick(0.016).frame_number, 2);
    }

    #[test]
    fn test_shutdown_order_and_idempotence() {
        let (mut runtime, handle) = runtime(FakeSiteInterceptor::new(), 1);
        runtime.bring_up().expect("bring up");

        let journal = Rc::new(RefCell::new(Vec::<&'static str>::new()));
        let log = journal.clone();
        runtime
            .events()
            .subscribe(move |_: &mut ShutdownEvent| log.borrow_mut().push("shutdown-event"));
        runtime.interceptor().add_hook("TakeDamage", |_| true);

        let ran = Arc::new(AtomicUsize::new(0));
        let pending = ran.clone();
        runtime.queue().enqueue(move || {
            pending.fetch_add(1, Ordering::SeqCst);
        });

        runtime.shutdown();
        assert_eq!(*journal.borrow(), vec!["shutdown-event"]);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.queue().pending_count(), 0);
        assert_eq!(runtime.interceptor().total_hooks(), 0);
        assert_eq!(runtime.events().total_subscriptions(), 0);
        assert!(!runtime.interceptor().is_initialized());
        assert!(!handle.is_initialized());
        assert!(runtime.is_shut_down());

        runtime.shutdown();
        assert_eq!(journal.borrow().len(), 1);
    }

    #[test]
    fn test_load_extensions_from_empty_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (site, _) = site(FakeSiteInterceptor::new());
        let mut config = config(1);
        config.extensions.directory = dir.path().to_path_buf();
        let mut runtime = Runtime::builder(config, site, |_: *mut c_void| -> Option<String> { None }).build();

        let announced = Rc::new(Cell::new(None));
        let seen = announced.clone();
        runtime
            .events()
            .subscribe(move |event: &mut ExtensionsRegistered| seen.set(Some(event.count)));

        assert_eq!(runtime.load_extensions(), 0);
        assert_eq!(announced.get(), Some(0));
        assert!(runtime.loaded_extensions().is_empty());
    }

    #[test]
    fn test_config_store_is_shared_with_extensions() {
        let (site, _) = site(FakeSiteInterceptor::new());
        let store: Rc<dyn ConfigStore> = Rc::new(
            MemoryConfigStore::from_json(serde_json::json!({ "scaler": { "factor": 0.25 } })).expect("store"),
        );
        let runtime = Runtime::builder(config(1), site, |_: *mut c_void| -> Option<String> { None })
            .config_store(store)
            .build();

        assert_eq!(
            runtime.host().config.get("scaler.factor"),
            Some(serde_json::json!(0.25))
        );
    }
}
