//! Context bundle handed to extensions at registration.
//!
//! The host owns one [`HostContext`]: shared handles to the event bus, the
//! function interceptor, the configuration store and the action queue. Each
//! extension receives an [`ExtensionContext`] derived from it that records
//! every hook and subscription the extension creates, so the loader can
//! release them when the extension is unloaded.
//!
//! An extension library carries its own copy of this crate and of everything
//! below it. The generic methods of [`ExtensionContext`] are compiled into the
//! library, so they only wrap and box the callback; the work itself (id
//! allocation, bookkeeping, logging) happens behind trait objects the host
//! built. Panics are caught on the library's side of each callback, because
//! an unwind cannot cross into another copy of the standard library.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use talon_core::guard::isolate;
use talon_core::result::AppResult;
use talon_core::types::{HookId, QueuedAction, SubscriptionId};
use talon_intercept::function::HookCallback;
use talon_intercept::{FunctionInterceptor, InterceptedCall};

use super::config::{ConfigSection, ConfigStore};
use super::log::ExtensionLogger;
use crate::events::bus::{ErasedCallback, erase};
use crate::events::{Event, EventBus};

/// Producer side of the host's action queue.
pub trait ActionSink: Send + Sync {
    /// Hands `action` to the host's execution context.
    fn enqueue(&self, action: QueuedAction);
}

/// Shared host services, owned by the host runtime.
#[derive(Clone)]
pub struct HostContext {
    /// Event bus.
    pub events: Rc<EventBus>,
    /// Function-call interceptor.
    pub hooks: Rc<FunctionInterceptor>,
    /// Configuration storage.
    pub config: Rc<dyn ConfigStore>,
    /// Action queue producer.
    pub actions: Arc<dyn ActionSink>,
}

impl HostContext {
    /// Bundles the host services.
    pub fn new(
        events: Rc<EventBus>,
        hooks: Rc<FunctionInterceptor>,
        config: Rc<dyn ConfigStore>,
        actions: Arc<dyn ActionSink>,
    ) -> Self {
        Self {
            events,
            hooks,
            config,
            actions,
        }
    }

    /// Derives the context for `extension` together with its registration
    /// record. Actions the extension queues run only while `gate` is open.
    pub(crate) fn scoped(&self, extension: &str, gate: &ActionGate) -> (ExtensionContext, Rc<Registrations>) {
        let registrations = Rc::new(Registrations::new(self.events.clone(), self.hooks.clone()));
        let services: Rc<dyn ContextServices> = registrations.clone();
        let ctx = ExtensionContext {
            name: Rc::from(extension),
            services,
            config: ConfigSection::new(extension, self.config.clone()),
            log: ExtensionLogger::new(extension),
            actions: Arc::new(GatedSink {
                extension: Arc::from(extension),
                inner: self.actions.clone(),
                gate: gate.clone(),
            }),
        };
        (ctx, registrations)
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("events", &self.events)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Operations an [`ExtensionContext`] forwards to the host.
///
/// Only non-generic signatures: every call lands in host-compiled code.
pub(crate) trait ContextServices {
    fn subscribe(&self, key: &str, callback: ErasedCallback) -> SubscriptionId;
    fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool;
    fn emit(&self, key: &str, event: &mut dyn Any) -> usize;
    fn add_hook(&self, function: &str, callback: HookCallback) -> HookId;
    fn remove_hook(&self, id: HookId) -> AppResult<()>;
    fn hook_count(&self) -> usize;
    fn subscription_count(&self) -> usize;
}

/// Hooks and subscriptions created by one extension.
pub(crate) struct Registrations {
    events: Rc<EventBus>,
    interceptor: Rc<FunctionInterceptor>,
    hooks: RefCell<Vec<HookId>>,
    subscriptions: RefCell<Vec<SubscriptionId>>,
}

impl Registrations {
    fn new(events: Rc<EventBus>, interceptor: Rc<FunctionInterceptor>) -> Self {
        Self {
            events,
            interceptor,
            hooks: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn hook_ids(&self) -> Vec<HookId> {
        self.hooks.borrow().clone()
    }

    /// Removes every recorded hook and subscription.
    pub(crate) fn release(&self, extension: &str) {
        let hooks = std::mem::take(&mut *self.hooks.borrow_mut());
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());

        for id in &hooks {
            let _ = self.interceptor.remove_hook(*id);
        }
        for id in &subscriptions {
            self.events.remove_subscription(*id);
        }
        debug!(
            extension = %extension,
            hooks = hooks.len(),
            subscriptions = subscriptions.len(),
            "Extension registrations released"
        );
    }
}

impl ContextServices for Registrations {
    fn subscribe(&self, key: &str, callback: ErasedCallback) -> SubscriptionId {
        let id = self.events.subscribe_erased(key, callback);
        self.subscriptions.borrow_mut().push(id);
        id
    }

    fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        self.subscriptions.borrow_mut().retain(|s| *s != id);
        self.events.unsubscribe_erased(key, id)
    }

    fn emit(&self, key: &str, event: &mut dyn Any) -> usize {
        self.events.emit_erased(key, event)
    }

    fn add_hook(&self, function: &str, callback: HookCallback) -> HookId {
        let id = self.interceptor.add_hook_callback(function, callback);
        self.hooks.borrow_mut().push(id);
        id
    }

    fn remove_hook(&self, id: HookId) -> AppResult<()> {
        self.hooks.borrow_mut().retain(|h| *h != id);
        self.interceptor.remove_hook(id)
    }

    fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }
}

/// Open while an extension's library is loaded.
///
/// Actions an extension queued are checked against its gate when the host
/// runs or drops them. Once the gate is closed their code may be unmapped,
/// so they are neither run nor dropped, only leaked.
#[derive(Debug, Clone)]
pub(crate) struct ActionGate(Arc<AtomicBool>);

impl ActionGate {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A queued action bound to its extension's [`ActionGate`].
struct GatedAction {
    action: Option<QueuedAction>,
    gate: ActionGate,
}

impl GatedAction {
    fn run(mut self) {
        let Some(action) = self.action.take() else {
            return;
        };
        if self.gate.is_open() {
            action();
        } else {
            debug!("Skipping action queued by an unloaded extension");
            std::mem::forget(action);
        }
    }
}

impl Drop for GatedAction {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            if !self.gate.is_open() {
                std::mem::forget(action);
            }
        }
    }
}

/// [`ActionSink`] handed to one extension.
struct GatedSink {
    extension: Arc<str>,
    inner: Arc<dyn ActionSink>,
    gate: ActionGate,
}

impl ActionSink for GatedSink {
    fn enqueue(&self, action: QueuedAction) {
        if !self.gate.is_open() {
            warn!(extension = %self.extension, "Discarding action from an unloaded extension");
            std::mem::forget(action);
            return;
        }
        let gated = GatedAction {
            action: Some(action),
            gate: self.gate.clone(),
        };
        self.inner.enqueue(Box::new(move || gated.run()));
    }
}

/// What an extension sees of the host.
///
/// Cheap to clone; an extension may keep a clone for use after registration.
/// Hooks and subscriptions created through any clone are released when the
/// extension is unloaded.
#[derive(Clone)]
pub struct ExtensionContext {
    name: Rc<str>,
    services: Rc<dyn ContextServices>,
    config: ConfigSection,
    log: ExtensionLogger,
    actions: Arc<dyn ActionSink>,
}

impl ExtensionContext {
    /// Name of the extension this context belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to events of type `E`.
    ///
    /// A panic in `callback` is logged and otherwise ignored.
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&mut E) + 'static,
    {
        let log = self.log.clone();
        let contained = move |event: &mut E| {
            if let Err(panic) = isolate(|| callback(event)) {
                log.warn(&format!("Subscriber for '{}' panicked: {panic}", E::KEY));
            }
        };
        self.services.subscribe(E::KEY, erase::<E, _>(contained))
    }

    /// Cancels a subscription made through this context.
    pub fn unsubscribe<E: Event>(&self, id: SubscriptionId) -> bool {
        self.services.unsubscribe(E::KEY, id)
    }

    /// Delivers `event` to every subscriber of `E`, returning how many ran.
    pub fn emit<E: Event>(&self, event: &mut E) -> usize {
        self.services.emit(E::KEY, event)
    }

    /// Hooks calls to `function`. Return `false` from `callback` to suppress
    /// the original call. A panic in `callback` is logged and counts as `true`.
    pub fn add_hook<F>(&self, function: &str, callback: F) -> HookId
    where
        F: Fn(&mut InterceptedCall<'_>) -> bool + 'static,
    {
        let log = self.log.clone();
        let name = function.to_string();
        let contained: HookCallback = Rc::new(move |call: &mut InterceptedCall<'_>| {
            isolate(|| callback(call)).unwrap_or_else(|panic| {
                log.warn(&format!("Hook on '{name}' panicked: {panic}"));
                true
            })
        });
        self.services.add_hook(function, contained)
    }

    /// Removes a hook made through this context.
    pub fn remove_hook(&self, id: HookId) -> AppResult<()> {
        self.services.remove_hook(id)
    }

    /// Configuration scoped to this extension.
    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    /// Logger tagged with this extension's name.
    pub fn log(&self) -> &ExtensionLogger {
        &self.log
    }

    /// Queues `action` to run on the host's execution context at the next tick.
    ///
    /// A panic in `action` is logged and otherwise ignored.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        let log = self.log.clone();
        self.actions.enqueue(Box::new(move || {
            if let Err(panic) = isolate(action) {
                log.warn(&format!("Queued action panicked: {panic}"));
            }
        }));
    }

    /// Action queue producer that can be moved to worker threads.
    ///
    /// Unlike [`enqueue`](Self::enqueue), actions handed to the sink directly
    /// must not panic.
    pub fn action_sink(&self) -> Arc<dyn ActionSink> {
        self.actions.clone()
    }
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("name", &self.name)
            .field("hooks", &self.services.hook_count())
            .field("subscriptions", &self.services.subscription_count())
            .finish()
    }
}
