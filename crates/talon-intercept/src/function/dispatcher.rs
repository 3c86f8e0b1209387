//! Hook chain evaluation.
//!
//! Every callback in the chain runs, in registration order, with the same
//! [`InterceptedCall`]. The original call proceeds only if every callback
//! allowed it:
//! - A callback returning `false` suppresses the original but does not stop
//!   the remaining callbacks.
//! - A panicking callback is logged with the function name and counts as
//!   `true`.

use tracing::{debug, warn};

use talon_core::guard::isolate;
use talon_core::types::HookId;

use super::call::InterceptedCall;
use super::registry::HookCallback;

/// What happened to one intercepted call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The call identity could not be resolved; the original ran without
    /// consulting any hook.
    Unresolved,
    /// Nothing is hooked on this function; the original ran.
    NoHooks {
        /// Resolved function name.
        function: String,
    },
    /// Every callback allowed the call; the original ran.
    Allowed {
        /// Resolved function name.
        function: String,
        /// Number of callbacks invoked.
        invoked: usize,
    },
    /// At least one callback returned `false`; the original did not run.
    Suppressed {
        /// Resolved function name.
        function: String,
        /// Number of callbacks invoked.
        invoked: usize,
        /// Hooks that voted to suppress, in registration order.
        blocked_by: Vec<HookId>,
    },
}

impl DispatchOutcome {
    /// Returns whether the original entry point is (or was) invoked.
    pub fn calls_original(&self) -> bool {
        !matches!(self, Self::Suppressed { .. })
    }
}

/// Runs `chain` against `call` and folds the results with logical AND.
pub(crate) fn run_chain(
    chain: &[(HookId, HookCallback)],
    call: &mut InterceptedCall<'_>,
) -> DispatchOutcome {
    let function = call.name().to_string();
    let mut blocked_by = Vec::new();

    for (id, callback) in chain {
        let allow = match isolate(|| callback(call)) {
            Ok(allow) => allow,
            Err(panic) => {
                warn!(
                    function = %function,
                    hook_id = %id,
                    panic = %panic,
                    "Hook callback panicked; treating it as allow"
                );
                true
            }
        };
        if !allow {
            blocked_by.push(*id);
        }
    }

    let invoked = chain.len();
    if blocked_by.is_empty() {
        DispatchOutcome::Allowed { function, invoked }
    } else {
        debug!(
            function = %function,
            blocked = blocked_by.len(),
            "Original call suppressed by hooks"
        );
        DispatchOutcome::Suppressed {
            function,
            invoked,
            blocked_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn call_named(name: &str) -> InterceptedCall<'_> {
        InterceptedCall::new(
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            name,
        )
    }

    fn chain_of(votes: &[bool]) -> Vec<(HookId, HookCallback)> {
        votes
            .iter()
            .map(|&vote| {
                let callback: HookCallback = Rc::new(move |_: &mut InterceptedCall<'_>| vote);
                (HookId::next(), callback)
            })
            .collect()
    }

    #[test]
    fn test_and_semantics_exhaustive() {
        for n in 2..=3 {
            for mask in 0..(1u32 << n) {
                let votes: Vec<bool> = (0..n).map(|i| mask & (1 << i) != 0).collect();
                let outcome = run_chain(&chain_of(&votes), &mut call_named("Fire"));
                assert_eq!(
                    outcome.calls_original(),
                    votes.iter().all(|&v| v),
                    "votes {votes:?}"
                );
            }
        }
    }

    #[test]
    fn test_every_callback_runs_after_a_block() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let chain: Vec<(HookId, HookCallback)> = (0..3)
            .map(|i| {
                let seen = seen.clone();
                let callback: HookCallback = Rc::new(move |_: &mut InterceptedCall<'_>| {
                    seen.borrow_mut().push(i);
                    i != 0
                });
                (HookId::next(), callback)
            })
            .collect();

        let outcome = run_chain(&chain, &mut call_named("Fire"));
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        match outcome {
            DispatchOutcome::Suppressed {
                invoked, blocked_by, ..
            } => {
                assert_eq!(invoked, 3);
                assert_eq!(blocked_by, vec![chain[0].0]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_panicking_callback_counts_as_allow() {
        let ran_after = Rc::new(RefCell::new(false));
        let flag = ran_after.clone();
        let faulty: HookCallback =
            Rc::new(|_: &mut InterceptedCall<'_>| -> bool { panic!("extension bug") });
        let healthy: HookCallback = Rc::new(move |_: &mut InterceptedCall<'_>| {
            *flag.borrow_mut() = true;
            true
        });
        let chain = vec![(HookId::next(), faulty), (HookId::next(), healthy)];

        let outcome = run_chain(&chain, &mut call_named("Fire"));
        assert!(*ran_after.borrow());
        assert_eq!(
            outcome,
            DispatchOutcome::Allowed {
                function: "Fire".to_string(),
                invoked: 2
            }
        );
    }
}
