//! engine::engine_hooks
//!
//! Test-only hooks for fault injection during synchronization.
//!
//! # Architecture
//!
//! The hooks let tests break a sync at precise points:
//!
//! - `before_apply`: after planning, with the published write lock held
//!   and the draft unlocked. A hook that edits the draft here makes the post-apply
//!   verification see a changed fingerprint.
//! - `fail_at_step`: the executor reports an error at the given step index.
//! - `crash_after_apply`: the engine stops after applying but before the
//!   ledger write, without rolling back, as if the process died.
//! - `fail_ledger_write`: the next ledger append fails.
//!
//! # Usage
//!
//! ```ignore
//! use casework::engine::engine_hooks;
//!
//! engine_hooks::set_crash_after_apply();
//! let outcome = engine.sync_root(root);
//! engine_hooks::clear();
//! ```
//!
//! # Thread Safety
//!
//! Hooks are stored in thread-local storage. Sync runs on the calling
//! thread, so a hook set by a test only affects that test.
//!
//! # Invariants
//!
//! - Hooks are only available under `cfg(test)` or `fault_injection` feature
//! - Each test must call `clear()` to avoid polluting later tests on the
//!   same thread

use std::cell::RefCell;

use crate::core::types::NodeId;

type BeforeApply = Box<dyn Fn(NodeId)>;

/// Container for engine hooks.
#[derive(Default)]
struct EngineHooks {
    before_apply: Option<BeforeApply>,
    fail_at_step: Option<usize>,
    crash_after_apply: bool,
    fail_ledger_write: bool,
}

thread_local! {
    static HOOKS: RefCell<EngineHooks> = RefCell::new(EngineHooks::default());
}

/// Run `f` with the sync root after planning, before apply.
pub fn set_before_apply<F>(f: F)
where
    F: Fn(NodeId) + 'static,
{
    HOOKS.with(|h| h.borrow_mut().before_apply = Some(Box::new(f)));
}

/// Make the executor fail when it reaches step `index`.
pub fn set_fail_at_step(index: usize) {
    HOOKS.with(|h| h.borrow_mut().fail_at_step = Some(index));
}

/// Stop the next sync between apply and ledger write.
pub fn set_crash_after_apply() {
    HOOKS.with(|h| h.borrow_mut().crash_after_apply = true);
}

/// Fail the next ledger append.
pub fn set_fail_ledger_write() {
    HOOKS.with(|h| h.borrow_mut().fail_ledger_write = true);
}

/// Clear all hooks.
pub fn clear() {
    HOOKS.with(|h| *h.borrow_mut() = EngineHooks::default());
}

/// Check if any hook is currently set.
pub fn has_hooks() -> bool {
    HOOKS.with(|h| {
        let h = h.borrow();
        h.before_apply.is_some()
            || h.fail_at_step.is_some()
            || h.crash_after_apply
            || h.fail_ledger_write
    })
}

pub(crate) fn invoke_before_apply(root: NodeId) {
    // Take the hook out so it can touch the stores without re-entering.
    let hook = HOOKS.with(|h| h.borrow_mut().before_apply.take());
    if let Some(f) = hook {
        f(root);
        HOOKS.with(|h| {
            let mut h = h.borrow_mut();
            if h.before_apply.is_none() {
                h.before_apply = Some(f);
            }
        });
    }
}

pub(crate) fn should_fail_step(index: usize) -> bool {
    HOOKS.with(|h| h.borrow().fail_at_step == Some(index))
}

/// One-shot.
pub(crate) fn take_crash_after_apply() -> bool {
    HOOKS.with(|h| std::mem::take(&mut h.borrow_mut().crash_after_apply))
}

/// One-shot.
pub(crate) fn take_fail_ledger_write() -> bool {
    HOOKS.with(|h| std::mem::take(&mut h.borrow_mut().fail_ledger_write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn set_and_clear_hooks() {
        clear();
        assert!(!has_hooks());

        set_fail_at_step(2);
        assert!(has_hooks());
        assert!(should_fail_step(2));
        assert!(!should_fail_step(1));

        clear();
        assert!(!has_hooks());
    }

    #[test]
    fn one_shot_flags_reset() {
        set_crash_after_apply();
        set_fail_ledger_write();
        assert!(take_crash_after_apply());
        assert!(!take_crash_after_apply());
        assert!(take_fail_ledger_write());
        assert!(!take_fail_ledger_write());
        clear();
    }

    #[test]
    fn before_apply_receives_root_and_persists() {
        let seen = Rc::new(Cell::new(0u64));
        let seen_clone = seen.clone();
        set_before_apply(move |root| seen_clone.set(seen_clone.get() + root.get()));

        invoke_before_apply(NodeId::new(3));
        invoke_before_apply(NodeId::new(4));
        assert_eq!(seen.get(), 7);

        clear();
        invoke_before_apply(NodeId::new(100));
        assert_eq!(seen.get(), 7);
    }
}
