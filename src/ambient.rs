//! Thread-scoped ambient context.
//!
//! Code handling a request can install the request's context once and have every resolution on
//! the same thread pick it up without passing it around.
use std::cell::RefCell;

use crate::ContextSet;

thread_local! {
    static AMBIENT: RefCell<Option<ContextSet>> = const { RefCell::new(None) };
}

/// Run `f` with `contexts` installed as the ambient context of the current thread.
///
/// Calls nest; the previous ambient context is restored when `f` returns or unwinds.
///
/// ```
/// # use prefab::{ambient, Context, ContextSet};
/// let request = ContextSet::from(Context::new("user").with("key", "u-1"));
/// ambient::with_context(request, || {
///     assert!(ambient::current().is_some());
/// });
/// assert!(ambient::current().is_none());
/// ```
pub fn with_context<R>(contexts: ContextSet, f: impl FnOnce() -> R) -> R {
    let previous = AMBIENT.with(|slot| slot.replace(Some(contexts)));
    let _restore = Restore(Some(previous));
    f()
}

/// The ambient context of the current thread, if one is installed.
pub fn current() -> Option<ContextSet> {
    AMBIENT.with(|slot| slot.borrow().clone())
}

/// Run `f` with a borrow of the ambient context of the current thread.
pub(crate) fn with_current<T>(f: impl FnOnce(Option<&ContextSet>) -> T) -> T {
    AMBIENT.with(|slot| f(slot.borrow().as_ref()))
}

struct Restore(Option<Option<ContextSet>>);

impl Drop for Restore {
    fn drop(&mut self) {
        if let Some(previous) = self.0.take() {
            AMBIENT.with(|slot| *slot.borrow_mut() = previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    #[test]
    fn nested_scopes_restore_previous_context() {
        let outer = ContextSet::from(Context::new("user").with("key", "outer"));
        let inner = ContextSet::from(Context::new("user").with("key", "inner"));

        with_context(outer.clone(), || {
            with_context(inner.clone(), || {
                assert_eq!(current(), Some(inner.clone()));
            });
            assert_eq!(current(), Some(outer.clone()));
        });
        assert_eq!(current(), None);
    }

    #[test]
    fn borrows_current_context() {
        with_current(|ctx| assert!(ctx.is_none()));

        let ctx = ContextSet::from(Context::new("user").with("key", "u-1"));
        with_context(ctx.clone(), || {
            with_current(|current| assert_eq!(current, Some(&ctx)));
        });
    }

    #[test]
    fn ambient_context_is_per_thread() {
        let ctx = ContextSet::from(Context::new("user").with("key", "main"));
        with_context(ctx, || {
            let other = std::thread::spawn(current).join().unwrap();
            assert_eq!(other, None);
        });
    }
}
