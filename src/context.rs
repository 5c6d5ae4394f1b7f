//! Thread-local host context.
//!
//! While a host's `block_on` scope is active, the host is reachable from the
//! running thread without passing the runtime reference around. The free
//! functions [`offload_blocking`](crate::offload_blocking) and
//! [`offload_with`](crate::offload_with) submit through it.
//!
//! # Example
//!
//! ```ignore
//! use spindle_rs::SpindleBuilder;
//!
//! let runtime = SpindleBuilder::new().build()?;
//!
//! runtime.block_on(async {
//!     spindle_rs::offload_blocking(50, || println!("done"))?;
//!     Ok::<_, spindle_rs::SpindleError>(())
//! })?;
//! runtime.run_until_idle();
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::runtime::{RuntimeInner, SpindleRuntime};

thread_local! {
    static CURRENT_RUNTIME: RefCell<Option<Weak<RuntimeInner>>> = const { RefCell::new(None) };
}

/// Get the host whose context is active on this thread.
///
/// Returns `None` outside a host's `block_on` or dispatch scope, and after
/// the host has been dropped.
pub fn current_runtime() -> Option<SpindleRuntime> {
    CURRENT_RUNTIME.with(|rt| {
        rt.borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(SpindleRuntime::from_inner)
    })
}

/// Restores the previously active host when dropped.
pub(crate) struct ContextGuard {
    previous: Option<Weak<RuntimeInner>>,
}

/// Make `runtime` the current host until the guard is dropped.
///
/// Scopes nest: the previous host is restored on exit.
pub(crate) fn enter(runtime: &Rc<RuntimeInner>) -> ContextGuard {
    let previous = CURRENT_RUNTIME.with(|rt| rt.borrow_mut().replace(Rc::downgrade(runtime)));
    ContextGuard { previous }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_RUNTIME.with(|rt| {
            *rt.borrow_mut() = previous;
        });
    }
}
