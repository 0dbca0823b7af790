//! Flow-local storage for the active transaction.
//!
//! # Responsibilities
//! - Answer "which transaction is this code serving?" without parameter passing
//! - Keep a binding alive across every suspension point of the bound future
//! - Hide the binding from concurrent tasks and from detached (outbound) work
//!
//! # Design Decisions
//! - Backed by a tokio task-local: the value is swapped in on every poll of the
//!   scoped future and swapped out afterwards, so other tasks scheduled on the
//!   same worker thread never observe it
//! - `tokio::spawn` does not inherit the binding; continuations that belong to
//!   the request go through [`bind`] or [`spawn`]
//! - Looking up the binding never fails; "no transaction" is a normal state

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::transaction::Transaction;

tokio::task_local! {
    static CURRENT: Binding;
}

#[derive(Debug, Default)]
struct Binding {
    slot: RefCell<Option<Arc<Transaction>>>,
}

impl Binding {
    fn new(transaction: Option<Arc<Transaction>>) -> Self {
        Self {
            slot: RefCell::new(transaction),
        }
    }
}

/// The transaction bound to the calling flow, if any.
pub fn current() -> Option<Arc<Transaction>> {
    CURRENT
        .try_with(|binding| binding.slot.borrow().clone())
        .ok()
        .flatten()
}

/// Run `fut` with `transaction` bound for its whole asynchronous extent.
pub fn run_with<F>(transaction: Arc<Transaction>, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(Binding::new(Some(transaction)), fut)
}

/// Run a synchronous closure with `transaction` bound.
pub fn run_with_sync<R>(transaction: Arc<Transaction>, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(Binding::new(Some(transaction)), f)
}

/// Detach the calling flow's binding for the rest of its scope.
///
/// Returns the transaction that was bound. Outside any scope this is a no-op.
pub fn clear() -> Option<Arc<Transaction>> {
    CURRENT
        .try_with(|binding| binding.slot.borrow_mut().take())
        .ok()
        .flatten()
}

/// Run `fut` with no transaction bound.
///
/// The enclosing binding is untouched and visible again once `fut` completes.
pub fn detached<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(Binding::default(), fut)
}

/// Carry the caller's binding into `fut`, wherever it ends up being polled.
pub fn bind<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(Binding::new(current()), fut)
}

/// Spawn a task that continues the caller's transaction.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(bind(fut))
}
