#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! Promise-shaped settlement containers for single-threaded cooperative
//! code.
//!
//! A [`Task`] moves through `Unsettled → Settling → Resolved | Rejected`
//! exactly once: the first settlement wins and later ones are ignored.
//! Unlike always-async promises, a continuation registered on an
//! already-settled task is delivered **synchronously, before
//! [`Task::then`] returns**; continuations registered while pending fire
//! in registration order at the moment of settlement.
//!
//! ```
//! use std::{cell::Cell, rc::Rc};
//! use task::Task;
//!
//! let delivered = Rc::new(Cell::new(false));
//! let seen = delivered.clone();
//! Task::resolved(2).then(|n| Ok(n * 2)).then(move |n| {
//!     seen.set(n == 4);
//!     Ok(())
//! });
//! assert!(delivered.get(), "continuations of a settled task run in the same tick");
//! ```
//!
//! # Ambient context
//!
//! Each task captures the current [`Supertext`] and a lightweight
//! [`TaskContext`] at construction; its executor and the continuations
//! it spawns run with that context established. The context chain links
//! parent task contexts weakly, for diagnostics only; it never keeps a
//! task alive.
//!
//! # Futures
//!
//! [`Task::to_future`] bridges a task into a shared future mirroring
//! its settlement; repeated calls return the same future. In the other
//! direction, a [`Driver`] steps a future toward a task under the
//! ambient context captured at construction, for embedding systems
//! that own their own run loop.
//!
//! [`Supertext`]: subtext::Supertext

mod drive;

pub use drive::Driver;

use futures::{
    channel::oneshot,
    future::{FutureExt, LocalBoxFuture, Shared},
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    mem::{replace, take},
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};
use subtext::Supertext;

/// The future returned by [`Task::to_future`].
pub type TaskFuture<T> = Shared<LocalBoxFuture<'static, Result<T, Reason>>>;

/// An arbitrary rejection value: cheap to clone, downcastable to the
/// concrete type it was built from, and renderable for diagnostics.
#[derive(Clone)]
pub struct Reason {
    inner: Rc<dyn Any>,
    shown: Rc<str>,
}

impl Reason {
    /// Wraps any debuggable value as a rejection reason.
    pub fn new<E: Debug + Any>(err: E) -> Self {
        let shown = format!("{:?}", &err);
        Self { inner: Rc::new(err), shown: shown.into() }
    }

    /// Borrows the original value if it was an `E`.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.inner.downcast_ref()
    }
}

impl From<&str> for Reason {
    fn from(msg: &str) -> Self {
        Reason::new(msg.to_string())
    }
}

impl From<String> for Reason {
    fn from(msg: String) -> Self {
        Reason::new(msg)
    }
}

impl Debug for Reason {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(&self.shown)
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(&self.shown)
    }
}

/// The observable lifecycle position of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// No settlement has been requested yet.
    Unsettled,
    /// The task has adopted another task's eventual outcome.
    Settling,
    /// Settled with a value.
    Resolved,
    /// Settled with a rejection reason.
    Rejected,
}

enum State<T> {
    Unsettled,
    Settling,
    Resolved(T),
    Rejected(Reason),
}

type Reaction<T> = Box<dyn FnOnce(&Result<T, Reason>)>;

/// A settlement container; see the crate docs.
pub struct Task<T> {
    cell: Rc<TaskCell<T>>,
}

struct TaskCell<T> {
    state: RefCell<State<T>>,
    reactions: RefCell<Vec<Reaction<T>>>,
    context: TaskContext,
    supertext: Supertext,
    future: RefCell<Option<TaskFuture<T>>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<T: Clone + 'static> Task<T> {
    /// A pending task capturing the ambient context.
    pub fn unsettled() -> Self {
        Task {
            cell: Rc::new(TaskCell {
                state: RefCell::new(State::Unsettled),
                reactions: RefCell::new(Vec::new()),
                context: TaskContext::fresh(),
                supertext: Supertext::current(),
                future: RefCell::new(None),
            }),
        }
    }

    /// Constructs a task and runs `executor` synchronously with the
    /// task's context established. An `Err` return rejects the task.
    pub fn new(executor: impl FnOnce(&Task<T>) -> Result<(), Reason>) -> Self {
        let task = Task::unsettled();
        let passed = task.clone();
        if let Err(reason) = task.enter(move || executor(&passed)) {
            task.reject(reason);
        }
        task
    }

    /// An already-resolved task.
    pub fn resolved(value: T) -> Self {
        let task = Task::unsettled();
        task.resolve(value);
        task
    }

    /// An already-rejected task.
    pub fn rejected(reason: Reason) -> Self {
        let task = Task::unsettled();
        task.reject(reason);
        task
    }

    /// Resolves with all of `tasks`' values in input order, or rejects
    /// with the first rejection.
    pub fn all(tasks: Vec<Task<T>>) -> Task<Vec<T>> {
        let joined: Task<Vec<T>> = Task::unsettled();
        let total = tasks.len();
        if total == 0 {
            joined.resolve(Vec::new());
            return joined;
        }

        let gathered: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; total]));
        let remaining = Rc::new(Cell::new(total));
        for (index, task) in tasks.iter().enumerate() {
            let joined = joined.clone();
            let gathered = gathered.clone();
            let remaining = remaining.clone();
            task.on_settle(move |outcome| match outcome {
                Ok(value) => {
                    gathered.borrow_mut()[index] = Some(value.clone());
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values = gathered
                            .borrow_mut()
                            .drain(..)
                            .map(|slot| slot.expect("every input delivered a value"))
                            .collect();
                        joined.resolve(values);
                    }
                }
                Err(reason) => joined.reject(reason.clone()),
            });
        }
        joined
    }

    /// Settles with a value. The first settlement wins; later calls are
    /// ignored.
    pub fn resolve(&self, value: T) {
        if !matches!(*self.cell.state.borrow(), State::Unsettled) {
            return;
        }
        self.finalize(Ok(value));
    }

    /// Settles with a rejection. The first settlement wins; later calls
    /// are ignored.
    pub fn reject(&self, reason: Reason) {
        if !matches!(*self.cell.state.borrow(), State::Unsettled) {
            return;
        }
        self.finalize(Err(reason));
    }

    /// Adopts `source`'s eventual outcome, moving this task to
    /// [`TaskState::Settling`] until the source settles.
    pub fn resolve_from(&self, source: &Task<T>) {
        if !matches!(*self.cell.state.borrow(), State::Unsettled) {
            return;
        }
        *self.cell.state.borrow_mut() = State::Settling;
        let target = self.clone();
        source.on_settle(move |outcome| target.finalize(outcome.clone()));
    }

    /// Chains a continuation over a resolution; rejections pass
    /// through. If this task is already settled the continuation runs
    /// before `then` returns.
    pub fn then<U: Clone + 'static>(
        &self,
        on_resolved: impl FnOnce(T) -> Result<U, Reason> + 'static,
    ) -> Task<U> {
        self.react(move |outcome| match outcome {
            Ok(value) => on_resolved(value.clone()),
            Err(reason) => Err(reason.clone()),
        })
    }

    /// Chains a continuation over a rejection; resolutions pass
    /// through. Delivery timing matches [`Task::then`].
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(Reason) -> Result<T, Reason> + 'static,
    ) -> Task<T> {
        self.react(move |outcome| match outcome {
            Ok(value) => Ok(value.clone()),
            Err(reason) => on_rejected(reason.clone()),
        })
    }

    /// Chains over both outcomes at once. Delivery timing matches
    /// [`Task::then`].
    pub fn then_else<U: Clone + 'static>(
        &self,
        on_resolved: impl FnOnce(T) -> Result<U, Reason> + 'static,
        on_rejected: impl FnOnce(Reason) -> Result<U, Reason> + 'static,
    ) -> Task<U> {
        self.react(move |outcome| match outcome {
            Ok(value) => on_resolved(value.clone()),
            Err(reason) => on_rejected(reason.clone()),
        })
    }

    /// A shared future mirroring this task's settlement. Repeated calls
    /// return the same future.
    pub fn to_future(&self) -> TaskFuture<T> {
        if let Some(existing) = self.cell.future.borrow().as_ref() {
            return existing.clone();
        }

        let (sender, receiver) = oneshot::channel::<Result<T, Reason>>();
        self.on_settle(move |outcome| {
            let _ = sender.send(outcome.clone());
        });
        let future = receiver
            .map(|received| match received {
                Ok(outcome) => outcome,
                Err(oneshot::Canceled) => Err(Reason::from("task dropped unsettled")),
            })
            .boxed_local()
            .shared();
        *self.cell.future.borrow_mut() = Some(future.clone());
        future
    }

    /// The task's lifecycle position right now.
    pub fn state(&self) -> TaskState {
        match &*self.cell.state.borrow() {
            State::Unsettled => TaskState::Unsettled,
            State::Settling => TaskState::Settling,
            State::Resolved(_) => TaskState::Resolved,
            State::Rejected(_) => TaskState::Rejected,
        }
    }

    /// Whether the task has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        matches!(self.state(), TaskState::Resolved | TaskState::Rejected)
    }

    /// The resolved value, if the task is resolved.
    pub fn value(&self) -> Option<T> {
        match &*self.cell.state.borrow() {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if the task is rejected.
    pub fn reason(&self) -> Option<Reason> {
        match &*self.cell.state.borrow() {
            State::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// The diagnostic context captured at construction.
    pub fn context(&self) -> TaskContext {
        self.cell.context.clone()
    }

    /// Registers `reaction` to run at settlement, or immediately when
    /// the task is already terminal.
    fn on_settle(&self, reaction: impl FnOnce(&Result<T, Reason>) + 'static) {
        let terminal = match &*self.cell.state.borrow() {
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
            State::Unsettled | State::Settling => None,
        };
        match terminal {
            Some(outcome) => reaction(&outcome),
            None => self.cell.reactions.borrow_mut().push(Box::new(reaction)),
        }
    }

    /// Commits a terminal state and drains reactions in registration
    /// order.
    fn finalize(&self, outcome: Result<T, Reason>) {
        {
            let mut state = self.cell.state.borrow_mut();
            match &*state {
                State::Unsettled | State::Settling => {}
                State::Resolved(_) | State::Rejected(_) => return,
            }
            *state = match &outcome {
                Ok(value) => State::Resolved(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
        }
        tracing::trace!(
            id = self.cell.context.id(),
            resolved = outcome.is_ok(),
            "task settled"
        );

        let reactions = take(&mut *self.cell.reactions.borrow_mut());
        for reaction in reactions {
            reaction(&outcome);
        }
    }

    /// Builds the child task for a continuation and wires delivery
    /// through it with its context established.
    fn react<U: Clone + 'static>(
        &self,
        transform: impl FnOnce(&Result<T, Reason>) -> Result<U, Reason> + 'static,
    ) -> Task<U> {
        let child: Task<U> = Task::unsettled();
        let deliver = child.clone();
        self.on_settle(move |outcome| {
            let result = deliver.enter(|| transform(outcome));
            deliver.finalize(result);
        });
        child
    }

    /// Runs `op` with this task's supertext and context current.
    fn enter<R>(&self, op: impl FnOnce() -> R) -> R {
        let _restore_when_done_please = CURRENT_CONTEXT.with(|current| {
            let node = Rc::downgrade(&self.cell.context.inner);
            let interrupted = replace(&mut *current.borrow_mut(), Some(node));
            scopeguard::guard(interrupted, |interrupted| {
                CURRENT_CONTEXT.with(|current| {
                    *current.borrow_mut() = interrupted;
                });
            })
        });

        self.cell.supertext.run(op)
    }
}

impl Task<()> {
    /// A shared already-resolved unit task.
    pub fn void() -> Task<()> {
        Task::resolved(())
    }
}

impl<T: Clone + 'static> From<T> for Task<T> {
    fn from(value: T) -> Self {
        Task::resolved(value)
    }
}

impl<T: Clone + 'static> Debug for Task<T> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Task")
            .field("id", &self.cell.context.id())
            .field("state", &self.state())
            .finish()
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// The context of the task whose executor or continuation is
    /// running.
    static CURRENT_CONTEXT: RefCell<Option<Weak<ContextNode>>> = RefCell::new(None);
}

/// A lightweight diagnostic record linking a task to the context of the
/// task that constructed it.
///
/// The chain is weak: it never retains task objects, and a parent whose
/// task has been reclaimed simply reads as absent.
#[derive(Clone)]
pub struct TaskContext {
    inner: Rc<ContextNode>,
}

struct ContextNode {
    id: u64,
    parent: Option<Weak<ContextNode>>,
}

impl TaskContext {
    /// The context of the currently running task, if any.
    pub fn current() -> Option<TaskContext> {
        CURRENT_CONTEXT
            .with(|current| current.borrow().clone())
            .and_then(|weak| weak.upgrade())
            .map(|inner| TaskContext { inner })
    }

    fn fresh() -> Self {
        let parent = CURRENT_CONTEXT.with(|current| current.borrow().clone());
        TaskContext {
            inner: Rc::new(ContextNode {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                parent,
            }),
        }
    }

    /// A stable diagnostic identifier.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The parent context, if its task is still alive.
    pub fn parent(&self) -> Option<TaskContext> {
        self.inner.parent.as_ref().and_then(Weak::upgrade).map(|inner| TaskContext { inner })
    }
}

impl Debug for TaskContext {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("TaskContext")
            .field("id", &self.inner.id)
            .field("parent", &self.parent().map(|p| p.id()))
            .finish()
    }
}
