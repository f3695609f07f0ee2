use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::ptr;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

// A fire-and-forget cooperative task. The future starts executing eagerly on
// spawn and suspends only at awaitables; whoever holds the handle resumes it
// explicitly. When the future completes it is dropped in place, releasing
// everything it captured — a completed task is an empty shell and resuming
// it is a no-op.
//
// Tasks never leave their reactor thread. The handle is the resume handle
// the awaitables park on a connection's read or write slot.
//
pub struct Task {
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
}

pub type TaskHandle = Rc<Task>;

impl Task {
    /// Creates a task and runs it to its first suspension point.
    ///
    pub fn spawn<F: Future<Output = ()> + 'static>(future: F) -> TaskHandle {
        let task = Rc::new(Task {
            future: RefCell::new(Some(Box::pin(future))),
        });

        task.resume();
        task
    }

    // Polls the task once. Awaitables observe the handle through the
    // thread-local current-task slot while the poll is in flight.
    //
    pub fn resume(self: &Rc<Self>) {
        // A task resuming itself (or a stale handle racing a running task)
        // finds the future borrowed and backs off.
        //
        let Ok(mut slot) = self.future.try_borrow_mut() else {
            return;
        };
        let Some(future) = slot.as_mut() else {
            return;
        };

        let previous = CURRENT_TASK.with(|current| current.replace(Some(Rc::clone(self))));

        let waker = noop_waker();
        let mut context = Context::from_waker(&waker);
        let poll = future.as_mut().poll(&mut context);

        CURRENT_TASK.with(|current| {
            *current.borrow_mut() = previous;
        });

        if poll.is_ready() {
            // Terminal suspension: destroy the future, releasing its
            // captured references.
            //
            *slot = None;
        }
    }

    pub fn is_done(&self) -> bool {
        self.future.try_borrow().map(|slot| slot.is_none()).unwrap_or(false)
    }
}

// The task currently being polled on this thread.
//
thread_local! {
    static CURRENT_TASK: RefCell<Option<TaskHandle>> = const { RefCell::new(None) };
}

/// Handle of the task being polled. Panics outside a task poll; awaitables
/// are only ever polled from inside one.
///
pub(crate) fn current_task() -> TaskHandle {
    CURRENT_TASK
        .with(|current| current.borrow().clone())
        .expect("current_task called outside a task poll")
}

// Wake-ups are explicit (the reactor or the peer task resumes through the
// stored handle); the waker handed to poll never schedules anything.
//
fn noop_waker() -> Waker {
    const VTABLE: RawWakerVTable = RawWakerVTable::new(clone_waker, noop, noop, noop);

    unsafe fn clone_waker(_: *const ()) -> RawWaker {
        RawWaker::new(ptr::null(), &VTABLE)
    }

    unsafe fn noop(_: *const ()) {}

    unsafe { Waker::from_raw(RawWaker::new(ptr::null(), &VTABLE)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::task::Poll;

    struct SuspendOnce {
        suspended: bool,
    }

    impl Future for SuspendOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<()> {
            if self.suspended {
                Poll::Ready(())
            } else {
                self.suspended = true;
                Poll::Pending
            }
        }
    }

    #[test]
    fn test_task_runs_eagerly() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);

        let task = Task::spawn(async move {
            ran_clone.set(true);
        });

        assert!(ran.get());
        assert!(task.is_done());
    }

    #[test]
    fn test_resume_drives_to_completion() {
        let task = Task::spawn(SuspendOnce { suspended: false });
        assert!(!task.is_done());

        task.resume();
        assert!(task.is_done());

        // Resuming a completed task is a no-op.
        //
        task.resume();
        assert!(task.is_done());
    }

    #[test]
    fn test_current_task_is_visible_during_poll() {
        let observed = Rc::new(Cell::new(false));
        let observed_clone = Rc::clone(&observed);

        Task::spawn(async move {
            observed_clone.set(!current_task().is_done());
        });

        assert!(observed.get());
    }
}
