use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use remora_core::mpmc_queue::MpmcQueue;

use crate::connection::Connection;
use crate::wake::WakeFd;

const MAX_EVENTS: usize = 1024;

// Registration token reserved for the wake fd. Connection tokens are heap
// pointers, so this value can never collide.
//
const WAKE_TOKEN: u64 = u64::MAX;

const READ_EVENTS: u32 =
    (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLET) as u32;
const WRITE_EVENTS: u32 =
    (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLET) as u32;

/// Interest changes a task can request for its connection's fd.
///
pub enum EventKind {
    Read,
    Write,
    Delete,
}

type SpawnFn = Box<dyn FnOnce() + Send>;

struct ExecutorState {
    epoll: OwnedFd,
    spawn_queue: MpmcQueue<SpawnFn>,
    should_notify: AtomicBool,
    wake: WakeFd,
    stopped: AtomicBool,
    poll_timeout_ms: i32,
}

// A single-threaded readiness reactor. The executor owns one epoll instance
// and one OS thread; connection tasks bound to it run only on that thread.
// The handle is cheap to clone and crosses threads freely, but of its
// operations only `spawn` and `stop` may be called off the reactor thread —
// `add_event` is reserved to the awaitables, which always run on it.
//
#[derive(Clone)]
pub struct Executor {
    state: Arc<ExecutorState>,
}

impl Executor {
    // Creates the epoll instance and the wake endpoint and starts the event
    // thread. Returns the handle and the thread's join handle.
    //
    pub fn start(poll_timeout_ms: i32) -> io::Result<(Executor, JoinHandle<()>)> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: freshly created descriptor, owned here.
        //
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll_fd) };

        let wake = WakeFd::new()?;
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let rc = unsafe {
            libc::epoll_ctl(
                epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                wake.raw_fd(),
                &mut event,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let executor = Executor {
            state: Arc::new(ExecutorState {
                epoll,
                spawn_queue: MpmcQueue::new(),
                should_notify: AtomicBool::new(false),
                wake,
                stopped: AtomicBool::new(false),
                poll_timeout_ms,
            }),
        };

        let loop_executor = executor.clone();
        let handle = std::thread::Builder::new()
            .name("remora-reactor".to_string())
            .spawn(move || {
                // An escaped panic is a programmer error; a reactor thread
                // that silently dies would strand every connection bound to
                // it, so take the process down.
                //
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| loop_executor.event_loop()));
                if result.is_err() {
                    error!("reactor thread panicked");
                    process::abort();
                }
            })?;

        Ok((executor, handle))
    }

    // Enqueues a closure for execution on the reactor thread, waking it if
    // it is blocked in the kernel. Callable from any thread. Returns false
    // only if the queue could not take the closure.
    //
    pub fn spawn<F: FnOnce() + Send + 'static>(&self, task: F) -> bool {
        if !self.state.spawn_queue.push(Box::new(task)) {
            return false;
        }

        // First submitter of a quiescent period wins the CAS and pays the
        // one wake write; the reactor re-arms the flag before it blocks.
        //
        if self
            .state
            .should_notify
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.state.wake.notify();
        }
        true
    }

    /// Signals the event loop to exit on its next wake.
    ///
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::Release);
        self.state.wake.notify();
    }

    // Registers, modifies, or removes interest in the connection's fd. All
    // registrations are edge-triggered; write interest always includes read
    // interest. Must only be called on the reactor thread.
    //
    pub fn add_event(&self, conn: &Arc<Connection>, kind: EventKind) {
        let token = Arc::as_ptr(conn) as u64;
        match kind {
            EventKind::Read => {
                self.epoll_ctl(libc::EPOLL_CTL_ADD, conn.fd(), READ_EVENTS, token);
            }
            EventKind::Write => {
                self.epoll_ctl(libc::EPOLL_CTL_MOD, conn.fd(), WRITE_EVENTS, token);
            }
            EventKind::Delete => {
                let rc = unsafe {
                    libc::epoll_ctl(
                        self.state.epoll.as_raw_fd(),
                        libc::EPOLL_CTL_DEL,
                        conn.fd(),
                        ptr::null_mut(),
                    )
                };
                if rc < 0 {
                    let err = io::Error::last_os_error();
                    // Already removed is the common case when close raced a
                    // hangup event.
                    //
                    if err.raw_os_error() != Some(libc::ENOENT) {
                        warn!(fd = conn.fd(), %err, "epoll delete failed");
                    }
                }
            }
        }
    }

    fn epoll_ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) {
        let mut event = libc::epoll_event { events, u64: token };
        let rc = unsafe { libc::epoll_ctl(self.state.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            error!(fd, op, %err, "epoll_ctl failed");
        }
    }

    // The event loop: drain the spawn queue, announce the intent to block,
    // wait for readiness, resume the tasks the readiness belongs to.
    //
    fn event_loop(&self) {
        debug!("reactor thread started");
        let state = &*self.state;

        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(MAX_EVENTS);

        loop {
            // Run externally spawned closures first; they start tasks, which
            // run synchronously until their first suspension.
            //
            while let Some(task) = state.spawn_queue.pop() {
                task();
            }

            if state.stopped.load(Ordering::Acquire) {
                break;
            }

            // Arm the wake protocol, then close the race where a producer
            // pushed between the drain above and the store: skip blocking if
            // the queue is visibly non-empty.
            //
            state.should_notify.store(true, Ordering::Release);
            let timeout = if state.spawn_queue.is_empty() {
                state.poll_timeout_ms
            } else {
                0
            };

            let ready = unsafe {
                libc::epoll_wait(
                    state.epoll.as_raw_fd(),
                    events.as_mut_ptr(),
                    MAX_EVENTS as libc::c_int,
                    timeout,
                )
            };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(%err, "epoll_wait failed");
                break;
            }
            // SAFETY: the kernel initialized the first `ready` entries.
            //
            unsafe { events.set_len(ready as usize) };

            for index in 0..events.len() {
                let token = events[index].u64;
                let readiness = events[index].events;

                if token == WAKE_TOKEN {
                    state.wake.drain();
                    state.should_notify.store(false, Ordering::Release);
                    continue;
                }

                // SAFETY: the token is the Arc pointer of a registered
                // connection. A registered connection is kept alive by its
                // parked tasks; the guard reference taken here keeps it
                // alive through dispatch even if both tasks complete inside
                // a resume.
                //
                let conn = unsafe {
                    Arc::increment_strong_count(token as *const Connection);
                    Arc::from_raw(token as *const Connection)
                };

                if readiness & (libc::EPOLLHUP | libc::EPOLLERR | libc::EPOLLRDHUP) as u32 != 0 {
                    conn.close();
                    self.add_event(&conn, EventKind::Delete);
                    // Both tasks get to observe the terminal state and run
                    // to completion.
                    //
                    conn.resume_read();
                    conn.resume_write();
                    continue;
                }

                if readiness & libc::EPOLLOUT as u32 != 0 {
                    // Back to read-only interest; the write task re-arms
                    // write interest itself if it blocks again.
                    //
                    self.epoll_ctl(libc::EPOLL_CTL_MOD, conn.fd(), READ_EVENTS, token);
                    conn.resume_write();
                }

                if readiness & libc::EPOLLIN as u32 != 0 {
                    conn.resume_read();
                }
            }
            events.clear();
        }

        debug!("reactor thread stopped");
    }
}
