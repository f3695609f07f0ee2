use std::cell::{RefCell, RefMut};
use std::io;
use std::net::Shutdown;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::Socket;
use tracing::error;

use remora_core::buffer::ChainedBuffer;

use crate::awaitable::{ReadAwaiter, WriteAwaiter};
use crate::executor::Executor;
use crate::task::TaskHandle;

// Upper bound on iovec entries per writev call (IOV_MAX on Linux).
//
pub(crate) const MAX_WRITE_VECTORS: usize = 1024;

// One TCP endpoint pair: the non-blocking socket, a chained read buffer and
// a chained write buffer, and the resume handles of the paired receive and
// send tasks. Exactly one task ever holds the read slot and exactly one the
// write slot.
//
// A Connection is shared as `Arc<Connection>` between the accept path (or
// the client channel) and its two tasks. The parked tasks themselves hold
// `Arc<Connection>` inside their futures, and a task's future is destroyed
// when it completes — so the connection is destroyed only after both tasks
// have terminated and every external reference has dropped.
//
pub struct Connection {
    socket: Socket,
    executor: Executor,
    local_addr: String,
    peer_addr: String,
    read_buf: RefCell<ChainedBuffer>,
    write_buf: RefCell<ChainedBuffer>,
    read_task: RefCell<Option<TaskHandle>>,
    write_task: RefCell<Option<TaskHandle>>,
    closed: AtomicBool,
}

// SAFETY: the Arc crosses threads (accept path, client callers), but every
// non-atomic field is only touched on the owning reactor thread — buffers
// and task slots by the two tasks and the reactor, never concurrently. The
// `closed` flag is the one field read and written from anywhere; it is
// atomic and monotonic.
//
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
    pub fn new(socket: Socket, executor: Executor) -> Arc<Self> {
        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let peer_addr = socket
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        Arc::new(Connection {
            socket,
            executor,
            local_addr,
            peer_addr,
            read_buf: RefCell::new(ChainedBuffer::new()),
            write_buf: RefCell::new(ChainedBuffer::new()),
            read_task: RefCell::new(None),
            write_task: RefCell::new(None),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    #[inline]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent. Shuts down the write side and sets the closed flag; the
    /// read buffer is preserved so already-received bytes stay parseable.
    ///
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The peer may already be gone; nothing to do about it here.
        //
        let _ = self.socket.shutdown(Shutdown::Write);
    }

    pub fn to_read_bytes(&self) -> usize {
        self.read_buf.borrow().size()
    }

    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.borrow().size()
    }

    /// The receive buffer, for the codec. Reactor thread only.
    ///
    pub fn read_buf(&self) -> RefMut<'_, ChainedBuffer> {
        self.read_buf.borrow_mut()
    }

    /// The send buffer, for the codec. Reactor thread only.
    ///
    pub fn write_buf(&self) -> RefMut<'_, ChainedBuffer> {
        self.write_buf.borrow_mut()
    }

    pub(crate) fn bind_read_task(&self, task: TaskHandle) {
        *self.read_task.borrow_mut() = Some(task);
    }

    pub(crate) fn bind_write_task(&self, task: TaskHandle) {
        *self.write_task.borrow_mut() = Some(task);
    }

    /// Resumes the receive task, if one is parked. Reactor thread only.
    ///
    pub fn resume_read(&self) {
        let task = self.read_task.borrow().clone();
        if let Some(task) = task {
            task.resume();
        }
    }

    /// Resumes the send task, if one is parked. Reactor thread only.
    ///
    pub fn resume_write(&self) {
        let task = self.write_task.borrow().clone();
        if let Some(task) = task {
            task.resume();
        }
    }

    // Drains the socket into the read buffer: take a writable view, read(2)
    // into it, commit what arrived, repeat while blocks fill. Returns an
    // awaiter that suspends iff the connection is open and nothing arrived.
    //
    pub fn async_read(self: &Arc<Self>) -> ReadAwaiter {
        let mut total_read = 0usize;
        {
            let mut buf = self.read_buf.borrow_mut();
            loop {
                let (view_ptr, view_len) = {
                    let view = buf.write_view();
                    (view.as_mut_ptr(), view.len())
                };

                let mut filled = 0usize;
                let mut stop = false;
                while filled < view_len {
                    let n = unsafe {
                        libc::read(
                            self.fd(),
                            view_ptr.add(filled) as *mut libc::c_void,
                            view_len - filled,
                        )
                    };
                    if n > 0 {
                        filled += n as usize;
                        continue;
                    }
                    if n == 0 {
                        // Peer closed.
                        //
                        self.close();
                        stop = true;
                        break;
                    }
                    let err = io::Error::last_os_error();
                    match err.kind() {
                        io::ErrorKind::Interrupted => continue,
                        io::ErrorKind::WouldBlock => {
                            stop = true;
                            break;
                        }
                        _ => {
                            error!(fd = self.fd(), %err, "read failed");
                            self.close();
                            stop = true;
                            break;
                        }
                    }
                }

                buf.commit_resv(filled);
                total_read += filled;

                if stop {
                    break;
                }
                // The block filled to the brim; keep draining into a fresh
                // view until the kernel runs dry.
                //
            }
        }

        if self.closed() {
            // Wake the send task so it can observe the terminal state.
            //
            self.resume_write();
        }

        ReadAwaiter::new(self, !self.closed() && total_read == 0)
    }

    // Flushes the write buffer with gather writes, committing after every
    // writev so a partial write is never resent. Returns an awaiter that
    // suspends (arming write interest) iff the kernel blocked before the
    // buffer drained.
    //
    pub fn async_write(self: &Arc<Self>) -> WriteAwaiter {
        let need_write = self.to_write_bytes();
        let mut written = 0usize;
        {
            let mut buf = self.write_buf.borrow_mut();
            while written < need_write {
                let iovecs: Vec<libc::iovec> = buf
                    .unread_spans(MAX_WRITE_VECTORS)
                    .iter()
                    .map(|span| libc::iovec {
                        iov_base: span.as_ptr() as *mut libc::c_void,
                        iov_len: span.len(),
                    })
                    .collect();
                if iovecs.is_empty() {
                    break;
                }

                let n = unsafe {
                    libc::writev(self.fd(), iovecs.as_ptr(), iovecs.len() as libc::c_int)
                };
                if n > 0 {
                    buf.commit_send(n as usize);
                    written += n as usize;
                    continue;
                }
                if n == 0 {
                    break;
                }
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock => break,
                    _ => {
                        error!(fd = self.fd(), %err, "writev failed");
                        self.close();
                        break;
                    }
                }
            }
        }

        WriteAwaiter::new(self, !self.closed() && written < need_write)
    }
}
