use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::connection::Connection;
use crate::executor::EventKind;
use crate::task;

// The four suspension points a connection task can yield at. Each one
// decides whether to suspend and, if so, where the resume handle is parked:
// on the connection's read or write slot, with or without a reactor interest
// change. Each suspends at most once; any poll after the suspension is a
// resume and completes.

/// First suspension point of a receive task: claims the connection's read
/// slot and registers read interest with the reactor. Never actually blocks.
///
pub struct RegisterReadAwaiter {
    conn: Arc<Connection>,
}

impl RegisterReadAwaiter {
    pub fn new(conn: &Arc<Connection>) -> Self {
        RegisterReadAwaiter {
            conn: Arc::clone(conn),
        }
    }
}

impl Future for RegisterReadAwaiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<()> {
        self.conn.bind_read_task(task::current_task());
        self.conn.executor().add_event(&self.conn, EventKind::Read);
        Poll::Ready(())
    }
}

/// Returned by [`Connection::async_read`]. Suspends until the next readable
/// event iff the connection is open and the read produced nothing. On a
/// closed connection it instead hands the fd back to the reactor for
/// deregistration and completes.
///
pub struct ReadAwaiter {
    conn: Arc<Connection>,
    should_suspend: bool,
    suspended: bool,
}

impl ReadAwaiter {
    pub(crate) fn new(conn: &Arc<Connection>, should_suspend: bool) -> Self {
        ReadAwaiter {
            conn: Arc::clone(conn),
            should_suspend,
            suspended: false,
        }
    }
}

impl Future for ReadAwaiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.suspended {
            // Resumed by the reactor.
            //
            return Poll::Ready(());
        }

        if this.conn.closed() {
            this.conn
                .executor()
                .add_event(&this.conn, EventKind::Delete);
            return Poll::Ready(());
        }

        if !this.should_suspend {
            return Poll::Ready(());
        }

        // The receive task's handle is already parked in the read slot by
        // RegisterReadAwaiter.
        //
        this.suspended = true;
        Poll::Pending
    }
}

/// Parks the send task until its connection has bytes to flush (or is
/// closed). Wake-up is in-process through `resume_write`; the reactor is not
/// involved.
///
pub struct WaitWriteAwaiter {
    conn: Arc<Connection>,
    suspended: bool,
}

impl WaitWriteAwaiter {
    pub fn new(conn: &Arc<Connection>) -> Self {
        WaitWriteAwaiter {
            conn: Arc::clone(conn),
            suspended: false,
        }
    }
}

impl Future for WaitWriteAwaiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.suspended {
            return Poll::Ready(());
        }

        if this.conn.closed() || this.conn.to_write_bytes() > 0 {
            return Poll::Ready(());
        }

        this.conn.bind_write_task(task::current_task());
        this.suspended = true;
        Poll::Pending
    }
}

/// Returned by [`Connection::async_write`]. Suspends iff the kernel would
/// block before the buffer drained; suspension arms write interest so the
/// reactor resumes the task on the next writable event.
///
pub struct WriteAwaiter {
    conn: Arc<Connection>,
    should_suspend: bool,
    suspended: bool,
}

impl WriteAwaiter {
    pub(crate) fn new(conn: &Arc<Connection>, should_suspend: bool) -> Self {
        WriteAwaiter {
            conn: Arc::clone(conn),
            should_suspend,
            suspended: false,
        }
    }
}

impl Future for WriteAwaiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.suspended {
            return Poll::Ready(());
        }

        if !this.should_suspend {
            return Poll::Ready(());
        }

        this.conn.bind_write_task(task::current_task());
        this.conn.executor().add_event(&this.conn, EventKind::Write);
        this.suspended = true;
        Poll::Pending
    }
}
