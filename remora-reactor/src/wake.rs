use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

// The reactor's internal wake endpoint: an eventfd counter the executor
// registers alongside real connections. Writing one count from any thread
// unblocks epoll_wait; the reactor drains the counter when it observes the
// wake token.
//
pub(crate) struct WakeFd {
    fd: OwnedFd,
}

impl WakeFd {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(WakeFd {
            // SAFETY: the descriptor was just created and is owned by no one
            // else.
            //
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    #[inline]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub(crate) fn notify(&self) {
        let value: u64 = 1;
        let _ = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &value as *const u64 as *const libc::c_void,
                size_of::<u64>(),
            )
        };
    }

    pub(crate) fn drain(&self) {
        let mut value: u64 = 0;
        let _ = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                size_of::<u64>(),
            )
        };
    }
}
