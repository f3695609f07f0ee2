use std::io;

use socket2::Socket;

/// Kernel send/receive buffer size applied to every RPC socket.
///
pub const SOCKET_BUFFER_SIZE: usize = 512 * 1024;

// Options shared by accepted sockets and client sockets: non-blocking,
// Nagle off, large kernel buffers. Keepalive is a server-side concern.
// (socket2 creates and accepts sockets with CLOEXEC already set.)
//
pub fn configure_stream(socket: &Socket, keepalive: bool) -> io::Result<()> {
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    if keepalive {
        socket.set_keepalive(true)?;
    }
    Ok(())
}

/// Turns lingering off so a client close never blocks in the kernel.
///
pub fn disable_linger(socket: &Socket) -> io::Result<()> {
    socket.set_linger(None)
}
