use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use crate::socket;

// The listening socket. Accepts connected sockets and applies the RPC
// socket options before handing them over; the accept call itself blocks,
// so the owner runs it on a dedicated loop.
//
pub struct Acceptor {
    listener: Socket,
}

impl Acceptor {
    pub fn bind(port: u16, backlog: i32) -> io::Result<Self> {
        let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;

        let address = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);
        listener.bind(&address.into())?;
        listener.listen(backlog)?;

        info!(%address, "listening");
        Ok(Acceptor { listener })
    }

    /// The bound address; the port is the kernel-chosen one when the
    /// acceptor was bound to port zero.
    ///
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let addr = self.listener.local_addr()?;
        addr.as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-inet listener address"))
    }

    /// Blocks until a connection arrives; the returned socket is
    /// non-blocking with TCP_NODELAY, keepalive, and large kernel buffers.
    ///
    pub fn accept(&self) -> io::Result<Socket> {
        loop {
            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    socket::configure_stream(&stream, true)?;
                    return Ok(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}
