use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use remora_reactor::acceptor::Acceptor;
use remora_reactor::awaitable::RegisterReadAwaiter;
use remora_reactor::connection::Connection;
use remora_reactor::scheduler::Scheduler;
use remora_reactor::task::Task;

use crate::service::{Service, ServiceMap};
use crate::transport;
use crate::wire::{self, Header, MAGIC, VERSION};

// A valid header is at most 17 fixed bytes plus two u16-prefixed strings;
// anything claiming more than this is a corrupt or hostile frame.
//
const MAX_HEADER_LEN: u32 = 256 * 1024;

pub struct RpcServerOptions {
    pub port: u16,
    pub backlog: i32,
    pub executor_count: usize,
    pub poll_timeout_ms: i32,
}

impl Default for RpcServerOptions {
    fn default() -> Self {
        RpcServerOptions {
            port: 0,
            backlog: 128,
            executor_count: 1,
            poll_timeout_ms: 100,
        }
    }
}

// The RPC server: a listening socket, a set of reactors, and the service
// registry. Each accepted connection is bound to a scheduler-selected
// executor and gets a send task and a receive task spawned onto it.
//
pub struct RpcServer {
    acceptor: Acceptor,
    scheduler: Scheduler,
    services: ServiceMap,
}

impl RpcServer {
    pub fn bind(options: RpcServerOptions) -> io::Result<Self> {
        let acceptor = Acceptor::bind(options.port, options.backlog)?;
        let scheduler = Scheduler::new(options.executor_count, options.poll_timeout_ms)?;

        Ok(RpcServer {
            acceptor,
            scheduler,
            services: ServiceMap::new(),
        })
    }

    /// The bound listener address (with the kernel-chosen port when bound to
    /// port zero).
    ///
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Exports a service under its own name. Call before `start`; the
    /// registry is frozen once the accept loop runs.
    ///
    pub fn register_service(&mut self, service: Arc<dyn Service>) {
        self.services.insert(service.name().to_string(), service);
    }

    /// Runs the accept loop; never returns. Accept failures are logged and
    /// the loop keeps going.
    ///
    pub fn start(&self) {
        let services = Arc::new(self.services.clone());

        loop {
            let stream = match self.acceptor.accept() {
                Ok(stream) => stream,
                Err(err) => {
                    error!(%err, "accept failed");
                    continue;
                }
            };

            let executor = self.scheduler.alloc_executor();
            let conn = Connection::new(stream, executor.clone());
            info!(peer = conn.peer_addr(), "accepted connection");

            let send_conn = Arc::clone(&conn);
            executor.spawn(move || {
                Task::spawn(transport::flush_connection(send_conn));
            });

            let services = Arc::clone(&services);
            executor.spawn(move || {
                Task::spawn(serve_connection(conn, services));
            });
        }
    }
}

// The server receive loop for one connection: frame by frame, parse the
// header, resolve the target method, parse the request, dispatch, and queue
// the response. Any validation failure poisons the connection.
//
async fn serve_connection(conn: Arc<Connection>, services: Arc<ServiceMap>) {
    RegisterReadAwaiter::new(&conn).await;

    loop {
        let Some(header_len) = transport::read_record_len(&conn).await else {
            break;
        };
        if header_len > MAX_HEADER_LEN {
            error!(peer = conn.peer_addr(), header_len, "implausible header length");
            break;
        }
        if !transport::read_at_least(&conn, header_len as usize).await {
            break;
        }

        let mut header = Header::default();
        if let Err(err) = transport::parse_bounded(&conn, &mut header, header_len as usize) {
            error!(peer = conn.peer_addr(), %err, "bad request header");
            break;
        }
        if header.magic != MAGIC {
            error!(peer = conn.peer_addr(), magic = header.magic, "bad magic");
            break;
        }
        if header.version != VERSION {
            error!(peer = conn.peer_addr(), version = header.version, "version mismatch");
            break;
        }

        let Some(payload_len) = transport::read_record_len(&conn).await else {
            break;
        };

        let Some(service) = services.get(&header.service) else {
            error!(peer = conn.peer_addr(), service = %header.service, "unknown service");
            break;
        };
        let Some(method) = service.find_method(&header.method) else {
            error!(
                peer = conn.peer_addr(),
                service = %header.service,
                method = %header.method,
                "unknown method"
            );
            break;
        };

        let mut request = service.new_request(method);
        let mut response = service.new_response(method);

        if !transport::read_at_least(&conn, payload_len as usize).await {
            break;
        }
        if let Err(err) = transport::parse_bounded(&conn, request.as_mut(), payload_len as usize) {
            error!(peer = conn.peer_addr(), %err, "bad request payload");
            break;
        }

        service.call(method, request.as_ref(), response.as_mut());

        let response_header = Header::response(header.request_id);
        {
            let mut buf = conn.write_buf();
            if let Err(err) = wire::write_frame(&mut buf, &response_header, response.as_ref()) {
                error!(peer = conn.peer_addr(), %err, "failed to serialize response");
                break;
            }
        }
        conn.resume_write();
    }

    transport::teardown(&conn);
}
