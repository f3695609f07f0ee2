use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, warn};

use remora_reactor::awaitable::RegisterReadAwaiter;
use remora_reactor::connection::Connection;
use remora_reactor::executor::Executor;
use remora_reactor::socket;
use remora_reactor::task::Task;

use crate::controller::RpcController;
use crate::message::Message;
use crate::service::MethodDescriptor;
use crate::transport;
use crate::wire::{self, Header, MAGIC, VERSION};

pub struct ClientOptions {
    pub ip: String,
    pub port: u16,
}

/// Completion invoked exactly once per call, with the controller carrying
/// the outcome and the response message (parsed on success).
///
pub type RpcDone = Box<dyn FnOnce(RpcController, Box<dyn Message>) + Send>;

struct PendingCall {
    controller: RpcController,
    response: Box<dyn Message>,
    done: RpcDone,
}

// Cross-thread call bookkeeping. Entries are only inserted and removed on
// the reactor thread (inside spawned closures and the receive task); the
// mutex is the handoff that lets `call_method` build entries anywhere.
//
struct CallState {
    calls: Mutex<HashMap<u64, PendingCall>>,
    next_request_id: AtomicU64,
}

// One client endpoint: a connection bound to an executor, the pending-call
// registry, and the request-id counter. `call_method` is callable from any
// thread; everything it does to the connection happens inside a closure
// submitted to the reactor.
//
pub struct ClientChannel {
    conn: Arc<Connection>,
    executor: Executor,
    state: Arc<CallState>,
}

impl ClientChannel {
    /// Connects (blocking), applies the client socket options, and spawns
    /// the channel's send and receive tasks onto the executor.
    ///
    pub fn connect(options: &ClientOptions, executor: Executor) -> io::Result<Self> {
        let ip: IpAddr = options
            .ip
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid ip address"))?;
        let address = SocketAddr::new(ip, options.port);

        let stream = Socket::new(
            Domain::for_address(address),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        stream.connect(&address.into())?;
        socket::configure_stream(&stream, false)?;
        socket::disable_linger(&stream)?;

        let conn = Connection::new(stream, executor.clone());
        let state = Arc::new(CallState {
            calls: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(0),
        });

        let send_conn = Arc::clone(&conn);
        executor.spawn(move || {
            Task::spawn(transport::flush_connection(send_conn));
        });

        let recv_conn = Arc::clone(&conn);
        let recv_state = Arc::clone(&state);
        executor.spawn(move || {
            Task::spawn(receive_responses(recv_conn, recv_state));
        });

        Ok(ClientChannel {
            conn,
            executor,
            state,
        })
    }

    // Issues one call. The request id is allocated here (atomic fetch-add,
    // so ids are unique across calling threads); frame serialization, the
    // pending-map insertion, and the send-task wake all run on the reactor
    // thread, in that order.
    //
    pub fn call_method<F>(
        &self,
        method: &MethodDescriptor,
        controller: RpcController,
        request: Box<dyn Message>,
        response: Box<dyn Message>,
        done: F,
    ) -> bool
    where
        F: FnOnce(RpcController, Box<dyn Message>) + Send + 'static,
    {
        let request_id = self.state.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let header = Header::request(request_id, method.service.clone(), method.name.clone());

        let conn = Arc::clone(&self.conn);
        let state = Arc::clone(&self.state);
        let done: RpcDone = Box::new(done);

        self.executor.spawn(move || {
            let mut controller = controller;

            if conn.closed() {
                controller.set_failed("channel closed");
                done(controller, response);
                return;
            }

            {
                let mut buf = conn.write_buf();
                if let Err(err) = wire::write_frame(&mut buf, &header, request.as_ref()) {
                    error!(%err, "failed to serialize request");
                    controller.set_failed(err.to_string());
                    done(controller, response);
                    return;
                }
            }

            state.calls.lock().unwrap().insert(
                request_id,
                PendingCall {
                    controller,
                    response,
                    done,
                },
            );
            conn.resume_write();
        })
    }

    /// Closes the channel. Outstanding and late calls complete with a
    /// failed controller rather than leaking.
    ///
    pub fn close(&self) {
        let conn = Arc::clone(&self.conn);
        self.executor.spawn(move || {
            conn.close();
            // Wake both tasks so they observe the terminal state; the
            // receive task drains the pending calls on its way out.
            //
            conn.resume_write();
            conn.resume_read();
        });
    }

    /// Number of calls awaiting a response.
    ///
    pub fn pending_calls(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    pub fn peer_addr(&self) -> &str {
        self.conn.peer_addr()
    }
}

// The client receive loop: parse response frames, match them to pending
// calls by request id, fill the recorded response message, and run the
// completion. An unknown id skips the payload and keeps the connection; a
// malformed frame poisons it.
//
async fn receive_responses(conn: Arc<Connection>, state: Arc<CallState>) {
    RegisterReadAwaiter::new(&conn).await;

    loop {
        let Some(header_len) = transport::read_record_len(&conn).await else {
            break;
        };
        if !transport::read_at_least(&conn, header_len as usize).await {
            break;
        }

        let mut header = Header::default();
        if let Err(err) = transport::parse_bounded(&conn, &mut header, header_len as usize) {
            error!(peer = conn.peer_addr(), %err, "bad response header");
            break;
        }
        if header.magic != MAGIC || header.version != VERSION {
            error!(peer = conn.peer_addr(), magic = header.magic, "bad response frame");
            break;
        }

        let Some(payload_len) = transport::read_record_len(&conn).await else {
            break;
        };
        if !transport::read_at_least(&conn, payload_len as usize).await {
            break;
        }

        let pending = state.calls.lock().unwrap().remove(&header.request_id);
        let Some(mut call) = pending else {
            // Stale or spurious response; the connection itself is healthy.
            //
            warn!(request_id = header.request_id, "response for unknown request id");
            conn.read_buf().input_skip(payload_len as usize);
            continue;
        };

        match transport::parse_bounded(&conn, call.response.as_mut(), payload_len as usize) {
            Ok(()) => {
                (call.done)(call.controller, call.response);
            }
            Err(err) => {
                error!(request_id = header.request_id, %err, "bad response payload");
                call.controller.set_failed(err.to_string());
                (call.done)(call.controller, call.response);
                break;
            }
        }
    }

    transport::teardown(&conn);
    drain_pending_calls(&state);
}

// Completes every outstanding call with a synthetic channel-closed failure
// once the connection is gone.
//
fn drain_pending_calls(state: &CallState) {
    let drained: Vec<PendingCall> = {
        let mut calls = state.calls.lock().unwrap();
        calls.drain().map(|(_, call)| call).collect()
    };

    for mut call in drained {
        call.controller.set_failed("channel closed");
        (call.done)(call.controller, call.response);
    }
}
