use std::sync::Arc;

use remora_reactor::awaitable::WaitWriteAwaiter;
use remora_reactor::connection::Connection;
use remora_reactor::executor::EventKind;

use crate::message::Message;
use crate::wire::WireError;

// Receive-loop and send-loop plumbing shared by the server and the client
// channel.

// Parks the receive task until at least `needed` bytes are buffered. Returns
// false when the connection closed first; bytes already buffered on a closed
// connection still count, so a complete frame received ahead of the close is
// parsed normally.
//
pub(crate) async fn read_at_least(conn: &Arc<Connection>, needed: usize) -> bool {
    loop {
        if conn.to_read_bytes() >= needed {
            return true;
        }
        if conn.closed() {
            return false;
        }
        conn.async_read().await;
    }
}

// Reads one little-endian u32 length prefix off the wire.
//
pub(crate) async fn read_record_len(conn: &Arc<Connection>) -> Option<u32> {
    if !read_at_least(conn, 4).await {
        return None;
    }
    let mut bytes = [0u8; 4];
    let n = conn.read_buf().read(&mut bytes);
    debug_assert_eq!(n, 4);
    Some(u32::from_le_bytes(bytes))
}

// Parses one message out of exactly `len` buffered bytes. The parse is
// bounded to the framed region; any region bytes the message did not
// consume are discarded so the next frame starts aligned.
//
pub(crate) fn parse_bounded(
    conn: &Arc<Connection>,
    message: &mut dyn Message,
    len: usize,
) -> Result<(), WireError> {
    let mut buf = conn.read_buf();
    buf.push_limit(len);
    let before = buf.input_byte_count();

    let result = message.parse(&mut *buf);

    if result.is_ok() {
        let consumed = (buf.input_byte_count() - before) as usize;
        if consumed < len {
            buf.input_skip(len - consumed);
        }
    }
    buf.pop_limit();
    result
}

// The send task body: park until there is something to flush, flush,
// repeat. Exits once the connection is closed.
//
pub(crate) async fn flush_connection(conn: Arc<Connection>) {
    loop {
        WaitWriteAwaiter::new(&conn).await;
        if conn.closed() {
            break;
        }
        conn.async_write().await;
    }
}

// Terminal path of a receive task: poison the connection, let the send task
// observe it, and hand the fd back to the reactor.
//
pub(crate) fn teardown(conn: &Arc<Connection>) {
    conn.close();
    conn.resume_write();
    conn.executor().add_event(conn, EventKind::Delete);
}
