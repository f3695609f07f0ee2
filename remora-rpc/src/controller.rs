// Per-call state the caller hands to `call_method` and gets back in the
// completion: failure flag and text, a cancel mark, and a timeout the core
// carries but does not enforce.
//
#[derive(Debug, Clone)]
pub struct RpcController {
    failed: bool,
    error_text: String,
    canceled: bool,
    timeout_ms: i64,
}

impl RpcController {
    pub fn new() -> Self {
        RpcController {
            failed: false,
            error_text: String::new(),
            canceled: false,
            timeout_ms: -1,
        }
    }

    pub fn reset(&mut self) {
        let timeout_ms = self.timeout_ms;
        *self = RpcController::new();
        self.timeout_ms = timeout_ms;
    }

    #[inline]
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error_text(&self) -> &str {
        &self.error_text
    }

    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.failed = true;
        self.error_text = reason.into();
    }

    pub fn start_cancel(&mut self) {
        self.canceled = true;
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Negative means no timeout. Carried for the caller's own bookkeeping;
    /// the runtime does not enforce it.
    ///
    pub fn set_timeout_ms(&mut self, timeout_ms: i64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }
}

impl Default for RpcController {
    fn default() -> Self {
        Self::new()
    }
}
