use std::collections::HashMap;
use std::sync::Arc;

use crate::message::Message;

/// Names one method of one service. The client passes a descriptor to
/// `call_method`; the server resolves incoming headers against the
/// registered services' descriptors.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub service: String,
    pub name: String,
}

impl MethodDescriptor {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        MethodDescriptor {
            service: service.into(),
            name: name.into(),
        }
    }
}

// What the server requires of an exported service: describe its methods,
// instantiate fresh request/response messages from per-method prototypes,
// and dispatch a call synchronously. Handlers run on the reactor thread and
// must not block.
//
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn methods(&self) -> &[MethodDescriptor];

    fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods().iter().find(|method| method.name == name)
    }

    fn new_request(&self, method: &MethodDescriptor) -> Box<dyn Message>;

    fn new_response(&self, method: &MethodDescriptor) -> Box<dyn Message>;

    fn call(&self, method: &MethodDescriptor, request: &dyn Message, response: &mut dyn Message);
}

/// Server-side mapping from service name to service object; method lookup
/// within a service is the nested mapping.
///
pub type ServiceMap = HashMap<String, Arc<dyn Service>>;
