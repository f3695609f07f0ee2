use std::any::Any;

use remora_core::stream::{InputStream, OutputStream};

use crate::wire::WireError;

/// The contract the runtime requires of request, response, and header
/// records: a known encoded length, and serialization through the
/// block-at-a-time stream interfaces (no intermediate linearization).
///
/// `as_any` lets a service handler downcast the runtime's `Box<dyn Message>`
/// prototypes back to its concrete types.
///
pub trait Message: Send {
    fn encoded_len(&self) -> usize;

    fn serialize(&self, out: &mut dyn OutputStream) -> Result<(), WireError>;

    fn parse(&mut self, input: &mut dyn InputStream) -> Result<(), WireError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
