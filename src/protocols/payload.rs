//! Opaque payload: whatever bytes no other protocol claimed.

use crate::field::Field;
use crate::layout::Layout;
use crate::protocol::Protocol;

pub fn protocol() -> Protocol {
    Protocol::new(Layout::trusted("payload", vec![Field::rest("payload")])).description("Payload")
}
