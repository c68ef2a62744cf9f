//! Protocol decoders
//!
//! One submodule per supported wire protocol. Each decoder implements
//! [`ProtocolDecoder`](crate::registry::ProtocolDecoder), owns its own
//! reassembly table and counters, and never inspects frames it did not
//! claim via `is_candidate`.

pub mod display;
pub mod ftcan;
pub mod obd;

pub use display::DisplayDecoder;
pub use ftcan::FtcanDecoder;
pub use obd::ObdDecoder;
