//! Layered decoder for VPLS pseudowire traffic: an outer Ethernet frame
//! carrying an MPLS label stack, the pseudowire control word, and the
//! transported inner Ethernet frame.

mod error;
mod frame;

pub use error::{DecodeError, Layer};
pub use frame::{ControlWord, EthernetHeader, MplsShim, VplsFrame};

/// Length of an untagged Ethernet header.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Length of one MPLS shim word.
pub const MPLS_SHIM_LEN: usize = 4;

/// Length of the pseudowire control word.
pub const CONTROL_WORD_LEN: usize = 4;
