use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Why a captured frame was rejected. Rejects are routine on a BUM tap and
/// are skipped silently rather than surfaced as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame ended before the named layer could be read in full.
    Truncated(Layer),
    /// The top nibble of the pseudowire control word was not zero.
    NotAControlWord(u8),
}

/// The layer a decode failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Ethernet,
    Mpls,
    ControlWord,
    InnerEthernet,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DecodeError::Truncated(layer) => {
                write!(f, "frame truncated inside the {} layer", layer)
            }
            DecodeError::NotAControlWord(nibble) => {
                write!(f, "control word top nibble must be zero, got 0x{:x}", nibble)
            }
        }
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Layer::Ethernet => "outer Ethernet",
            Layer::Mpls => "MPLS",
            Layer::ControlWord => "control word",
            Layer::InnerEthernet => "inner Ethernet",
        };
        f.write_str(name)
    }
}

impl StdError for DecodeError {}
