use super::{DecodeError, Layer, CONTROL_WORD_LEN, ETHERNET_HEADER_LEN, MPLS_SHIM_LEN};

/// An Ethernet header split off the front of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub ethertype: u16,
}

impl EthernetHeader {
    /// Split `frame` into its header and payload.
    pub fn split(frame: &[u8]) -> Result<(EthernetHeader, &[u8]), DecodeError> {
        if frame.len() < ETHERNET_HEADER_LEN {
            return Err(DecodeError::Truncated(Layer::Ethernet));
        }
        let header = EthernetHeader {
            destination: frame[0..6].try_into().unwrap(),
            source: frame[6..12].try_into().unwrap(),
            ethertype: u16::from_be_bytes(frame[12..14].try_into().unwrap()),
        };
        Ok((header, &frame[ETHERNET_HEADER_LEN..]))
    }
}

/// One 32-bit MPLS shim word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MplsShim {
    /// The 20-bit label value.
    pub label: u32,
    pub traffic_class: u8,
    pub bottom_of_stack: bool,
    pub ttl: u8,
}

impl MplsShim {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        let word = u32::from_be_bytes(bytes);
        MplsShim {
            label: word >> 12,
            traffic_class: ((word >> 9) & 0x7) as u8,
            bottom_of_stack: word & 0x100 != 0,
            ttl: word as u8,
        }
    }
}

/// The 4-byte pseudowire control word. For an Ethernet pseudowire the top
/// nibble is always zero; the remaining bits carry a sequence number that is
/// not interpreted downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub sequence_number: u32,
}

impl ControlWord {
    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, DecodeError> {
        if bytes[0] & 0xf0 != 0 {
            return Err(DecodeError::NotAControlWord(bytes[0] >> 4));
        }
        Ok(ControlWord {
            sequence_number: u32::from_be_bytes(bytes),
        })
    }
}

/// A fully decoded VPLS frame, borrowing from the captured buffer. `inner`
/// is the transported Ethernet frame, header and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VplsFrame<'a> {
    /// The bottom-of-stack shim; its label is the VPLS service label.
    pub shim: MplsShim,
    /// Number of shim words on the label stack.
    pub stack_depth: usize,
    pub control_word: ControlWord,
    pub inner: &'a [u8],
}

impl<'a> VplsFrame<'a> {
    /// Decode one raw captured frame: strip the outer Ethernet header, then
    /// parse the MPLS stack, the control word and the inner Ethernet frame.
    pub fn decode(frame: &'a [u8]) -> Result<Self, DecodeError> {
        let (_, payload) = EthernetHeader::split(frame)?;
        Self::parse(payload)
    }

    /// Decode the VPLS layers from the payload of an outer Ethernet frame.
    pub fn parse(payload: &'a [u8]) -> Result<Self, DecodeError> {
        let mut rest = payload;
        let mut stack_depth = 0;

        let shim = loop {
            if rest.len() < MPLS_SHIM_LEN {
                return Err(DecodeError::Truncated(Layer::Mpls));
            }
            let shim = MplsShim::from_bytes(rest[..MPLS_SHIM_LEN].try_into().unwrap());
            rest = &rest[MPLS_SHIM_LEN..];
            stack_depth += 1;
            if shim.bottom_of_stack {
                break shim;
            }
        };

        if rest.len() < CONTROL_WORD_LEN {
            return Err(DecodeError::Truncated(Layer::ControlWord));
        }
        let control_word = ControlWord::from_bytes(rest[..CONTROL_WORD_LEN].try_into().unwrap())?;
        let inner = &rest[CONTROL_WORD_LEN..];

        // The transported frame must at least carry a full Ethernet header.
        if inner.len() < ETHERNET_HEADER_LEN {
            return Err(DecodeError::Truncated(Layer::InnerEthernet));
        }

        Ok(VplsFrame {
            shim,
            stack_depth,
            control_word,
            inner,
        })
    }

    /// The VPLS service label: the bottom of the label stack.
    pub fn label(&self) -> u32 {
        self.shim.label
    }
}
