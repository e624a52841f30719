use crate::cache::TtlCache;

/// Provider-side context for a VPLS service label: the bridge domain the
/// label belongs to and the remote PE frames on it ingress from. Replaced
/// wholesale when the label store is re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelContext {
    pub domain: String,
    pub remote: String,
}

/// The cache instantiation used on the ingest path.
pub type LabelCache = TtlCache<u32, LabelContext>;
