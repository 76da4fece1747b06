use super::*;

/// Hex ranges of the pending-block fields within a getwork header. The
/// offsets are part of the upstream wire contract; any other header layout
/// only needs this module changed.
const BITS_RANGE: Range<usize> = 232..240;
const HEIGHT_RANGE: Range<usize> = 256..264;

/// Snapshot of the current mining job. Never mutated in place: the template
/// store swaps in a freshly built value on every successful refresh.
///
/// `difficulty` holds the compact-decoded bits field, which is the network
/// target the full block must clear.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockTemplate {
    pub header: String,
    pub target: String,
    pub difficulty: BigUint,
    pub height: u64,
}

/// Ephemeral verification unit: one submitted header checked against one
/// target, either the miner's own share target or the template's network
/// target.
#[derive(Clone, Debug)]
pub struct Block {
    pub header: String,
    pub target: BigUint,
}

impl Block {
    /// Fails closed: a short or non-hex header is an invalid share, never a
    /// panic. Equality with the target verifies.
    pub fn verify(&self) -> bool {
        let Some(prefix) = self.header.get(..HEADER_HEX_LEN) else {
            return false;
        };

        let Ok(bytes) = hex::decode(prefix) else {
            return false;
        };

        let digest = Sha256::digest(&bytes);

        BigUint::from_bytes_le(&digest) <= self.target
    }
}

/// Extracts the pending block height and compact difficulty embedded in a
/// getwork header, both little-endian u32s at fixed offsets.
pub fn pending_block_fields(header: &str) -> Result<(u64, BigUint)> {
    let height = anyhow::Context::context(
        read_le_u32(header, HEIGHT_RANGE),
        "can't parse pending block height",
    )?;
    let bits = anyhow::Context::context(
        read_le_u32(header, BITS_RANGE),
        "can't parse pending block difficulty",
    )?;

    Ok((height.into(), difficulty::compact_to_big(bits)))
}

fn read_le_u32(header: &str, range: Range<usize>) -> Result<u32> {
    let field = header
        .get(range.clone())
        .with_context(|| format!("header shorter than {} hex chars", range.end))?;

    let bytes = hex::decode(field)?;

    Ok(u32::from_le_bytes(
        bytes.try_into().expect("8 hex chars decode to 4 bytes"),
    ))
}
