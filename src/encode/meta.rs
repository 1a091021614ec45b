//! Meta document: `{ver, timestamp, sha256, diagmeta:{metrics, variables,
//! conf}}` (spec.md §4.C). Produced only when the Registry CRC changes.

use std::collections::BTreeMap;

use super::encode_to_vec;
use crate::registry::Descriptor;

/// A rendered meta document. Unlike data documents, meta is never
/// truncated: spec.md's invariant 3 requires a full round-trip of the
/// descriptor set, so a meta document that would not fit is instead an
/// error the Reporter surfaces rather than silently drops.
pub struct MetaDocument {
    pub bytes: Vec<u8>,
}

fn group_by_tag(descriptors: &[Descriptor]) -> BTreeMap<&'static str, Vec<&Descriptor>> {
    let mut grouped: BTreeMap<&'static str, Vec<&Descriptor>> = BTreeMap::new();
    for d in descriptors {
        grouped.entry(d.tag).or_default().push(d);
    }
    grouped
}

/// Build a meta document from the Registry's enumerated state. Returns
/// `None` if the rendered document would exceed `max_size`.
pub fn build_meta(
    ver: &str,
    timestamp_us: u64,
    sha256: &str,
    metrics: &[Descriptor],
    variables: &[Descriptor],
    conf_enabled: &[(&str, bool)],
    max_size: usize,
) -> Option<MetaDocument> {
    let bytes = encode_to_vec(|enc| {
        enc.map(4)?.str("ver")?.str(ver)?.str("timestamp")?.u64(timestamp_us)?.str("sha256")?.str(sha256)?;
        enc.str("diagmeta")?.map(3)?;

        enc.str("metrics")?;
        encode_group(enc, &group_by_tag(metrics))?;

        enc.str("variables")?;
        encode_group(enc, &group_by_tag(variables))?;

        enc.str("conf")?.map(conf_enabled.len() as u64)?;
        for (tag, enabled) in conf_enabled {
            enc.str(tag)?.bool(*enabled)?;
        }
        Ok(())
    });

    if bytes.len() > max_size {
        return None;
    }
    Some(MetaDocument { bytes })
}

fn encode_group(
    enc: &mut minicbor::Encoder<Vec<u8>>,
    grouped: &BTreeMap<&'static str, Vec<&Descriptor>>,
) -> Result<(), minicbor::encode::Error<std::convert::Infallible>> {
    enc.map(grouped.len() as u64)?;
    for (tag, descriptors) in grouped {
        enc.str(tag)?.map(descriptors.len() as u64)?;
        for d in descriptors {
            enc.str(d.key)?;
            let fields = 3 + d.unit.is_some() as u64;
            enc.map(fields)?
                .str("label")?
                .str(d.label)?
                .str("path")?
                .str(d.path)?
                .str("type")?
                .str(d.data_type.as_str())?;
            if let Some(unit) = d.unit {
                enc.str("unit")?.str(unit)?;
            }
        }
    }
    Ok(())
}
