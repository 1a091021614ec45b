//! Data document: `{ver, timestamp, sha256, diag:{boot?, crit, non_crit}}`
//! (spec.md §4.C).

use minicbor::Encoder;

use super::{encode_to_vec, fit_within};
use crate::store::record::{DataPoint, NonCriticalRecord, Severity, Value};

/// Boot-only section, carried on the first data document after a reset
/// (spec.md §3, §4.F).
#[derive(Debug, Clone)]
pub struct BootSection {
    pub reason: &'static str,
    pub core_dump_summary: Option<String>,
    pub boot_count: u32,
}

/// A rendered data document, bounded to the configured `max_document_size`.
pub struct DataDocument {
    pub bytes: Vec<u8>,
    /// How many leading critical records were actually included. The
    /// reporter releases exactly this many bytes' worth on ack, so it
    /// tracks *bytes*, not count; this is surfaced so the caller can sum
    /// the consumed records' encoded lengths.
    pub critical_included: usize,
    pub non_critical_included: usize,
}

fn value_into(enc: &mut Encoder<Vec<u8>>, value: &Value) -> Result<(), minicbor::encode::Error<std::convert::Infallible>> {
    match value {
        Value::Bool(v) => enc.bool(*v)?,
        Value::I32(v) => enc.i32(*v)?,
        Value::U32(v) => enc.u32(*v)?,
        Value::F32(v) => enc.f32(*v)?,
        Value::Ipv4(v) => enc.str(&format!("{}.{}.{}.{}", v[0], v[1], v[2], v[3]))?,
        Value::Mac(v) => enc.str(&format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            v[0], v[1], v[2], v[3], v[4], v[5]
        ))?,
        Value::Str(v) => enc.str(v)?,
        Value::Null => enc.null()?,
    };
    Ok(())
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Event => "event",
    }
}

fn render_point(point: &DataPoint) -> Vec<u8> {
    encode_to_vec(|enc| match point {
        DataPoint::Log {
            severity,
            pc,
            timestamp_us,
            tag,
            message,
        } => {
            enc.map(6)?
                .str("kind")?
                .str("log")?
                .str("severity")?
                .str(severity_str(*severity))?
                .str("pc")?
                .u32(*pc)?
                .str("ts")?
                .u64(*timestamp_us)?
                .str("tag")?
                .str(tag)?
                .str("msg")?
                .str(message)?;
            Ok(())
        }
        DataPoint::Metric { tag, key, timestamp_us, value } => {
            enc.map(6)?
                .str("kind")?
                .str("metric")?
                .str("type")?
                .str(value.data_type().as_str())?
                .str("ts")?
                .u64(*timestamp_us)?
                .str("tag")?
                .str(tag)?
                .str("key")?
                .str(key)?;
            enc.str("value")?;
            value_into(enc, value)?;
            Ok(())
        }
        DataPoint::Variable { tag, key, timestamp_us, value } => {
            enc.map(6)?
                .str("kind")?
                .str("variable")?
                .str("type")?
                .str(value.data_type().as_str())?
                .str("ts")?
                .u64(*timestamp_us)?
                .str("tag")?
                .str(tag)?
                .str("key")?
                .str(key)?;
            enc.str("value")?;
            value_into(enc, value)?;
            Ok(())
        }
    })
}

fn render_non_critical(record: &NonCriticalRecord, group_name: &str) -> Vec<u8> {
    encode_to_vec(|enc| {
        enc.map(2)?.str("group")?.str(group_name)?.str("bytes")?.bytes(&record.bytes)?;
        Ok(())
    })
}

fn render_boot(boot: &BootSection) -> Vec<u8> {
    encode_to_vec(|enc| {
        let fields = 2 + boot.core_dump_summary.is_some() as u64;
        enc.map(fields)?.str("reason")?.str(boot.reason)?.str("boot_count")?.u32(boot.boot_count)?;
        if let Some(summary) = &boot.core_dump_summary {
            enc.str("core_dump")?.str(summary)?;
        }
        Ok(())
    })
}

/// Build a data document. `critical` and `non_critical` are already
/// decoded records (the caller drains the ring-store slices via
/// `DataPoint::decode`/`NonCriticalRecord::decode` first). `group_name`
/// resolves a [`crate::store::record::GroupId`] to its registered name.
pub fn build_data(
    ver: &str,
    timestamp_us: u64,
    sha256: &str,
    boot: Option<&BootSection>,
    critical: &[DataPoint],
    non_critical: &[(crate::store::record::GroupId, NonCriticalRecord)],
    group_name: impl Fn(crate::store::record::GroupId) -> String,
    max_size: usize,
) -> DataDocument {
    if critical.is_empty() && non_critical.is_empty() && boot.is_none() {
        return DataDocument {
            bytes: Vec::new(),
            critical_included: 0,
            non_critical_included: 0,
        };
    }

    let crit_items: Vec<Vec<u8>> = critical.iter().map(render_point).collect();
    let non_crit_items: Vec<Vec<u8>> = non_critical
        .iter()
        .map(|(gid, rec)| render_non_critical(rec, &group_name(*gid)))
        .collect();
    let boot_bytes = boot.map(render_boot);

    let envelope_len = |crit_n: usize, non_crit_n: usize| -> usize {
        render(ver, timestamp_us, sha256, boot_bytes.as_deref(), &crit_items[..crit_n], &non_crit_items[..non_crit_n]).len()
    };

    let mut crit_n = crit_items.len();
    let mut non_crit_n = non_crit_items.len();

    if envelope_len(crit_n, non_crit_n) > max_size {
        // Baseline with zero records, to learn the fixed envelope overhead.
        let baseline = envelope_len(0, 0);
        let budget = max_size.saturating_sub(baseline);
        crit_n = fit_within(&crit_items, budget);
        let used = crit_items[..crit_n].iter().map(Vec::len).sum::<usize>();
        non_crit_n = fit_within(&non_crit_items, budget.saturating_sub(used));

        // Re-render and shrink further if header-length framing pushed us
        // back over (array/map length bytes can grow by 1 at size
        // boundaries 23/255/65535).
        while envelope_len(crit_n, non_crit_n) > max_size && (crit_n > 0 || non_crit_n > 0) {
            if non_crit_n > 0 {
                non_crit_n -= 1;
            } else {
                crit_n -= 1;
            }
        }
    }

    let bytes = render(ver, timestamp_us, sha256, boot_bytes.as_deref(), &crit_items[..crit_n], &non_crit_items[..non_crit_n]);
    if bytes.len() > max_size {
        return DataDocument {
            bytes: Vec::new(),
            critical_included: 0,
            non_critical_included: 0,
        };
    }

    DataDocument {
        bytes,
        critical_included: crit_n,
        non_critical_included: non_crit_n,
    }
}


fn render(
    ver: &str,
    timestamp_us: u64,
    sha256: &str,
    boot: Option<&[u8]>,
    crit: &[Vec<u8>],
    non_crit: &[Vec<u8>],
) -> Vec<u8> {
    encode_to_vec(|enc| {
        enc.map(4)?.str("ver")?.str(ver)?.str("timestamp")?.u64(timestamp_us)?.str("sha256")?.str(sha256)?;
        enc.str("diag")?;
        let diag_fields = 2 + boot.is_some() as u64;
        enc.map(diag_fields)?;
        if let Some(boot) = boot {
            enc.str("boot")?;
            enc.writer_mut().extend_from_slice(boot);
        }
        enc.str("crit")?.array(crit.len() as u64)?;
        for item in crit {
            enc.writer_mut().extend_from_slice(item);
        }
        enc.str("non_crit")?.array(non_crit.len() as u64)?;
        for item in non_crit {
            enc.writer_mut().extend_from_slice(item);
        }
        Ok(())
    })
}
