//! Wi-Fi sampler: current RSSI and minimum-ever RSSI (spec.md §4.E).

use super::SampleSink;
use crate::store::record::Value;

/// Platform fact this crate cannot observe on a host: current radio RSSI,
/// `None` when disassociated.
pub trait WifiSource: Send + Sync {
    fn rssi(&self) -> Option<i8>;
}

/// Owns the running minimum-RSSI tracking (see [`super::heap::HeapSampler`]
/// for the same shape applied to heap regions).
pub struct WifiSampler {
    source: Box<dyn WifiSource>,
    sink: SampleSink,
    min_rssi: Option<i8>,
}

impl WifiSampler {
    pub(crate) fn new(source: Box<dyn WifiSource>, sink: SampleSink) -> Self {
        Self {
            source,
            sink,
            min_rssi: None,
        }
    }

    /// Take one sample and report `rssi` and `min_rssi` as variables under
    /// tag `wifi`. No-op while disassociated.
    pub fn sample(&mut self) {
        let Some(rssi) = self.source.rssi() else {
            return;
        };
        let min_rssi = self.min_rssi.map_or(rssi, |m| m.min(rssi));
        self.min_rssi = Some(min_rssi);
        self.sink.report_variable("wifi", "rssi", Value::I32(rssi as i32));
        self.sink.report_variable("wifi", "min_rssi", Value::I32(min_rssi as i32));
    }
}
