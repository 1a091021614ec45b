//! Small non-volatile key-value store (spec.md §6, "Persisted state").
//!
//! Only two keys matter to the core: `meta_crc` (last-acknowledged Registry
//! hash) and `node_id` (factory-provisioned, optional).

/// Injected non-volatile storage.
pub trait NvKv: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: &[u8]);
}

/// In-memory [`NvKv`] for tests.
#[derive(Default)]
pub struct InMemoryNvKv {
    map: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryNvKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NvKv for InMemoryNvKv {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &[u8]) {
        self.map.lock().insert(key.to_string(), value.to_vec());
    }
}

const META_CRC_KEY: &str = "meta_crc";
const NODE_ID_KEY: &str = "node_id";

/// Last-acknowledged meta CRC, or `0` if never persisted (spec.md §4.F:
/// "a change triggers a meta re-publish", so an absent value is treated as
/// "different from anything", forcing a first publish).
pub fn load_meta_crc(kv: &dyn NvKv) -> u64 {
    kv.get(META_CRC_KEY)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

pub fn store_meta_crc(kv: &dyn NvKv, crc: u64) {
    kv.set(META_CRC_KEY, &crc.to_le_bytes());
}

/// Node id: factory-provisioned if present, else derived from the station
/// MAC as 12 uppercase hex characters (spec.md §6).
pub fn node_id(kv: &dyn NvKv, station_mac: [u8; 6]) -> String {
    if let Some(bytes) = kv.get(NODE_ID_KEY) {
        if let Ok(s) = String::from_utf8(bytes) {
            if !s.is_empty() {
                return s;
            }
        }
    }
    mac_to_node_id(station_mac)
}

fn mac_to_node_id(mac: [u8; 6]) -> String {
    mac.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derives_node_id_from_mac_when_absent() {
        let kv = InMemoryNvKv::new();
        let id = node_id(&kv, [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]);
        assert_eq!(id, "001A2B3C4D5E");
    }

    #[test]
    fn prefers_factory_provisioned_node_id() {
        let kv = InMemoryNvKv::new();
        kv.set(NODE_ID_KEY, b"FACTORY123");
        let id = node_id(&kv, [0, 0, 0, 0, 0, 0]);
        assert_eq!(id, "FACTORY123");
    }

    #[test]
    fn meta_crc_round_trips() {
        let kv = InMemoryNvKv::new();
        assert_eq!(load_meta_crc(&kv), 0);
        store_meta_crc(&kv, 0xdead_beef_u64);
        assert_eq!(load_meta_crc(&kv), 0xdead_beef);
    }
}
