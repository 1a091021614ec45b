//! Authoritative table of declared metrics and variables (spec.md §4.B).

mod crc;
mod descriptor;

pub use crc::fnv1a_64;
pub use descriptor::{DataType, Descriptor, Family};

use crate::error::RegistryError;
use crate::store::record::GroupId;

/// Two fixed-capacity tables of [`Descriptor`]s, one per [`Family`].
///
/// Removal is swap-with-last (spec.md §3: "descriptors are never
/// reallocated in place"), so iteration order is not registration order
/// and must not be relied on by callers other than the meta CRC, which
/// sorts before hashing precisely to avoid that dependency.
pub struct Registry {
    metrics: Vec<Descriptor>,
    variables: Vec<Descriptor>,
    max_metrics: usize,
    max_variables: usize,
    /// Interned `tag` names, replacing the original's raw code-segment
    /// pointer (spec.md §9, "Static tag-pointer assumption"). Populated as
    /// tags are first seen at registration; never shrinks.
    tags: Vec<&'static str>,
    /// Per-tag reporting toggle, indexed in lockstep with `tags`. Set via
    /// the CommandDispatcher's `["group", tag, "enabled"]` path.
    group_enabled: Vec<bool>,
}

impl Registry {
    pub fn new(max_metrics: usize, max_variables: usize) -> Self {
        Self {
            metrics: Vec::with_capacity(max_metrics),
            variables: Vec::with_capacity(max_variables),
            max_metrics,
            max_variables,
            tags: Vec::new(),
            group_enabled: Vec::new(),
        }
    }

    fn table(&self, family: Family) -> &Vec<Descriptor> {
        match family {
            Family::Metric => &self.metrics,
            Family::Variable => &self.variables,
        }
    }

    fn table_mut(&mut self, family: Family) -> &mut Vec<Descriptor> {
        match family {
            Family::Metric => &mut self.metrics,
            Family::Variable => &mut self.variables,
        }
    }

    fn capacity(&self, family: Family) -> usize {
        match family {
            Family::Metric => self.max_metrics,
            Family::Variable => self.max_variables,
        }
    }

    /// Register a new descriptor. Rejects null/empty fields, duplicates of
    /// `(tag, key)` within `family`, and a full table.
    pub fn register(&mut self, family: Family, descriptor: Descriptor) -> Result<(), RegistryError> {
        if descriptor.tag.is_empty() || descriptor.key.is_empty() || descriptor.label.is_empty() || descriptor.path.is_empty() {
            return Err(RegistryError::InvalidArgument);
        }
        if self.find(family, descriptor.tag, descriptor.key).is_some() {
            return Err(RegistryError::AlreadyExists);
        }
        if self.table(family).len() >= self.capacity(family) {
            return Err(RegistryError::OutOfCapacity);
        }
        self.table_mut(family).push(descriptor);
        self.intern_tag(descriptor.tag);
        Ok(())
    }

    fn find(&self, family: Family, tag: &str, key: &str) -> Option<usize> {
        self.table(family).iter().position(|d| d.tag == tag && d.key == key)
    }

    fn intern_tag(&mut self, tag: &'static str) -> GroupId {
        if let Some(pos) = self.tags.iter().position(|&t| t == tag) {
            return pos as GroupId;
        }
        self.tags.push(tag);
        self.group_enabled.push(true);
        (self.tags.len() - 1) as GroupId
    }

    /// The interned id for `tag`, if it has been registered at least once.
    pub fn group_id(&self, tag: &str) -> Option<GroupId> {
        self.tags.iter().position(|&t| t == tag).map(|i| i as GroupId)
    }

    /// The tag name a previously-interned [`GroupId`] stands for.
    pub fn group_name(&self, id: GroupId) -> Option<&'static str> {
        self.tags.get(id as usize).copied()
    }

    /// Whether a `GroupId`'s reporting is currently enabled. Unknown ids
    /// (never interned) default to enabled.
    pub fn is_group_enabled(&self, id: GroupId) -> bool {
        self.group_enabled.get(id as usize).copied().unwrap_or(true)
    }

    /// Enable or disable reporting for the group named `tag`. Returns
    /// `false` if `tag` was never registered.
    pub fn set_group_enabled(&mut self, tag: &str, enabled: bool) -> bool {
        match self.tags.iter().position(|&t| t == tag) {
            Some(idx) => {
                self.group_enabled[idx] = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove `(tag, key)` from `family` by swap-with-last.
    pub fn unregister(&mut self, family: Family, tag: &str, key: &str) -> Result<(), RegistryError> {
        let idx = self.find(family, tag, key).ok_or(RegistryError::NotFound)?;
        self.table_mut(family).swap_remove(idx);
        Ok(())
    }

    /// Clear both tables.
    pub fn unregister_all(&mut self) {
        self.metrics.clear();
        self.variables.clear();
    }

    /// Set or replace the unit on an already-registered descriptor.
    pub fn set_unit(&mut self, family: Family, tag: &str, key: &str, unit: &'static str) -> Result<(), RegistryError> {
        let idx = self.find(family, tag, key).ok_or(RegistryError::NotFound)?;
        self.table_mut(family)[idx].unit = Some(unit);
        Ok(())
    }

    /// Borrowed view of all descriptors in `family`, used by the Encoder to
    /// emit meta.
    pub fn enumerate(&self, family: Family) -> &[Descriptor] {
        self.table(family)
    }

    /// Validate that `(tag, key)` is registered in `family` with exactly
    /// `data_type`. Used before accepting a report from a sampler or the
    /// log hook.
    pub fn check_report(&self, family: Family, tag: &str, key: &str, data_type: DataType) -> Result<(), RegistryError> {
        let idx = self.find(family, tag, key).ok_or(RegistryError::NotFound)?;
        if self.table(family)[idx].data_type != data_type {
            return Err(RegistryError::InvalidArgument);
        }
        Ok(())
    }

    /// Hash over the full enumerated state of both tables, independent of
    /// registration order (tag-then-key sorted before hashing).
    pub fn meta_crc(&self) -> u64 {
        let mut entries: Vec<&Descriptor> = self.metrics.iter().chain(self.variables.iter()).collect();
        entries.sort_by(|a, b| (a.tag, a.key).cmp(&(b.tag, b.key)));
        let mut buf = Vec::new();
        for d in entries {
            buf.extend_from_slice(d.tag.as_bytes());
            buf.push(0);
            buf.extend_from_slice(d.key.as_bytes());
            buf.push(0);
            buf.extend_from_slice(d.label.as_bytes());
            buf.push(0);
            buf.extend_from_slice(d.path.as_bytes());
            buf.push(0);
            buf.push(d.data_type as u8);
            if let Some(unit) = d.unit {
                buf.extend_from_slice(unit.as_bytes());
            }
            buf.push(0xff);
        }
        fnv1a_64(&buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn descriptor(tag: &'static str, key: &'static str) -> Descriptor {
        Descriptor {
            tag,
            key,
            label: "Label",
            path: "a.b.c",
            data_type: DataType::U32,
            unit: None,
        }
    }

    #[test]
    fn register_then_duplicate_rejected() {
        let mut r = Registry::new(4, 4);
        r.register(Family::Metric, descriptor("heap", "free")).unwrap();
        assert_eq!(
            r.register(Family::Metric, descriptor("heap", "free")),
            Err(RegistryError::AlreadyExists)
        );
    }

    #[test]
    fn capacity_enforced() {
        let mut r = Registry::new(1, 0);
        r.register(Family::Metric, descriptor("a", "b")).unwrap();
        assert_eq!(
            r.register(Family::Metric, descriptor("c", "d")),
            Err(RegistryError::OutOfCapacity)
        );
    }

    #[test]
    fn shared_path_across_tags_allowed() {
        let mut r = Registry::new(4, 4);
        let mut d1 = descriptor("wifi", "rssi");
        d1.path = "net.signal";
        let mut d2 = descriptor("cell", "rssi");
        d2.path = "net.signal";
        r.register(Family::Metric, d1).unwrap();
        assert!(r.register(Family::Metric, d2).is_ok());
    }

    #[test]
    fn unregister_swap_removes_and_frees_capacity() {
        let mut r = Registry::new(1, 0);
        r.register(Family::Metric, descriptor("a", "b")).unwrap();
        r.unregister(Family::Metric, "a", "b").unwrap();
        assert!(r.register(Family::Metric, descriptor("c", "d")).is_ok());
    }

    #[test]
    fn meta_crc_independent_of_registration_order() {
        let mut r1 = Registry::new(4, 4);
        r1.register(Family::Metric, descriptor("a", "1")).unwrap();
        r1.register(Family::Metric, descriptor("b", "2")).unwrap();

        let mut r2 = Registry::new(4, 4);
        r2.register(Family::Metric, descriptor("b", "2")).unwrap();
        r2.register(Family::Metric, descriptor("a", "1")).unwrap();

        assert_eq!(r1.meta_crc(), r2.meta_crc());
    }

    #[test]
    fn meta_crc_changes_when_set_differs() {
        let mut r = Registry::new(4, 4);
        let before = r.meta_crc();
        r.register(Family::Metric, descriptor("a", "1")).unwrap();
        assert_ne!(before, r.meta_crc());
    }

    #[test]
    fn group_enable_toggle_by_tag_name() {
        let mut r = Registry::new(4, 4);
        r.register(Family::Metric, descriptor("heap", "free")).unwrap();
        let id = r.group_id("heap").unwrap();
        assert!(r.is_group_enabled(id));
        assert!(r.set_group_enabled("heap", false));
        assert!(!r.is_group_enabled(id));
        assert!(!r.set_group_enabled("no-such-tag", false));
    }

    #[test]
    fn check_report_type_mismatch_rejected() {
        let mut r = Registry::new(4, 4);
        r.register(Family::Metric, descriptor("a", "1")).unwrap();
        assert_eq!(
            r.check_report(Family::Metric, "a", "1", DataType::Bool),
            Err(RegistryError::InvalidArgument)
        );
        assert!(r.check_report(Family::Metric, "a", "1", DataType::U32).is_ok());
    }
}
