//! Per-connection structure capability table.
//!
//! Which structures a client may send, and in which wire form temporal
//! values travel, depends on the negotiated Bolt version and on the patches
//! accepted in HELLO. All of that is answered here from one table instead of
//! at each call site.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::decoder::DEFAULT_MAX_NESTING_DEPTH;
use super::marker;
use super::structures::{
    PackStreamDate, PackStreamDateTime, PackStreamDateTimeZoneId, PackStreamDuration,
    PackStreamLocalDateTime, PackStreamLocalTime, PackStreamPoint2D, PackStreamPoint3D,
    PackStreamTime,
};
use super::types::{PackStreamStructure, PackStreamValue};
use super::PackStreamError;
use crate::bolt::handshake::BoltVersion;

/// Patch name that switches Bolt 4.3/4.4 DateTime values to UTC seconds.
pub const UTC_PATCH: &str = "utc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    /// Server-generated only.
    Never,
    Always,
    /// Only while DateTime values use local seconds.
    LegacyOnly,
    /// Only while DateTime values use UTC seconds.
    UtcOnly,
}

struct StructSpec {
    tag: u8,
    name: &'static str,
    inbound: Inbound,
}

const STRUCTS: &[StructSpec] = &[
    StructSpec { tag: marker::NODE, name: "Node", inbound: Inbound::Never },
    StructSpec { tag: marker::RELATIONSHIP, name: "Relationship", inbound: Inbound::Never },
    StructSpec {
        tag: marker::UNBOUND_RELATIONSHIP,
        name: "UnboundRelationship",
        inbound: Inbound::Never,
    },
    StructSpec { tag: marker::PATH, name: "Path", inbound: Inbound::Never },
    StructSpec { tag: marker::DATE, name: "Date", inbound: Inbound::Always },
    StructSpec { tag: marker::TIME, name: "Time", inbound: Inbound::Always },
    StructSpec { tag: marker::LOCAL_TIME, name: "LocalTime", inbound: Inbound::Always },
    StructSpec { tag: marker::LOCAL_DATE_TIME, name: "LocalDateTime", inbound: Inbound::Always },
    StructSpec { tag: marker::DURATION, name: "Duration", inbound: Inbound::Always },
    StructSpec { tag: marker::POINT_2D, name: "Point2D", inbound: Inbound::Always },
    StructSpec { tag: marker::POINT_3D, name: "Point3D", inbound: Inbound::Always },
    StructSpec { tag: marker::LEGACY_DATE_TIME, name: "DateTime", inbound: Inbound::LegacyOnly },
    StructSpec {
        tag: marker::LEGACY_DATE_TIME_ZONE_ID,
        name: "DateTimeZoneId",
        inbound: Inbound::LegacyOnly,
    },
    StructSpec { tag: marker::DATE_TIME, name: "DateTime", inbound: Inbound::UtcOnly },
    StructSpec {
        tag: marker::DATE_TIME_ZONE_ID,
        name: "DateTimeZoneId",
        inbound: Inbound::UtcOnly,
    },
];

fn lookup(tag: u8) -> Option<&'static StructSpec> {
    STRUCTS.iter().find(|spec| spec.tag == tag)
}

/// Structure rules for one connection.
///
/// Cloning shares the patch state, so the reader (which sees HELLO first)
/// and the writer always agree on the DateTime form.
#[derive(Debug, Clone)]
pub struct StructProfile {
    version: BoltVersion,
    utc_patch: Arc<AtomicBool>,
    max_depth: usize,
}

impl StructProfile {
    pub fn new(version: BoltVersion) -> Self {
        Self {
            version,
            utc_patch: Arc::new(AtomicBool::new(false)),
            max_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    /// Bounds nesting both when decoding client messages and when
    /// converting values in either direction.
    pub fn with_max_nesting_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn version(&self) -> BoltVersion {
        self.version
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_depth
    }

    fn descend(&self, depth: usize) -> Result<usize, PackStreamError> {
        if depth >= self.max_depth {
            return Err(PackStreamError::NestingTooDeep {
                limit: self.max_depth,
            });
        }
        Ok(depth + 1)
    }

    /// Filters the patches requested in HELLO down to the ones this version
    /// accepts, and activates them.
    pub fn negotiate_patches(&self, requested: &[String]) -> Vec<String> {
        let mut accepted = Vec::new();
        if self.version.supports_utc_patch() && requested.iter().any(|p| p == UTC_PATCH) {
            self.utc_patch.store(true, Ordering::Release);
            accepted.push(UTC_PATCH.to_string());
        }
        accepted
    }

    /// Whether DateTime values travel as UTC seconds.
    pub fn utc_datetime(&self) -> bool {
        self.version.uses_utc_datetime() || self.utc_patch.load(Ordering::Acquire)
    }

    /// Whether a client may send a structure with this tag.
    pub fn supports(&self, tag: u8) -> bool {
        lookup(tag).map_or(false, |spec| self.accepts(spec.inbound))
    }

    fn accepts(&self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Never => false,
            Inbound::Always => true,
            Inbound::LegacyOnly => !self.utc_datetime(),
            Inbound::UtcOnly => self.utc_datetime(),
        }
    }

    /// Validates a value received from a client and normalises DateTime
    /// values to the canonical UTC form.
    pub fn hydrate(&self, value: PackStreamValue) -> Result<PackStreamValue, PackStreamError> {
        self.hydrate_at(value, 0)
    }

    fn hydrate_at(
        &self,
        value: PackStreamValue,
        depth: usize,
    ) -> Result<PackStreamValue, PackStreamError> {
        match value {
            PackStreamValue::List(items) => {
                let depth = self.descend(depth)?;
                Ok(PackStreamValue::List(
                    items
                        .into_iter()
                        .map(|item| self.hydrate_at(item, depth))
                        .collect::<Result<_, _>>()?,
                ))
            }
            PackStreamValue::Map(map) => {
                let depth = self.descend(depth)?;
                Ok(PackStreamValue::Map(
                    map.into_iter()
                        .map(|(k, v)| Ok((k, self.hydrate_at(v, depth)?)))
                        .collect::<Result<_, PackStreamError>>()?,
                ))
            }
            PackStreamValue::Structure(s) => {
                self.descend(depth)?;
                self.hydrate_structure(s)
            }
            scalar => Ok(scalar),
        }
    }

    fn hydrate_structure(&self, s: PackStreamStructure) -> Result<PackStreamValue, PackStreamError> {
        let spec = lookup(s.tag).ok_or(PackStreamError::UnknownStructure(s.tag))?;
        if !self.accepts(spec.inbound) {
            return Err(PackStreamError::UnsupportedStructure(spec.name));
        }
        match s.tag {
            marker::DATE => {
                PackStreamDate::from_structure(&s)?;
            }
            marker::TIME => {
                PackStreamTime::from_structure(&s)?;
            }
            marker::LOCAL_TIME => {
                PackStreamLocalTime::from_structure(&s)?;
            }
            marker::LOCAL_DATE_TIME => {
                PackStreamLocalDateTime::from_structure(&s)?;
            }
            marker::DURATION => {
                PackStreamDuration::from_structure(&s)?;
            }
            marker::POINT_2D => {
                PackStreamPoint2D::from_structure(&s)?;
            }
            marker::POINT_3D => {
                PackStreamPoint3D::from_structure(&s)?;
            }
            marker::DATE_TIME => {
                PackStreamDateTime::from_structure(&s)?;
            }
            marker::DATE_TIME_ZONE_ID => {
                PackStreamDateTimeZoneId::from_structure(&s)?;
            }
            marker::LEGACY_DATE_TIME => {
                return Ok(PackStreamDateTime::from_legacy_structure(&s)?.to_value());
            }
            marker::LEGACY_DATE_TIME_ZONE_ID => {
                return Ok(PackStreamDateTimeZoneId::from_legacy_structure(&s)?.to_value());
            }
            _ => {}
        }
        Ok(PackStreamValue::Structure(s))
    }

    /// Converts a value produced by the server into the wire form of this
    /// connection.
    pub fn dehydrate(&self, value: PackStreamValue) -> Result<PackStreamValue, PackStreamError> {
        self.dehydrate_at(value, 0)
    }

    fn dehydrate_at(
        &self,
        value: PackStreamValue,
        depth: usize,
    ) -> Result<PackStreamValue, PackStreamError> {
        match value {
            PackStreamValue::List(items) => {
                let depth = self.descend(depth)?;
                Ok(PackStreamValue::List(
                    items
                        .into_iter()
                        .map(|item| self.dehydrate_at(item, depth))
                        .collect::<Result<_, _>>()?,
                ))
            }
            PackStreamValue::Map(map) => {
                let depth = self.descend(depth)?;
                Ok(PackStreamValue::Map(
                    map.into_iter()
                        .map(|(k, v)| Ok((k, self.dehydrate_at(v, depth)?)))
                        .collect::<Result<_, PackStreamError>>()?,
                ))
            }
            PackStreamValue::Structure(s) => {
                let depth = self.descend(depth)?;
                self.dehydrate_structure(s, depth)
            }
            scalar => Ok(scalar),
        }
    }

    fn dehydrate_structure(
        &self,
        mut s: PackStreamStructure,
        depth: usize,
    ) -> Result<PackStreamValue, PackStreamError> {
        let utc = self.utc_datetime();
        match s.tag {
            marker::DATE_TIME if !utc => {
                return PackStreamDateTime::from_structure(&s)?.to_legacy_value()
            }
            marker::DATE_TIME_ZONE_ID if !utc => {
                return PackStreamDateTimeZoneId::from_structure(&s)?.to_legacy_value()
            }
            marker::LEGACY_DATE_TIME if utc => {
                return Ok(PackStreamDateTime::from_legacy_structure(&s)?.to_value())
            }
            marker::LEGACY_DATE_TIME_ZONE_ID if utc => {
                return Ok(PackStreamDateTimeZoneId::from_legacy_structure(&s)?.to_value())
            }
            marker::NODE => self.fit_element_ids(&mut s, 3, &[0]),
            marker::RELATIONSHIP => self.fit_element_ids(&mut s, 5, &[0, 1, 2]),
            marker::UNBOUND_RELATIONSHIP => self.fit_element_ids(&mut s, 3, &[0]),
            marker::PATH => {
                s.fields = s
                    .fields
                    .into_iter()
                    .map(|field| self.dehydrate_at(field, depth))
                    .collect::<Result<_, _>>()?;
            }
            _ => {}
        }
        if matches!(s.tag, marker::NODE | marker::RELATIONSHIP | marker::UNBOUND_RELATIONSHIP) {
            // Property maps may hold temporal values.
            s.fields = s
                .fields
                .into_iter()
                .map(|field| self.dehydrate_at(field, depth))
                .collect::<Result<_, _>>()?;
        }
        Ok(PackStreamValue::Structure(s))
    }

    /// Bolt 5 graph structures carry string element ids after the Bolt 4
    /// fields; derive them from the numeric ids when missing, drop them on
    /// Bolt 4.
    fn fit_element_ids(&self, s: &mut PackStreamStructure, base_arity: usize, id_fields: &[usize]) {
        if self.version.uses_element_ids() {
            if s.fields.len() == base_arity {
                for &index in id_fields {
                    let element_id = match s.fields.get(index) {
                        Some(PackStreamValue::Integer(id)) => id.to_string(),
                        _ => String::new(),
                    };
                    s.fields.push(PackStreamValue::String(element_id));
                }
            }
        } else {
            s.fields.truncate(base_arity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::packstream::PackStreamNode;
    use std::collections::HashMap;

    fn legacy_datetime() -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::LEGACY_DATE_TIME_ZONE_ID,
            vec![
                PackStreamValue::Integer(1_622_548_800 + 7200),
                PackStreamValue::Integer(0),
                PackStreamValue::from("Europe/Berlin"),
            ],
        ))
    }

    fn utc_datetime() -> PackStreamValue {
        PackStreamDateTimeZoneId::new(1_622_548_800, 0, "Europe/Berlin")
            .unwrap()
            .to_value()
    }

    #[test]
    fn test_graph_structures_never_inbound() {
        let profile = StructProfile::new(BoltVersion::V5_0);
        let node = PackStreamNode::new(1, vec![], HashMap::new()).to_value();
        let err = profile.hydrate(node).unwrap_err();
        assert_eq!(err.to_string(), "Node values cannot be unpacked with this version of bolt");
        assert!(!profile.supports(marker::PATH));
    }

    #[test]
    fn test_unknown_tag() {
        let profile = StructProfile::new(BoltVersion::V4_4);
        let value = PackStreamValue::Structure(PackStreamStructure::new(0x01, vec![]));
        assert!(matches!(
            profile.hydrate(value),
            Err(PackStreamError::UnknownStructure(0x01))
        ));
    }

    #[test]
    fn test_legacy_datetime_on_unpatched_4_4() {
        let profile = StructProfile::new(BoltVersion::V4_4);
        assert!(profile.supports(marker::LEGACY_DATE_TIME));
        assert!(!profile.supports(marker::DATE_TIME));
        assert_eq!(profile.hydrate(legacy_datetime()).unwrap(), utc_datetime());
        assert!(matches!(
            profile.hydrate(utc_datetime()),
            Err(PackStreamError::UnsupportedStructure("DateTimeZoneId"))
        ));
    }

    #[test]
    fn test_utc_patch_switches_forms() {
        let profile = StructProfile::new(BoltVersion::V4_4);
        let accepted = profile.negotiate_patches(&["utc".to_string(), "bogus".to_string()]);
        assert_eq!(accepted, vec!["utc".to_string()]);
        assert!(profile.utc_datetime());
        assert_eq!(profile.hydrate(utc_datetime()).unwrap(), utc_datetime());
        assert!(profile.hydrate(legacy_datetime()).is_err());
    }

    #[test]
    fn test_patch_state_is_shared_between_clones() {
        let reader = StructProfile::new(BoltVersion::V4_3);
        let writer = reader.clone();
        reader.negotiate_patches(&["utc".to_string()]);
        assert!(writer.utc_datetime());
    }

    #[test]
    fn test_utc_patch_ignored_outside_4_3_and_4_4() {
        let profile = StructProfile::new(BoltVersion::V4_2);
        assert!(profile.negotiate_patches(&["utc".to_string()]).is_empty());
        assert!(!profile.utc_datetime());
        assert!(StructProfile::new(BoltVersion::V5_0).utc_datetime());
    }

    #[test]
    fn test_dehydrate_datetime_to_legacy() {
        let profile = StructProfile::new(BoltVersion::V4_4);
        assert_eq!(profile.dehydrate(utc_datetime()).unwrap(), legacy_datetime());
    }

    #[test]
    fn test_dehydrate_node_element_ids() {
        let node = PackStreamNode::new(7, vec!["A".into()], HashMap::new()).to_value();

        let v5 = StructProfile::new(BoltVersion::V5_0).dehydrate(node.clone()).unwrap();
        let fields = &v5.as_structure().unwrap().fields;
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3].as_str(), Some("7"));

        let with_id = PackStreamNode::new(7, vec![], HashMap::new())
            .with_element_id("4:db:7")
            .to_value();
        let v4 = StructProfile::new(BoltVersion::V4_4).dehydrate(with_id).unwrap();
        assert_eq!(v4.as_structure().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_point_is_not_fatal() {
        let profile = StructProfile::new(BoltVersion::V4_4);
        let point = PackStreamValue::Structure(PackStreamStructure::new(
            marker::POINT_2D,
            vec![
                PackStreamValue::Integer(9999),
                PackStreamValue::Float(0.0),
                PackStreamValue::Float(0.0),
            ],
        ));
        let err = profile.hydrate(PackStreamValue::List(vec![point])).unwrap_err();
        assert!(!err.is_fatal());
    }

    fn nested(depth: usize) -> PackStreamValue {
        (0..depth).fold(PackStreamValue::Null, |inner, _| PackStreamValue::List(vec![inner]))
    }

    #[test]
    fn test_conversions_bounded_by_nesting_depth() {
        let profile = StructProfile::new(BoltVersion::V4_4).with_max_nesting_depth(4);
        assert!(profile.hydrate(nested(4)).is_ok());
        assert!(profile.dehydrate(nested(4)).is_ok());

        assert!(matches!(
            profile.hydrate(nested(5)),
            Err(PackStreamError::NestingTooDeep { limit: 4 })
        ));
        assert!(matches!(
            profile.dehydrate(nested(5)),
            Err(PackStreamError::NestingTooDeep { limit: 4 })
        ));
    }

    #[test]
    fn test_dehydrate_out_of_range_datetime() {
        let profile = StructProfile::new(BoltVersion::V4_4);
        let value = PackStreamDateTime::new(i64::MAX, 0, 60).to_value();
        assert!(matches!(
            profile.dehydrate(value),
            Err(PackStreamError::InvalidValue(_))
        ));
    }
}
