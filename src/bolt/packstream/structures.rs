//! Typed views of graph, temporal and spatial structures.
//!
//! DateTime values are held in their canonical form: seconds since the Unix
//! epoch in UTC. [`StructProfile`](super::StructProfile) converts to and from
//! the legacy local-seconds form used by Bolt 4.x without the `utc` patch.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::marker;
use super::types::{PackStreamStructure, PackStreamValue};
use super::PackStreamError;

const MAX_OFFSET_SECONDS: i64 = 18 * 3600;

fn expect_tag(s: &PackStreamStructure, tag: u8, name: &str, arity: usize) -> Result<(), PackStreamError> {
    if s.tag != tag {
        return Err(PackStreamError::InvalidStructure(format!(
            "expected {} tag 0x{:02X}, got 0x{:02X}",
            name, tag, s.tag
        )));
    }
    if s.fields.len() != arity {
        return Err(PackStreamError::InvalidStructure(format!(
            "{} requires {} fields, got {}",
            name,
            arity,
            s.fields.len()
        )));
    }
    Ok(())
}

fn int_field(s: &PackStreamStructure, index: usize, name: &str) -> Result<i64, PackStreamError> {
    s.fields[index].as_int().ok_or_else(|| {
        PackStreamError::InvalidStructure(format!("{} field {} must be an integer", name, index))
    })
}

fn float_field(s: &PackStreamStructure, index: usize, name: &str) -> Result<f64, PackStreamError> {
    match &s.fields[index] {
        PackStreamValue::Float(f) => Ok(*f),
        _ => Err(PackStreamError::InvalidStructure(format!(
            "{} field {} must be a float",
            name, index
        ))),
    }
}

fn str_field<'a>(
    s: &'a PackStreamStructure,
    index: usize,
    name: &str,
) -> Result<&'a str, PackStreamError> {
    s.fields[index].as_str().ok_or_else(|| {
        PackStreamError::InvalidStructure(format!("{} field {} must be a string", name, index))
    })
}

fn check_offset(offset: i64) -> Result<i32, PackStreamError> {
    if offset.unsigned_abs() > MAX_OFFSET_SECONDS as u64 {
        return Err(PackStreamError::InvalidValue(format!(
            "Zone offset in seconds not in valid range: {} (must be between -{} and {})",
            offset, MAX_OFFSET_SECONDS, MAX_OFFSET_SECONDS
        )));
    }
    Ok(offset as i32)
}

fn check_nanos(nanos: i64) -> Result<u32, PackStreamError> {
    if !(0..1_000_000_000).contains(&nanos) {
        return Err(PackStreamError::InvalidValue(format!(
            "Nanosecond of second out of range: {}",
            nanos
        )));
    }
    Ok(nanos as u32)
}

fn parse_zone(zone_id: &str) -> Result<Tz, PackStreamError> {
    zone_id
        .parse::<Tz>()
        .map_err(|_| PackStreamError::InvalidValue(format!("Unknown time zone id `{}`", zone_id)))
}

fn out_of_range(seconds: i64) -> PackStreamError {
    PackStreamError::InvalidValue(format!("Instant out of range: {} seconds", seconds))
}

fn utc_instant(seconds: i64, nanos: u32) -> Result<DateTime<Utc>, PackStreamError> {
    DateTime::from_timestamp(seconds, nanos).ok_or_else(|| out_of_range(seconds))
}

// ============================================================================
// Graph structures
// ============================================================================

/// Node. `element_id` is only present on the Bolt 5 wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PackStreamNode {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, PackStreamValue>,
    pub element_id: Option<String>,
}

impl PackStreamNode {
    pub fn new(id: i64, labels: Vec<String>, properties: HashMap<String, PackStreamValue>) -> Self {
        Self {
            id,
            labels,
            properties,
            element_id: None,
        }
    }

    pub fn with_element_id(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }

    pub fn to_value(&self) -> PackStreamValue {
        let mut fields = vec![
            PackStreamValue::Integer(self.id),
            PackStreamValue::string_list(self.labels.iter().cloned()),
            PackStreamValue::Map(self.properties.clone()),
        ];
        if let Some(element_id) = &self.element_id {
            fields.push(PackStreamValue::String(element_id.clone()));
        }
        PackStreamValue::Structure(PackStreamStructure::new(marker::NODE, fields))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackStreamRelationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub rel_type: String,
    pub properties: HashMap<String, PackStreamValue>,
}

impl PackStreamRelationship {
    pub fn new(
        id: i64,
        start_node_id: i64,
        end_node_id: i64,
        rel_type: impl Into<String>,
        properties: HashMap<String, PackStreamValue>,
    ) -> Self {
        Self {
            id,
            start_node_id,
            end_node_id,
            rel_type: rel_type.into(),
            properties,
        }
    }

    /// Bolt 4 shape; element ids are added by the profile on Bolt 5.
    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::RELATIONSHIP,
            vec![
                PackStreamValue::Integer(self.id),
                PackStreamValue::Integer(self.start_node_id),
                PackStreamValue::Integer(self.end_node_id),
                PackStreamValue::String(self.rel_type.clone()),
                PackStreamValue::Map(self.properties.clone()),
            ],
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackStreamUnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: HashMap<String, PackStreamValue>,
}

impl PackStreamUnboundRelationship {
    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::UNBOUND_RELATIONSHIP,
            vec![
                PackStreamValue::Integer(self.id),
                PackStreamValue::String(self.rel_type.clone()),
                PackStreamValue::Map(self.properties.clone()),
            ],
        ))
    }
}

/// Path as alternating node/relationship indices.
#[derive(Debug, Clone, PartialEq)]
pub struct PackStreamPath {
    pub nodes: Vec<PackStreamNode>,
    pub relationships: Vec<PackStreamUnboundRelationship>,
    pub indices: Vec<i64>,
}

impl PackStreamPath {
    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::PATH,
            vec![
                PackStreamValue::List(self.nodes.iter().map(|n| n.to_value()).collect()),
                PackStreamValue::List(self.relationships.iter().map(|r| r.to_value()).collect()),
                PackStreamValue::List(
                    self.indices.iter().map(|i| PackStreamValue::Integer(*i)).collect(),
                ),
            ],
        ))
    }
}

// ============================================================================
// Temporal structures
// ============================================================================

/// Days since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStreamDate {
    pub days: i64,
}

impl PackStreamDate {
    pub fn new(days: i64) -> Self {
        Self { days }
    }

    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::DATE,
            vec![PackStreamValue::Integer(self.days)],
        ))
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::DATE, "Date", 1)?;
        Ok(Self::new(int_field(s, 0, "Date")?))
    }
}

/// Nanoseconds since midnight plus an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStreamTime {
    pub nanoseconds: i64,
    pub tz_offset_seconds: i32,
}

impl PackStreamTime {
    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::TIME,
            vec![
                PackStreamValue::Integer(self.nanoseconds),
                PackStreamValue::Integer(self.tz_offset_seconds as i64),
            ],
        ))
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::TIME, "Time", 2)?;
        Ok(Self {
            nanoseconds: int_field(s, 0, "Time")?,
            tz_offset_seconds: check_offset(int_field(s, 1, "Time")?)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStreamLocalTime {
    pub nanoseconds: i64,
}

impl PackStreamLocalTime {
    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::LOCAL_TIME, "LocalTime", 1)?;
        Ok(Self {
            nanoseconds: int_field(s, 0, "LocalTime")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStreamLocalDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl PackStreamLocalDateTime {
    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::LOCAL_DATE_TIME, "LocalDateTime", 2)?;
        Ok(Self {
            seconds: int_field(s, 0, "LocalDateTime")?,
            nanoseconds: int_field(s, 1, "LocalDateTime")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStreamDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl PackStreamDuration {
    pub fn new(months: i64, days: i64, seconds: i64, nanoseconds: i64) -> Self {
        Self {
            months,
            days,
            seconds,
            nanoseconds,
        }
    }

    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::DURATION,
            vec![
                PackStreamValue::Integer(self.months),
                PackStreamValue::Integer(self.days),
                PackStreamValue::Integer(self.seconds),
                PackStreamValue::Integer(self.nanoseconds),
            ],
        ))
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::DURATION, "Duration", 4)?;
        Ok(Self::new(
            int_field(s, 0, "Duration")?,
            int_field(s, 1, "Duration")?,
            int_field(s, 2, "Duration")?,
            int_field(s, 3, "Duration")?,
        ))
    }
}

/// DateTime with a fixed offset, canonical UTC seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStreamDateTime {
    pub seconds: i64,
    pub nanoseconds: u32,
    pub tz_offset_seconds: i32,
}

impl PackStreamDateTime {
    pub fn new(seconds: i64, nanoseconds: u32, tz_offset_seconds: i32) -> Self {
        Self {
            seconds,
            nanoseconds,
            tz_offset_seconds,
        }
    }

    pub fn to_value(&self) -> PackStreamValue {
        self.structure(marker::DATE_TIME, self.seconds)
    }

    /// Wire value with local wall-clock seconds.
    pub fn to_legacy_value(&self) -> Result<PackStreamValue, PackStreamError> {
        let local = self
            .seconds
            .checked_add(self.tz_offset_seconds as i64)
            .ok_or_else(|| out_of_range(self.seconds))?;
        Ok(self.structure(marker::LEGACY_DATE_TIME, local))
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::DATE_TIME, "DateTime", 3)?;
        Self::parse(s, "DateTime")
    }

    pub fn from_legacy_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::LEGACY_DATE_TIME, "DateTime", 3)?;
        let local = Self::parse(s, "DateTime")?;
        let seconds = local
            .seconds
            .checked_sub(local.tz_offset_seconds as i64)
            .ok_or_else(|| out_of_range(local.seconds))?;
        Ok(Self { seconds, ..local })
    }

    fn parse(s: &PackStreamStructure, name: &str) -> Result<Self, PackStreamError> {
        Ok(Self {
            seconds: int_field(s, 0, name)?,
            nanoseconds: check_nanos(int_field(s, 1, name)?)?,
            tz_offset_seconds: check_offset(int_field(s, 2, name)?)?,
        })
    }

    fn structure(&self, tag: u8, seconds: i64) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            tag,
            vec![
                PackStreamValue::Integer(seconds),
                PackStreamValue::Integer(self.nanoseconds as i64),
                PackStreamValue::Integer(self.tz_offset_seconds as i64),
            ],
        ))
    }
}

/// DateTime in a named zone, canonical UTC seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackStreamDateTimeZoneId {
    pub seconds: i64,
    pub nanoseconds: u32,
    pub zone_id: String,
}

impl PackStreamDateTimeZoneId {
    /// Builds a value from UTC seconds, validating the zone id.
    pub fn new(seconds: i64, nanoseconds: u32, zone_id: &str) -> Result<Self, PackStreamError> {
        parse_zone(zone_id)?;
        Ok(Self {
            seconds,
            nanoseconds,
            zone_id: zone_id.to_string(),
        })
    }

    pub fn from_chrono(value: &DateTime<Tz>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanoseconds: value.timestamp_subsec_nanos(),
            zone_id: value.timezone().name().to_string(),
        }
    }

    pub fn to_chrono(&self) -> Result<DateTime<Tz>, PackStreamError> {
        let tz = parse_zone(&self.zone_id)?;
        Ok(utc_instant(self.seconds, self.nanoseconds)?.with_timezone(&tz))
    }

    pub fn to_value(&self) -> PackStreamValue {
        self.structure(marker::DATE_TIME_ZONE_ID, self.seconds)
    }

    /// Wire value with local wall-clock seconds in the zone.
    pub fn to_legacy_value(&self) -> Result<PackStreamValue, PackStreamError> {
        let local = self.to_chrono()?.naive_local().and_utc().timestamp();
        Ok(self.structure(marker::LEGACY_DATE_TIME_ZONE_ID, local))
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::DATE_TIME_ZONE_ID, "DateTimeZoneId", 3)?;
        let nanos = check_nanos(int_field(s, 1, "DateTimeZoneId")?)?;
        Self::new(
            int_field(s, 0, "DateTimeZoneId")?,
            nanos,
            str_field(s, 2, "DateTimeZoneId")?,
        )
    }

    /// Resolves local wall-clock seconds in the zone to UTC. Ambiguous local
    /// times resolve to the earlier instant.
    pub fn from_legacy_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::LEGACY_DATE_TIME_ZONE_ID, "DateTimeZoneId", 3)?;
        let local_seconds = int_field(s, 0, "DateTimeZoneId")?;
        let nanos = check_nanos(int_field(s, 1, "DateTimeZoneId")?)?;
        let zone_id = str_field(s, 2, "DateTimeZoneId")?;
        let tz = parse_zone(zone_id)?;
        let naive: NaiveDateTime = utc_instant(local_seconds, nanos)?.naive_utc();
        let resolved = tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
            PackStreamError::InvalidValue(format!(
                "Local date time {} does not exist in zone `{}`",
                naive, zone_id
            ))
        })?;
        Ok(Self {
            seconds: resolved.timestamp(),
            nanoseconds: nanos,
            zone_id: zone_id.to_string(),
        })
    }

    fn structure(&self, tag: u8, seconds: i64) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            tag,
            vec![
                PackStreamValue::Integer(seconds),
                PackStreamValue::Integer(self.nanoseconds as i64),
                PackStreamValue::String(self.zone_id.clone()),
            ],
        ))
    }
}

// ============================================================================
// Spatial structures
// ============================================================================

/// Coordinate reference systems known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Cartesian,
    Cartesian3D,
    Wgs84,
    Wgs84_3D,
}

impl Crs {
    pub fn from_srid(srid: i64) -> Option<Self> {
        match srid {
            7203 => Some(Crs::Cartesian),
            9157 => Some(Crs::Cartesian3D),
            4326 => Some(Crs::Wgs84),
            4979 => Some(Crs::Wgs84_3D),
            _ => None,
        }
    }

    pub fn srid(self) -> i32 {
        match self {
            Crs::Cartesian => 7203,
            Crs::Cartesian3D => 9157,
            Crs::Wgs84 => 4326,
            Crs::Wgs84_3D => 4979,
        }
    }

    pub fn dimension(self) -> usize {
        match self {
            Crs::Cartesian | Crs::Wgs84 => 2,
            Crs::Cartesian3D | Crs::Wgs84_3D => 3,
        }
    }

    fn resolve(srid: i64, coordinates: usize) -> Result<Self, PackStreamError> {
        let crs = Crs::from_srid(srid).ok_or_else(|| {
            PackStreamError::InvalidValue(format!(
                "Unknown coordinate reference system code: {}",
                srid
            ))
        })?;
        if crs.dimension() != coordinates {
            return Err(PackStreamError::InvalidValue(format!(
                "Cannot create point with {}D coordinate reference system and {} coordinates. \
                 Please consider using equivalent {}D coordinate reference system",
                crs.dimension(),
                coordinates,
                coordinates
            )));
        }
        Ok(crs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackStreamPoint2D {
    pub crs: Crs,
    pub x: f64,
    pub y: f64,
}

impl PackStreamPoint2D {
    pub fn to_value(&self) -> PackStreamValue {
        PackStreamValue::Structure(PackStreamStructure::new(
            marker::POINT_2D,
            vec![
                PackStreamValue::Integer(self.crs.srid() as i64),
                PackStreamValue::Float(self.x),
                PackStreamValue::Float(self.y),
            ],
        ))
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::POINT_2D, "Point2D", 3)?;
        let crs = Crs::resolve(int_field(s, 0, "Point2D")?, 2)?;
        Ok(Self {
            crs,
            x: float_field(s, 1, "Point2D")?,
            y: float_field(s, 2, "Point2D")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackStreamPoint3D {
    pub crs: Crs,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PackStreamPoint3D {
    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, marker::POINT_3D, "Point3D", 4)?;
        let crs = Crs::resolve(int_field(s, 0, "Point3D")?, 3)?;
        Ok(Self {
            crs,
            x: float_field(s, 1, "Point3D")?,
            y: float_field(s, 2, "Point3D")?,
            z: float_field(s, 3, "Point3D")?,
        })
    }
}
