//! In-memory log book.
//!
//! Every collection owns its records outright. Dives point at a location by
//! name only, so removing a location never invalidates a dive.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalInfo {
    pub diver_name: String,
    pub email_address: String,
    pub www_url: String,
    pub comments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlanType {
    #[default]
    SingleLevel,
    MultiLevel,
}

impl From<PlanType> for u8 {
    fn from(p: PlanType) -> u8 {
        match p {
            PlanType::SingleLevel => 0,
            PlanType::MultiLevel => 1,
        }
    }
}

impl TryFrom<u8> for PlanType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PlanType::SingleLevel),
            1 => Ok(PlanType::MultiLevel),
            v => Err(DecodeError::InvalidPlanType(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiveLog {
    /// Sort key of the book; read with [`DiveLog::log_number`], changed
    /// with [`LogBook::renumber_dive_log`].
    pub(crate) log_number: u32,
    pub dive_date: Option<NaiveDate>,
    pub dive_start: Option<NaiveTime>,
    /// Name of a [`LocationLog`]; resolved with [`LogBook::location_of`].
    pub location: String,
    pub buddy: String,
    /// Meters.
    pub max_depth: f32,
    pub dive_time: Option<NaiveTime>,
    pub bottom_time: Option<NaiveTime>,
    pub gas_type: String,
    /// Liters.
    pub surface_air_consumption: u32,
    /// Celsius.
    pub air_temperature: f32,
    pub surface_temperature: f32,
    pub water_temperature: f32,
    pub plan_type: PlanType,
    pub dive_type: String,
    pub description: String,
}

impl DiveLog {
    pub fn new(log_number: u32) -> Self {
        Self {
            log_number,
            ..Default::default()
        }
    }

    pub fn log_number(&self) -> u32 {
        self.log_number
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationLog {
    pub name: String,
    pub description: String,
}

impl LocationLog {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentHistoryEntry {
    pub date: Option<NaiveDate>,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentLog {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub serial_number: String,
    pub service_requirements: String,
    history: Vec<EquipmentHistoryEntry>,
}

impl EquipmentLog {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn history(&self) -> &[EquipmentHistoryEntry] {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut [EquipmentHistoryEntry] {
        &mut self.history
    }

    pub fn add_history(&mut self, date: Option<NaiveDate>, comment: impl Into<String>) {
        self.history.push(EquipmentHistoryEntry {
            date,
            comment: comment.into(),
        });
    }

    pub fn push_history(&mut self, entry: EquipmentHistoryEntry) {
        self.history.push(entry);
    }

    pub fn remove_history(&mut self, index: usize) -> Option<EquipmentHistoryEntry> {
        (index < self.history.len()).then(|| self.history.remove(index))
    }
}

/// One diver's log book.
///
/// Dive logs stay sorted by log number and location logs by name; equipment
/// keeps insertion order. Collections are only reachable through methods
/// that maintain those orders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBook {
    personal: PersonalInfo,
    #[serde(deserialize_with = "sorted_dives")]
    dive_logs: Vec<DiveLog>,
    #[serde(deserialize_with = "sorted_locations")]
    location_logs: Vec<LocationLog>,
    equipment_logs: Vec<EquipmentLog>,
}

fn sorted_dives<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<DiveLog>, D::Error> {
    let mut dives = Vec::<DiveLog>::deserialize(d)?;
    dives.sort_by_key(|dive| dive.log_number);
    Ok(dives)
}

fn sorted_locations<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Vec<LocationLog>, D::Error> {
    let mut locations = Vec::<LocationLog>::deserialize(d)?;
    locations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(locations)
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn personal(&self) -> &PersonalInfo {
        &self.personal
    }

    pub fn personal_mut(&mut self) -> &mut PersonalInfo {
        &mut self.personal
    }

    pub fn dive_logs(&self) -> &[DiveLog] {
        &self.dive_logs
    }

    pub fn location_logs(&self) -> &[LocationLog] {
        &self.location_logs
    }

    pub fn equipment_logs(&self) -> &[EquipmentLog] {
        &self.equipment_logs
    }

    pub fn is_empty(&self) -> bool {
        self.personal == PersonalInfo::default()
            && self.dive_logs.is_empty()
            && self.location_logs.is_empty()
            && self.equipment_logs.is_empty()
    }

    pub fn next_log_number(&self) -> u32 {
        self.dive_logs
            .last()
            .map_or(1, |d| d.log_number.saturating_add(1))
    }

    /// Inserts a blank dive numbered after the last one.
    pub fn new_dive_log(&mut self) -> &mut DiveLog {
        let idx = self.insert_dive_log(DiveLog::new(self.next_log_number()));
        &mut self.dive_logs[idx]
    }

    /// Sorted insert; dives with equal numbers keep insertion order.
    pub fn insert_dive_log(&mut self, dive: DiveLog) -> usize {
        let idx = self
            .dive_logs
            .partition_point(|d| d.log_number <= dive.log_number);
        self.dive_logs.insert(idx, dive);
        idx
    }

    pub fn dive_log(&self, log_number: u32) -> Option<&DiveLog> {
        self.dive_logs.iter().find(|d| d.log_number == log_number)
    }

    /// The log number stays fixed; use [`LogBook::renumber_dive_log`].
    pub fn dive_log_mut(&mut self, log_number: u32) -> Option<&mut DiveLog> {
        self.dive_logs
            .iter_mut()
            .find(|d| d.log_number == log_number)
    }

    pub fn remove_dive_log(&mut self, log_number: u32) -> Option<DiveLog> {
        let idx = self
            .dive_logs
            .iter()
            .position(|d| d.log_number == log_number)?;
        Some(self.dive_logs.remove(idx))
    }

    pub fn renumber_dive_log(&mut self, old: u32, new: u32) -> bool {
        let Some(mut dive) = self.remove_dive_log(old) else {
            return false;
        };
        dive.log_number = new;
        self.insert_dive_log(dive);
        true
    }

    pub fn insert_location_log(&mut self, location: LocationLog) -> usize {
        let idx = self
            .location_logs
            .partition_point(|l| l.name <= location.name);
        self.location_logs.insert(idx, location);
        idx
    }

    pub fn location_log(&self, name: &str) -> Option<&LocationLog> {
        self.location_logs.iter().find(|l| l.name == name)
    }

    /// Only the description is editable in place; the name is the sort key.
    pub fn location_description_mut(&mut self, name: &str) -> Option<&mut String> {
        self.location_logs
            .iter_mut()
            .find(|l| l.name == name)
            .map(|l| &mut l.description)
    }

    pub fn remove_location_log(&mut self, name: &str) -> Option<LocationLog> {
        let idx = self.location_logs.iter().position(|l| l.name == name)?;
        Some(self.location_logs.remove(idx))
    }

    pub fn location_of(&self, dive: &DiveLog) -> Option<&LocationLog> {
        self.location_log(&dive.location)
    }

    pub fn dives_at<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DiveLog> + 'a {
        self.dive_logs.iter().filter(move |d| d.location == name)
    }

    pub fn add_equipment_log(&mut self, equipment: EquipmentLog) -> usize {
        self.equipment_logs.push(equipment);
        self.equipment_logs.len() - 1
    }

    pub fn equipment_log_mut(&mut self, index: usize) -> Option<&mut EquipmentLog> {
        self.equipment_logs.get_mut(index)
    }

    /// Removes the equipment and its whole history.
    pub fn remove_equipment_log(&mut self, index: usize) -> Option<EquipmentLog> {
        (index < self.equipment_logs.len()).then(|| self.equipment_logs.remove(index))
    }

    pub fn history_entry_count(&self) -> usize {
        self.equipment_logs.iter().map(|e| e.history.len()).sum()
    }
}
