use std::collections::BTreeSet;
use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::ImportError;
use crate::workflows::allocation::domain::{
    ApplicantId, ApplicantRecord, ApplicationStatus, Gender, GenderPolicy, HostelId, Room, RoomId,
};

/// The header occupies line 1, so the first data row is line 2.
const FIRST_DATA_LINE: usize = 2;

pub(crate) fn parse_rooms<R: Read>(reader: R) -> Result<Vec<Room>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rooms = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, row) in csv_reader.deserialize::<RoomRow>().enumerate() {
        let line = index + FIRST_DATA_LINE;
        let room = row?.into_room(line)?;
        if !seen.insert(room.id.clone()) {
            return Err(ImportError::invalid(
                line,
                format!("duplicate room id {}", room.id),
            ));
        }
        rooms.push(room);
    }

    Ok(rooms)
}

pub(crate) fn parse_applicants<R: Read>(reader: R) -> Result<Vec<ApplicantRecord>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, row) in csv_reader.deserialize::<ApplicantRow>().enumerate() {
        let line = index + FIRST_DATA_LINE;
        let record = row?.into_record(line)?;
        if !seen.insert(record.id.clone()) {
            return Err(ImportError::invalid(
                line,
                format!("duplicate applicant id {}", record.id),
            ));
        }
        records.push(record);
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct RoomRow {
    room_id: String,
    hostel_id: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    room_number: Option<String>,
    gender_policy: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    accessible: Option<String>,
    capacity: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    occupied_beds: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    under_maintenance: Option<String>,
}

impl RoomRow {
    fn into_room(self, line: usize) -> Result<Room, ImportError> {
        if self.room_id.is_empty() || self.hostel_id.is_empty() {
            return Err(ImportError::invalid(line, "room_id and hostel_id are required"));
        }

        let gender_policy = parse_policy(&self.gender_policy).ok_or_else(|| {
            ImportError::invalid(
                line,
                format!("unknown gender_policy '{}'", self.gender_policy),
            )
        })?;
        let capacity = self
            .capacity
            .parse::<u16>()
            .ok()
            .filter(|capacity| *capacity > 0)
            .ok_or_else(|| {
                ImportError::invalid(
                    line,
                    format!("capacity '{}' is not a positive integer", self.capacity),
                )
            })?;
        let accessible = parse_flag(self.accessible.as_deref(), "accessible", line)?;
        let under_maintenance =
            parse_flag(self.under_maintenance.as_deref(), "under_maintenance", line)?;

        let mut occupied_beds = BTreeSet::new();
        for bed in self
            .occupied_beds
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|bed| !bed.is_empty())
        {
            let bed = bed
                .parse::<u16>()
                .ok()
                .filter(|bed| (1..=capacity).contains(bed))
                .ok_or_else(|| {
                    ImportError::invalid(line, format!("bed '{bed}' outside 1..={capacity}"))
                })?;
            occupied_beds.insert(bed);
        }

        Ok(Room {
            room_number: self.room_number.unwrap_or_else(|| self.room_id.clone()),
            id: RoomId(self.room_id),
            hostel_id: HostelId(self.hostel_id),
            gender_policy,
            accessible,
            capacity,
            occupied_beds,
            under_maintenance,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApplicantRow {
    applicant_id: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    level: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    normalized_gpa: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    distance_km: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    gender: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    disability: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    financial_need: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    preferred_hostel: Option<String>,
    submitted_at: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    status: Option<String>,
}

impl ApplicantRow {
    /// Missing profile fields stay `None`; the eligibility filter reports them per applicant.
    fn into_record(self, line: usize) -> Result<ApplicantRecord, ImportError> {
        if self.applicant_id.is_empty() {
            return Err(ImportError::invalid(line, "applicant_id is required"));
        }

        let gender = match self.gender.as_deref() {
            None => None,
            Some(value) => Some(parse_gender(value).ok_or_else(|| {
                ImportError::invalid(line, format!("unknown gender '{value}'"))
            })?),
        };
        let status = match self.status.as_deref() {
            None => ApplicationStatus::Pending,
            Some(value) => parse_status(value).ok_or_else(|| {
                ImportError::invalid(line, format!("unknown status '{value}'"))
            })?,
        };
        let submitted_at = parse_datetime(&self.submitted_at).ok_or_else(|| {
            ImportError::invalid(
                line,
                format!("submitted_at '{}' is not a date or timestamp", self.submitted_at),
            )
        })?;

        Ok(ApplicantRecord {
            id: ApplicantId(self.applicant_id),
            level: parse_number(self.level.as_deref(), "level", line)?,
            normalized_gpa: parse_number(self.normalized_gpa.as_deref(), "normalized_gpa", line)?,
            distance_km: parse_number(self.distance_km.as_deref(), "distance_km", line)?,
            gender,
            disability: parse_flag(self.disability.as_deref(), "disability", line)?,
            financial_need: parse_flag(self.financial_need.as_deref(), "financial_need", line)?,
            preferred_hostel: self.preferred_hostel.map(HostelId),
            submitted_at,
            status,
        })
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_number<T: std::str::FromStr>(
    value: Option<&str>,
    field: &str,
    line: usize,
) -> Result<Option<T>, ImportError> {
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| ImportError::invalid(line, format!("{field} '{raw}' is not a number")))
        })
        .transpose()
}

fn parse_flag(value: Option<&str>, field: &str, line: usize) -> Result<bool, ImportError> {
    match value.map(|raw| raw.to_ascii_lowercase()) {
        None => Ok(false),
        Some(raw) => match raw.as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" => Ok(false),
            _ => Err(ImportError::invalid(
                line,
                format!("{field} '{raw}' is not a yes/no flag"),
            )),
        },
    }
}

fn parse_policy(value: &str) -> Option<GenderPolicy> {
    match value.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        "male_only" | "male" | "m" => Some(GenderPolicy::MaleOnly),
        "female_only" | "female" | "f" => Some(GenderPolicy::FemaleOnly),
        "mixed" | "any" => Some(GenderPolicy::Mixed),
        _ => None,
    }
}

fn parse_gender(value: &str) -> Option<Gender> {
    match value.to_ascii_lowercase().as_str() {
        "male" | "m" => Some(Gender::Male),
        "female" | "f" => Some(Gender::Female),
        _ => None,
    }
}

fn parse_status(value: &str) -> Option<ApplicationStatus> {
    match value.to_ascii_lowercase().as_str() {
        "pending" => Some(ApplicationStatus::Pending),
        "waitlisted" => Some(ApplicationStatus::Waitlisted),
        "allocated" => Some(ApplicationStatus::Allocated),
        _ => None,
    }
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
