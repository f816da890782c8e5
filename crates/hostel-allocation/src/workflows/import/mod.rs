//! CSV loaders for the room inventory and applicant feeds.
//!
//! Rooms: `room_id, hostel_id, [room_number], gender_policy, [accessible], capacity,
//! [occupied_beds] (semicolon separated), [under_maintenance]`.
//!
//! Applicants: `applicant_id, [level], [normalized_gpa], [distance_km], [gender],
//! [disability], [financial_need], [preferred_hostel], submitted_at, [status]`.

mod parser;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::workflows::allocation::domain::{ApplicantRecord, Room};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read import file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid row at line {line}: {message}")]
    InvalidRow { line: usize, message: String },
}

impl ImportError {
    pub(crate) fn invalid(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidRow {
            line,
            message: message.into(),
        }
    }
}

pub fn read_rooms<R: Read>(reader: R) -> Result<Vec<Room>, ImportError> {
    parser::parse_rooms(reader)
}

pub fn read_applicants<R: Read>(reader: R) -> Result<Vec<ApplicantRecord>, ImportError> {
    parser::parse_applicants(reader)
}

pub fn load_rooms(path: impl AsRef<Path>) -> Result<Vec<Room>, ImportError> {
    let file = File::open(path)?;
    read_rooms(file)
}

pub fn load_applicants(path: impl AsRef<Path>) -> Result<Vec<ApplicantRecord>, ImportError> {
    let file = File::open(path)?;
    read_applicants(file)
}
