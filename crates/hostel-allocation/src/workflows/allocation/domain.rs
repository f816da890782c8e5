use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for applicants supplied by the application-management subsystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicantId(pub String);

/// Identifier for a hostel building.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostelId(pub String);

/// Identifier for a single room inside a hostel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for HostelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const fn label(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Gender-restricted policy matching this gender.
    pub const fn restricted_policy(self) -> GenderPolicy {
        match self {
            Gender::Male => GenderPolicy::MaleOnly,
            Gender::Female => GenderPolicy::FemaleOnly,
        }
    }
}

/// Occupancy rule attached to each room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderPolicy {
    MaleOnly,
    FemaleOnly,
    Mixed,
}

impl GenderPolicy {
    pub const fn accepts(self, gender: Gender) -> bool {
        matches!(
            (self, gender),
            (GenderPolicy::Mixed, _)
                | (GenderPolicy::MaleOnly, Gender::Male)
                | (GenderPolicy::FemaleOnly, Gender::Female)
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            GenderPolicy::MaleOnly => "male_only",
            GenderPolicy::FemaleOnly => "female_only",
            GenderPolicy::Mixed => "mixed",
        }
    }
}

/// Academic level as recorded by the registry (100 through 500).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcademicLevel(pub u16);

impl AcademicLevel {
    pub const SUPPORTED: [u16; 5] = [100, 200, 300, 400, 500];

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self.0)
    }

    /// Ordinal encoding used by the scoring features (100 -> 1, ..., 500 -> 5).
    pub fn encoded(self) -> u8 {
        match self.0 {
            100 => 1,
            200 => 2,
            300 => 3,
            400 => 4,
            500 => 5,
            _ => 1,
        }
    }
}

/// Lifecycle of an application with respect to housing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Waitlisted,
    Allocated,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Waitlisted => "waitlisted",
            ApplicationStatus::Allocated => "allocated",
        }
    }
}

/// Applicant data exactly as supplied by the application-management subsystem.
///
/// Fields are optional because upstream profiles can be incomplete; the eligibility
/// filter turns a complete record into an [`Applicant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantRecord {
    pub id: ApplicantId,
    pub level: Option<u16>,
    pub normalized_gpa: Option<f64>,
    pub distance_km: Option<f64>,
    pub gender: Option<Gender>,
    #[serde(default)]
    pub disability: bool,
    #[serde(default)]
    pub financial_need: bool,
    #[serde(default)]
    pub preferred_hostel: Option<HostelId>,
    pub submitted_at: DateTime<Utc>,
    pub status: ApplicationStatus,
}

/// Validated applicant consumed by scoring and matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub id: ApplicantId,
    pub level: AcademicLevel,
    pub normalized_gpa: f64,
    pub distance_km: f64,
    pub gender: Gender,
    pub disability: bool,
    pub financial_need: bool,
    pub preferred_hostel: Option<HostelId>,
    pub submitted_at: DateTime<Utc>,
}

/// Room inventory entry owned by the facilities-management subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hostel_id: HostelId,
    pub room_number: String,
    pub gender_policy: GenderPolicy,
    pub accessible: bool,
    pub capacity: u16,
    /// 1-based bed-space numbers currently taken.
    #[serde(default)]
    pub occupied_beds: BTreeSet<u16>,
    #[serde(default)]
    pub under_maintenance: bool,
}

impl Room {
    pub fn new(
        id: impl Into<String>,
        hostel_id: impl Into<String>,
        gender_policy: GenderPolicy,
        accessible: bool,
        capacity: u16,
    ) -> Self {
        let id = id.into();
        Self {
            room_number: id.clone(),
            id: RoomId(id),
            hostel_id: HostelId(hostel_id.into()),
            gender_policy,
            accessible,
            capacity,
            occupied_beds: BTreeSet::new(),
            under_maintenance: false,
        }
    }

    /// Mark the first `occupancy` bed-spaces as taken, capped at capacity.
    pub fn with_occupancy(mut self, occupancy: u16) -> Self {
        self.occupied_beds = (1..=occupancy.min(self.capacity)).collect();
        self
    }

    pub fn occupancy(&self) -> u16 {
        self.occupied_beds.len() as u16
    }

    pub fn free_beds(&self) -> u16 {
        self.capacity.saturating_sub(self.occupancy())
    }

    pub fn is_offered(&self) -> bool {
        !self.under_maintenance && self.capacity > 0
    }

    pub fn has_free_bed(&self) -> bool {
        self.is_offered() && self.free_beds() > 0
    }

    /// Lowest free bed-space number, if any.
    pub fn next_free_bed(&self) -> Option<u16> {
        (1..=self.capacity).find(|bed| !self.occupied_beds.contains(bed))
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            gender_policy: self.gender_policy,
            accessible: self.accessible,
        }
    }
}

/// Rooms sharing a (gender policy, accessibility) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub gender_policy: GenderPolicy,
    pub accessible: bool,
}

impl BucketKey {
    pub const fn new(gender_policy: GenderPolicy, accessible: bool) -> Self {
        Self {
            gender_policy,
            accessible,
        }
    }

    /// Buckets an applicant may occupy, grouped into preference tiers.
    ///
    /// Disabled applicants only ever see accessible buckets. Everyone else sees the
    /// non-accessible buckets first and, when `allow_accessible_overflow` is set, the
    /// accessible ones as a second tier.
    pub fn tiers_for(
        gender: Gender,
        disability: bool,
        allow_accessible_overflow: bool,
    ) -> Vec<[BucketKey; 2]> {
        let restricted = gender.restricted_policy();
        let accessible = [
            BucketKey::new(restricted, true),
            BucketKey::new(GenderPolicy::Mixed, true),
        ];
        if disability {
            return vec![accessible];
        }

        let mut tiers = vec![[
            BucketKey::new(restricted, false),
            BucketKey::new(GenderPolicy::Mixed, false),
        ]];
        if allow_accessible_overflow {
            tiers.push(accessible);
        }
        tiers
    }
}
