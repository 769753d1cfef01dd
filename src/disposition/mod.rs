//! Call disposition entry
//!
//! After a call the volunteer records how it went, optionally with a voice
//! memo. `DispositionSession` owns the memo for one entry, uploads it at
//! most once and submits the contact record.

mod session;
mod uploader;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::audio::RecordingError;

pub use session::DispositionSession;
pub use uploader::DispositionUploader;

/// Outcome of a contact attempt. Serialized as the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    Reached,
    NoAnswer,
    VoiceMail,
    WrongNumber,
    Disconnected,
    Refused,
    Callback,
    DoNotCall,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 8] = [
        ContactStatus::Reached,
        ContactStatus::NoAnswer,
        ContactStatus::VoiceMail,
        ContactStatus::WrongNumber,
        ContactStatus::Disconnected,
        ContactStatus::Refused,
        ContactStatus::Callback,
        ContactStatus::DoNotCall,
    ];

    /// Support level is only collected when the voter was reached.
    pub fn requires_support_level(&self) -> bool {
        matches!(self, ContactStatus::Reached)
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        ContactStatus::ALL
            .into_iter()
            .find(|status| normalize(&format!("{:?}", status)) == wanted)
            .ok_or_else(|| format!("unknown contact status: {}", s))
    }
}

/// Voter's stated support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupportLevel {
    #[serde(rename = "strongyes")]
    StrongYes,
    #[serde(rename = "leaningyes")]
    LeanYes,
    #[serde(rename = "undecided")]
    Undecided,
    #[serde(rename = "leaningno")]
    LeanNo,
    #[serde(rename = "strongno")]
    StrongNo,
}

impl SupportLevel {
    pub fn wire_name(&self) -> &'static str {
        match self {
            SupportLevel::StrongYes => "strongyes",
            SupportLevel::LeanYes => "leaningyes",
            SupportLevel::Undecided => "undecided",
            SupportLevel::LeanNo => "leaningno",
            SupportLevel::StrongNo => "strongno",
        }
    }
}

impl FromStr for SupportLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "strongyes" => Ok(SupportLevel::StrongYes),
            "leaningyes" | "leanyes" => Ok(SupportLevel::LeanYes),
            "undecided" => Ok(SupportLevel::Undecided),
            "leaningno" | "leanno" => Ok(SupportLevel::LeanNo),
            "strongno" => Ok(SupportLevel::StrongNo),
            _ => Err(format!("unknown support level: {}", s)),
        }
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// What the volunteer entered in the disposition form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispositionForm {
    pub status: ContactStatus,
    pub support: Option<SupportLevel>,
    pub notes: String,
}

impl DispositionForm {
    /// Support level to submit: required for Reached, dropped otherwise.
    pub fn validated_support(&self) -> Result<Option<SupportLevel>, DispositionError> {
        if self.status.requires_support_level() {
            self.support
                .map(Some)
                .ok_or(DispositionError::MissingSupportLevel)
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionError {
    MissingSupportLevel,
    /// Stop the recording before submitting
    RecordingInProgress,
    Upload(ApiError),
    Submission(ApiError),
    Recording(RecordingError),
}

impl std::fmt::Display for DispositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispositionError::MissingSupportLevel => {
                write!(f, "Please select voter support level")
            }
            DispositionError::RecordingInProgress => {
                write!(f, "Stop the recording before saving")
            }
            DispositionError::Upload(e) => write!(f, "Failed to upload audio: {}", e),
            DispositionError::Submission(e) => write!(f, "Failed to save contact: {}", e),
            DispositionError::Recording(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DispositionError {}

impl From<RecordingError> for DispositionError {
    fn from(e: RecordingError) -> Self {
        DispositionError::Recording(e)
    }
}
