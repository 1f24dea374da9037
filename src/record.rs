use serde::Serialize;

/// The four labelled fields the lookup service shows for an absentee application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BallotInfo {
    pub election_date: String,
    pub application_received: String,
    pub ballot_sent: String,
    pub ballot_received: String,
}

/// Identity fields sent to the lookup service. Year and zip stay textual so
/// leading zeros survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub first_name: String,
    pub last_name: String,
    pub birth_year: String,
    pub zip_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerificationResult {
    /// 0 when no month matched, 1..=12 otherwise.
    pub resolved_month: u8,
    pub registered: bool,
    pub absentee_requested: bool,
    /// `None` means the service gave no parseable detail; never replaced by an
    /// empty `BallotInfo`.
    pub ballot_info: Option<BallotInfo>,
}

impl VerificationResult {
    pub fn not_found() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub identity: Identity,
    pub result: VerificationResult,
    /// Set once month search reached a terminal outcome, found or not.
    pub checked: bool,
    /// Raw cells of the source row, in header order. Managed columns are
    /// re-rendered from `result` on write.
    pub cells: Vec<String>,
}
