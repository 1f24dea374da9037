use scraper::{Html, Selector};

use crate::record::BallotInfo;

const REGISTERED_PHRASE: &str = "Yes, you are registered!";
const NO_APPLICATION_PHRASE: &str = "Your clerk has not recorded receiving your AV Application.";
const BALLOT_REGION: &str = "#lblAbsenteeVoterInformation";

const LABELS: [&str; 4] = [
    "Election date",
    "Application received",
    "Ballot sent",
    "Ballot received",
];

/// What one lookup response says about a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub registered: bool,
    pub absentee_requested: bool,
    pub ballot: BallotDetail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BallotDetail {
    /// No absentee application on record, or the person is not registered.
    NotApplicable,
    /// An application is on record but the detail region was missing or a
    /// label could not be found.
    NoInfo,
    Found(BallotInfo),
}

impl BallotDetail {
    pub fn into_option(self) -> Option<BallotInfo> {
        match self {
            BallotDetail::Found(info) => Some(info),
            _ => None,
        }
    }
}

pub struct Extractor {
    region_selector: Selector,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Extractor {
            // Static selector, cannot fail.
            region_selector: Selector::parse(BALLOT_REGION).unwrap(),
        }
    }

    pub fn classify(&self, html: &str) -> Classification {
        if !is_registered(html) {
            return Classification {
                registered: false,
                absentee_requested: false,
                ballot: BallotDetail::NotApplicable,
            };
        }
        if !has_absentee_application(html) {
            return Classification {
                registered: true,
                absentee_requested: false,
                ballot: BallotDetail::NotApplicable,
            };
        }
        let ballot = match self.extract_ballot_info(html) {
            Some(info) => BallotDetail::Found(info),
            None => BallotDetail::NoInfo,
        };
        Classification {
            registered: true,
            absentee_requested: true,
            ballot,
        }
    }

    /// Reads the labelled values out of the absentee region. Each label is
    /// followed by its value; a label followed directly by another label means
    /// the service left that field empty. A label with nothing after it means
    /// the region is truncated and yields no info.
    pub fn extract_ballot_info(&self, html: &str) -> Option<BallotInfo> {
        let document = Html::parse_document(html);
        let region = document.select(&self.region_selector).next()?;

        let texts: Vec<&str> = region
            .text()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut values = Vec::with_capacity(LABELS.len());
        for label in LABELS {
            let idx = texts.iter().position(|t| normalize_label(t) == label)?;
            let value = match texts.get(idx + 1)? {
                next if is_label(next) => String::new(),
                next => next.to_string(),
            };
            values.push(value);
        }

        let mut values = values.into_iter();
        Some(BallotInfo {
            election_date: values.next().unwrap_or_default(),
            application_received: values.next().unwrap_or_default(),
            ballot_sent: values.next().unwrap_or_default(),
            ballot_received: values.next().unwrap_or_default(),
        })
    }
}

pub fn is_registered(html: &str) -> bool {
    html.contains(REGISTERED_PHRASE)
}

pub fn has_absentee_application(html: &str) -> bool {
    !html.contains(NO_APPLICATION_PHRASE)
}

fn normalize_label(text: &str) -> &str {
    text.trim_end_matches(':').trim()
}

fn is_label(text: &str) -> bool {
    LABELS.contains(&normalize_label(text))
}
