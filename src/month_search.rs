use log::{debug, warn};

use crate::extractor::{Classification, Extractor};
use crate::lookup_client::{LookupClient, LookupFailure, Transport};
use crate::record::{Identity, VerificationResult};

pub const CANDIDATE_MONTHS: std::ops::RangeInclusive<u8> = 1..=12;

/// What a single candidate month told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonthOutcome {
    Registered(Classification),
    NotRegisteredThisMonth,
    /// The lookup for this month never produced an answer.
    MonthUnresolved(LookupFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub result: VerificationResult,
    /// One entry per month actually tried, in order.
    pub months: Vec<(u8, MonthOutcome)>,
}

impl SearchReport {
    pub fn unresolved_months(&self) -> impl Iterator<Item = u8> + '_ {
        self.months
            .iter()
            .filter(|(_, o)| matches!(o, MonthOutcome::MonthUnresolved(_)))
            .map(|(m, _)| *m)
    }

    /// True when no month was actually answered, yet the result is terminal.
    pub fn never_answered(&self) -> bool {
        !self.months.is_empty()
            && self
                .months
                .iter()
                .all(|(_, o)| matches!(o, MonthOutcome::MonthUnresolved(_)))
    }
}

pub struct MonthSearch<T: Transport> {
    client: LookupClient<T>,
    extractor: Extractor,
}

impl<T: Transport> MonthSearch<T> {
    pub fn new(client: LookupClient<T>) -> Self {
        MonthSearch {
            client,
            extractor: Extractor::new(),
        }
    }

    pub fn client(&self) -> &LookupClient<T> {
        &self.client
    }

    /// Tries months 1..=12 in order and stops at the first registered match.
    /// Only a fatal lookup failure aborts the search.
    pub fn resolve(&self, identity: &Identity) -> Result<SearchReport, LookupFailure> {
        let mut months = Vec::with_capacity(12);

        for month in CANDIDATE_MONTHS {
            let outcome = match self.client.lookup(identity, month) {
                Ok(html) => {
                    let classification = self.extractor.classify(&html);
                    if classification.registered {
                        MonthOutcome::Registered(classification)
                    } else {
                        MonthOutcome::NotRegisteredThisMonth
                    }
                }
                Err(LookupFailure::Fatal(msg)) => return Err(LookupFailure::Fatal(msg)),
                Err(failure) => {
                    warn!(
                        "Month {} unresolved for {} {}: {}",
                        month, identity.first_name, identity.last_name, failure
                    );
                    MonthOutcome::MonthUnresolved(failure)
                }
            };

            if let MonthOutcome::Registered(classification) = &outcome {
                debug!(
                    "{} {} registered with birth month {}",
                    identity.first_name, identity.last_name, month
                );
                let result = VerificationResult {
                    resolved_month: month,
                    registered: true,
                    absentee_requested: classification.absentee_requested,
                    ballot_info: classification.ballot.clone().into_option(),
                };
                months.push((month, outcome));
                return Ok(SearchReport { result, months });
            }
            months.push((month, outcome));
        }

        let report = SearchReport {
            result: VerificationResult::not_found(),
            months,
        };
        if report.never_answered() {
            // Kept terminal like a normal miss; it was never actually confirmed.
            warn!(
                "{} {}: every month lookup failed; recording as not found",
                identity.first_name, identity.last_name
            );
        }
        Ok(report)
    }
}
