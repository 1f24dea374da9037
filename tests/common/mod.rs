#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;
use voter_check_lib::lookup_client::Form;
use voter_check_lib::{
    CheckpointPaths, LookupClient, MonthSearch, RetryPolicy, Transport, TransportError,
};

pub const REGISTERED: &str = "<h2>Yes, you are registered!</h2>";
pub const NO_AV: &str = "<p>Your clerk has not recorded receiving your AV Application.</p>";

#[derive(Debug, Clone)]
pub enum Person {
    /// Registered at this birth month, no absentee application.
    Registered(u8),
    /// Registered at this month with a complete absentee record.
    Absentee(u8),
    NeverFound,
    AlwaysDisconnects,
    /// Every connect attempt is refused.
    Unreachable,
    Blocked,
}

/// In-memory stand-in for the lookup service, keyed by first name.
pub struct FakeService {
    people: HashMap<String, Person>,
    pub queries: Mutex<Vec<(String, u8)>>,
}

impl FakeService {
    pub fn new(people: &[(&str, Person)]) -> Self {
        FakeService {
            people: people
                .iter()
                .map(|(name, p)| (name.to_string(), p.clone()))
                .collect(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queried_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn months_for(&self, name: &str) -> Vec<u8> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, m)| *m)
            .collect()
    }
}

fn field<'a>(form: &'a Form, key: &str) -> &'a str {
    form.iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

fn ballot_region() -> String {
    "<div id=\"lblAbsenteeVoterInformation\">\
     <b>Election date</b><span>11/03/2020</span>\
     <b>Application received</b><span>09/14/2020</span>\
     <b>Ballot sent</b><span>09/24/2020</span>\
     <b>Ballot received</b><span>10/02/2020</span></div>"
        .to_string()
}

impl Transport for FakeService {
    fn submit(&self, form: &Form) -> Result<String, TransportError> {
        let name = field(form, "FirstName").to_string();
        let month: u8 = field(form, "NameBirthMonth").parse().unwrap_or(0);
        self.queries.lock().unwrap().push((name.clone(), month));

        match self.people.get(&name) {
            Some(Person::Registered(m)) if *m == month => Ok(format!("{}{}", REGISTERED, NO_AV)),
            Some(Person::Absentee(m)) if *m == month => Ok(format!("{}{}", REGISTERED, ballot_region())),
            Some(Person::AlwaysDisconnects) => Err(TransportError::Connection("server disconnected".into())),
            Some(Person::Unreachable) => Err(TransportError::Unreachable("connection refused".into())),
            Some(Person::Blocked) => Err(TransportError::Fatal("HTTP 403 (blocked by remote host)".into())),
            _ => Ok("<p>No voter record found.</p>".to_string()),
        }
    }
}

pub fn search(service: FakeService, attempts: u32) -> MonthSearch<FakeService> {
    let retry = RetryPolicy {
        max_attempts: attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    MonthSearch::new(LookupClient::new(service, retry))
}

pub struct Workspace {
    _tmp: TempDir,
    pub paths: CheckpointPaths,
}

impl Workspace {
    /// Writes an input CSV with one row per first name.
    pub fn with_people(names: &[&str]) -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let input = tmp.path().join("index.csv");
        let mut csv = String::from("VOTER_ID,FIRST_NAME,LAST_NAME,YEAR_OF_BIRTH,ZIP_CODE\n");
        for (i, name) in names.iter().enumerate() {
            csv.push_str(&format!("{},{},B,1980,48201\n", i + 100, name));
        }
        fs::write(&input, csv).expect("write input");

        let paths = CheckpointPaths {
            input,
            output: tmp.path().join("out").join("checked.csv"),
            absentee_output: tmp.path().join("out").join("voted.csv"),
        };
        Workspace { _tmp: tmp, paths }
    }

    pub fn read(&self, path: &Path) -> Vec<csv::StringRecord> {
        let mut rdr = csv::Reader::from_path(path).expect("open csv");
        rdr.records().map(|r| r.expect("valid row")).collect()
    }
}
