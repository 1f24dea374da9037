mod common;

use common::{search, FakeService, Person, Workspace};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use voter_check_lib::lookup_client::Form;
use voter_check_lib::{
    CancelToken, CheckpointPolicy, CheckpointStore, LookupClient, LookupFailure, MonthSearch,
    RetryPolicy, RunReport, Transport, TransportError, VerificationResult, VerificationScheduler,
};

fn policy() -> CheckpointPolicy {
    CheckpointPolicy::new(2, Duration::from_secs(3600))
}

fn run(
    ws: &Workspace,
    service: FakeService,
    skip: bool,
    concurrency: usize,
) -> (RunReport, MonthSearch<FakeService>) {
    let mut store = CheckpointStore::load(ws.paths.clone(), skip).expect("load");
    let search = search(service, 3);
    let report = VerificationScheduler::new(&search, concurrency, CancelToken::new())
        .run(&mut store, policy())
        .expect("run");
    (report, search)
}

fn service_of(search: &MonthSearch<FakeService>) -> &FakeService {
    search.client().transport()
}

fn people() -> Vec<(&'static str, Person)> {
    vec![
        ("Ann", Person::Registered(6)),
        ("Bob", Person::Absentee(3)),
        ("Cal", Person::NeverFound),
        ("Dee", Person::Registered(12)),
        ("Eve", Person::AlwaysDisconnects),
    ]
}

#[test]
fn full_run_writes_results_and_absentee_subset() {
    let ws = Workspace::with_people(&["Ann", "Bob", "Cal", "Dee", "Eve"]);
    let (report, _) = run(&ws, FakeService::new(&people()), true, 4);

    assert_eq!(report.completed(), 5);
    assert!(report.fatal.is_none());
    assert!(!report.cancelled);
    assert_eq!(report.stats.checked, 5);
    assert_eq!(report.stats.registered, 3);
    assert_eq!(report.stats.voted, 1);

    let rows = ws.read(&ws.paths.output);
    assert_eq!(rows.len(), 5);
    let ann = &rows[0];
    assert_eq!(&ann[0], "100");
    assert_eq!(&ann[5], "6");
    assert_eq!(&ann[6], "True");
    assert_eq!(&ann[7], "False");
    assert_eq!(&ann[8], "");

    let bob = &rows[1];
    assert_eq!(&bob[5], "3");
    assert_eq!(&bob[7], "True");
    assert_eq!(
        (&bob[8], &bob[9], &bob[10], &bob[11]),
        ("11/03/2020", "09/14/2020", "09/24/2020", "10/02/2020")
    );

    let cal = &rows[2];
    assert_eq!((&cal[5], &cal[6], &cal[7], &cal[12]), ("0", "False", "False", "True"));

    // Every month failed to answer, still recorded as terminal.
    let eve = &rows[4];
    assert_eq!((&eve[5], &eve[12]), ("0", "True"));

    let voted = ws.read(&ws.paths.absentee_output);
    assert_eq!(voted.len(), 1);
    assert_eq!(&voted[0][1], "Bob");
}

#[test]
fn months_are_tried_in_order_up_to_first_match() {
    let ws = Workspace::with_people(&["Ann", "Cal", "Eve"]);
    let (_, s) = run(&ws, FakeService::new(&people()), true, 2);
    let service = service_of(&s);

    assert_eq!(service.months_for("Ann"), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(service.months_for("Cal"), (1..=12).collect::<Vec<u8>>());
    // Three attempts for each of the twelve months.
    let eve = service.months_for("Eve");
    assert_eq!(eve.len(), 36);
    assert!(eve.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn rerun_with_skip_queries_nothing() {
    let ws = Workspace::with_people(&["Ann", "Bob", "Cal"]);
    let (first, _) = run(&ws, FakeService::new(&people()), true, 3);
    assert_eq!(first.completed(), 3);
    let before = ws.read(&ws.paths.output);

    let (second, s) = run(&ws, FakeService::new(&people()), true, 3);
    let service = service_of(&s);
    assert_eq!(second.completed(), 0);
    assert!(service.queried_names().is_empty());
    assert_eq!(ws.read(&ws.paths.output), before);
}

#[test]
fn rerun_without_skip_checks_everyone_again() {
    let ws = Workspace::with_people(&["Ann", "Cal"]);
    run(&ws, FakeService::new(&people()), true, 2);

    let (second, s) = run(&ws, FakeService::new(&people()), false, 2);
    let service = service_of(&s);
    assert_eq!(second.completed(), 2);
    assert_eq!(service.queried_names(), vec!["Ann".to_string(), "Cal".to_string()]);
}

#[test]
fn fatal_failure_stops_run_and_resume_finishes_the_rest() {
    let ws = Workspace::with_people(&["Ann", "Zed", "Bob", "Cal"]);
    let mut everyone = people();
    everyone.push(("Zed", Person::Blocked));

    // One worker: Ann completes, Zed is blocked, Bob and Cal are never admitted.
    let (report, s) = run(&ws, FakeService::new(&everyone), true, 1);
    let service = service_of(&s);
    assert!(matches!(report.fatal, Some(LookupFailure::Fatal(_))));
    assert_eq!(report.completion_order, vec![0]);
    assert_eq!(report.aborted, vec![1]);
    assert_eq!(service.queried_names(), vec!["Ann".to_string(), "Zed".to_string()]);

    let rows = ws.read(&ws.paths.output);
    assert_eq!((&rows[0][5], &rows[0][12]), ("6", "True"));
    assert_eq!(&rows[1][12], "False");
    assert_eq!(&rows[2][12], "False");

    // The block is lifted; only the unresolved people are asked again.
    let (resumed, s) = run(&ws, FakeService::new(&people()), true, 2);
    let service = service_of(&s);
    assert_eq!(resumed.completed(), 3);
    assert_eq!(
        service.queried_names(),
        vec!["Bob".to_string(), "Cal".to_string(), "Zed".to_string()]
    );
    assert_eq!(resumed.stats.checked, 4);
}

#[test]
fn cancelled_run_persists_and_leaves_records_unresolved() {
    let ws = Workspace::with_people(&["Ann", "Bob"]);
    let mut store = CheckpointStore::load(ws.paths.clone(), true).unwrap();
    let search = search(FakeService::new(&people()), 3);
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = VerificationScheduler::new(&search, 2, cancel)
        .run(&mut store, policy())
        .unwrap();
    assert!(report.cancelled);
    assert!(search.client().transport().queried_names().is_empty());

    let reloaded = CheckpointStore::load(ws.paths.clone(), true).unwrap();
    assert_eq!(reloaded.unresolved_snapshot().len(), 2);
    assert_eq!(reloaded.records()[0].result, VerificationResult::default());
}

#[test]
fn unreachable_host_stops_run_and_leaves_record_unchecked() {
    let ws = Workspace::with_people(&["Ann", "Uma", "Bob"]);
    let mut everyone = people();
    everyone.push(("Uma", Person::Unreachable));

    let (report, s) = run(&ws, FakeService::new(&everyone), true, 1);
    assert!(matches!(report.fatal, Some(LookupFailure::Fatal(_))));
    assert_eq!(report.completion_order, vec![0]);
    assert_eq!(report.aborted, vec![1]);
    // Three connect attempts at month 1, then the run stops.
    assert_eq!(service_of(&s).months_for("Uma"), vec![1, 1, 1]);
    assert!(service_of(&s).months_for("Bob").is_empty());

    let rows = ws.read(&ws.paths.output);
    assert_eq!((&rows[1][5], &rows[1][12]), ("0", "False"));

    let reloaded = CheckpointStore::load(ws.paths.clone(), true).unwrap();
    let pending: Vec<usize> = reloaded
        .unresolved_snapshot()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(pending, vec![1, 2]);
}

/// Copies the checkpoint file aside the first time `trigger` is looked up,
/// once a mid-run checkpoint has landed.
struct SnapshotOnLookup {
    inner: FakeService,
    trigger: &'static str,
    progress: PathBuf,
    output: PathBuf,
    snapshot: PathBuf,
    taken: Mutex<bool>,
}

impl Transport for SnapshotOnLookup {
    fn submit(&self, form: &Form) -> Result<String, TransportError> {
        let is_trigger = form
            .iter()
            .any(|(k, v)| *k == "FirstName" && v == self.trigger);
        if is_trigger {
            let mut taken = self.taken.lock().unwrap();
            if !*taken {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !self.progress.exists() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                fs::copy(&self.output, &self.snapshot).expect("copy checkpoint");
                *taken = true;
            }
        }
        self.inner.submit(form)
    }
}

#[test]
fn mid_run_checkpoint_is_resumable_on_its_own() {
    let ws = Workspace::with_people(&["Ann", "Bob", "Gus", "Dee"]);
    let snapshot = ws.paths.input.with_file_name("snapshot.csv");
    let transport = SnapshotOnLookup {
        inner: FakeService::new(&people()),
        trigger: "Gus",
        progress: ws.paths.progress_file(),
        output: ws.paths.output.clone(),
        snapshot: snapshot.clone(),
        taken: Mutex::new(false),
    };
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    let search = MonthSearch::new(LookupClient::new(transport, retry));

    // One worker and a checkpoint every two completions: Ann and Bob are
    // saved before Gus is looked up.
    let mut store = CheckpointStore::load(ws.paths.clone(), true).unwrap();
    let report = VerificationScheduler::new(&search, 1, CancelToken::new())
        .run(&mut store, policy())
        .unwrap();
    assert_eq!(report.completed(), 4);

    let rows = ws.read(&snapshot);
    assert_eq!(rows.len(), 4);
    assert_eq!((&rows[0][5], &rows[0][12]), ("6", "True"));
    assert_eq!((&rows[1][5], &rows[1][12]), ("3", "True"));
    assert_eq!(&rows[2][12], "False");
    assert_eq!(&rows[3][12], "False");

    // A crash right after that checkpoint resumes with Gus and Dee only.
    let mut paths = ws.paths.clone();
    paths.output = snapshot;
    let resumed = CheckpointStore::load(paths, true).unwrap();
    let pending: Vec<usize> = resumed
        .unresolved_snapshot()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(pending, vec![2, 3]);
    assert_eq!(resumed.records()[1].result.resolved_month, 3);
}
