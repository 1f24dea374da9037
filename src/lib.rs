pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod input_loader;
pub mod job_manager;
pub mod logger;
pub mod lookup_client;
pub mod month_search;
pub mod record;
pub mod resume_manager;
pub mod signal;

// Exporting types for convenience
pub use error::{CheckError, Result};
pub use extractor::{BallotDetail, Classification, Extractor};
pub use input_loader::RecordTable;
pub use job_manager::{CancelToken, RunReport, VerificationScheduler};
pub use lookup_client::{
    HttpConfig, HttpTransport, LookupClient, LookupFailure, RetryPolicy, Transport, TransportError,
};
pub use month_search::{MonthOutcome, MonthSearch, SearchReport};
pub use record::{BallotInfo, Identity, PersonRecord, VerificationResult};
pub use resume_manager::{CheckpointPaths, CheckpointPolicy, CheckpointStore, RunStats};
