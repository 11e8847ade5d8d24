pub mod db;
pub mod record;
pub mod scan_state;
pub mod store;

pub use db::ScanDb;

pub use record::{RunSummary, ScanRecord, ScanResult};
pub use scan_state::{DetectorStatus, ScanState};
pub use store::{ScanStore, SqliteScanStore};
