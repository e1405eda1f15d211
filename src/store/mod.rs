//! The backing-store seam: two traits (`DidPool`, `CallLedger`) so the
//! Router can be driven by either a real MySQL-backed store or, in
//! tests, a plain in-memory double. `spec.md` §9's "process-wide store
//! handle → explicit constructed value" re-architecture guidance is
//! what motivates the trait boundary — see `DESIGN.md`.

mod ledger;
mod mysql_store;
mod pool;
pub mod testutil;

pub use ledger::CallLedger;
pub use mysql_store::MysqlStore;
pub use pool::DidPool;
