//! Warehouse access: the persistence seam, its PostgreSQL and in-memory
//! implementations, and the spine, loader and ledger built on top of it.

pub mod ledger;
pub mod loader;
pub mod memory;
pub mod postgres;
pub mod spine;
pub mod store;

pub use ledger::ErrorLedger;
pub use loader::Loader;
pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;
pub use spine::SpineRegistry;
pub use store::{ErrorSummary, Warehouse};
