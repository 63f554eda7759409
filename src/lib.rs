// POS Back Office - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod guard;   // Register/shift lifecycle under lock
pub mod reports; // Read-only views (totals, low stock)
pub mod store;   // UnitOfWork seam + SQLite implementation

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{init_logging, AppConfig, RetryPolicy};
pub use db::{
    Event,
    setup_database, open_connection, insert_event, get_events_for_entity,
    insert_branch, insert_employee, insert_product, insert_sale, insert_expense,
};
pub use entities::{
    Actor, Branch, Employee, Register, RegisterStatus, Role, Shift, ShiftTotals,
};
pub use error::{GuardError, GuardResult};
pub use guard::{
    ClosedRegister, OpenedRegister, RegisterShiftGuard,
    BRANCH_HAS_OPEN_REGISTER, REGISTER_HAS_OPEN_SHIFT,
};
pub use reports::{list_registers, low_stock_products, open_shifts, shift_totals, LowStockProduct};
pub use store::{SqliteStore, SqliteUnitOfWork, Store, UnitOfWork};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
