// Persistence seam for the register/shift guard
//
// The guard never talks to SQLite directly. It asks a Store for a
// transaction-scoped UnitOfWork, runs its check-then-act inside it and
// commits. Dropping a UnitOfWork without committing rolls everything back.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::db::{
    self, format_ts, register_from_row, shift_from_row, Event, REGISTER_COLUMNS, SHIFT_COLUMNS,
};
use crate::entities::{Branch, Employee, Register, RegisterStatus, Shift, ShiftTotals};
use crate::error::{GuardError, GuardResult};

// ============================================================================
// TRAITS
// ============================================================================

/// Transaction-scoped repository over branches, registers and shifts
///
/// The `lock_*` queries return the candidate row set *after* the write lock
/// is held, so no concurrent unit of work can change it before commit.
pub trait UnitOfWork {
    fn find_branch(&self, id: i64) -> GuardResult<Option<Branch>>;
    fn find_employee(&self, id: i64) -> GuardResult<Option<Employee>>;
    fn find_register(&self, id: i64) -> GuardResult<Option<Register>>;
    fn find_shift(&self, id: i64) -> GuardResult<Option<Shift>>;

    /// Open registers of `branch_id`, read under the lock
    fn lock_open_registers(&self, branch_id: i64) -> GuardResult<Vec<Register>>;

    /// Open shifts (closed_at IS NULL) of `register_id`, read under the lock
    fn lock_open_shifts(&self, register_id: i64) -> GuardResult<Vec<Shift>>;

    fn insert_register(
        &self,
        branch_id: i64,
        location: Option<&str>,
        status: RegisterStatus,
    ) -> GuardResult<Register>;

    fn set_register_status(&self, id: i64, status: RegisterStatus) -> GuardResult<()>;

    fn insert_shift(
        &self,
        register_id: i64,
        employee_id: Option<i64>,
        opened_at: DateTime<Utc>,
    ) -> GuardResult<Shift>;

    /// Close an open shift; `NotFound` if it is missing or already closed
    fn close_shift(
        &self,
        id: i64,
        closed_at: DateTime<Utc>,
        totals: Option<ShiftTotals>,
    ) -> GuardResult<Shift>;

    fn record_event(&self, event: &Event) -> GuardResult<()>;

    fn commit(self) -> GuardResult<()>;
}

pub trait Store {
    type Tx<'a>: UnitOfWork
    where
        Self: 'a;

    /// Start a unit of work holding the write lock
    fn begin(&self) -> GuardResult<Self::Tx<'_>>;
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

/// SQLite-backed store; one per connection (connections are not shared
/// across threads)
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a file-backed store and make sure the schema exists
    pub fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = db::open_connection(path, busy_timeout)?;
        db::setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    /// Private in-memory database (tests, demos)
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteStore { conn }
    }

    /// Read access for reports and seed helpers
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    type Tx<'a> = SqliteUnitOfWork<'a>
    where
        Self: 'a;

    fn begin(&self) -> GuardResult<SqliteUnitOfWork<'_>> {
        // IMMEDIATE takes the RESERVED lock up front; a competing writer
        // waits in the busy handler instead of reading a stale snapshot.
        let tx = rusqlite::Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        debug!("write lock acquired");
        Ok(SqliteUnitOfWork { tx })
    }
}

pub struct SqliteUnitOfWork<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl<'c> UnitOfWork for SqliteUnitOfWork<'c> {
    fn find_branch(&self, id: i64) -> GuardResult<Option<Branch>> {
        Ok(db::get_branch(&self.tx, id)?)
    }

    fn find_employee(&self, id: i64) -> GuardResult<Option<Employee>> {
        Ok(db::get_employee(&self.tx, id)?)
    }

    fn find_register(&self, id: i64) -> GuardResult<Option<Register>> {
        let sql = format!("SELECT {} FROM registers WHERE id = ?1", REGISTER_COLUMNS);
        Ok(self
            .tx
            .query_row(&sql, [id], register_from_row)
            .optional()?)
    }

    fn find_shift(&self, id: i64) -> GuardResult<Option<Shift>> {
        let sql = format!("SELECT {} FROM shifts WHERE id = ?1", SHIFT_COLUMNS);
        Ok(self.tx.query_row(&sql, [id], shift_from_row).optional()?)
    }

    fn lock_open_registers(&self, branch_id: i64) -> GuardResult<Vec<Register>> {
        let sql = format!(
            "SELECT {} FROM registers WHERE branch_id = ?1 AND status = ?2 ORDER BY id",
            REGISTER_COLUMNS
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let registers = stmt
            .query_map(
                params![branch_id, RegisterStatus::Open.as_str()],
                register_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(registers)
    }

    fn lock_open_shifts(&self, register_id: i64) -> GuardResult<Vec<Shift>> {
        let sql = format!(
            "SELECT {} FROM shifts WHERE register_id = ?1 AND closed_at IS NULL ORDER BY id",
            SHIFT_COLUMNS
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let shifts = stmt
            .query_map([register_id], shift_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(shifts)
    }

    fn insert_register(
        &self,
        branch_id: i64,
        location: Option<&str>,
        status: RegisterStatus,
    ) -> GuardResult<Register> {
        self.tx.execute(
            "INSERT INTO registers (branch_id, location, status) VALUES (?1, ?2, ?3)",
            params![branch_id, location, status.as_str()],
        )?;

        Ok(Register {
            id: self.tx.last_insert_rowid(),
            branch_id,
            location: location.map(str::to_string),
            status,
        })
    }

    fn set_register_status(&self, id: i64, status: RegisterStatus) -> GuardResult<()> {
        let changed = self.tx.execute(
            "UPDATE registers SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(GuardError::not_found(format!("register {} does not exist", id)));
        }
        Ok(())
    }

    fn insert_shift(
        &self,
        register_id: i64,
        employee_id: Option<i64>,
        opened_at: DateTime<Utc>,
    ) -> GuardResult<Shift> {
        self.tx.execute(
            "INSERT INTO shifts (register_id, employee_id, opened_at) VALUES (?1, ?2, ?3)",
            params![register_id, employee_id, format_ts(opened_at)],
        )?;

        let id = self.tx.last_insert_rowid();
        // Re-read so the returned value carries the stored (micro-second) timestamp
        self.find_shift(id)?
            .ok_or_else(|| GuardError::not_found(format!("shift {} vanished after insert", id)))
    }

    fn close_shift(
        &self,
        id: i64,
        closed_at: DateTime<Utc>,
        totals: Option<ShiftTotals>,
    ) -> GuardResult<Shift> {
        let changed = self.tx.execute(
            "UPDATE shifts
             SET closed_at = ?1,
                 total_inflows = COALESCE(?2, total_inflows),
                 total_outflows = COALESCE(?3, total_outflows),
                 closing_balance = COALESCE(?4, closing_balance)
             WHERE id = ?5 AND closed_at IS NULL",
            params![
                format_ts(closed_at),
                totals.map(|t| t.inflows),
                totals.map(|t| t.outflows),
                totals.map(|t| t.balance),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(GuardError::not_found(format!(
                "shift {} does not exist or is already closed",
                id
            )));
        }

        self.find_shift(id)?
            .ok_or_else(|| GuardError::not_found(format!("shift {} does not exist", id)))
    }

    fn record_event(&self, event: &Event) -> GuardResult<()> {
        db::insert_event(&self.tx, event)?;
        Ok(())
    }

    fn commit(self) -> GuardResult<()> {
        self.tx.commit()?;
        debug!("unit of work committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_branch() -> (SqliteStore, i64) {
        let store = SqliteStore::in_memory().unwrap();
        let branch = db::insert_branch(store.connection(), "North", None).unwrap();
        (store, branch.id)
    }

    #[test]
    fn test_dropped_unit_of_work_rolls_back() {
        let (store, branch_id) = store_with_branch();

        {
            let uow = store.begin().unwrap();
            uow.insert_register(branch_id, Some("front desk"), RegisterStatus::Open)
                .unwrap();
            // no commit
        }

        let uow = store.begin().unwrap();
        assert!(uow.lock_open_registers(branch_id).unwrap().is_empty());
    }

    #[test]
    fn test_committed_rows_are_visible() {
        let (store, branch_id) = store_with_branch();

        let uow = store.begin().unwrap();
        let register = uow
            .insert_register(branch_id, Some("front desk"), RegisterStatus::Open)
            .unwrap();
        let shift = uow.insert_shift(register.id, None, Utc::now()).unwrap();
        uow.commit().unwrap();

        let uow = store.begin().unwrap();
        assert_eq!(uow.lock_open_registers(branch_id).unwrap(), vec![register.clone()]);
        assert_eq!(uow.lock_open_shifts(register.id).unwrap(), vec![shift]);
    }

    #[test]
    fn test_close_shift_twice_is_not_found() {
        let (store, branch_id) = store_with_branch();

        let uow = store.begin().unwrap();
        let register = uow
            .insert_register(branch_id, None, RegisterStatus::Open)
            .unwrap();
        let shift = uow.insert_shift(register.id, None, Utc::now()).unwrap();

        let closed = uow
            .close_shift(shift.id, Utc::now(), Some(ShiftTotals::from_flows(100, 40)))
            .unwrap();
        assert!(!closed.is_open());
        assert_eq!(closed.totals, Some(ShiftTotals::from_flows(100, 40)));

        let again = uow.close_shift(shift.id, Utc::now(), None);
        assert!(matches!(again, Err(GuardError::NotFound(_))));
    }

    #[test]
    fn test_set_status_on_missing_register() {
        let (store, _) = store_with_branch();
        let uow = store.begin().unwrap();

        let result = uow.set_register_status(404, RegisterStatus::Closed);
        assert!(matches!(result, Err(GuardError::NotFound(_))));
    }
}
