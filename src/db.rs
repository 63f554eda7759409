use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::entities::{Branch, Employee, Register, RegisterStatus, Role, Shift, ShiftTotals};

/// Event for audit trail - every guarded transition leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: i64,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Fixed-width RFC 3339 so text ordering in SQLite matches time ordering
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Open a connection with the pragmas every caller relies on
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    configure_connection(&conn, busy_timeout)?;
    Ok(conn)
}

pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS branches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            address TEXT
        );

        CREATE TABLE IF NOT EXISTS employees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS registers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            branch_id INTEGER NOT NULL REFERENCES branches(id),
            location TEXT,
            status TEXT NOT NULL CHECK (status IN ('Open', 'Closed'))
        );

        CREATE TABLE IF NOT EXISTS shifts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            register_id INTEGER NOT NULL REFERENCES registers(id),
            employee_id INTEGER REFERENCES employees(id),
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            total_inflows INTEGER,
            total_outflows INTEGER,
            closing_balance INTEGER
        );

        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            price INTEGER NOT NULL,
            stock INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shift_id INTEGER NOT NULL REFERENCES shifts(id),
            customer_name TEXT,
            sold_at TEXT NOT NULL,
            total INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shift_id INTEGER NOT NULL REFERENCES shifts(id),
            spent_at TEXT NOT NULL,
            amount INTEGER NOT NULL,
            concept TEXT
        );

        -- Audit trail
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_registers_branch_status ON registers(branch_id, status);
        CREATE INDEX IF NOT EXISTS idx_shifts_register_closed ON shifts(register_id, closed_at);

        -- Backstop for writers that skip the guard
        CREATE UNIQUE INDEX IF NOT EXISTS idx_one_open_register_per_branch
            ON registers(branch_id) WHERE status = 'Open';
        CREATE UNIQUE INDEX IF NOT EXISTS idx_one_open_shift_per_register
            ON shifts(register_id) WHERE closed_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_sales_shift ON sales(shift_id);
        CREATE INDEX IF NOT EXISTS idx_expenses_shift ON expenses(shift_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPERS (shared by the store and the reports)
// ============================================================================

pub const REGISTER_COLUMNS: &str = "id, branch_id, location, status";

pub const SHIFT_COLUMNS: &str = "id, register_id, employee_id, opened_at, closed_at, \
     total_inflows, total_outflows, closing_balance";

pub fn register_from_row(row: &Row<'_>) -> rusqlite::Result<Register> {
    let status_str: String = row.get(3)?;
    let status = RegisterStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown register status: {}", status_str).into(),
        )
    })?;

    Ok(Register {
        id: row.get(0)?,
        branch_id: row.get(1)?,
        location: row.get(2)?,
        status,
    })
}

pub fn shift_from_row(row: &Row<'_>) -> rusqlite::Result<Shift> {
    let opened_at: String = row.get(3)?;
    let closed_at: Option<String> = row.get(4)?;
    let inflows: Option<i64> = row.get(5)?;
    let outflows: Option<i64> = row.get(6)?;
    let balance: Option<i64> = row.get(7)?;

    let totals = match (inflows, outflows, balance) {
        (Some(inflows), Some(outflows), Some(balance)) => Some(ShiftTotals {
            inflows,
            outflows,
            balance,
        }),
        _ => None,
    };

    Ok(Shift {
        id: row.get(0)?,
        register_id: row.get(1)?,
        employee_id: row.get(2)?,
        opened_at: parse_ts(&opened_at)?,
        closed_at: closed_at.as_deref().map(parse_ts).transpose()?,
        totals,
    })
}

pub fn get_branch(conn: &Connection, id: i64) -> rusqlite::Result<Option<Branch>> {
    conn.query_row(
        "SELECT id, name, address FROM branches WHERE id = ?1",
        [id],
        |row| {
            Ok(Branch {
                id: row.get(0)?,
                name: row.get(1)?,
                address: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn get_employee(conn: &Connection, id: i64) -> rusqlite::Result<Option<Employee>> {
    conn.query_row(
        "SELECT id, first_name, last_name, email, role FROM employees WHERE id = ?1",
        [id],
        |row| {
            let role_str: String = row.get(4)?;
            let role = Role::parse(&role_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("unknown employee role: {}", role_str).into(),
                )
            })?;
            Ok(Employee {
                id: row.get(0)?,
                first_name: row.get(1)?,
                last_name: row.get(2)?,
                email: row.get(3)?,
                role,
            })
        },
    )
    .optional()
}

// ============================================================================
// REFERENCE DATA WRITERS
// These never touch registers.status or shifts.closed_at - the guard does.
// ============================================================================

pub fn insert_branch(conn: &Connection, name: &str, address: Option<&str>) -> Result<Branch> {
    conn.execute(
        "INSERT INTO branches (name, address) VALUES (?1, ?2)",
        params![name, address],
    )?;

    Ok(Branch {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        address: address.map(str::to_string),
    })
}

pub fn insert_employee(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    email: &str,
    role: Role,
) -> Result<Employee> {
    conn.execute(
        "INSERT INTO employees (first_name, last_name, email, role) VALUES (?1, ?2, ?3, ?4)",
        params![first_name, last_name, email, role.as_str()],
    )
    .with_context(|| format!("Failed to insert employee {}", email))?;

    Ok(Employee {
        id: conn.last_insert_rowid(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: email.to_string(),
        role,
    })
}

pub fn insert_product(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    price_cents: i64,
    stock: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO products (name, description, price, stock) VALUES (?1, ?2, ?3, ?4)",
        params![name, description, price_cents, stock],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_sale(
    conn: &Connection,
    shift_id: i64,
    customer_name: Option<&str>,
    total_cents: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sales (shift_id, customer_name, sold_at, total) VALUES (?1, ?2, ?3, ?4)",
        params![shift_id, customer_name, format_ts(Utc::now()), total_cents],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_expense(
    conn: &Connection,
    shift_id: i64,
    amount_cents: i64,
    concept: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO expenses (shift_id, spent_at, amount, concept) VALUES (?1, ?2, ?3, ?4)",
        params![shift_id, format_ts(Utc::now()), amount_cents, concept],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> rusqlite::Result<()> {
    let data_json = event.data.to_string();

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_ts(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: i64,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id.to_string()], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_ts(&timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_db();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('branches', 'employees', 'registers', 'shifts',
                              'products', 'sales', 'expenses', 'events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 8);
    }

    #[test]
    fn test_register_status_is_constrained() {
        let conn = test_db();
        let branch = insert_branch(&conn, "North", None).unwrap();

        let result = conn.execute(
            "INSERT INTO registers (branch_id, location, status) VALUES (?1, 'front', 'Maybe')",
            [branch.id],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let conn = test_db();

        let result = conn.execute(
            "INSERT INTO registers (branch_id, location, status) VALUES (999, 'front', 'Open')",
            [],
        );
        assert!(result.is_err(), "register for unknown branch must be rejected");
    }

    #[test]
    fn test_schema_rejects_second_open_row() {
        let conn = test_db();
        let branch = insert_branch(&conn, "North", None).unwrap();

        conn.execute(
            "INSERT INTO registers (branch_id, location, status) VALUES (?1, 'front', 'Open')",
            [branch.id],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO registers (branch_id, location, status) VALUES (?1, 'back', 'Open')",
            [branch.id],
        );
        assert!(second.is_err(), "second open register must be rejected");
        conn.execute(
            "INSERT INTO registers (branch_id, location, status) VALUES (?1, 'back', 'Closed')",
            [branch.id],
        )
        .unwrap();

        let opened_at = format_ts(Utc::now());
        conn.execute(
            "INSERT INTO shifts (register_id, opened_at) VALUES (1, ?1)",
            [&opened_at],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO shifts (register_id, opened_at) VALUES (1, ?1)",
            [&opened_at],
        );
        assert!(second.is_err(), "second open shift must be rejected");

        conn.execute("UPDATE shifts SET closed_at = ?1 WHERE id = 1", [&opened_at])
            .unwrap();
        conn.execute(
            "INSERT INTO shifts (register_id, opened_at) VALUES (1, ?1)",
            [&opened_at],
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_stored_role_is_an_error() {
        let conn = test_db();
        let employee =
            insert_employee(&conn, "Ana", "Gómez", "ana@example.com", Role::Seller).unwrap();
        conn.execute(
            "UPDATE employees SET role = 'cashier' WHERE id = ?1",
            [employee.id],
        )
        .unwrap();

        let result = get_employee(&conn, employee.id);
        assert!(matches!(
            result,
            Err(rusqlite::Error::FromSqlConversionFailure(4, _, _))
        ));
    }

    #[test]
    fn test_duplicate_employee_email_rejected() {
        let conn = test_db();
        insert_employee(&conn, "Ana", "Gómez", "ana@example.com", Role::Seller).unwrap();

        let dup = insert_employee(&conn, "Ana", "López", "ana@example.com", Role::Seller);
        assert!(dup.is_err());

        let found = get_employee(&conn, 1).unwrap().unwrap();
        assert_eq!(found.last_name, "Gómez");
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let now = Utc::now();
        let text = format_ts(now);
        let parsed = parse_ts(&text).unwrap();

        assert!(text.ends_with('Z'));
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "register_opened",
            "register",
            42,
            serde_json::json!({"branch_id": 1}),
            "system",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "register", 42).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "register_opened");
        assert_eq!(events[0].actor, "system");
        assert_eq!(events[0].data["branch_id"], 1);

        println!("✅ Event log test PASSED");
    }
}
