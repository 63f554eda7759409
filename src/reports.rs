// 📊 Read-only reports
//
// Derived views for the back office: shift totals (sales in, expenses out),
// low-stock alerts, and the register/shift boards. Nothing here writes.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::{register_from_row, shift_from_row, REGISTER_COLUMNS, SHIFT_COLUMNS};
use crate::entities::{Register, Shift, ShiftTotals};
use crate::error::{GuardError, GuardResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockProduct {
    pub id: i64,
    pub name: String,
    pub stock: i64,
    pub price: i64,
}

/// Totals for a shift from its sales (inflows) and expenses (outflows)
pub fn shift_totals(conn: &Connection, shift_id: i64) -> GuardResult<ShiftTotals> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM shifts WHERE id = ?1)",
        [shift_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(GuardError::not_found(format!("shift {} does not exist", shift_id)));
    }

    let inflows: i64 = conn.query_row(
        "SELECT COALESCE(SUM(total), 0) FROM sales WHERE shift_id = ?1",
        [shift_id],
        |row| row.get(0),
    )?;
    let outflows: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM expenses WHERE shift_id = ?1",
        [shift_id],
        |row| row.get(0),
    )?;

    Ok(ShiftTotals::from_flows(inflows, outflows))
}

/// Products at or below `threshold`, lowest stock first
pub fn low_stock_products(conn: &Connection, threshold: i64) -> Result<Vec<LowStockProduct>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, stock, price
         FROM products
         WHERE stock <= ?1
         ORDER BY stock ASC, name ASC",
    )?;

    let products = stmt
        .query_map([threshold], |row| {
            Ok(LowStockProduct {
                id: row.get(0)?,
                name: row.get(1)?,
                stock: row.get(2)?,
                price: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(products)
}

/// All registers, optionally restricted to one branch
pub fn list_registers(conn: &Connection, branch_id: Option<i64>) -> Result<Vec<Register>> {
    let sql = format!(
        "SELECT {} FROM registers WHERE (?1 IS NULL OR branch_id = ?1) ORDER BY branch_id, id",
        REGISTER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let registers = stmt
        .query_map(params![branch_id], register_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(registers)
}

/// Every shift that has not been closed yet
pub fn open_shifts(conn: &Connection) -> Result<Vec<Shift>> {
    let sql = format!(
        "SELECT {} FROM shifts WHERE closed_at IS NULL ORDER BY opened_at",
        SHIFT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let shifts = stmt
        .query_map([], shift_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(shifts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entities::Actor;
    use crate::guard::RegisterShiftGuard;
    use crate::store::SqliteStore;

    #[test]
    fn test_shift_totals_from_sales_and_expenses() {
        let guard = RegisterShiftGuard::new(SqliteStore::in_memory().unwrap());
        let conn = guard.store().connection();
        let branch = db::insert_branch(conn, "North", None).unwrap();
        let opened = guard
            .open_register(&Actor::system(), branch.id, "front desk")
            .unwrap();
        let shift_id = opened.shift.id;

        db::insert_sale(conn, shift_id, Some("Walk-in"), 12_500).unwrap();
        db::insert_sale(conn, shift_id, None, 7_500).unwrap();
        db::insert_expense(conn, shift_id, 3_000, Some("cleaning supplies")).unwrap();

        let totals = shift_totals(conn, shift_id).unwrap();
        assert_eq!(totals.inflows, 20_000);
        assert_eq!(totals.outflows, 3_000);
        assert_eq!(totals.balance, 17_000);

        // Feed the report into the guard's close
        let closed = guard
            .close_shift(&Actor::system(), shift_id, Some(totals))
            .unwrap();
        assert_eq!(closed.totals, Some(totals));
    }

    #[test]
    fn test_shift_totals_empty_and_missing() {
        let guard = RegisterShiftGuard::new(SqliteStore::in_memory().unwrap());
        let conn = guard.store().connection();
        let branch = db::insert_branch(conn, "North", None).unwrap();
        let opened = guard
            .open_register(&Actor::system(), branch.id, "front desk")
            .unwrap();

        assert_eq!(
            shift_totals(conn, opened.shift.id).unwrap(),
            ShiftTotals::from_flows(0, 0)
        );
        assert!(matches!(shift_totals(conn, 404), Err(GuardError::NotFound(_))));
    }

    #[test]
    fn test_shift_totals_storage_fault_is_not_a_missing_shift() {
        let guard = RegisterShiftGuard::new(SqliteStore::in_memory().unwrap());
        let conn = guard.store().connection();
        let branch = db::insert_branch(conn, "North", None).unwrap();
        let opened = guard
            .open_register(&Actor::system(), branch.id, "front desk")
            .unwrap();

        conn.execute_batch("DROP TABLE expenses").unwrap();
        let result = shift_totals(conn, opened.shift.id);
        assert!(matches!(result, Err(GuardError::Database(_))));
    }

    #[test]
    fn test_low_stock_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = store.connection();

        db::insert_product(conn, "Yerba 1kg", None, 4_500, 3).unwrap();
        db::insert_product(conn, "Azúcar", Some("1kg"), 1_200, 0).unwrap();
        db::insert_product(conn, "Harina", None, 900, 40).unwrap();
        db::insert_product(conn, "Aceite", None, 2_800, 5).unwrap();

        let alerts = low_stock_products(conn, 5).unwrap();
        let names: Vec<&str> = alerts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Azúcar", "Yerba 1kg", "Aceite"]);
    }

    #[test]
    fn test_list_registers_and_open_shifts() {
        let guard = RegisterShiftGuard::new(SqliteStore::in_memory().unwrap());
        let conn = guard.store().connection();
        let north = db::insert_branch(conn, "North", None).unwrap();
        let south = db::insert_branch(conn, "South", None).unwrap();

        let a = guard.open_register(&Actor::system(), north.id, "front").unwrap();
        guard.open_register(&Actor::system(), south.id, "front").unwrap();
        guard.close_register(&Actor::system(), a.register.id).unwrap();

        assert_eq!(list_registers(conn, None).unwrap().len(), 2);
        let north_only = list_registers(conn, Some(north.id)).unwrap();
        assert_eq!(north_only.len(), 1);
        assert!(!north_only[0].is_open());

        let open = open_shifts(conn).unwrap();
        assert_eq!(open.len(), 1);
        assert_ne!(open[0].register_id, a.register.id);
    }
}
