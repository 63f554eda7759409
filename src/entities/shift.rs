// ⏱️ Shift Entity - a bounded work period ("turno") on one register
//
// closed_at = None means the shift is still open. Totals are only
// meaningful once the shift is closed and are supplied by the caller
// (see crate::reports::shift_totals for the usual source).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closing figures in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTotals {
    pub inflows: i64,
    pub outflows: i64,
    pub balance: i64,
}

impl ShiftTotals {
    /// Totals where balance = inflows - outflows
    pub fn from_flows(inflows: i64, outflows: i64) -> Self {
        ShiftTotals {
            inflows,
            outflows,
            balance: inflows - outflows,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.inflows < 0 {
            return Err("inflows cannot be negative".to_string());
        }
        if self.outflows < 0 {
            return Err("outflows cannot be negative".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: i64,
    pub register_id: i64,
    pub employee_id: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub totals: Option<ShiftTotals>,
}

impl Shift {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_from_flows() {
        let totals = ShiftTotals::from_flows(15_000, 2_500);
        assert_eq!(totals.balance, 12_500);
        assert!(totals.validate().is_ok());

        let bad = ShiftTotals {
            inflows: -1,
            outflows: 0,
            balance: -1,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_is_open_until_closed() {
        let opened = Utc::now();
        let mut shift = Shift {
            id: 1,
            register_id: 1,
            employee_id: None,
            opened_at: opened,
            closed_at: None,
            totals: None,
        };

        assert!(shift.is_open());

        shift.closed_at = Some(opened + chrono::Duration::hours(1));
        assert!(!shift.is_open());
    }
}
