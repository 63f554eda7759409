// 🧾 Register Entity - a point-of-sale till ("caja") in one branch
//
// Invariant (enforced by crate::guard): at most one Open register per branch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterStatus {
    Open,
    Closed,
}

impl RegisterStatus {
    /// Value stored in registers.status
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterStatus::Open => "Open",
            RegisterStatus::Closed => "Closed",
        }
    }

    pub fn parse(value: &str) -> Option<RegisterStatus> {
        match value {
            "Open" | "Abierta" => Some(RegisterStatus::Open),
            "Closed" | "Cerrada" => Some(RegisterStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub id: i64,
    pub branch_id: i64,
    pub location: Option<String>,
    pub status: RegisterStatus,
}

impl Register {
    pub fn is_open(&self) -> bool {
        self.status == RegisterStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_column_value() {
        for status in [RegisterStatus::Open, RegisterStatus::Closed] {
            assert_eq!(RegisterStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RegisterStatus::parse("Abierta"), Some(RegisterStatus::Open));
        assert_eq!(RegisterStatus::parse("open"), None);
    }
}
