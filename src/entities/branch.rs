// 🏬 Branch Entity - a physical retail location
//
// Branches are reference data for the guard: registers point at them, the
// guard never modifies them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
}

impl Branch {
    /// Label used in CLI output
    pub fn display_name(&self) -> String {
        match &self.address {
            Some(address) if !address.is_empty() => format!("{} ({})", self.name, address),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_includes_address() {
        let branch = Branch {
            id: 1,
            name: "North".to_string(),
            address: Some("Av. Siempre Viva 742".to_string()),
        };
        assert_eq!(branch.display_name(), "North (Av. Siempre Viva 742)");

        let bare = Branch {
            id: 2,
            name: "South".to_string(),
            address: Some(String::new()),
        };
        assert_eq!(bare.display_name(), "South");
    }
}
