use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemType {
    Crm,
    Finance,
}

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crm => "crm",
            Self::Finance => "finance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "crm" => Some(Self::Crm),
            "finance" | "siagh" => Some(Self::Finance),
            _ => None,
        }
    }

    /// The system on the other side of the bridge.
    pub fn counterpart(&self) -> Self {
        match self {
            Self::Crm => Self::Finance,
            Self::Finance => Self::Crm,
        }
    }
}

impl std::fmt::Display for SystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SystemType;

    #[test]
    fn parse_accepts_legacy_finance_alias() {
        assert_eq!(SystemType::parse("CRM"), Some(SystemType::Crm));
        assert_eq!(SystemType::parse(" finance "), Some(SystemType::Finance));
        assert_eq!(SystemType::parse("Siagh"), Some(SystemType::Finance));
        assert_eq!(SystemType::parse("erp"), None);
    }

    #[test]
    fn counterpart_flips_sides() {
        assert_eq!(SystemType::Crm.counterpart(), SystemType::Finance);
        assert_eq!(SystemType::Finance.counterpart(), SystemType::Crm);
    }
}
