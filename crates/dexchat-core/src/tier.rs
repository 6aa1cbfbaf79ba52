//! Subscription tiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subscription tier of the local participant.
///
/// Billing refers to the top tier as `paid`; that spelling is accepted on
/// input and normalised to [`Tier::Premium`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No subscription.
    #[default]
    Free,
    /// Basic subscription.
    Basic,
    /// Premium subscription.
    #[serde(alias = "paid")]
    Premium,
}

impl Tier {
    /// Wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
        }
    }

    /// Whether this tier is above `basic`.
    #[must_use]
    pub fn is_above_basic(self) -> bool {
        matches!(self, Self::Premium)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "premium" | "paid" => Ok(Self::Premium),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_alias_maps_to_premium() {
        let tier: Tier = serde_json::from_str("\"paid\"").unwrap();
        assert_eq!(tier, Tier::Premium);
        assert_eq!(serde_json::to_string(&tier).unwrap(), "\"premium\"");
        assert_eq!("PAID".parse::<Tier>().unwrap(), Tier::Premium);
    }

    #[test]
    fn default_is_free() {
        assert_eq!(Tier::default(), Tier::Free);
        assert!(!Tier::Basic.is_above_basic());
        assert!(Tier::Premium.is_above_basic());
    }

    #[test]
    fn unknown_tier_rejected() {
        assert!("gold".parse::<Tier>().is_err());
    }
}
