//! Common types for WaBlast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tenants
pub type TenantId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for campaign items (one per recipient)
pub type CampaignItemId = Uuid;

/// Unique identifier for schedule log entries
pub type ScheduleLogId = Uuid;

/// WhatsApp recipient address
///
/// Either a phone number reduced to its digits, or a group identifier
/// (anything containing `@`, e.g. `120363025246125888@g.us`) kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecipientAddress {
    Phone(String),
    Group(String),
}

impl RecipientAddress {
    /// Parse and normalize a recipient from user input
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.contains('@') {
            let (local, host) = trimmed.split_once('@')?;
            if local.is_empty() || host.is_empty() {
                return None;
            }
            return Some(Self::Group(trimmed.to_ascii_lowercase()));
        }

        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        // Anything other than digits and common separators is not a phone number
        let junk = trimmed
            .chars()
            .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.')));
        if junk || digits.len() < 6 || digits.len() > 15 {
            return None;
        }

        Some(Self::Phone(digits))
    }

    /// Get the address as sent to the gateway
    pub fn as_str(&self) -> &str {
        match self {
            RecipientAddress::Phone(p) => p,
            RecipientAddress::Group(g) => g,
        }
    }

    /// Whether this address targets a group chat
    pub fn is_group(&self) -> bool {
        matches!(self, RecipientAddress::Group(_))
    }
}

impl std::fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecipientAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::Validation(format!("Invalid recipient address: {}", s)))
    }
}

impl TryFrom<String> for RecipientAddress {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecipientAddress> for String {
    fn from(value: RecipientAddress) -> Self {
        match value {
            RecipientAddress::Phone(p) => p,
            RecipientAddress::Group(g) => g,
        }
    }
}

/// Normalize an uploaded recipient list
///
/// Returns the valid unique addresses in first-seen order, plus the raw
/// entries that could not be parsed.
pub fn normalize_recipients<I, S>(raw: I) -> (Vec<RecipientAddress>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut valid = Vec::new();
    let mut rejected = Vec::new();

    for entry in raw {
        let entry = entry.as_ref();
        match RecipientAddress::parse(entry) {
            Some(addr) => {
                if seen.insert(addr.clone()) {
                    valid.push(addr);
                }
            }
            None if entry.trim().is_empty() => {}
            None => rejected.push(entry.to_string()),
        }
    }

    (valid, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recipient_parse_phone() {
        let addr = RecipientAddress::parse("+62 812-3456-7890").unwrap();
        assert_eq!(addr, RecipientAddress::Phone("6281234567890".to_string()));
        assert_eq!(addr.to_string(), "6281234567890");
        assert!(!addr.is_group());
    }

    #[test]
    fn test_recipient_parse_group() {
        let addr = RecipientAddress::parse("120363025246125888@G.US").unwrap();
        assert!(addr.is_group());
        assert_eq!(addr.as_str(), "120363025246125888@g.us");
    }

    #[test]
    fn test_recipient_invalid() {
        assert!(RecipientAddress::parse("").is_none());
        assert!(RecipientAddress::parse("12345").is_none());
        assert!(RecipientAddress::parse("call me maybe").is_none());
        assert!(RecipientAddress::parse("@g.us").is_none());
    }

    #[test]
    fn test_normalize_recipients_dedups_in_order() {
        let (valid, rejected) = normalize_recipients([
            "6281234567890",
            "+62 812 3456 7890",
            "",
            "nope",
            "447700900123",
        ]);

        assert_eq!(
            valid,
            vec![
                RecipientAddress::Phone("6281234567890".to_string()),
                RecipientAddress::Phone("447700900123".to_string()),
            ]
        );
        assert_eq!(rejected, vec!["nope".to_string()]);
    }
}
