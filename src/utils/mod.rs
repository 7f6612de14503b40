//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod clock;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

use std::collections::BTreeMap;

/// Parse `key=value` pairs into a property map
///
/// Later pairs override earlier ones. Whitespace around keys is trimmed;
/// values are taken verbatim.
pub fn parse_properties<I, S>(pairs: I) -> anyhow::Result<BTreeMap<String, String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut properties = BTreeMap::new();

    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{pair}'"))?;

        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Empty property name in '{pair}'");
        }
        properties.insert(key.to_string(), value.to_string());
    }

    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_properties() {
        let props = parse_properties(["root=/tmp/docs", " depth =3", "root=/srv"]).unwrap();
        assert_eq!(props.get("root").map(String::as_str), Some("/srv"));
        assert_eq!(props.get("depth").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_parse_properties_rejects_bare_words() {
        assert!(parse_properties(["root"]).is_err());
        assert!(parse_properties(["=value"]).is_err());
    }
}
