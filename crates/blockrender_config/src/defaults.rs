// Various default functions to be used by serde

use indexmap::IndexMap;
use url::Url;

/// Source tag the MakeCode render service stamps on every message it posts
pub const DEFAULT_SERVICE_TAG: &str = "makecode";

const DEFAULT_TARGETS: &[(&str, &str)] = &[
    ("microbit", "https://makecode.microbit.org/"),
    ("arcade", "https://arcade.makecode.com/"),
    ("minecraft", "https://minecraft.makecode.com/"),
    ("adafruit", "https://makecode.adafruit.com/"),
    ("chibitronics", "https://makecode.chibitronics.com/"),
];

pub(crate) fn default_service_tag() -> String {
    DEFAULT_SERVICE_TAG.into()
}

pub(crate) fn default_targets() -> IndexMap<String, Url> {
    DEFAULT_TARGETS
        .iter()
        .filter_map(|(key, address)| Some(((*key).to_string(), Url::parse(address).ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_all_parse() {
        let targets = default_targets();
        assert_eq!(targets.len(), DEFAULT_TARGETS.len());
        assert_eq!(targets.get_index(0).map(|(k, _)| k.as_str()), Some("microbit"));
    }
}
