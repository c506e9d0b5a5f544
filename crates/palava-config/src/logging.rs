use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Shape of the log lines the bridge writes to stderr.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    #[default]
    Json,
    /// Terse text for terminals.
    Compact,
}

/// Unknown log format name.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_round_trip_through_text() {
        assert_eq!("JSON".parse::<LogFormat>().ok(), Some(LogFormat::Json));
        assert_eq!(LogFormat::Compact.to_string(), "compact");
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
