use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Queue discipline applied to connection work waiting for a pooled worker.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum QueueDiscipline {
    /// Work queues without limit once the minimum worker count is busy; the
    /// pool never grows past its minimum.
    Unbounded,
    /// Work queues up to `pool_queue_capacity` entries, then extra workers
    /// are spawned up to the maximum.
    Bounded,
    /// No queue: work is handed straight to an idle or newly spawned worker.
    #[default]
    Direct,
}

/// Errors encountered while parsing a [`QueueDiscipline`] from text.
pub type QueueDisciplineParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("unbounded", QueueDiscipline::Unbounded)]
    #[case("Bounded", QueueDiscipline::Bounded)]
    #[case("DIRECT", QueueDiscipline::Direct)]
    fn parses_case_insensitively(#[case] input: &str, #[case] expected: QueueDiscipline) {
        assert_eq!(input.parse::<QueueDiscipline>().ok(), Some(expected));
    }

    #[test]
    fn connections_are_handed_straight_to_workers_by_default() {
        assert_eq!(QueueDiscipline::default(), QueueDiscipline::Direct);
        assert_eq!(crate::default_queue_discipline(), QueueDiscipline::Direct);
    }
}
