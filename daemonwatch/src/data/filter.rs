use fancy_regex::Regex;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// These two patterns are a parsing contract with the upstream log format and
// must stay exactly as written.
static PLAYER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.+\]+: <(.+)> (.+)").expect("player pattern"));
static SYSTEM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.+\]+: (?!<)(.+)").expect("system pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    PlayerMessage,
    SystemMessage,
    Unclassified,
}

/// Which of the two line patterns a console line satisfies. Every line also
/// counts as instance output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub player: bool,
    pub system: bool,
}

impl Classification {
    pub fn of(line: &str) -> Classification {
        Classification {
            player: PLAYER_PATTERN.is_match(line).unwrap_or(false),
            system: SYSTEM_PATTERN.is_match(line).unwrap_or(false),
        }
    }

    pub fn kind(&self) -> MessageKind {
        if self.player {
            MessageKind::PlayerMessage
        } else if self.system {
            MessageKind::SystemMessage
        } else {
            MessageKind::Unclassified
        }
    }
}

pub fn classify(line: &str) -> MessageKind {
    Classification::of(line).kind()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerChat {
    pub name: String,
    pub text: String,
}

impl PlayerChat {
    pub fn parse(line: &str) -> Option<PlayerChat> {
        let caps = PLAYER_PATTERN.captures(line).ok()??;
        Some(PlayerChat {
            name: caps.get(1)?.as_str().to_string(),
            text: caps.get(2)?.as_str().to_string(),
        })
    }
}

/// Independently toggled console filters. A line is shown when any enabled
/// filter accepts it; `output` accepts everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayFilter {
    pub player: bool,
    pub system: bool,
    pub output: bool,
}

impl Default for DisplayFilter {
    fn default() -> Self {
        DisplayFilter {
            player: true,
            system: true,
            output: true,
        }
    }
}

impl DisplayFilter {
    pub fn shows(&self, line: &str) -> bool {
        if self.output {
            return true;
        }
        if !self.player && !self.system {
            return false;
        }
        self.shows_classified(&Classification::of(line))
    }

    pub fn shows_classified(&self, class: &Classification) -> bool {
        self.output || (self.player && class.player) || (self.system && class.system)
    }

    pub fn toggle(&mut self, kind: MessageKind) {
        match kind {
            MessageKind::PlayerMessage => self.player = !self.player,
            MessageKind::SystemMessage => self.system = !self.system,
            MessageKind::Unclassified => self.output = !self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: &str = "[12:00:00] [Server thread/INFO]: <Steve> hello";
    const JOIN: &str = "[12:00:00] [Server thread/INFO]: Steve joined the game";
    const RAW: &str = "random text with no brackets";

    #[test]
    fn classifies_the_three_kinds() {
        assert_eq!(classify(CHAT), MessageKind::PlayerMessage);
        assert_eq!(classify(JOIN), MessageKind::SystemMessage);
        assert_eq!(classify(RAW), MessageKind::Unclassified);

        let raw = Classification::of(RAW);
        assert!(!raw.player && !raw.system);
    }

    #[test]
    fn chat_line_does_not_match_system_pattern() {
        let class = Classification::of(CHAT);
        assert!(class.player);
        assert!(!class.system);
    }

    #[test]
    fn extracts_player_name_and_text() {
        let chat = PlayerChat::parse(CHAT).unwrap();
        assert_eq!(chat.name, "Steve");
        assert_eq!(chat.text, "hello");
        assert!(PlayerChat::parse(JOIN).is_none());
    }

    #[test]
    fn player_only_filter_shows_only_chat() {
        let filter = DisplayFilter {
            player: true,
            system: false,
            output: false,
        };
        let lines = [CHAT, JOIN, RAW];
        let shown: Vec<_> = lines.iter().filter(|l| filter.shows(l)).collect();
        assert_eq!(shown, vec![&CHAT]);
    }

    #[test]
    fn output_filter_shows_everything() {
        let filter = DisplayFilter {
            player: false,
            system: false,
            output: true,
        };
        assert!([CHAT, JOIN, RAW].iter().all(|l| filter.shows(l)));
    }

    #[test]
    fn all_filters_off_hides_everything() {
        let filter = DisplayFilter {
            player: false,
            system: false,
            output: false,
        };
        assert!(![CHAT, JOIN, RAW].iter().any(|l| filter.shows(l)));
    }

    #[test]
    fn toggle_flips_one_filter() {
        let mut filter = DisplayFilter::default();
        filter.toggle(MessageKind::SystemMessage);
        assert!(filter.player && !filter.system && filter.output);
    }
}
