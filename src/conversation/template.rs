//! Conversation templates and the separator styles used to render prompts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::Conversation;

/// Template used when a conversation enters its first round.
pub const FIRST_ROUND_TEMPLATE: &str = "mplug_owl2";

/// Template used for freshly loaded sessions.
pub const DEFAULT_TEMPLATE: &str = "mplug_owl2";

/// Names of every registered template.
pub const TEMPLATE_NAMES: [&str; 3] = ["mplug_owl2", "vicuna_v1", "plain"];

const OWL_SYSTEM: &str = "A chat between a curious human and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the human's questions.";

const VICUNA_SYSTEM: &str = "A chat between a curious user and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the user's questions.";

/// How messages are joined into a single prompt string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorStyle {
    /// `system sep role: msg sep ...`
    Single,
    /// `system sep role: msg sep|sep2 ...` alternating separators.
    Two,
    /// Like [`SeparatorStyle::Two`] without the system preamble.
    TwoNoSys,
    /// `system sep rolemsg sep ...` with roles carrying their own markup.
    Mpt,
    /// Bare messages separated by alternating separators.
    Plain,
}

impl SeparatorStyle {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Two => "two",
            Self::TwoNoSys => "two_no_sys",
            Self::Mpt => "mpt",
            Self::Plain => "plain",
        }
    }

    /// Whether the stop sequence is the primary separator for this style.
    #[must_use]
    pub const fn stops_on_primary_sep(self) -> bool {
        matches!(self, Self::Single | Self::Mpt)
    }
}

impl fmt::Display for SeparatorStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SeparatorStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single" => Ok(Self::Single),
            "two" => Ok(Self::Two),
            "two_no_sys" => Ok(Self::TwoNoSys),
            "mpt" => Ok(Self::Mpt),
            "plain" => Ok(Self::Plain),
            _ => Err(value.to_string()),
        }
    }
}

/// Build a fresh conversation from a registered template.
///
/// Each call returns a new owned value; templates are never shared mutably.
#[must_use]
pub fn template(name: &str) -> Option<Conversation> {
    let conv = match name {
        "mplug_owl2" => Conversation::new(
            OWL_SYSTEM,
            ["USER", "ASSISTANT"],
            SeparatorStyle::TwoNoSys,
            " ",
            "</s>",
            "v1",
        ),
        "vicuna_v1" => Conversation::new(
            VICUNA_SYSTEM,
            ["USER", "ASSISTANT"],
            SeparatorStyle::Two,
            " ",
            "</s>",
            "v1",
        ),
        "plain" => Conversation::new("", ["", ""], SeparatorStyle::Plain, "\n", "", "v0"),
        _ => return None,
    };
    Some(conv)
}

/// Fresh conversation for a newly loaded or cleared session.
#[must_use]
pub fn default_conversation() -> Conversation {
    template(DEFAULT_TEMPLATE).unwrap_or_else(|| {
        Conversation::new(
            OWL_SYSTEM,
            ["USER", "ASSISTANT"],
            SeparatorStyle::TwoNoSys,
            " ",
            "</s>",
            "v1",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_name_resolves() {
        for name in TEMPLATE_NAMES {
            assert!(template(name).is_some(), "{name} should be registered");
        }
        assert!(template("unknown").is_none());
    }

    #[test]
    fn test_templates_are_independent_copies() {
        let mut first = default_conversation();
        first.skip_next = true;
        first.append_message("USER", None);

        let second = default_conversation();
        assert!(!second.skip_next);
        assert!(second.messages.is_empty());
    }

    #[test]
    fn test_separator_style_round_trip_names() {
        for style in [
            SeparatorStyle::Single,
            SeparatorStyle::Two,
            SeparatorStyle::TwoNoSys,
            SeparatorStyle::Mpt,
            SeparatorStyle::Plain,
        ] {
            assert_eq!(style.as_str().parse::<SeparatorStyle>(), Ok(style));
        }
    }
}
