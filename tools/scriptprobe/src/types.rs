use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PollLocus {
    /// One `wait_for` request; the target polls its own screen.
    Target,
    /// Repeated `render` requests checked by the harness.
    Harness,
}

impl PollLocus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Harness => "harness",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Status,
    Keybindings,
    Completion,
    Diagnostics,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        ScenarioKind::Status,
        ScenarioKind::Keybindings,
        ScenarioKind::Completion,
        ScenarioKind::Diagnostics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "lsp_status",
            Self::Keybindings => "keybindings",
            Self::Completion => "completion",
            Self::Diagnostics => "diagnostics",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PollLocus, ScenarioKind};
    use clap::ValueEnum;

    #[test]
    fn config_and_cli_spellings_agree() {
        for kind in ScenarioKind::ALL {
            let cli = kind.to_possible_value().expect("cli name");
            let toml = serde_json::to_value(kind).expect("serialize");
            assert_eq!(toml.as_str(), Some(cli.get_name()));
        }
        assert_eq!(ScenarioKind::Status.as_str(), "lsp_status");
        assert_eq!(
            serde_json::to_value(PollLocus::Harness).expect("serialize").as_str(),
            Some(PollLocus::Harness.as_str())
        );
    }
}
