use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("launch error: {0}")]
    Launch(String),
    #[error("build error: {0}")]
    Build(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("process error: {0}")]
    Process(String),
}

impl ProbeError {
    /// Errors after which the command channel must not be used again.
    pub fn is_channel_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Process(_))
    }
}
