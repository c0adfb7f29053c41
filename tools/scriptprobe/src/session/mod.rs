//! The ordered record of what the harness sent to the target.
//!
//! Two views exist:
//! 1. [`Session`], the in-memory append-only command list. The target keeps
//!    its own copy and turns it into test code on `export_test`; the harness
//!    only counts and consumes it.
//! 2. The optional JSONL transcript written by [`recorder::SessionRecorder`],
//!    one [`recording::RecordEntry`] per line, for offline inspection.

pub mod recorder;
pub mod recording;

use crate::protocol::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    commands: Vec<Command>,
}

impl Session {
    pub fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::protocol::Command;

    #[test]
    fn session_preserves_issue_order() {
        let mut session = Session::default();
        session.record(Command::Render);
        session.record(Command::key("Down"));
        session.record(Command::GetBuffer);
        let names = session
            .commands()
            .iter()
            .map(Command::name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["render", "key", "get_buffer"]);
        assert_eq!(session.len(), 3);
    }
}
