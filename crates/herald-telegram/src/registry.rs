//! Explicit command registry.
//!
//! Commands are a fixed table built once at startup: name -> typed handler
//! value plus the scope the router must enforce. Adding a command means
//! adding a row here, not dropping a file into a magic directory.

use std::collections::HashMap;

/// Typed handler identity. The actual handler bodies live in `handlers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Stats,
    Broadcast,
    Shutdown,
}

/// Who may invoke a command. `Owner` is stricter than `Admin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Public,
    Admin,
    Owner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: Command,
    pub scope: Scope,
}

pub struct CommandRegistry {
    entries: HashMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    pub fn standard() -> Self {
        let mut entries = HashMap::new();
        let mut add = |name, command, scope| {
            entries.insert(name, CommandSpec { command, scope });
        };

        add("start", Command::Start, Scope::Public);
        add("help", Command::Help, Scope::Public);
        add("stats", Command::Stats, Scope::Admin);
        add("broadcast", Command::Broadcast, Scope::Admin);
        add("shutdown", Command::Shutdown, Scope::Owner);

        Self { entries }
    }

    pub fn resolve(&self, name: &str) -> Option<CommandSpec> {
        self.entries.get(name).copied()
    }

    /// Command names visible to a caller with the given privileges.
    pub fn visible_names(&self, admin: bool, owner: bool) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, spec)| match spec.scope {
                Scope::Public => true,
                Scope::Admin => admin,
                Scope::Owner => owner,
            })
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        names
    }
}

/// Split `/cmd@botname arg1 ...` into a lowercase command name and the
/// argument tail. Returns `None` for non-command text.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if cmd.is_empty() {
        return None;
    }
    Some((cmd, rest))
}
