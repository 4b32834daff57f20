/// Message commands understood by the controller, and CLI lookup for them

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
  /// Activate a waiting controller without deferring to the next load
  SkipWaiting,
  /// Fetch every manifest resource missing from the content cache
  DownloadOffline,
}

#[derive(Debug, Clone)]
pub struct Command {
  /// Exact payload recognized on the wire
  pub payload: &'static str,
  pub kind: MessageKind,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All recognized commands
pub const COMMANDS: &[Command] = &[
  Command {
    payload: "skipWaiting",
    kind: MessageKind::SkipWaiting,
    aliases: &["skip-waiting", "skip"],
    description: "Activate a waiting controller immediately",
  },
  Command {
    payload: "downloadOffline",
    kind: MessageKind::DownloadOffline,
    aliases: &["download-offline", "offline"],
    description: "Download all manifest resources for offline use",
  },
];

/// Match a wire payload exactly. Anything else is not a command.
pub fn from_payload(payload: &str) -> Option<MessageKind> {
  COMMANDS
    .iter()
    .find(|cmd| cmd.payload == payload)
    .map(|cmd| cmd.kind)
}

/// Resolve user input (payload or alias, case-insensitive) to a command.
pub fn resolve(input: &str) -> Option<&'static Command> {
  let input_lower = input.to_lowercase();
  COMMANDS.iter().find(|cmd| {
    cmd.payload.to_lowercase() == input_lower || cmd.aliases.contains(&input_lower.as_str())
  })
}

/// Get suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    let payload = cmd.payload.to_lowercase();

    // Prefix match on payload
    if payload.starts_with(&input_lower) {
      matches.push((cmd, 0));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 1));
      continue;
    }

    // Fuzzy match (contains)
    if payload.contains(&input_lower) || cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 2));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}
