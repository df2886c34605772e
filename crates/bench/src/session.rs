/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/*!
 * Session generator.
 *
 * Synthesizes a random sequence of protocol commands that is legal
 * against a virtual mailbox evolving alongside the sequence: a command is
 * only emitted when the mailbox state it references exists. The mailbox
 * is an explicit value owned by one `generate` call; it never escapes.
 *
 * Command choice is a two-level draw: the mailbox state selects one of
 * six mutually exclusive state classes, and a uniform value in `[0, 1)`
 * picks a command within the class via fixed cumulative-probability
 * bands.
 */

use rand::Rng;

use crate::datagen;
use crate::{Error, Result};

/// One protocol command of a generated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { folder: String },
    Delete { folder: String },
    Select { folder: String },
    Append { folder: String, flags: Vec<String>, body: String },
    Store { sequence: usize, flags: Vec<String> },
    Expunge,
}

impl Command {
    /// Protocol name, as recorded in timing output.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "CREATE",
            Command::Delete { .. } => "DELETE",
            Command::Select { .. } => "SELECT",
            Command::Append { .. } => "APPEND",
            Command::Store { .. } => "STORE",
            Command::Expunge => "EXPUNGE",
        }
    }
}

#[derive(Debug)]
struct VirtualMessage {
    flags: Vec<String>,
}

#[derive(Debug)]
struct VirtualFolder {
    name: String,
    messages: Vec<VirtualMessage>,
}

/// Generation-time model of the account. `selected` always refers to a
/// folder present in `folders`, or to none.
#[derive(Debug, Default)]
struct VirtualMailbox {
    folders: Vec<VirtualFolder>,
    selected: Option<usize>,
}

impl VirtualMailbox {
    /// Adds a folder under a fresh name, rerolling on collision.
    fn create<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Command {
        let mut name = datagen::token(rng, 8);
        while self.folders.iter().any(|folder| folder.name == name) {
            name = datagen::token(rng, 8);
        }
        self.folders.push(VirtualFolder { name: name.clone(), messages: Vec::new() });
        Command::Create { folder: name }
    }

    /// Removes a uniformly chosen non-selected folder, shifting the
    /// selected index when it sat past the removed one. Callers guarantee
    /// at least one deletable folder exists.
    fn delete<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Command {
        let mut index = rng.gen_range(0..self.folders.len());
        while Some(index) == self.selected {
            index = rng.gen_range(0..self.folders.len());
        }
        let folder = self.folders.remove(index);
        if let Some(selected) = self.selected {
            if index < selected {
                self.selected = Some(selected - 1);
            }
        }
        Command::Delete { folder: folder.name }
    }

    fn select<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Command {
        let index = rng.gen_range(0..self.folders.len());
        self.selected = Some(index);
        Command::Select { folder: self.folders[index].name.clone() }
    }

    /// Appends a message with fresh flags and a fresh body to a uniformly
    /// chosen folder.
    fn append<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Command {
        let index = rng.gen_range(0..self.folders.len());
        let flags = datagen::flag_set(rng);
        let body = datagen::message_body(rng);
        self.folders[index].messages.push(VirtualMessage { flags: flags.clone() });
        Command::Append { folder: self.folders[index].name.clone(), flags, body }
    }

    /// Overwrites the flags of a uniformly chosen message in the selected
    /// folder. The emitted sequence number is 1-based.
    fn store<R: Rng + ?Sized>(&mut self, rng: &mut R, selected: usize) -> Command {
        let messages = &mut self.folders[selected].messages;
        let index = rng.gen_range(0..messages.len());
        let flags = datagen::flag_set(rng);
        messages[index].flags = flags.clone();
        Command::Store { sequence: index + 1, flags }
    }

    /// Drops every message of the selected folder carrying the deletion
    /// marker.
    fn expunge(&mut self, selected: usize) -> Command {
        self.folders[selected]
            .messages
            .retain(|message| !message.flags.iter().any(|flag| flag == datagen::DELETED_FLAG));
        Command::Expunge
    }
}

/// Emits one command legal in the current state and applies its mutation.
fn step<R: Rng + ?Sized>(mailbox: &mut VirtualMailbox, rng: &mut R) -> Command {
    // An empty account only permits CREATE.
    if mailbox.folders.is_empty() {
        return mailbox.create(rng);
    }

    let r: f64 = rng.gen();
    match mailbox.selected {
        // Folders exist but none is selected: CREATE, DELETE, APPEND and
        // SELECT share the band evenly.
        None => {
            if r < 0.25 {
                mailbox.create(rng)
            } else if r < 0.5 {
                mailbox.delete(rng)
            } else if r < 0.75 {
                mailbox.append(rng)
            } else {
                mailbox.select(rng)
            }
        }
        // The single folder is selected, so DELETE and SELECT drop out;
        // STORE needs at least one message.
        Some(selected) if mailbox.folders.len() == 1 => {
            if mailbox.folders[selected].messages.is_empty() {
                if r < 0.3 {
                    mailbox.create(rng)
                } else if r < 0.9 {
                    mailbox.append(rng)
                } else {
                    mailbox.expunge(selected)
                }
            } else if r < 0.25 {
                mailbox.create(rng)
            } else if r < 0.5 {
                mailbox.append(rng)
            } else if r < 0.75 {
                mailbox.store(rng, selected)
            } else {
                mailbox.expunge(selected)
            }
        }
        // Several folders with a selection: the full command set, minus
        // STORE while the selected folder is empty.
        Some(selected) => {
            if mailbox.folders[selected].messages.is_empty() {
                if r < 0.15 {
                    mailbox.create(rng)
                } else if r < 0.3 {
                    mailbox.delete(rng)
                } else if r < 0.6 {
                    mailbox.append(rng)
                } else if r < 0.9 {
                    mailbox.select(rng)
                } else {
                    mailbox.expunge(selected)
                }
            } else if r < 0.15 {
                mailbox.create(rng)
            } else if r < 0.3 {
                mailbox.delete(rng)
            } else if r < 0.5 {
                mailbox.append(rng)
            } else if r < 0.75 {
                mailbox.store(rng, selected)
            } else if r < 0.9 {
                mailbox.select(rng)
            } else {
                mailbox.expunge(selected)
            }
        }
    }
}

/// Generates one session of random commands. The body length is uniform
/// in `[min_length, max_length)`; the session then returns to INBOX and
/// deletes every folder it leaves behind, so the account ends as it
/// started.
pub fn generate<R: Rng + ?Sized>(
    min_length: usize,
    max_length: usize,
    rng: &mut R,
) -> Result<Vec<Command>> {
    if min_length == 0 || min_length >= max_length {
        return Err(Error::InvalidArgument(format!(
            "session length bounds must satisfy 0 < min < max, got [{min_length}, {max_length})"
        )));
    }

    let length = rng.gen_range(min_length..max_length);
    let mut mailbox = VirtualMailbox::default();
    let mut commands = Vec::with_capacity(length + 1);

    for _ in 0..length {
        commands.push(step(&mut mailbox, rng));
    }

    commands.push(Command::Select { folder: datagen::INBOX.to_string() });
    for folder in mailbox.folders {
        commands.push(Command::Delete { folder: folder.name });
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn mailbox_with(names: &[&str], selected: Option<usize>) -> VirtualMailbox {
        VirtualMailbox {
            folders: names
                .iter()
                .map(|name| VirtualFolder { name: (*name).to_string(), messages: Vec::new() })
                .collect(),
            selected,
        }
    }

    /// Replays a generated session against an independent model and
    /// panics on the first command that references nonexistent state.
    fn assert_legal(commands: &[Command]) {
        let mut folders: HashMap<String, usize> = HashMap::new();
        let mut selected: Option<String> = None;

        for command in commands {
            match command {
                Command::Create { folder } => {
                    assert!(!folders.contains_key(folder), "CREATE of existing {folder}");
                    folders.insert(folder.clone(), 0);
                }
                Command::Delete { folder } => {
                    assert!(folders.remove(folder).is_some(), "DELETE of missing {folder}");
                    assert_ne!(selected.as_deref(), Some(folder.as_str()), "DELETE of selection");
                }
                Command::Select { folder } => {
                    assert!(
                        folder == datagen::INBOX || folders.contains_key(folder),
                        "SELECT of missing {folder}"
                    );
                    selected = Some(folder.clone());
                }
                Command::Append { folder, flags, body } => {
                    let count = folders.get_mut(folder).expect("APPEND to missing folder");
                    *count += 1;
                    assert!(!flags.is_empty());
                    assert!(!body.is_empty());
                }
                Command::Store { sequence, flags } => {
                    let name = selected.as_ref().expect("STORE without selection");
                    let count = folders.get(name).expect("STORE outside a live folder");
                    assert!(*sequence >= 1 && sequence <= count, "STORE of missing message");
                    assert!(!flags.is_empty());
                }
                Command::Expunge => {
                    let name = selected.as_ref().expect("EXPUNGE without selection");
                    assert!(folders.contains_key(name), "EXPUNGE outside a live folder");
                }
            }
        }
    }

    #[test]
    fn rejects_invalid_length_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(generate(5, 5, &mut rng), Err(Error::InvalidArgument(_))));
        assert!(matches!(generate(6, 5, &mut rng), Err(Error::InvalidArgument(_))));
        assert!(matches!(generate(0, 5, &mut rng), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn starts_with_create_and_ends_in_inbox() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let commands = generate(3, 12, &mut rng).unwrap();
            assert!(matches!(commands[0], Command::Create { .. }));
            assert!(commands
                .iter()
                .any(|c| matches!(c, Command::Select { folder } if folder == datagen::INBOX)));
        }
    }

    #[test]
    fn fixed_length_emits_body_plus_inbox_plus_trailing_deletes() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let commands = generate(5, 6, &mut rng).unwrap();

            assert!(
                matches!(&commands[5], Command::Select { folder } if folder == datagen::INBOX),
                "command 5 must be the trailing SELECT INBOX"
            );
            let trailing = &commands[6..];
            assert!(trailing.iter().all(|c| matches!(c, Command::Delete { .. })));
            assert_eq!(commands.len(), 6 + trailing.len());
        }
    }

    #[test]
    fn generated_sessions_are_protocol_legal() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let commands = generate(3, 20, &mut rng).unwrap();
            assert_legal(&commands);
        }
    }

    #[test]
    fn folder_names_are_distinct_at_creation() {
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let commands = generate(10, 20, &mut rng).unwrap();
            let mut live: Vec<&String> = Vec::new();
            for command in &commands {
                match command {
                    Command::Create { folder } => {
                        assert!(!live.contains(&folder));
                        live.push(folder);
                    }
                    Command::Delete { folder } => live.retain(|name| *name != folder),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn delete_never_touches_the_selection_and_shifts_the_index() {
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut mailbox = mailbox_with(&["a", "b", "c"], Some(1));
            mailbox.delete(&mut rng);

            let selected = mailbox.selected.unwrap();
            assert_eq!(mailbox.folders.len(), 2);
            assert_eq!(mailbox.folders[selected].name, "b");
        }
    }

    #[test]
    fn single_selected_empty_folder_limits_the_command_set() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut mailbox = mailbox_with(&["only"], Some(0));
            let command = step(&mut mailbox, &mut rng);
            assert!(
                matches!(command, Command::Create { .. } | Command::Append { .. } | Command::Expunge),
                "unexpected {command:?} for a single selected empty folder"
            );
        }
    }

    #[test]
    fn store_requires_messages_in_the_selection() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut mailbox = mailbox_with(&["a", "b"], Some(0));
            let command = step(&mut mailbox, &mut rng);
            assert!(!matches!(command, Command::Store { .. }));
        }
    }

    #[test]
    fn expunge_removes_only_deletion_marked_messages() {
        let mut mailbox = mailbox_with(&["inbox2"], Some(0));
        mailbox.folders[0].messages = vec![
            VirtualMessage { flags: vec!["\\Seen".into()] },
            VirtualMessage { flags: vec!["\\Deleted".into(), "\\Draft".into()] },
            VirtualMessage { flags: vec!["\\Flagged".into()] },
        ];

        assert_eq!(mailbox.expunge(0), Command::Expunge);
        let remaining: Vec<_> = mailbox.folders[0]
            .messages
            .iter()
            .map(|m| m.flags[0].as_str())
            .collect();
        assert_eq!(remaining, vec!["\\Seen", "\\Flagged"]);
    }

    #[test]
    fn same_seed_reproduces_the_sequence() {
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        assert_eq!(
            generate(3, 20, &mut first).unwrap(),
            generate(3, 20, &mut second).unwrap()
        );
    }
}
