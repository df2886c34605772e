/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Random protocol data: identifiers, flag sets and message literals.
//!
//! Everything here is a pure function of the caller's random source, so
//! generated sessions are reproducible given a seed. Wall-clock values are
//! deliberately absent.

use rand::seq::SliceRandom;
use rand::Rng;

/// Alphabet for generated identifiers.
const TOKEN_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// System flags a generated message may carry.
pub const FLAGS: [&str; 5] = ["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft"];

/// Flag marking a message for removal by EXPUNGE.
pub const DELETED_FLAG: &str = "\\Deleted";

/// Well-known mailbox every session returns to before logging out.
pub const INBOX: &str = "INBOX";

const PARAGRAPHS: [&str; 8] = [
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.",
    "Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat.",
    "Duis aute irure dolor in reprehenderit in voluptate velit esse cillum dolore eu fugiat nulla pariatur.",
    "Excepteur sint occaecat cupidatat non proident, sunt in culpa qui officia deserunt mollit anim id est laborum.",
    "Sed ut perspiciatis unde omnis iste natus error sit voluptatem accusantium doloremque laudantium.",
    "Totam rem aperiam, eaque ipsa quae ab illo inventore veritatis et quasi architecto beatae vitae dicta sunt.",
    "Nemo enim ipsam voluptatem quia voluptas sit aspernatur aut odit aut fugit, sed quia consequuntur magni dolores.",
    "Neque porro quisquam est, qui dolorem ipsum quia dolor sit amet, consectetur, adipisci velit.",
];

/// Random `[a-z0-9]` identifier of the given length.
pub fn token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

/// Random set of 1 to 5 distinct message flags.
pub fn flag_set<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    let count = rng.gen_range(1..=FLAGS.len());
    FLAGS
        .choose_multiple(rng, count)
        .map(|flag| (*flag).to_string())
        .collect()
}

/// Parenthesized flag-list wire form, e.g. `(\Seen \Draft)`.
pub fn flag_list(flags: &[String]) -> String {
    format!("({})", flags.join(" "))
}

/// RFC-822-shaped multi-line message of varying size with CRLF line
/// endings, suitable as an APPEND literal. The Date header is fixed so
/// the literal stays a pure function of the random source.
pub fn message_body<R: Rng + ?Sized>(rng: &mut R) -> String {
    let sender = token(rng, 6);
    let recipient = token(rng, 6);
    let subject = token(rng, 10);
    let message_id = token(rng, 12);

    let mut body = format!(
        "Date: Mon, 7 Feb 1994 21:52:25 -0800 (PST)\r\n\
         From: {sender} <{sender}@example.com>\r\n\
         Subject: {subject}\r\n\
         To: {recipient}@example.net\r\n\
         Message-Id: <{message_id}@example.com>\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: TEXT/PLAIN; CHARSET=US-ASCII\r\n\
         \r\n"
    );
    for _ in 0..rng.gen_range(1..=6) {
        body.push_str(PARAGRAPHS[rng.gen_range(0..PARAGRAPHS.len())]);
        body.push_str("\r\n");
    }
    body
}
