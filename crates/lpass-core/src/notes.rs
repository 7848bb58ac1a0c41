//! C5: secure note expand/collapse (spec §4.5), ported field-for-field
//! from the original's `notes_expand`/`notes_collapse`.
//!
//! A secure note stores its structured data as `Key:Value` lines inside
//! the account's `notes` field, with a leading `NoteType:<name>` header.
//! `expand` turns that into an `Account` with real `username`/`password`/
//! `url`/`fields`; `collapse` is its inverse.

use crate::model::{Account, Field, SECURE_NOTE_URL};
use crate::note_templates::{self, NoteType};

pub fn is_secure_note(account: &Account) -> bool {
    account.is_secure_note()
}

/// Expand a secure note's flat `notes` text into separate fields.
/// Returns `None` for anything that isn't a `NoteType:`-headed secure
/// note — callers fall back to treating `notes` as opaque text.
pub fn notes_expand(account: &Account) -> Option<Account> {
    if !is_secure_note(account) || !account.notes.starts_with("NoteType:") {
        return None;
    }

    let mut expanded = account.clone();
    expanded.url = String::new();
    expanded.username = String::new();
    expanded.password = String::new();
    expanded.notes = String::new();
    expanded.fields = Vec::new();

    let lines: Vec<&str> = account.notes.split('\n').collect();
    let note_type: Option<NoteType> = lines
        .first()
        .and_then(|l| l.strip_prefix("NoteType:"))
        .and_then(|name| note_templates::by_name(name.trim()));

    let mut current_field_idx: Option<usize> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if line.is_empty() && current_field_idx.is_none() {
            i += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("Notes:") {
            let notes_value = rest.trim();
            let remaining = &lines[i + 1..];
            expanded.notes = if !remaining.is_empty() {
                if !notes_value.is_empty() {
                    format!("{}\n{}", notes_value, remaining.join("\n"))
                } else {
                    remaining.join("\n")
                }
            } else {
                notes_value.to_string()
            };
            expanded.notes = expanded.notes.trim_end_matches('\n').to_string();
            break;
        }

        if let Some(colon_idx) = line.find(':') {
            let key = &line[..colon_idx];
            let value = line[colon_idx + 1..].trim();

            if let (Some(nt), Some(idx)) = (note_type, current_field_idx) {
                let current_name = expanded.fields[idx].name.clone();
                if !note_templates::has_field(nt, key) && note_templates::is_multiline_field(nt, &current_name) {
                    // Continuation of a multiline field's value (e.g. a
                    // wrapped PEM line inside an SSH key block).
                    expanded.fields[idx].value.push('\n');
                    expanded.fields[idx].value.push_str(line);
                    i += 1;
                    continue;
                }
            }

            match key {
                "Username" => {
                    expanded.username = value.to_string();
                    current_field_idx = None;
                }
                "Password" => {
                    expanded.password = value.to_string();
                    current_field_idx = None;
                }
                "URL" => {
                    expanded.url = value.to_string();
                    current_field_idx = None;
                }
                "NoteType" => {
                    expanded.fields.push(Field::text(key, value));
                    current_field_idx = None;
                }
                _ => {
                    expanded.fields.push(Field::text(key, value));
                    current_field_idx = Some(expanded.fields.len() - 1);
                }
            }
        } else if let Some(idx) = current_field_idx {
            expanded.fields[idx].value.push('\n');
            expanded.fields[idx].value.push_str(line);
        }

        i += 1;
    }

    if expanded.username.is_empty()
        && expanded.password.is_empty()
        && expanded.url.is_empty()
        && expanded.notes.is_empty()
        && expanded.fields.is_empty()
    {
        expanded.notes = account.notes.clone();
    }

    Some(expanded)
}

/// Collapse an expanded secure note's fields back into flat `notes`
/// text, the inverse of [`notes_expand`].
pub fn notes_collapse(account: &Account) -> Account {
    let mut collapsed = account.clone();
    collapsed.url = SECURE_NOTE_URL.to_string();
    collapsed.username = String::new();
    collapsed.password = String::new();
    collapsed.notes = String::new();
    collapsed.fields = Vec::new();

    let mut lines = Vec::new();

    if let Some(nt) = account.fields.iter().find(|f| f.name == "NoteType") {
        lines.push(format!("{}:{}", nt.name.trim(), nt.value.trim()));
    }
    for f in &account.fields {
        if f.name != "NoteType" {
            lines.push(format!("{}:{}", f.name.trim(), f.value.trim()));
        }
    }
    if !account.username.trim().is_empty() {
        lines.push(format!("Username:{}", account.username.trim()));
    }
    if !account.password.trim().is_empty() {
        lines.push(format!("Password:{}", account.password.trim()));
    }
    if !account.url.trim().is_empty() && account.url != SECURE_NOTE_URL {
        lines.push(format!("URL:{}", account.url.trim()));
    }
    if !account.notes.trim().is_empty() {
        lines.push(format!("Notes:{}", account.notes.trim()));
    }

    collapsed.notes = lines.join("\n");
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Account;

    fn note_account(notes: &str) -> Account {
        let mut a = Account::new("1", "My Server");
        a.url = SECURE_NOTE_URL.to_string();
        a.notes = notes.to_string();
        a
    }

    #[test]
    fn non_secure_note_does_not_expand() {
        let mut a = Account::new("1", "Gmail");
        a.url = "https://gmail.com".into();
        assert!(notes_expand(&a).is_none());
    }

    #[test]
    fn notes_without_note_type_header_do_not_expand() {
        let a = note_account("just some free text");
        assert!(notes_expand(&a).is_none());
    }

    #[test]
    fn s4_server_note_expands_known_fields() {
        let a = note_account("NoteType:Server\nHostname:db1.internal\nUsername:admin\nPassword:hunter2");
        let expanded = notes_expand(&a).unwrap();
        assert_eq!(expanded.username, "admin");
        assert_eq!(expanded.password, "hunter2");
        assert!(expanded.fields.iter().any(|f| f.name == "NoteType" && f.value == "Server"));
        assert!(expanded.fields.iter().any(|f| f.name == "Hostname" && f.value == "db1.internal"));
    }

    #[test]
    fn ssh_key_multiline_field_absorbs_continuation_lines() {
        let a = note_account(
            "NoteType:SSH Key\nPrivate Key:-----BEGIN KEY-----\nabc123\n-----END KEY-----\nHostname:box",
        );
        let expanded = notes_expand(&a).unwrap();
        let private_key = expanded.fields.iter().find(|f| f.name == "Private Key").unwrap();
        assert!(private_key.value.contains("-----BEGIN KEY-----"));
        assert!(private_key.value.contains("abc123"));
        assert!(private_key.value.contains("-----END KEY-----"));
        assert_eq!(expanded.fields.iter().find(|f| f.name == "Hostname").unwrap().value, "box");
    }

    #[test]
    fn notes_section_captures_trailing_free_text() {
        let a = note_account("NoteType:Server\nHostname:db1\nNotes:extra context\nmore lines here");
        let expanded = notes_expand(&a).unwrap();
        assert_eq!(expanded.notes, "extra context\nmore lines here");
    }

    #[test]
    fn expand_collapse_round_trip_preserves_structured_fields() {
        let original = note_account("NoteType:Server\nHostname:db1.internal\nUsername:admin\nPassword:hunter2");
        let expanded = notes_expand(&original).unwrap();
        let collapsed = notes_collapse(&expanded);

        assert_eq!(collapsed.url, SECURE_NOTE_URL);
        assert!(collapsed.notes.starts_with("NoteType:Server"));
        assert!(collapsed.notes.contains("Hostname:db1.internal"));
        assert!(collapsed.notes.contains("Username:admin"));
        assert!(collapsed.notes.contains("Password:hunter2"));

        // Re-expanding the collapsed form reproduces the same logical fields.
        let reexpanded = notes_expand(&collapsed).unwrap();
        assert_eq!(reexpanded.username, expanded.username);
        assert_eq!(reexpanded.password, expanded.password);
        assert_eq!(
            reexpanded.fields.iter().find(|f| f.name == "Hostname").map(|f| &f.value),
            expanded.fields.iter().find(|f| f.name == "Hostname").map(|f| &f.value),
        );
    }

    #[test]
    fn collapse_omits_blank_special_fields() {
        let mut a = Account::new("1", "Blank");
        a.url = SECURE_NOTE_URL.to_string();
        let collapsed = notes_collapse(&a);
        assert_eq!(collapsed.notes, "");
    }
}
