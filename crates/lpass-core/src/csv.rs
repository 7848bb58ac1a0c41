//! CSV import/export (spec §6), using the ecosystem `csv` crate for
//! RFC 4180 quoting rather than hand-rolled string splitting. The
//! recognized header is fixed; any additional column is a custom field
//! (spec §6, supplemented by the original's de-dup-on-import behavior
//! keyed by `(group, name, username)`).

use std::collections::BTreeSet;

use crate::error::{LpError, LpResult};
use crate::model::Account;

const HEADER: &[&str] = &[
    "url", "username", "password", "extra", "name", "grouping", "fav", "id", "attachpresent", "last_touch",
    "last_modified",
];

fn bool_str(b: bool) -> String {
    if b { "1".to_string() } else { "0".to_string() }
}

/// Serialize accounts to CSV text. Custom field columns (union across
/// all accounts, sorted for determinism) are appended after the fixed
/// header.
pub fn export_csv(accounts: &[Account]) -> LpResult<String> {
    let mut custom_names: BTreeSet<String> = BTreeSet::new();
    for account in accounts {
        for field in &account.fields {
            custom_names.insert(field.name.clone());
        }
    }

    let mut header: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
    header.extend(custom_names.iter().cloned());

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(&header).map_err(|e| LpError::Config(format!("csv write: {e}")))?;

    for account in accounts {
        let mut row = vec![
            account.url.clone(),
            account.username.clone(),
            account.password.clone(),
            account.notes.clone(),
            account.name.clone(),
            account.group.clone(),
            bool_str(account.favorite),
            account.id.clone(),
            bool_str(account.attach_present),
            account.last_touch.clone(),
            account.last_modified.clone(),
        ];
        for name in &custom_names {
            row.push(account.get_field(name).map(|f| f.value.clone()).unwrap_or_default());
        }
        writer.write_record(&row).map_err(|e| LpError::Config(format!("csv write: {e}")))?;
    }

    let bytes = writer.into_inner().map_err(|e| LpError::Config(format!("csv flush: {e}")))?;
    String::from_utf8(bytes).map_err(|e| LpError::Config(format!("csv output not UTF-8: {e}")))
}

/// Parse CSV text into accounts ready for `add`/`update`. Rows whose
/// `(group, name, username)` was already seen earlier in the same
/// import are skipped unless `keep_dupes` is set (spec §4.7's
/// `import_csv(blob, keep_dupes)` contract).
pub fn import_csv(blob: &str, keep_dupes: bool) -> LpResult<Vec<Account>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(blob.as_bytes());
    let header: Vec<String> = reader
        .headers()
        .map_err(|e| LpError::Config(format!("csv header: {e}")))?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let col = |name: &str| header.iter().position(|h| h == name);
    let idx_url = col("url");
    let idx_username = col("username");
    let idx_password = col("password");
    let idx_extra = col("extra");
    let idx_name = col("name");
    let idx_grouping = col("grouping");
    let idx_fav = col("fav");
    let idx_id = col("id");
    let custom_cols: Vec<(usize, String)> = header
        .iter()
        .enumerate()
        .filter(|(_, h)| !HEADER.contains(&h.as_str()))
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut seen: std::collections::HashSet<(String, String, String)> = std::collections::HashSet::new();
    let mut accounts = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| LpError::Config(format!("csv row: {e}")))?;
        let get = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").to_string();

        let name = get(idx_name);
        let username = get(idx_username);
        let group = get(idx_grouping);

        let dedup_key = (group.clone(), name.clone(), username.clone());
        if !keep_dupes && !seen.insert(dedup_key) {
            continue;
        }

        let mut account = Account::new(get(idx_id), name);
        account.username = username;
        account.password = get(idx_password);
        account.url = get(idx_url);
        account.notes = get(idx_extra);
        account.group = crate::model::normalize_group_path(&group);
        account.favorite = get(idx_fav) == "1";

        for (i, col_name) in &custom_cols {
            if let Some(value) = record.get(*i) {
                if !value.is_empty() {
                    account.fields.push(crate::model::Field::text(col_name.clone(), value.to_string()));
                }
            }
        }

        accounts.push(account);
    }

    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_then_import_round_trips_standard_fields() {
        let mut a = Account::new("1", "Gmail");
        a.username = "me@example.com".into();
        a.password = "hunter2".into();
        a.url = "https://gmail.com".into();
        a.group = "Work".into();
        a.favorite = true;

        let csv_text = export_csv(&[a]).unwrap();
        assert!(csv_text.starts_with("url,username,password,extra,name,grouping,fav,id,attachpresent"));

        let back = import_csv(&csv_text, false).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].name, "Gmail");
        assert_eq!(back[0].username, "me@example.com");
        assert_eq!(back[0].group, "Work");
        assert!(back[0].favorite);
    }

    #[test]
    fn export_includes_custom_field_columns() {
        let mut a = Account::new("1", "Server");
        a.fields.push(crate::model::Field::text("Hostname", "db1"));
        let csv_text = export_csv(&[a]).unwrap();
        assert!(csv_text.lines().next().unwrap().ends_with("Hostname"));
        assert!(csv_text.lines().nth(1).unwrap().ends_with("db1"));
    }

    #[test]
    fn import_deduplicates_by_group_name_username_unless_keep_dupes() {
        let csv_text = "url,username,password,extra,name,grouping,fav,id,attachpresent,last_touch,last_modified\n\
            ,alice,,,Gmail,Work,0,,0,,\n\
            ,alice,,,Gmail,Work,0,,0,,\n";

        let deduped = import_csv(csv_text, false).unwrap();
        assert_eq!(deduped.len(), 1);

        let kept = import_csv(csv_text, true).unwrap();
        assert_eq!(kept.len(), 2);
    }
}
