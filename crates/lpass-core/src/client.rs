//! C7: the vault client façade (spec §4.7). Owns the in-memory account
//! and share lists, routes reads and writes to the correct key (vault
//! or per-share), and decides between a direct server call and a queued
//! one when the façade mutates state.

use std::collections::BTreeMap;
use std::rc::Rc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rand::RngCore;
use regex::Regex;
use secrecy::ExposeSecret;

use crate::blob::{self, ParsedVault};
use crate::cipher::{self, KEY_LEN};
use crate::config::Environment;
use crate::error::{LpError, LpResult};
use crate::model::{Account, Field, Share};
use crate::queue::{self, Operation};
use crate::session::{self, FeatureFlags, Session};
use crate::transport::{endpoints, Transport};

/// Only the fields a caller actually sets are re-encrypted and sent;
/// everything else is left untouched server-side (spec §4.7 `update`).
#[derive(Default, Clone)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub group: Option<String>,
    pub favorite: Option<bool>,
    pub pwprotect: Option<bool>,
    pub is_app: Option<bool>,
    pub custom_fields: Option<Vec<Field>>,
}

pub struct VaultClient {
    env: Environment,
    transport: Box<dyn Transport>,
    session: Option<Session>,
    vault_key: Option<[u8; KEY_LEN]>,
    flags: FeatureFlags,
    accounts: Vec<Account>,
    shares: Vec<Rc<Share>>,
    loaded: bool,
}

impl VaultClient {
    pub fn new(env: Environment, transport: Box<dyn Transport>) -> Self {
        VaultClient {
            env,
            transport,
            session: None,
            vault_key: None,
            flags: FeatureFlags::default(),
            accounts: Vec::new(),
            shares: Vec::new(),
            loaded: false,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some() && self.vault_key.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.username.as_str())
    }

    /// Full login handshake (spec §4.6), then persist so a later process
    /// can [`resume_with_key`] without re-prompting for a password.
    pub fn login(&mut self, username: &str, password: &str, otp: Option<&str>, trust: bool) -> LpResult<()> {
        let (session, vault_key, flags) = session::login(self.transport.as_ref(), username, password, otp, trust)?;
        session::persist(&self.env, &vault_key, &session)?;
        self.session = Some(session);
        self.vault_key = Some(vault_key);
        self.flags = flags;
        self.loaded = false;
        Ok(())
    }

    /// Resume a previously persisted session with a candidate vault key
    /// (e.g. one handed back by the local agent). `Ok(false)` means the
    /// key was wrong or nothing was persisted, not an error.
    pub fn resume_with_key(&mut self, candidate_key: &[u8; KEY_LEN]) -> LpResult<bool> {
        match session::resume(&self.env, candidate_key)? {
            Some(session) => {
                self.session = Some(session);
                self.vault_key = Some(*candidate_key);
                self.loaded = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn logout(&mut self, force: bool) -> LpResult<()> {
        let session = self.session.as_ref().ok_or(LpError::InvalidSession)?;
        session::logout(&self.env, self.transport.as_ref(), session, force)?;
        self.session = None;
        self.vault_key = None;
        self.accounts.clear();
        self.shares.clear();
        self.loaded = false;
        Ok(())
    }

    /// Fetch and decode the vault blob (spec §4.7 `sync`). A no-op when
    /// already loaded unless `force` is set.
    pub fn sync(&mut self, force: bool) -> LpResult<()> {
        if self.loaded && !force {
            return Ok(());
        }
        let session = self.session.as_ref().ok_or(LpError::InvalidSession)?;
        let vault_key = self.vault_key.ok_or(LpError::InvalidSession)?;

        let resp = self.transport.post(
            endpoints::GET_ACCTS,
            &[("mobile", "1"), ("b64", "1"), ("hash", "0.0"), ("sessionid", &session.session_id)],
        )?;
        if !resp.is_success() {
            return Err(LpError::network(Some(resp.status), "getaccts.php failed"));
        }

        let raw = B64
            .decode(&resp.body)
            .map_err(|e| LpError::blob(format!("vault blob is not valid base64: {e}")))?;
        let private_key_pem = session.private_key_pem.as_ref().map(|s| s.expose_secret().as_str());
        let parsed: ParsedVault = blob::parse(&raw, &vault_key, private_key_pem, &self.flags)?;

        self.accounts = parsed.accounts;
        self.shares = parsed.shares;
        self.loaded = true;
        Ok(())
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn shares(&self) -> &[Rc<Share>] {
        &self.shares
    }

    /// Zero matches: `Ok(None)`. Exactly one: `Ok(Some(_))`. Two or
    /// more: `Err(NotFound{matches})` (spec §8 property 7).
    pub fn find(&self, query: &str) -> LpResult<Option<&Account>> {
        match self.locate(query) {
            Ok(idx) => Ok(Some(&self.accounts[idx])),
            Err(LpError::NotFound { matches, .. }) if matches.is_empty() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All substring matches; an exact id match short-circuits to a
    /// singleton (spec §4.7 `search`).
    pub fn search(&self, query: &str, group: Option<&str>) -> Vec<&Account> {
        if let Some(a) = self.accounts.iter().find(|a| a.id == query) {
            return vec![a];
        }
        let q = query.to_lowercase();
        self.accounts
            .iter()
            .filter(|a| group.map_or(true, |g| a.group.eq_ignore_ascii_case(g)))
            .filter(|a| Self::matches_substring(a, &q))
            .collect()
    }

    /// Case-insensitive regex across `fields`, defaulting to name, id,
    /// fullname (spec §4.7 `search_regex`).
    pub fn search_regex(&self, pattern: &str, fields: Option<&[&str]>) -> LpResult<Vec<&Account>> {
        let re = Regex::new(&format!("(?i){pattern}")).map_err(|e| LpError::Config(format!("invalid pattern: {e}")))?;
        let fields = fields.unwrap_or(&["name", "id", "fullname"]);
        Ok(self
            .accounts
            .iter()
            .filter(|a| {
                fields.iter().any(|f| {
                    let value = match *f {
                        "name" => a.name.as_str().to_string(),
                        "id" => a.id.clone(),
                        "fullname" => a.fullname(),
                        "username" => a.username.clone(),
                        "url" => a.url.clone(),
                        "notes" => a.notes.clone(),
                        _ => String::new(),
                    };
                    re.is_match(&value)
                })
            })
            .collect())
    }

    fn matches_substring(a: &Account, q: &str) -> bool {
        a.name.to_lowercase().contains(q)
            || a.fullname().to_lowercase().contains(q)
            || a.username.to_lowercase().contains(q)
            || a.url.to_lowercase().contains(q)
    }

    fn locate(&self, query: &str) -> LpResult<usize> {
        if let Some(pos) = self.accounts.iter().position(|a| a.id == query) {
            return Ok(pos);
        }
        let q = query.to_lowercase();
        let matches: Vec<usize> =
            self.accounts.iter().enumerate().filter(|(_, a)| Self::matches_substring(a, &q)).map(|(i, _)| i).collect();
        match matches.len() {
            0 => Err(LpError::not_found(format!("no account matches '{query}'"))),
            1 => Ok(matches[0]),
            _ => Err(LpError::ambiguous(query, matches.iter().map(|&i| self.accounts[i].fullname()).collect())),
        }
    }

    fn account_key(&self, idx: usize) -> LpResult<[u8; KEY_LEN]> {
        match &self.accounts[idx].share {
            Some(share) => Ok(share.key),
            None => self.vault_key.ok_or(LpError::InvalidSession),
        }
    }

    fn share_by_id(&self, share_id: &str) -> LpResult<Rc<Share>> {
        self.shares
            .iter()
            .find(|s| s.id == share_id)
            .cloned()
            .ok_or_else(|| LpError::not_found(format!("no share '{share_id}'")))
    }

    /// Create a new account (spec §4.7 `add`). Returns the server-issued
    /// id, or an empty string when the call was queued for later
    /// delivery (spec §3's "id is empty only for newly created accounts
    /// awaiting server acknowledgement").
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        name: &str,
        username: &str,
        password: &str,
        url: &str,
        notes: &str,
        group: &str,
        custom_fields: Vec<Field>,
        is_app: bool,
        share_id: Option<&str>,
    ) -> LpResult<String> {
        let share = share_id.map(|id| self.share_by_id(id)).transpose()?;
        let key = match &share {
            Some(s) => s.key,
            None => self.vault_key.ok_or(LpError::InvalidSession)?,
        };

        let mut account = Account::new(String::new(), name);
        account.username = username.to_string();
        account.password = password.to_string();
        account.url = url.to_string();
        account.notes = notes.to_string();
        account.group = crate::model::normalize_group_path(group);
        account.is_app = is_app;
        account.fields = custom_fields;
        account.share = share;

        let mut fields = encode_full_account(&account, &key);
        fields.insert("extjs".to_string(), "1".to_string());

        let op = Operation::AddAccount { fields };
        let id = self.dispatch_for_id(op)?;
        account.id = id.clone();
        self.accounts.push(account);
        Ok(id)
    }

    /// Only the supplied fields are re-encrypted and sent (spec §4.7
    /// `update`).
    pub fn update(&mut self, query: &str, partial: AccountUpdate) -> LpResult<()> {
        let idx = self.locate(query)?;
        let key = self.account_key(idx)?;
        let mut fields = BTreeMap::new();

        {
            let account = &mut self.accounts[idx];
            if let Some(v) = partial.name {
                fields.insert("name".to_string(), cipher::encrypt_base64(&v, &key));
                account.name = v;
            }
            if let Some(v) = partial.username {
                fields.insert("username".to_string(), cipher::encrypt_base64(&v, &key));
                account.username = v;
            }
            if let Some(v) = partial.password {
                fields.insert("password".to_string(), cipher::encrypt_base64(&v, &key));
                account.password = v;
            }
            if let Some(v) = partial.url {
                fields.insert("url".to_string(), encode_url(&v, &key));
                account.url = v;
            }
            if let Some(v) = partial.notes {
                fields.insert("extra".to_string(), cipher::encrypt_base64(&v, &key));
                account.notes = v;
            }
            if let Some(v) = partial.group {
                let normalized = crate::model::normalize_group_path(&v);
                fields.insert("grouping".to_string(), cipher::encrypt_base64(&normalized, &key));
                account.group = normalized;
            }
            if let Some(v) = partial.favorite {
                fields.insert("fav".to_string(), bool_str(v));
                account.favorite = v;
            }
            if let Some(v) = partial.pwprotect {
                fields.insert("pwprotect".to_string(), bool_str(v));
                account.pwprotect = v;
            }
            if let Some(v) = partial.is_app {
                account.is_app = v;
            }
            if let Some(v) = partial.custom_fields {
                account.fields = v;
            }
        }

        let account_id = self.accounts[idx].id.clone();
        self.dispatch(Operation::UpdateAccount { account_id, fields })
    }

    pub fn delete(&mut self, query: &str) -> LpResult<()> {
        let idx = self.locate(query)?;
        let account_id = self.accounts[idx].id.clone();
        self.dispatch(Operation::DeleteAccount { account_id })?;
        self.accounts.remove(idx);
        Ok(())
    }

    /// Copy an account under a new name, default `"Copy of <orig>"`
    /// (spec §4.7 `duplicate`).
    pub fn duplicate(&mut self, query: &str, new_name: Option<&str>) -> LpResult<String> {
        let idx = self.locate(query)?;
        let source = self.accounts[idx].clone();
        let name = new_name.map(str::to_string).unwrap_or_else(|| format!("Copy of {}", source.name));
        let share_id = source.share.as_ref().map(|s| s.id.clone());
        self.add(
            &name,
            &source.username,
            &source.password,
            &source.url,
            &source.notes,
            &source.group,
            source.fields.clone(),
            source.is_app,
            share_id.as_deref(),
        )
    }

    /// `move(query, new_group)` is `update(query, group=new_group)`
    /// (spec §4.7).
    pub fn move_account(&mut self, query: &str, new_group: &str) -> LpResult<()> {
        self.update(query, AccountUpdate { group: Some(new_group.to_string()), ..Default::default() })
    }

    /// Fetch, base64-decode and decrypt an attachment body with the
    /// attachment's own storage key (spec §4.7 `get_attachment`).
    pub fn get_attachment(&self, query: &str, attach_id: &str) -> LpResult<Vec<u8>> {
        let idx = self.locate(query)?;
        let account = &self.accounts[idx];
        let attachment = account
            .attachments
            .iter()
            .find(|a| a.id == attach_id)
            .ok_or_else(|| LpError::not_found(format!("no attachment '{attach_id}' on '{query}'")))?;

        let resp = self.transport.post(endpoints::GET_ATTACH, &[("getattach", attach_id), ("aid", &account.id)])?;
        if !resp.is_success() {
            return Err(LpError::network(Some(resp.status), "getattach.php failed"));
        }

        let storage_key = parse_symmetric_key_hex(&attachment.storage_key)?;
        cipher::decrypt_base64(&resp.body, &storage_key)
    }

    /// Encrypt and upload attachment data under a freshly generated
    /// per-attachment key, scoped to the account's current key (spec
    /// §4.7 `upload_attachment`).
    pub fn upload_attachment(&mut self, query: &str, filename: &str, mimetype: &str, data: &[u8]) -> LpResult<()> {
        let idx = self.locate(query)?;
        let account_key = self.account_key(idx)?;

        let mut storage_key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut storage_key);
        let encrypted_body = B64.encode(cipher::encrypt(data, &storage_key));

        let mut fields = BTreeMap::new();
        fields.insert("filename".to_string(), cipher::encrypt_base64(filename, &account_key));
        fields.insert("mimetype".to_string(), mimetype.to_string());
        fields.insert("data".to_string(), encrypted_body);
        fields.insert("storage_key".to_string(), hex::encode(storage_key));

        let account_id = self.accounts[idx].id.clone();
        self.dispatch(Operation::UploadAttachment { account_id, fields })
    }

    /// Create a shared folder with a fresh symmetric key (spec §4.7
    /// share `create`).
    pub fn create_share(&mut self, name: &str) -> LpResult<String> {
        let mut share_key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut share_key);
        let name_enc = cipher::encrypt_base64(name, &share_key);

        let mut fields = BTreeMap::new();
        fields.insert("sharename".to_string(), name_enc);
        let id = self.dispatch_for_id(Operation::ShareMutation {
            share_id: String::new(),
            action: "create".to_string(),
            fields,
        })?;

        self.shares.push(Rc::new(Share { id: id.clone(), name: name.to_string(), key: share_key, readonly: false }));
        Ok(id)
    }

    pub fn delete_share(&mut self, share_id: &str) -> LpResult<()> {
        self.dispatch(Operation::ShareMutation {
            share_id: share_id.to_string(),
            action: "delete".to_string(),
            fields: BTreeMap::new(),
        })?;
        self.shares.retain(|s| s.id != share_id);
        Ok(())
    }

    pub fn list_shares(&self) -> &[Rc<Share>] {
        &self.shares
    }

    /// Invite a member by RSA-encrypting the share's symmetric key under
    /// their public key (spec §4.7 share `add-user`).
    pub fn add_share_user(
        &mut self,
        share_id: &str,
        username: &str,
        public_key_pem: &str,
        readonly: bool,
        admin: bool,
        hide_passwords: bool,
    ) -> LpResult<()> {
        let share = self.share_by_id(share_id)?;
        let wrapped = cipher::rsa_encrypt_for_public_key(&share.key, public_key_pem)?;

        let mut fields = BTreeMap::new();
        fields.insert("username".to_string(), username.to_string());
        fields.insert("sharekey".to_string(), hex::encode(wrapped));
        fields.insert("readonly".to_string(), bool_str(readonly));
        fields.insert("give_admin".to_string(), bool_str(admin));
        fields.insert("hidden_passwords".to_string(), bool_str(hide_passwords));

        self.dispatch(Operation::ShareMutation { share_id: share_id.to_string(), action: "add_user".to_string(), fields })
    }

    pub fn remove_share_user(&mut self, share_id: &str, username: &str) -> LpResult<()> {
        let mut fields = BTreeMap::new();
        fields.insert("username".to_string(), username.to_string());
        self.dispatch(Operation::ShareMutation { share_id: share_id.to_string(), action: "remove_user".to_string(), fields })
    }

    pub fn update_share_user(
        &mut self,
        share_id: &str,
        username: &str,
        readonly: bool,
        admin: bool,
        hide_passwords: bool,
    ) -> LpResult<()> {
        let mut fields = BTreeMap::new();
        fields.insert("username".to_string(), username.to_string());
        fields.insert("readonly".to_string(), bool_str(readonly));
        fields.insert("give_admin".to_string(), bool_str(admin));
        fields.insert("hidden_passwords".to_string(), bool_str(hide_passwords));
        self.dispatch(Operation::ShareMutation { share_id: share_id.to_string(), action: "update_user".to_string(), fields })
    }

    pub fn export_csv(&self) -> LpResult<String> {
        crate::csv::export_csv(&self.accounts)
    }

    /// Import accounts from CSV text, skipping duplicates by
    /// `(group, name, username)` unless `keep_dupes` (spec §4.7
    /// `import_csv`). Returns each new account's id in input order.
    pub fn import_csv(&mut self, blob: &str, keep_dupes: bool) -> LpResult<Vec<String>> {
        let parsed = crate::csv::import_csv(blob, keep_dupes)?;
        let mut ids = Vec::with_capacity(parsed.len());
        for account in parsed {
            let id = self.add(
                &account.name,
                &account.username,
                &account.password,
                &account.url,
                &account.notes,
                &account.group,
                account.fields,
                account.is_app,
                None,
            )?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Attempt the call directly; on any failure (network error or a
    /// non-success status) fall back to the durable queue so the
    /// mutation is retried later (spec §4.7's write path).
    fn dispatch(&self, op: Operation) -> LpResult<()> {
        self.dispatch_for_id(op).map(|_| ())
    }

    /// Like [`Self::dispatch`] but extracts a server-issued id (for
    /// `add`/`create_share`) from the response's `aid`/`id` attribute
    /// when the call is delivered directly. Returns an empty string
    /// when the mutation was queued instead.
    fn dispatch_for_id(&self, op: Operation) -> LpResult<String> {
        let params = op.params();
        let param_refs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        match self.transport.post(op.endpoint(), &param_refs) {
            Ok(resp) if resp.is_success() => {
                let body = String::from_utf8_lossy(&resp.body);
                Ok(session::extract_attr(&body, "aid").or_else(|| session::extract_attr(&body, "id")).unwrap_or_default())
            }
            _ => {
                let key = self.vault_key.ok_or(LpError::InvalidSession)?;
                queue::enqueue(&self.env, &key, op)?;
                Ok(String::new())
            }
        }
    }
}

fn bool_str(v: bool) -> String {
    if v { "1".to_string() } else { "0".to_string() }
}

fn encode_url(url: &str, key: &[u8; KEY_LEN]) -> String {
    if url.is_empty() {
        String::new()
    } else {
        hex::encode(cipher::encrypt(url.as_bytes(), key))
    }
}

fn encode_full_account(account: &Account, key: &[u8; KEY_LEN]) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), cipher::encrypt_base64(&account.name, key));
    fields.insert("username".to_string(), cipher::encrypt_base64(&account.username, key));
    fields.insert("password".to_string(), cipher::encrypt_base64(&account.password, key));
    fields.insert("url".to_string(), encode_url(&account.url, key));
    fields.insert("extra".to_string(), cipher::encrypt_base64(&account.notes, key));
    fields.insert("grouping".to_string(), cipher::encrypt_base64(&account.group, key));
    fields.insert("fav".to_string(), bool_str(account.favorite));
    fields.insert("pwprotect".to_string(), bool_str(account.pwprotect));
    fields
}

fn parse_symmetric_key_hex(hex_str: &str) -> LpResult<[u8; KEY_LEN]> {
    let raw = hex::decode(hex_str).map_err(|e| LpError::decryption(format!("invalid attachment key hex: {e}")))?;
    raw.try_into().map_err(|_| LpError::decryption(format!("attachment key must be {KEY_LEN} bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::ScriptedTransport;
    use crate::transport::TransportResponse;

    fn key_of(b: u8) -> [u8; KEY_LEN] {
        [b; KEY_LEN]
    }

    fn client_with(transport: ScriptedTransport) -> VaultClient {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::for_test(dir.path());
        let mut client = VaultClient::new(env, Box::new(transport));
        client.vault_key = Some(key_of(1));
        client.session = Some(Session {
            uid: "7".into(),
            session_id: "sess".into(),
            token: "tok".into(),
            username: "user@example.com".into(),
            iterations: 1,
            private_key_pem: None,
        });
        client
    }

    fn seed_accounts(client: &mut VaultClient) {
        client.accounts.push(Account::new("1", "Gmail"));
        let mut work_gmail = Account::new("2", "Gmail");
        work_gmail.group = "Work".into();
        client.accounts.push(work_gmail);
        client.loaded = true;
    }

    #[test]
    fn s5_find_disambiguates_gmail_vs_work_gmail() {
        let mut client = client_with(ScriptedTransport::new(vec![]));
        seed_accounts(&mut client);

        let err = client.find("gmail").unwrap_err();
        match err {
            LpError::NotFound { matches, .. } => {
                assert_eq!(matches.len(), 2);
                assert!(matches.contains(&"Gmail".to_string()));
                assert!(matches.contains(&"Work/Gmail".to_string()));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }

        let found = client.find("Work/Gmail").unwrap().unwrap();
        assert_eq!(found.id, "2");
    }

    #[test]
    fn find_returns_none_for_zero_matches() {
        let mut client = client_with(ScriptedTransport::new(vec![]));
        seed_accounts(&mut client);
        assert!(client.find("no such account").unwrap().is_none());
    }

    #[test]
    fn find_exact_id_bypasses_substring_matching() {
        let mut client = client_with(ScriptedTransport::new(vec![]));
        seed_accounts(&mut client);
        let found = client.find("1").unwrap().unwrap();
        assert_eq!(found.name, "Gmail");
    }

    #[test]
    fn add_uses_direct_call_and_captures_server_id() {
        let transport = ScriptedTransport::new(vec![TransportResponse {
            status: 200,
            body: br#"<xmlresponse><result aid="99" /></xmlresponse>"#.to_vec(),
        }]);
        let mut client = client_with(transport);
        client.loaded = true;

        let id = client.add("New", "u", "p", "https://example.com", "", "", vec![], false, None).unwrap();
        assert_eq!(id, "99");
        assert_eq!(client.accounts().len(), 1);
        assert_eq!(client.accounts()[0].id, "99");
    }

    #[test]
    fn add_falls_back_to_queue_when_transport_fails() {
        let transport = ScriptedTransport::new(vec![TransportResponse { status: 500, body: Vec::new() }]);
        let mut client = client_with(transport);
        client.loaded = true;

        let id = client.add("New", "u", "p", "", "", "", vec![], false, None).unwrap();
        assert_eq!(id, "");
        assert!(client.accounts()[0].is_pending());
    }

    #[test]
    fn update_only_re_encrypts_supplied_fields() {
        let transport = ScriptedTransport::new(vec![TransportResponse { status: 200, body: Vec::new() }]);
        let mut client = client_with(transport);
        seed_accounts(&mut client);

        client
            .update("1", AccountUpdate { password: Some("newpass".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(client.accounts()[0].password, "newpass");
        assert_eq!(client.accounts()[0].name, "Gmail");
    }

    #[test]
    fn move_account_updates_group_only() {
        let transport = ScriptedTransport::new(vec![TransportResponse { status: 200, body: Vec::new() }]);
        let mut client = client_with(transport);
        seed_accounts(&mut client);

        client.move_account("1", "Personal").unwrap();
        assert_eq!(client.accounts()[0].group, "Personal");
    }

    #[test]
    fn delete_removes_matched_account_locally() {
        let transport = ScriptedTransport::new(vec![TransportResponse { status: 200, body: Vec::new() }]);
        let mut client = client_with(transport);
        seed_accounts(&mut client);

        client.delete("1").unwrap();
        assert_eq!(client.accounts().len(), 1);
        assert_eq!(client.accounts()[0].id, "2");
    }

    #[test]
    fn duplicate_defaults_name_to_copy_of_original() {
        let transport = ScriptedTransport::new(vec![TransportResponse {
            status: 200,
            body: br#"<xmlresponse><result aid="3" /></xmlresponse>"#.to_vec(),
        }]);
        let mut client = client_with(transport);
        seed_accounts(&mut client);

        client.duplicate("1", None).unwrap();
        assert_eq!(client.accounts()[2].name, "Copy of Gmail");
    }

    #[test]
    fn get_attachment_decrypts_fetched_body_with_storage_key() {
        let storage_key = key_of(5);
        let body = cipher::encrypt(b"attachment bytes", &storage_key);

        let transport = ScriptedTransport::new(vec![TransportResponse { status: 200, body }]);
        let mut client = client_with(transport);
        let mut account = Account::new("1", "Server");
        account.attachments.push(crate::model::Attachment {
            id: "a1".into(),
            parent_account_id: "1".into(),
            mimetype: "text/plain".into(),
            filename: "notes.txt".into(),
            size: "16".into(),
            storage_key: hex::encode(storage_key),
        });
        client.accounts.push(account);
        client.loaded = true;

        let data = client.get_attachment("1", "a1").unwrap();
        assert_eq!(data, b"attachment bytes");
    }

    #[test]
    fn add_share_user_rsa_wraps_the_share_key() {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

        let private_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 512).unwrap();
        let public_pem = private_key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let _private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();

        let transport = ScriptedTransport::new(vec![TransportResponse { status: 200, body: Vec::new() }]);
        let mut client = client_with(transport);
        client.shares.push(Rc::new(Share { id: "s1".into(), name: "Family".into(), key: key_of(9), readonly: false }));

        client.add_share_user("s1", "friend@example.com", &public_pem, true, false, false).unwrap();
    }

    #[test]
    fn export_then_import_csv_round_trips() {
        let transport = ScriptedTransport::new(vec![
            TransportResponse {
                status: 200,
                body: br#"<xmlresponse><result aid="10" /></xmlresponse>"#.to_vec(),
            },
        ]);
        let mut client = client_with(transport);
        seed_accounts(&mut client);

        let csv_text = client.export_csv().unwrap();
        assert!(csv_text.contains("Gmail"));

        let imported = client.import_csv("url,username,password,extra,name,grouping,fav,id,attachpresent,last_touch,last_modified\n,bob,,,Imported,,0,,0,,\n", false).unwrap();
        assert_eq!(imported, vec!["10".to_string()]);
        assert!(client.accounts().iter().any(|a| a.name == "Imported"));
    }
}
