//! C3: the vault blob codec (spec §4.3).
//!
//! The blob is a flat concatenation of chunks: `tag(4) || len(4, BE) ||
//! payload(len)`. Chunks are processed in order and are stateful — a
//! `SHAR` chunk opens a share context that subsequent `ACCT`/`ACFL`/
//! `ATTA` chunks are decrypted under, until the next `SHAR` or blob end.
//!
//! Sub-stream fields inside a chunk's payload are themselves
//! length-prefixed (`u32_be len || bytes`) and positional — there is no
//! key, so unknown trailing fields must be tolerated. The concrete field
//! order below is this codec's own wire format (spec §4.3 describes the
//! *meaning* of each chunk generically; the exact positional layout is
//! an implementation decision, recorded in DESIGN.md) and is used
//! symmetrically by [`parse`] and [`emit`].

use std::rc::Rc;

use rand::RngCore;

use crate::cipher::{self, KEY_LEN};
use crate::error::{warn_skipped_record, LpError, LpResult};
use crate::model::{Account, Attachment, Field, FieldType, Share};
use crate::session::FeatureFlags;

pub struct ParsedVault {
    pub version: Option<String>,
    pub accounts: Vec<Account>,
    pub shares: Vec<Rc<Share>>,
}

const TAG_LPAV: [u8; 4] = *b"LPAV";
const TAG_SHAR: [u8; 4] = *b"SHAR";
const TAG_ACCT: [u8; 4] = *b"ACCT";
const TAG_ACFL: [u8; 4] = *b"ACFL";
const TAG_ACOF: [u8; 4] = *b"ACOF";
const TAG_ATTA: [u8; 4] = *b"ATTA";
const TAG_LOCA: [u8; 4] = *b"LOCA";
const TAG_NMAC: [u8; 4] = *b"NMAC";

// ---------------------------------------------------------------------
// Chunk-level reader/writer
// ---------------------------------------------------------------------

struct ChunkReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        ChunkReader { data, pos: 0 }
    }

    fn next_chunk(&mut self) -> LpResult<Option<([u8; 4], &'a [u8])>> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.data.len() - self.pos < 8 {
            return Err(LpError::blob("truncated chunk header"));
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        let len = u32::from_be_bytes(self.data[self.pos + 4..self.pos + 8].try_into().unwrap());
        let len = len as usize;
        let start = self.pos + 8;
        let end = start
            .checked_add(len)
            .ok_or_else(|| LpError::blob("chunk length overflow"))?;
        if end > self.data.len() {
            return Err(LpError::blob("chunk payload runs past end of blob"));
        }
        self.pos = end;
        Ok(Some((tag, &self.data[start..end])))
    }
}

fn write_chunk(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

// ---------------------------------------------------------------------
// Sub-stream field reader/writer
// ---------------------------------------------------------------------

struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        FieldReader { data, pos: 0 }
    }

    /// Next field, or an empty slice once the sub-stream is exhausted —
    /// callers tolerate a short record by treating a missing trailing
    /// field as empty (spec §4.3: "unknown trailing fields must be
    /// tolerated").
    fn next(&mut self) -> &'a [u8] {
        if self.data.len() - self.pos < 4 {
            return &[];
        }
        let len = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap()) as usize;
        let start = self.pos + 4;
        let end = start.saturating_add(len).min(self.data.len());
        self.pos = end;
        &self.data[start..end]
    }
}

fn write_field(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

fn write_field_str(out: &mut Vec<u8>, value: &str) {
    write_field(out, value.as_bytes())
}

fn bool_field(raw: &[u8]) -> bool {
    raw == b"1"
}

fn write_bool_field(out: &mut Vec<u8>, v: bool) {
    write_field_str(out, if v { "1" } else { "0" })
}

// ---------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------

/// Parse a vault blob, decrypting every account field with the vault key
/// or, inside a share context, with the share's own key. A single
/// undecryptable account is skipped with a logged warning (spec §4.3's
/// error policy); a malformed chunk header aborts the whole parse.
pub fn parse(
    data: &[u8],
    vault_key: &[u8; KEY_LEN],
    private_key_pem: Option<&str>,
    flags: &FeatureFlags,
) -> LpResult<ParsedVault> {
    let mut reader = ChunkReader::new(data);
    let mut version = None;
    let mut accounts = Vec::new();
    let mut shares: Vec<Rc<Share>> = Vec::new();
    let mut current_share: Option<Rc<Share>> = None;

    while let Some((tag, payload)) = reader.next_chunk()? {
        match tag {
            TAG_LPAV => {
                version = Some(String::from_utf8_lossy(payload).into_owned());
            }
            TAG_SHAR => {
                let share = parse_share(payload, vault_key, private_key_pem);
                match share {
                    Ok(share) => {
                        let share = Rc::new(share);
                        shares.push(share.clone());
                        current_share = Some(share);
                    }
                    Err(e) => {
                        warn_skipped_record("SHAR", &e);
                        current_share = None;
                    }
                }
            }
            TAG_ACCT => {
                let key = active_key(vault_key, current_share.as_deref());
                match parse_account(payload, key, current_share.clone(), flags) {
                    Ok(account) => accounts.push(account),
                    Err(e) => warn_skipped_record("ACCT", &e),
                }
            }
            TAG_ACFL | TAG_ACOF => {
                let key = active_key(vault_key, current_share.as_deref());
                match parse_custom_field(payload, key) {
                    Ok(field) => {
                        if let Some(acct) = accounts.last_mut() {
                            acct.fields.push(field);
                        }
                    }
                    Err(e) => warn_skipped_record("ACFL", &e),
                }
            }
            TAG_ATTA => {
                let key = active_key(vault_key, current_share.as_deref());
                match parse_attachment(payload, key) {
                    Ok(attachment) => {
                        if let Some(acct) = accounts.last_mut() {
                            acct.attachments.push(attachment);
                        }
                    }
                    Err(e) => warn_skipped_record("ATTA", &e),
                }
            }
            TAG_LOCA | TAG_NMAC => {
                // Ignored: LOCA is a local-only marker, NMAC is an
                // account-count hint with no bearing on parsing.
            }
            other => {
                tracing::debug!(tag = ?String::from_utf8_lossy(&other), "ignoring unrecognized chunk tag");
            }
        }
    }

    Ok(ParsedVault { version, accounts, shares })
}

fn active_key<'a>(vault_key: &'a [u8; KEY_LEN], share: Option<&'a Share>) -> &'a [u8; KEY_LEN] {
    match share {
        Some(s) => &s.key,
        None => vault_key,
    }
}

fn parse_share(payload: &[u8], vault_key: &[u8; KEY_LEN], private_key_pem: Option<&str>) -> LpResult<Share> {
    let mut r = FieldReader::new(payload);
    let id = String::from_utf8_lossy(r.next()).into_owned();
    let name_enc = r.next();
    let sharekey_hex = r.next();
    let sharekey_aes = r.next();
    let readonly = bool_field(r.next());

    let share_key = if !sharekey_aes.is_empty() {
        let raw = cipher::decrypt(sharekey_aes, vault_key)?;
        bytes_to_share_key(&raw)?
    } else if !sharekey_hex.is_empty() {
        let private_key_pem = private_key_pem
            .ok_or_else(|| LpError::decryption("share uses RSA-wrapped key but no private key is available"))?;
        let rsa_ct = hex::decode(sharekey_hex).map_err(|e| LpError::decryption(format!("invalid sharekey hex: {e}")))?;
        let plain = cipher::rsa_decrypt(&rsa_ct, private_key_pem)?;
        let hex_str = String::from_utf8(plain).map_err(|e| LpError::decryption(format!("RSA-decrypted share key is not UTF-8: {e}")))?;
        let raw = hex::decode(hex_str.trim()).map_err(|e| LpError::decryption(format!("invalid decrypted sharekey hex: {e}")))?;
        bytes_to_share_key(&raw)?
    } else {
        return Err(LpError::decryption("SHAR chunk carries neither sharekey nor sharekey_aes"));
    };

    let name = cipher::decrypt(name_enc, &share_key)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();

    Ok(Share { id, name, key: share_key, readonly })
}

fn bytes_to_share_key(raw: &[u8]) -> LpResult<[u8; KEY_LEN]> {
    raw.try_into()
        .map_err(|_| LpError::decryption(format!("share key must be {KEY_LEN} bytes, got {}", raw.len())))
}

fn parse_account(
    payload: &[u8],
    key: &[u8; KEY_LEN],
    share: Option<Rc<Share>>,
    flags: &FeatureFlags,
) -> LpResult<Account> {
    let mut r = FieldReader::new(payload);
    let id = String::from_utf8_lossy(r.next()).into_owned();
    let name = decrypt_to_string(r.next(), key)?;
    let group_raw = decrypt_to_string(r.next(), key)?;
    let url = parse_url_field(r.next(), key, flags)?;
    let notes = decrypt_to_string(r.next(), key)?;
    let favorite = bool_field(r.next());
    let username = decrypt_to_string(r.next(), key)?;
    let password = decrypt_to_string(r.next(), key)?;
    let pwprotect = bool_field(r.next());
    let _is_shared = bool_field(r.next());
    let attach_present = bool_field(r.next());
    let attachkey_raw = r.next();
    let attachkey = if attachkey_raw.is_empty() {
        String::new()
    } else {
        let hex_decoded = hex::decode(attachkey_raw).map_err(|e| LpError::decryption(format!("invalid attachkey hex: {e}")))?;
        decrypt_to_string(&hex_decoded, key)?
    };
    let last_touch = String::from_utf8_lossy(r.next()).into_owned();
    let last_modified = String::from_utf8_lossy(r.next()).into_owned();

    Ok(Account {
        id,
        name,
        username,
        password,
        url,
        group: crate::model::normalize_group_path(&group_raw),
        notes,
        last_touch,
        last_modified,
        pwprotect,
        favorite,
        is_app: false,
        attach_present,
        attachkey,
        fields: Vec::new(),
        attachments: Vec::new(),
        share,
    })
}

/// URL fields are hex-encoded *before* any encryption framing
/// consideration; historically URLs were not encrypted at all. Sniff the
/// hex-decoded bytes for the CBC `!` prefix (spec §4.3, and the Open
/// Question in spec §9 about this behavior).
fn parse_url_field(raw: &[u8], key: &[u8; KEY_LEN], flags: &FeatureFlags) -> LpResult<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    let decoded = hex::decode(raw).map_err(|e| LpError::decryption(format!("invalid url hex: {e}")))?;
    if flags.url_encryption && decoded.first() == Some(&b'!') {
        decrypt_to_string(&decoded, key)
    } else {
        String::from_utf8(decoded).map_err(|e| LpError::decryption(format!("plaintext url is not UTF-8: {e}")))
    }
}

fn parse_custom_field(payload: &[u8], key: &[u8; KEY_LEN]) -> LpResult<Field> {
    let mut r = FieldReader::new(payload);
    let name = decrypt_to_string(r.next(), key)?;
    let value_raw = r.next();
    let field_type = FieldType::from_wire(&String::from_utf8_lossy(r.next()));
    let checked = bool_field(r.next());

    // Checkbox values are conditionally plaintext ("0"/"1"); everything
    // else is encrypted (spec §4.3).
    let value = if field_type == FieldType::Checkbox {
        String::from_utf8_lossy(value_raw).into_owned()
    } else {
        decrypt_to_string(value_raw, key)?
    };

    Ok(Field { name, value, field_type, checked })
}

fn parse_attachment(payload: &[u8], key: &[u8; KEY_LEN]) -> LpResult<Attachment> {
    let mut r = FieldReader::new(payload);
    let id = String::from_utf8_lossy(r.next()).into_owned();
    let parent_account_id = String::from_utf8_lossy(r.next()).into_owned();
    let mimetype = String::from_utf8_lossy(r.next()).into_owned();
    let storage_key = decrypt_to_string(r.next(), key)?;
    let size = String::from_utf8_lossy(r.next()).into_owned();
    let filename = decrypt_to_string(r.next(), key)?;

    Ok(Attachment { id, parent_account_id, mimetype, filename, size, storage_key })
}

fn decrypt_to_string(raw: &[u8], key: &[u8; KEY_LEN]) -> LpResult<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    let bytes = cipher::decrypt(raw, key)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ---------------------------------------------------------------------
// Emit (local round-trip / queue serialization)
// ---------------------------------------------------------------------

/// Re-serialize a parsed vault back to the chunk stream, re-encrypting
/// every field with a fresh random IV. Equal to the source blob modulo
/// IV randomness and any trailing fields this codec doesn't itself emit
/// (spec §4.3).
pub fn emit(vault: &ParsedVault, vault_key: &[u8; KEY_LEN]) -> Vec<u8> {
    let mut out = Vec::new();

    if let Some(version) = &vault.version {
        write_chunk(&mut out, &TAG_LPAV, version.as_bytes());
    }

    // Partition accounts by their share so every SHAR chunk groups its
    // own ACCT chunks contiguously, matching the stateful parse order.
    let mut unshared = Vec::new();
    let mut by_share: std::collections::BTreeMap<String, Vec<&Account>> = std::collections::BTreeMap::new();
    for acct in &vault.accounts {
        match &acct.share {
            None => unshared.push(acct),
            Some(s) => by_share.entry(s.id.clone()).or_default().push(acct),
        }
    }

    for acct in unshared {
        emit_account(&mut out, acct, vault_key);
    }

    for share in &vault.shares {
        emit_share(&mut out, share, vault_key);
        if let Some(accts) = by_share.get(&share.id) {
            for acct in accts {
                emit_account(&mut out, acct, &share.key);
            }
        }
    }

    out
}

fn emit_share(out: &mut Vec<u8>, share: &Share, vault_key: &[u8; KEY_LEN]) {
    let mut payload = Vec::new();
    write_field_str(&mut payload, &share.id);
    write_field(&mut payload, &cipher::encrypt(share.name.as_bytes(), vault_key));
    write_field(&mut payload, &[]); // sharekey (RSA) omitted on local re-emit
    write_field(&mut payload, &cipher::encrypt(&share.key, vault_key));
    write_bool_field(&mut payload, share.readonly);
    write_chunk(out, &TAG_SHAR, &payload);
}

fn emit_account(out: &mut Vec<u8>, acct: &Account, key: &[u8; KEY_LEN]) {
    let mut payload = Vec::new();
    write_field_str(&mut payload, &acct.id);
    write_field(&mut payload, &cipher::encrypt(acct.name.as_bytes(), key));
    write_field(&mut payload, &cipher::encrypt(acct.group.as_bytes(), key));
    write_field(&mut payload, emit_url_field(&acct.url, key).as_bytes());
    write_field(&mut payload, &cipher::encrypt(acct.notes.as_bytes(), key));
    write_bool_field(&mut payload, acct.favorite);
    write_field(&mut payload, &cipher::encrypt(acct.username.as_bytes(), key));
    write_field(&mut payload, &cipher::encrypt(acct.password.as_bytes(), key));
    write_bool_field(&mut payload, acct.pwprotect);
    write_bool_field(&mut payload, acct.share.is_some());
    write_bool_field(&mut payload, acct.attach_present);
    if acct.attachkey.is_empty() {
        write_field(&mut payload, &[]);
    } else {
        let enc = cipher::encrypt(acct.attachkey.as_bytes(), key);
        write_field_str(&mut payload, &hex::encode(enc));
    }
    write_field_str(&mut payload, &acct.last_touch);
    write_field_str(&mut payload, &acct.last_modified);
    write_chunk(out, &TAG_ACCT, &payload);

    for field in &acct.fields {
        emit_custom_field(out, field, key);
    }
    for attachment in &acct.attachments {
        emit_attachment(out, attachment, key);
    }
}

fn emit_url_field(url: &str, key: &[u8; KEY_LEN]) -> String {
    if url.is_empty() {
        return String::new();
    }
    let enc = cipher::encrypt(url.as_bytes(), key);
    hex::encode(enc)
}

fn emit_custom_field(out: &mut Vec<u8>, field: &Field, key: &[u8; KEY_LEN]) {
    let mut payload = Vec::new();
    write_field(&mut payload, &cipher::encrypt(field.name.as_bytes(), key));
    if field.field_type == FieldType::Checkbox {
        write_field_str(&mut payload, &field.value);
    } else {
        write_field(&mut payload, &cipher::encrypt(field.value.as_bytes(), key));
    }
    write_field_str(&mut payload, field.field_type.as_wire());
    write_bool_field(&mut payload, field.checked);
    write_chunk(out, &TAG_ACFL, &payload);
}

fn emit_attachment(out: &mut Vec<u8>, attachment: &Attachment, key: &[u8; KEY_LEN]) {
    let mut payload = Vec::new();
    write_field_str(&mut payload, &attachment.id);
    write_field_str(&mut payload, &attachment.parent_account_id);
    write_field_str(&mut payload, &attachment.mimetype);
    write_field(&mut payload, &cipher::encrypt(attachment.storage_key.as_bytes(), key));
    write_field_str(&mut payload, &attachment.size);
    write_field(&mut payload, &cipher::encrypt(attachment.filename.as_bytes(), key));
    write_chunk(out, &TAG_ATTA, &payload);
}

/// Fresh random 16-byte "hint" used only by tests that need to assert IVs
/// differ between two emits of the same plaintext.
#[cfg(test)]
fn random_probe() -> [u8; 16] {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}
