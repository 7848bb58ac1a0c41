//! C4: pure data model (spec §3/§4.4). Accounts, fields, attachments,
//! shares and their membership/limit records. No crypto or I/O here —
//! the blob codec (C3) populates these from ciphertext, and the client
//! façade (C7) mutates them.

use std::rc::Rc;

use serde::Serialize;

pub const SECURE_NOTE_URL: &str = "http://sn";

/// A custom field on an account. `checkbox`-typed fields use `checked`
/// in addition to `value`; multi-line values are permitted for types a
/// secure-note template declares multi-line (see `note_templates`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub field_type: FieldType,
    pub checked: bool,
}

impl Field {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field { name: name.into(), value: value.into(), field_type: FieldType::Text, checked: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Password,
    Email,
    Tel,
    Url,
    Checkbox,
}

impl FieldType {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "password" => FieldType::Password,
            "email" => FieldType::Email,
            "tel" => FieldType::Tel,
            "url" => FieldType::Url,
            "checkbox" => FieldType::Checkbox,
            _ => FieldType::Text,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Password => "password",
            FieldType::Email => "email",
            FieldType::Tel => "tel",
            FieldType::Url => "url",
            FieldType::Checkbox => "checkbox",
        }
    }
}

/// Attachment metadata. The binary body is never held here; it is
/// fetched on demand (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub id: String,
    pub parent_account_id: String,
    pub mimetype: String,
    pub filename: String,
    pub size: String,
    pub storage_key: String,
}

/// A per-share symmetric key and membership metadata (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub id: String,
    pub name: String,
    pub key: [u8; 32],
    pub readonly: bool,
}

impl Serialize for Share {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Share", 3)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("readonly", &self.readonly)?;
        s.end()
    }
}

/// A member of a shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareUser {
    pub username: String,
    pub uid: String,
    pub realname: String,
    pub readonly: bool,
    pub admin: bool,
    pub hide_passwords: bool,
    pub accepted: bool,
}

/// Per-share visibility restriction: a whitelist (only listed ids
/// visible) or a blacklist (listed ids hidden).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLimit {
    pub whitelist: bool,
    pub account_ids: std::collections::BTreeSet<String>,
}

impl ShareLimit {
    pub fn is_visible(&self, account_id: &str) -> bool {
        let listed = self.account_ids.contains(account_id);
        if self.whitelist {
            listed
        } else {
            !listed
        }
    }
}

/// An account/entry in the vault (spec §3). `share` is a non-owning
/// reference bound to the lifetime of the surrounding vault snapshot
/// (Design Note §9): it never outlives the `Vec<Rc<Share>>` the client
/// façade owns.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub url: String,
    /// Hierarchical path, displayed with `/` separators. The blob codec
    /// and CLI both normalize user-typed `\`-separated input to this form.
    pub group: String,
    pub notes: String,
    pub last_touch: String,
    pub last_modified: String,
    pub pwprotect: bool,
    pub favorite: bool,
    pub is_app: bool,
    pub attach_present: bool,
    pub attachkey: String,
    pub fields: Vec<Field>,
    pub attachments: Vec<Attachment>,
    #[serde(skip)]
    pub share: Option<Rc<Share>>,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Account {
            id: id.into(),
            name: name.into(),
            username: String::new(),
            password: String::new(),
            url: String::new(),
            group: String::new(),
            notes: String::new(),
            last_touch: String::new(),
            last_modified: String::new(),
            pwprotect: false,
            favorite: false,
            is_app: false,
            attach_present: false,
            attachkey: String::new(),
            fields: Vec::new(),
            attachments: Vec::new(),
            share: None,
        }
    }

    /// `id` is empty only for a newly created account awaiting server
    /// acknowledgement.
    pub fn is_pending(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_secure_note(&self) -> bool {
        self.url == SECURE_NOTE_URL
    }

    /// First custom field whose name matches, if any.
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Derived display name: `group/name`, or the bare `name` when no
    /// group is set (spec §3/§4.4).
    pub fn fullname(&self) -> String {
        if self.group.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.group, self.name)
        }
    }

    /// Deterministic JSON projection for export (spec §4.4's `to_dict`).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "username": self.username,
            "password": self.password,
            "url": self.url,
            "group": self.group,
            "notes": self.notes,
            "fullname": self.fullname(),
            "last_touch": self.last_touch,
            "last_modified": self.last_modified,
            "pwprotect": self.pwprotect,
            "favorite": self.favorite,
            "is_app": self.is_app,
            "attach_present": self.attach_present,
            "fields": self.fields,
            "attachments": self.attachments,
            "share": self.share.as_ref().map(|s| serde_json::json!({
                "id": s.id, "name": s.name, "readonly": s.readonly,
            })),
        })
    }
}

/// Normalize a user-typed `\`-separated group path to the `/`-separated
/// display form (spec §3).
pub fn normalize_group_path(input: &str) -> String {
    input.replace('\\', "/")
}
