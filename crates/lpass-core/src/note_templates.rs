//! Secure note template table (spec §4.5), grounded on the original
//! implementation's note type catalogue. Each template names the
//! ordered field list `notes.rs` expects `NoteType:` headers to expand
//! into; `multiline_fields` marks the few fields (SSH key material)
//! whose value may itself contain embedded newlines.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoteType {
    Generic,
    Amex,
    Bank,
    Credit,
    Database,
    DriversLicense,
    Email,
    HealthInsurance,
    Im,
    Insurance,
    Mastercard,
    Membership,
    Passport,
    Server,
    SoftwareLicense,
    SshKey,
    Ssn,
    Visa,
    Wifi,
}

pub struct NoteTemplate {
    pub shortname: &'static str,
    pub name: &'static str,
    pub fields: &'static [&'static str],
    pub multiline_fields: &'static [&'static str],
}

const ALL: &[(NoteType, NoteTemplate)] = &[
    (NoteType::Generic, NoteTemplate { shortname: "generic", name: "Generic", fields: &[], multiline_fields: &[] }),
    (NoteType::Amex, NoteTemplate {
        shortname: "amex",
        name: "American Express",
        fields: &["Name on Card", "Type", "Number", "Security Code", "Start Date", "Expiration Date",
                   "Name", "Address", "City / Town", "State", "ZIP / Postal Code", "Country", "Telephone"],
        multiline_fields: &[],
    }),
    (NoteType::Bank, NoteTemplate {
        shortname: "bank",
        name: "Bank Account",
        fields: &["Bank Name", "Account Type", "Routing Number", "Account Number", "SWIFT Code",
                   "IBAN Number", "Pin", "Branch Address", "Branch Phone"],
        multiline_fields: &[],
    }),
    (NoteType::Credit, NoteTemplate {
        shortname: "creditcard",
        name: "Credit Card",
        fields: &["Name on Card", "Type", "Number", "Security Code", "Start Date", "Expiration Date",
                   "Name", "Address", "City / Town", "State", "ZIP / Postal Code", "Country", "Telephone"],
        multiline_fields: &[],
    }),
    (NoteType::Database, NoteTemplate {
        shortname: "database",
        name: "Database",
        fields: &["Type", "Hostname", "Port", "Database", "Username", "Password", "SID", "Alias"],
        multiline_fields: &[],
    }),
    (NoteType::DriversLicense, NoteTemplate {
        shortname: "driverslicense",
        name: "Driver's License",
        fields: &["Number", "Expiration Date", "License Class", "Name", "Address", "City / Town",
                   "State", "ZIP / Postal Code", "Country", "Date of Birth", "Sex", "Height"],
        multiline_fields: &[],
    }),
    (NoteType::Email, NoteTemplate {
        shortname: "email",
        name: "Email Account",
        fields: &["Username", "Password", "Server", "Port", "Type", "SMTP Server", "SMTP Port"],
        multiline_fields: &[],
    }),
    (NoteType::HealthInsurance, NoteTemplate {
        shortname: "health-insurance",
        name: "Health Insurance",
        fields: &["Company", "Company Phone", "Policy Type", "Policy Number", "Group ID", "Member Name",
                   "Member ID", "Physician Name", "Physician Phone", "Physician Address", "Co-pay"],
        multiline_fields: &[],
    }),
    (NoteType::Im, NoteTemplate {
        shortname: "im",
        name: "Instant Messenger",
        fields: &["Type", "Username", "Password", "Server", "Port"],
        multiline_fields: &[],
    }),
    (NoteType::Insurance, NoteTemplate {
        shortname: "insurance",
        name: "Insurance",
        fields: &["Company", "Policy Type", "Policy Number", "Expiration", "Agent Name", "Agent Phone",
                   "URL", "Username", "Password"],
        multiline_fields: &[],
    }),
    (NoteType::Mastercard, NoteTemplate {
        shortname: "mastercard",
        name: "Mastercard",
        fields: &["Name on Card", "Type", "Number", "Security Code", "Start Date", "Expiration Date",
                   "Name", "Address", "City / Town", "State", "ZIP / Postal Code", "Country", "Telephone"],
        multiline_fields: &[],
    }),
    (NoteType::Membership, NoteTemplate {
        shortname: "membership",
        name: "Membership",
        fields: &["Organization", "Membership Number", "Member Name", "Start Date", "Expiration Date",
                   "Website", "Telephone", "Password"],
        multiline_fields: &[],
    }),
    (NoteType::Passport, NoteTemplate {
        shortname: "passport",
        name: "Passport",
        fields: &["Type", "Name", "Country", "Number", "Sex", "Nationality", "Issuing Authority",
                   "Date of Birth", "Issued Date", "Expiration Date"],
        multiline_fields: &[],
    }),
    (NoteType::Server, NoteTemplate {
        shortname: "server",
        name: "Server",
        fields: &["Hostname", "Username", "Password"],
        multiline_fields: &[],
    }),
    (NoteType::SoftwareLicense, NoteTemplate {
        shortname: "software-license",
        name: "Software License",
        fields: &["License Key", "Licensee", "Version", "Publisher", "Support Email", "Website",
                   "Price", "Purchase Date", "Order Number", "Number of Licenses", "Order Total"],
        multiline_fields: &[],
    }),
    (NoteType::SshKey, NoteTemplate {
        shortname: "sshkey",
        name: "SSH Key",
        fields: &["Bit Strength", "Format", "Passphrase", "Private Key", "Public Key", "Hostname", "Date"],
        multiline_fields: &["Private Key", "Public Key"],
    }),
    (NoteType::Ssn, NoteTemplate {
        shortname: "ssn",
        name: "Social Security",
        fields: &["Name", "Number"],
        multiline_fields: &[],
    }),
    (NoteType::Visa, NoteTemplate {
        shortname: "visa",
        name: "VISA",
        fields: &["Name on Card", "Type", "Number", "Security Code", "Start Date", "Expiration Date",
                   "Name", "Address", "City / Town", "State", "ZIP / Postal Code", "Country", "Telephone"],
        multiline_fields: &[],
    }),
    (NoteType::Wifi, NoteTemplate {
        shortname: "wifi",
        name: "WiFi Password",
        fields: &["SSID", "Password", "Connection Type", "Connection Mode", "Authentication",
                   "Encryption", "Use 802.1X", "FIPS Mode", "Key Type", "Protected", "Key Index"],
        multiline_fields: &[],
    }),
];

pub fn by_shortname(shortname: &str) -> Option<NoteType> {
    let lower = shortname.to_lowercase();
    ALL.iter().find(|(_, t)| t.shortname == lower).map(|(nt, _)| *nt)
}

pub fn by_name(name: &str) -> Option<NoteType> {
    let lower = name.to_lowercase();
    ALL.iter().find(|(_, t)| t.name.to_lowercase() == lower).map(|(nt, _)| *nt)
}

pub fn template(note_type: NoteType) -> &'static NoteTemplate {
    &ALL.iter().find(|(nt, _)| *nt == note_type).expect("every NoteType variant has a template").1
}

pub fn has_field(note_type: NoteType, field_name: &str) -> bool {
    template(note_type).fields.contains(&field_name)
}

pub fn is_multiline_field(note_type: NoteType, field_name: &str) -> bool {
    template(note_type).multiline_fields.contains(&field_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortname_lookup_is_case_insensitive() {
        assert_eq!(by_shortname("SSHKEY"), Some(NoteType::SshKey));
        assert_eq!(by_shortname("bogus"), None);
    }

    #[test]
    fn name_lookup_matches_display_name() {
        assert_eq!(by_name("wifi password"), Some(NoteType::Wifi));
    }

    #[test]
    fn ssh_key_declares_two_multiline_fields() {
        assert!(is_multiline_field(NoteType::SshKey, "Private Key"));
        assert!(is_multiline_field(NoteType::SshKey, "Public Key"));
        assert!(!is_multiline_field(NoteType::SshKey, "Hostname"));
    }

    #[test]
    fn generic_template_has_no_fields() {
        assert!(template(NoteType::Generic).fields.is_empty());
    }
}
