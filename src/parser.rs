//! Free-text WHOIS parsing.
//!
//! WHOIS has no schema, so parsers are pluggable per server: a
//! [`ParserRegistry`] picks one by the host that answered and falls back to
//! the line-oriented [`GenericParser`].

use crate::{dates::parse_date, errors::LookupError, referral};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<WhoisDomain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrant: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administrative: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing: Option<Contact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisDomain {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub punycode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub whois_server: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dnssec: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_in_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date_in_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expiration_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date_in_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub province: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_ext: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fax: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fax_ext: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub referral_url: String,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        *self == Contact::default()
    }

    /// Assign `value` to the field named by a WHOIS key suffix such as `"postal code"`.
    fn set(&mut self, field: &str, value: &str) -> bool {
        let slot = match field {
            "" | "name" | "contact name" => &mut self.name,
            "id" | "handle" | "contact id" => &mut self.id,
            "organization" | "organisation" | "org" => &mut self.organization,
            "street" | "address" | "street1" => &mut self.street,
            "city" => &mut self.city,
            "state/province" | "state" | "province" => &mut self.province,
            "postal code" | "postalcode" | "zip" | "zip code" => &mut self.postal_code,
            "country" | "country code" => &mut self.country,
            "phone" | "phone number" => &mut self.phone,
            "phone ext" | "phone ext." => &mut self.phone_ext,
            "fax" | "fax number" => &mut self.fax,
            "fax ext" | "fax ext." => &mut self.fax_ext,
            "email" | "e-mail" | "contact email" => &mut self.email,
            _ => return false,
        };
        if slot.is_empty() {
            *slot = value.to_string();
        }
        true
    }
}

pub trait WhoisParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<WhoisInfo, LookupError>;
}

/// Key/value line scanner for the common `Key: value` WHOIS layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericParser;

/// Contact sections recognized by key prefix, most specific first.
const CONTACT_PREFIXES: [(&str, Section); 7] = [
    ("registrant", Section::Registrant),
    ("administrative", Section::Administrative),
    ("admin", Section::Administrative),
    ("technical", Section::Technical),
    ("tech", Section::Technical),
    ("billing", Section::Billing),
    ("bill", Section::Billing),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Registrant,
    Administrative,
    Technical,
    Billing,
}

#[derive(Default)]
struct Draft {
    domain: WhoisDomain,
    registrar: Contact,
    registrant: Contact,
    administrative: Contact,
    technical: Contact,
    billing: Contact,
}

impl Draft {
    fn contact(&mut self, section: Section) -> &mut Contact {
        match section {
            Section::Registrant => &mut self.registrant,
            Section::Administrative => &mut self.administrative,
            Section::Technical => &mut self.technical,
            Section::Billing => &mut self.billing,
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        // "Registry Registrant ID", "Registry Admin ID", ...
        if let Some(rest) = key.strip_prefix("registry ") {
            if let Some(section) = contact_section(rest) {
                if rest.ends_with(" id") {
                    self.contact(section).set("id", value);
                    return;
                }
            }
        }

        if let Some(section) = contact_section(key) {
            let field = CONTACT_PREFIXES
                .iter()
                .find_map(|(prefix, _)| key.strip_prefix(prefix))
                .unwrap_or_default()
                .trim()
                .trim_start_matches("contact")
                .trim();
            if self.contact(section).set(field, value) {
                return;
            }
        }

        let domain = &mut self.domain;
        match key {
            "domain name" | "domain" | "domainname" => {
                if domain.domain.is_empty() {
                    domain.domain = value.to_lowercase();
                }
            }
            "registry domain id" | "domain id" | "roid" => set_once(&mut domain.id, value),
            "registrar whois server" | "whois server" | "whois" => set_once(&mut domain.whois_server, value),
            "dnssec" => domain.dnssec = is_signed(value),
            k if k.contains("expir") || k.contains("paid-till") => set_once(&mut domain.expiration_date, value),
            k if k.contains("creation") || k.contains("created") || k == "registered" || k == "registration time" => {
                set_once(&mut domain.created_date, value)
            }
            k if k.contains("updated") || k.contains("modified") || k == "changed" => {
                set_once(&mut domain.updated_date, value)
            }
            "registrar" | "sponsoring registrar" | "registrar name" => set_once(&mut self.registrar.name, value),
            "registrar iana id" => set_once(&mut self.registrar.id, value),
            "registrar url" => set_once(&mut self.registrar.referral_url, value),
            "registrar abuse contact email" => set_once(&mut self.registrar.email, value),
            "registrar abuse contact phone" => set_once(&mut self.registrar.phone, value),
            k if k.contains("name server") || k == "nserver" || k == "ns" || k == "nameserver" => {
                // Some registries append glue addresses after the host.
                let server = value.split_whitespace().next().unwrap_or(value).trim_end_matches('.').to_lowercase();
                if !domain.name_servers.contains(&server) {
                    domain.name_servers.push(server);
                }
            }
            k if k.contains("status") || k == "state" => {
                let status = value.split_whitespace().next().unwrap_or(value).to_string();
                if !domain.status.contains(&status) {
                    domain.status.push(status);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> WhoisInfo {
        let mut domain = self.domain;
        let domain = if domain.domain.is_empty() {
            None
        } else {
            if let Some((name, extension)) = domain.domain.split_once('.') {
                domain.name = name.to_string();
                domain.extension = extension.to_string();
            }
            if domain.domain.split('.').any(|label| label.starts_with("xn--")) {
                domain.punycode = domain.domain.clone();
            }
            domain.created_date_in_time = parse_date(&domain.created_date);
            domain.updated_date_in_time = parse_date(&domain.updated_date);
            domain.expiration_date_in_time = parse_date(&domain.expiration_date);
            Some(domain)
        };

        let non_empty = |contact: Contact| (!contact.is_empty()).then_some(contact);

        WhoisInfo {
            domain,
            registrar: non_empty(self.registrar),
            registrant: non_empty(self.registrant),
            administrative: non_empty(self.administrative),
            technical: non_empty(self.technical),
            billing: non_empty(self.billing),
        }
    }
}

fn contact_section(key: &str) -> Option<Section> {
    CONTACT_PREFIXES
        .iter()
        .find(|(prefix, _)| key.starts_with(prefix))
        .map(|(_, section)| *section)
}

fn set_once(slot: &mut String, value: &str) {
    if slot.is_empty() {
        *slot = value.to_string();
    }
}

fn is_signed(value: &str) -> bool {
    let value = value.to_lowercase();
    !(value.starts_with("unsigned") || value == "no" || value == "inactive" || value == "false")
}

impl WhoisParser for GenericParser {
    fn parse(&self, raw: &str) -> Result<WhoisInfo, LookupError> {
        if raw.trim().is_empty() {
            return Err(LookupError::Parse("empty WHOIS response".to_string()));
        }

        let mut draft = Draft::default();

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_lowercase();
                let value = value.trim();

                if value.is_empty() || value.to_lowercase().contains("select request") {
                    continue;
                }

                draft.apply(&key, value);
            }
        }

        Ok(draft.finish())
    }
}

/// Parsers keyed by WHOIS server host, falling back to [`GenericParser`].
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn WhoisParser>>,
    fallback: Arc<dyn WhoisParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            parsers: HashMap::new(),
            fallback: Arc::new(GenericParser),
        }
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, host: &str, parser: Arc<dyn WhoisParser>) {
        self.parsers.insert(host.to_lowercase(), parser);
    }

    /// `server` may be `host` or `host:port`.
    pub fn parser_for(&self, server: &str) -> &dyn WhoisParser {
        let host = referral::parse_endpoint(server, 0)
            .map(|endpoint| endpoint.host.to_lowercase())
            .unwrap_or_default();

        self.parsers
            .get(&host)
            .map(|parser| parser.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    pub fn parse(&self, server: &str, raw: &str) -> Result<WhoisInfo, LookupError> {
        self.parser_for(server).parse(raw)
    }
}
