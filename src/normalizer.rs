//! RDAP JSON to [`NormalizedRecord`].
//!
//! Every field is read through [`JsonObjectExt`], so a registry that omits a
//! field or publishes it with an unexpected type produces an emptier record,
//! never an error. The only failure is a top-level value that is not an object.

use crate::{
    dates::parse_date,
    errors::LookupError,
    json::{scalar_text, JsonObjectExt},
    records::{
        AsnInfo, DomainInfo, IpInfo, Lifecycle, NormalizedRecord, DNSSEC_SIGNED, DNSSEC_UNSIGNED,
        UNKNOWN_NETWORK_TYPE,
    },
};
use serde_json::{Map, Value};

const REGISTRAR_ROLE: &str = "registrar";

const DS_DATA_FIELDS: [&str; 4] = ["keytag", "algorithm", "digestType", "digest"];
const KEY_DATA_FIELDS: [&str; 4] = ["algorithm", "flags", "protocol", "publicKey"];

pub fn normalize(value: &Value) -> Result<NormalizedRecord, LookupError> {
    let object = value
        .as_object()
        .ok_or_else(|| LookupError::MalformedResponse("RDAP response is not a JSON object".to_string()))?;
    Ok(normalize_object(object))
}

/// Dispatch on `objectClassName`: `domain`, `autnum`, and everything else as an IP network.
pub fn normalize_object(object: &Map<String, Value>) -> NormalizedRecord {
    match object.str_field("objectClassName") {
        Some("domain") => NormalizedRecord::Domain(normalize_domain(object)),
        Some("autnum") => NormalizedRecord::Autnum(normalize_asn(object)),
        _ => NormalizedRecord::IpNetwork(normalize_ip(object)),
    }
}

pub fn normalize_domain(object: &Map<String, Value>) -> DomainInfo {
    let (registrar, registrar_iana_id) = registrar(object);
    let (dnssec, dnssec_ds_data) = dnssec(object);
    let events = Events::collect(object);

    DomainInfo {
        id: object.str_field("handle").unwrap_or_default().to_string(),
        domain: object.str_field("ldhName").unwrap_or_default().to_string(),
        status: object.string_list("status"),
        name_servers: name_servers(object),
        dnssec,
        dnssec_ds_data,
        dates: events.lifecycle(),
        registrar,
        registrar_iana_id,
        last_updated_of_rdapdb: events.database_updated.unwrap_or_default(),
    }
}

pub fn normalize_ip(object: &Map<String, Value>) -> IpInfo {
    let range = match (object.str_field("startAddress"), object.str_field("endAddress")) {
        (Some(start), Some(end)) => format!("{} - {}", start, end),
        (Some(start), None) => start.to_string(),
        _ => String::new(),
    };

    let events = Events::collect(object);

    IpInfo {
        ip_network: object.str_field("handle").unwrap_or_default().to_string(),
        range,
        network_name: object.str_field("name").unwrap_or_default().to_string(),
        cidr: cidr(object).unwrap_or_default(),
        network_type: object.str_field("type").unwrap_or(UNKNOWN_NETWORK_TYPE).to_string(),
        country: object.str_field("country").unwrap_or_default().to_string(),
        status: object.string_list("status"),
        created_date: events.registration.unwrap_or_default(),
        updated_date: events.last_changed.unwrap_or_default(),
    }
}

pub fn normalize_asn(object: &Map<String, Value>) -> AsnInfo {
    let events = Events::collect(object);

    AsnInfo {
        as_number: object.str_field("handle").unwrap_or_default().to_string(),
        network_name: object.str_field("name").unwrap_or_default().to_string(),
        status: object.string_list("status"),
        created_date: events.registration.unwrap_or_default(),
        updated_date: events.last_changed.unwrap_or_default(),
    }
}

#[derive(Default)]
struct Events {
    registration: Option<String>,
    expiration: Option<String>,
    last_changed: Option<String>,
    database_updated: Option<String>,
}

impl Events {
    fn collect(object: &Map<String, Value>) -> Self {
        let mut events = Events::default();

        for event in object.array_field("events").into_iter().flatten().filter_map(Value::as_object) {
            let (Some(action), Some(date)) = (event.str_field("eventAction"), event.str_field("eventDate")) else {
                continue;
            };
            let slot = match action {
                "registration" => &mut events.registration,
                "expiration" => &mut events.expiration,
                "last changed" => &mut events.last_changed,
                "last update of RDAP database" => &mut events.database_updated,
                _ => continue,
            };
            *slot = Some(date.to_string());
        }

        events
    }

    fn lifecycle(&self) -> Lifecycle {
        let dated = |value: &Option<String>| {
            let text = value.clone().unwrap_or_default();
            let parsed = parse_date(&text);
            (text, parsed)
        };

        let (created_date, created_date_in_time) = dated(&self.registration);
        let (updated_date, updated_date_in_time) = dated(&self.last_changed);
        let (expiration_date, expiration_date_in_time) = dated(&self.expiration);

        Lifecycle {
            created_date,
            created_date_in_time,
            updated_date,
            updated_date_in_time,
            expiration_date,
            expiration_date_in_time,
        }
    }
}

/// Display name (vCard `fn`) and IANA ID of the first entity with the registrar role.
fn registrar(object: &Map<String, Value>) -> (String, String) {
    let entity = object
        .array_field("entities")
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .find(|entity| {
            entity
                .array_field("roles")
                .is_some_and(|roles| roles.iter().any(|role| role.as_str() == Some(REGISTRAR_ROLE)))
        });

    let Some(entity) = entity else {
        return (String::new(), String::new());
    };

    let name = entity
        .array_field("vcardArray")
        .and_then(|vcard| vcard.get(1))
        .and_then(Value::as_array)
        .and_then(|properties| {
            properties
                .iter()
                .filter_map(Value::as_array)
                .find(|property| property.first().and_then(Value::as_str) == Some("fn") && property.len() > 3)
        })
        .and_then(|property| property.get(3))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let iana_id = entity
        .array_field("publicIds")
        .and_then(|ids| ids.first())
        .and_then(Value::as_object)
        .and_then(|id| id.scalar_field("identifier"))
        .unwrap_or_default();

    (name, iana_id)
}

fn name_servers(object: &Map<String, Value>) -> Vec<String> {
    object
        .array_field("nameservers")
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|ns| ns.str_field("ldhName"))
        .map(str::to_string)
        .collect()
}

/// Summary and detail string; `dsData` wins over `keyData`.
fn dnssec(object: &Map<String, Value>) -> (String, String) {
    let unsigned = (DNSSEC_UNSIGNED.to_string(), String::new());
    let Some(secure) = object.object_field("secureDNS") else {
        return unsigned;
    };

    let first = |key: &str| {
        secure
            .array_field(key)
            .and_then(|records| records.first())
            .and_then(Value::as_object)
    };

    let detail = first("dsData")
        .and_then(|ds| joined(ds, &DS_DATA_FIELDS))
        .or_else(|| first("keyData").and_then(|key| joined(key, &KEY_DATA_FIELDS)));

    match detail {
        Some(detail) => (DNSSEC_SIGNED.to_string(), detail),
        None => unsigned,
    }
}

/// The named fields joined by spaces, only if every one of them is present.
fn joined(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .map(|key| object.get(*key).and_then(scalar_text))
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join(" "))
}

/// `prefix/length` from the last usable `cidr0_cidrs` entry.
fn cidr(object: &Map<String, Value>) -> Option<String> {
    object
        .array_field("cidr0_cidrs")
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            let prefix = entry.str_field("v4prefix").or_else(|| entry.str_field("v6prefix"))?;
            let length = entry.scalar_field("length")?;
            Some(format!("{}/{}", prefix, length))
        })
        .last()
}
