/// Station Directory API Client
///
/// Retrieves the list of station ids and the per-station rack details from
/// the bike-share operator's public directory service. Every call is a
/// blocking request bounded by the client-wide timeout; there is no in-call
/// retry, the next poll cycle is the retry.
///
/// Endpoints (relative to the configured base URL):
///   GET {base}/getRacks           -> list of station ids
///   GET {base}/getRack?id=<id>    -> rack fields of one station
///
/// The operator's ASMX service wraps its answers in a `<string>` envelope
/// whose text is an escaped XML document:
///
///   <string xmlns="...">&lt;station&gt;&lt;ready_bikes&gt;4&lt;/ready_bikes&gt;...</string>
///
/// Bodies starting with `<` are decoded as that envelope (or as the bare
/// inner XML). Anything else is decoded as JSON, for directories that serve
/// the same fields as a JSON array and object.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::DirectoryConfig;
use crate::model::ServiceError;

// ============================================================================
// Directory Response Structures
// ============================================================================

/// Raw rack details as returned by the directory.
///
/// Values are kept as loose JSON because the service reports numbers both
/// as strings and as numbers. `StationRecordMapper` validates each field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRack {
    pub description: Option<Value>,
    pub latitude: Option<Value>,
    /// The upstream service spells this field `longitute`.
    #[serde(alias = "longitute")]
    pub longitude: Option<Value>,
    pub ready_bikes: Option<Value>,
    pub empty_locks: Option<Value>,
    pub online: Option<Value>,
}

// ============================================================================
// Directory seam
// ============================================================================

/// Source of station ids and rack details.
///
/// The poll loop only talks to the directory through this trait so cycles
/// can be exercised against a scripted directory in tests.
pub trait StationDirectory {
    /// Station ids in the order the directory lists them.
    fn list_station_ids(&self) -> Result<Vec<String>, ServiceError>;

    /// Raw detail payload for one station.
    fn fetch_detail(&self, station_id: &str) -> Result<RawRack, ServiceError>;
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct HttpStationDirectory {
    client: reqwest::blocking::Client,
    base_url: String,
    list_path: String,
    detail_path: String,
}

impl HttpStationDirectory {
    /// Build a client whose every request is bounded by `config.timeout_seconds`.
    pub fn new(config: &DirectoryConfig) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ServiceError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            list_path: config.list_path.clone(),
            detail_path: config.detail_path.clone(),
        })
    }

    pub fn list_url(&self) -> String {
        format!("{}/{}", self.base_url, self.list_path)
    }

    pub fn detail_url(&self) -> String {
        format!("{}/{}", self.base_url, self.detail_path)
    }

    /// Issue one GET and return the body text, mapping failures onto the
    /// service error taxonomy.
    fn get_text(&self, url: &str, query: &[(&str, &str)], operation: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "text/xml, application/xml, application/json")
            .send()
            .map_err(|e| transport_error(e, operation))?;

        if !response.status().is_success() {
            return Err(ServiceError::Transport(format!(
                "HTTP error: {}",
                response.status().as_u16()
            )));
        }

        response.text().map_err(|e| transport_error(e, operation))
    }
}

impl StationDirectory for HttpStationDirectory {
    fn list_station_ids(&self) -> Result<Vec<String>, ServiceError> {
        let url = self.list_url();
        tracing::debug!(url = %url, "listing station ids");
        let body = self.get_text(&url, &[], &self.list_path)?;
        parse_station_ids(&body)
    }

    fn fetch_detail(&self, station_id: &str) -> Result<RawRack, ServiceError> {
        let url = self.detail_url();
        tracing::debug!(url = %url, station = station_id, "fetching rack details");
        let body = self.get_text(&url, &[("id", station_id)], &self.detail_path)?;
        parse_rack(&body)
    }
}

fn transport_error(err: reqwest::Error, operation: &str) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        ServiceError::Transport(err.to_string())
    }
}

// ============================================================================
// Response parsing
// ============================================================================

/// Element and field names of the rack detail document.
const STATION_ELEMENT: &str = "station";
const RACK_FIELDS: [&str; 6] = [
    "description",
    "latitude",
    "longitude",
    "ready_bikes",
    "empty_locks",
    "online",
];

fn is_xml(body: &str) -> bool {
    body.trim_start().starts_with('<')
}

/// Parse the id listing, from XML `<station>` elements or a JSON array.
/// Ids may arrive as strings or numbers; an empty or non-scalar id fails
/// the whole listing.
pub fn parse_station_ids(body: &str) -> Result<Vec<String>, ServiceError> {
    if is_xml(body) {
        return parse_station_ids_xml(body);
    }

    let raw: Vec<Value> = serde_json::from_str(body)
        .map_err(|e| ServiceError::MalformedRecord(format!("station listing: {}", e)))?;

    raw.into_iter()
        .map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ServiceError::MalformedRecord(format!(
                "station listing: unexpected id {}",
                other
            ))),
        })
        .collect()
}

/// Parse one detail payload, from the XML `<station>` element or a JSON
/// object. Individual fields are validated later by the mapper.
pub fn parse_rack(body: &str) -> Result<RawRack, ServiceError> {
    if is_xml(body) {
        return parse_rack_xml(body);
    }
    serde_json::from_str(body).map_err(|e| ServiceError::MalformedRecord(format!("rack details: {}", e)))
}

fn parse_station_ids_xml(body: &str) -> Result<Vec<String>, ServiceError> {
    let inner = wrap_fragment(&unwrap_envelope(body, "station listing")?);
    let doc = roxmltree::Document::parse(&inner).map_err(|e| malformed_xml("station listing", e))?;

    doc.descendants()
        .filter(|node| node.has_tag_name(STATION_ELEMENT))
        .map(|node| {
            let id = element_text(node);
            let id = id.trim();
            if id.is_empty() {
                Err(ServiceError::MalformedRecord(
                    "station listing: empty <station> element".to_string(),
                ))
            } else {
                Ok(id.to_string())
            }
        })
        .collect()
}

fn parse_rack_xml(body: &str) -> Result<RawRack, ServiceError> {
    let inner = wrap_fragment(&unwrap_envelope(body, "rack details")?);
    let doc = roxmltree::Document::parse(&inner).map_err(|e| malformed_xml("rack details", e))?;

    let station = doc
        .descendants()
        .find(|node| node.has_tag_name(STATION_ELEMENT))
        .ok_or_else(|| ServiceError::MalformedRecord("rack details: no <station> element".to_string()))?;

    let field = |name: &str| -> Option<Value> {
        station
            .children()
            .find(|child| child.is_element() && child.has_tag_name(name))
            .map(element_text)
            .map(Value::String)
    };

    // The upstream service spells longitude `longitute`.
    let [description, latitude, longitude, ready_bikes, empty_locks, online] =
        RACK_FIELDS.map(&field);
    Ok(RawRack {
        description,
        latitude,
        longitude: longitude.or_else(|| field("longitute")),
        ready_bikes,
        empty_locks,
        online,
    })
}

/// Text of the ASMX `<string>` envelope, entities already unescaped. A body
/// that is not an envelope is returned as is.
fn unwrap_envelope(body: &str, what: &str) -> Result<String, ServiceError> {
    let outer = roxmltree::Document::parse(body.trim()).map_err(|e| malformed_xml(what, e))?;
    let root = outer.root_element();
    if root.has_tag_name("string") {
        Ok(element_text(root))
    } else {
        Ok(body.to_string())
    }
}

/// Put an inner document under a synthetic root, so a fragment with
/// several top-level elements still parses.
fn wrap_fragment(inner: &str) -> String {
    format!("<result>{}</result>", strip_declaration(inner.trim()))
}

fn malformed_xml(what: &str, err: roxmltree::Error) -> ServiceError {
    ServiceError::MalformedRecord(format!("{}: {}", what, err))
}

fn strip_declaration(xml: &str) -> &str {
    xml.strip_prefix("<?xml")
        .and_then(|rest| rest.find("?>").map(|end| rest[end + 2..].trim_start()))
        .unwrap_or(xml)
}

/// Concatenated text content of an element and its descendants.
fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
