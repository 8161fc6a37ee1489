//! Route table documents
//!
//! ```xml
//! <unicastTable>
//!   <search peer="9" id="9:0" sender="1" kind="Generic">
//!     <parameter value="I-A"/>
//!   </search>
//!   <route dest="9" through="1" id="9:0" distance="2"/>
//! </unicastTable>
//! ```
//!
//! `id`, `sender`, `kind` and `distance` are optional on read.

use super::{parse_attr, read_file, write_file, PersistError};
use crate::message::{SearchKind, SearchedParameter};
use crate::parameter::Parameter;
use crate::peer::{MessageId, PeerId};
use crate::search::{ActiveSearch, RouteTable};
use crate::taxonomy::Taxonomy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const ROOT: &str = "unicastTable";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RouteTableDoc {
    #[serde(rename = "search", default)]
    searches: Vec<SearchElement>,
    #[serde(rename = "route", default)]
    routes: Vec<RouteElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchElement {
    #[serde(rename = "@peer")]
    peer: String,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "@sender", default, skip_serializing_if = "Option::is_none")]
    sender: Option<String>,
    #[serde(rename = "@kind", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(rename = "parameter", default)]
    parameters: Vec<ValueElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValueElement {
    #[serde(rename = "@value")]
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RouteElement {
    #[serde(rename = "@dest")]
    dest: String,
    #[serde(rename = "@through")]
    through: String,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "@distance", default, skip_serializing_if = "Option::is_none")]
    distance: Option<String>,
}

pub fn route_table_to_xml(table: &RouteTable) -> Result<String, PersistError> {
    let doc = RouteTableDoc {
        searches: table
            .active_searches()
            .map(|s| SearchElement {
                peer: s.source().to_string(),
                id: Some(s.id.to_string()),
                sender: Some(s.sender.to_string()),
                kind: Some(s.kind.to_string()),
                parameters: s
                    .parameters
                    .keys()
                    .map(|p| ValueElement {
                        value: p.to_string(),
                    })
                    .collect(),
            })
            .collect(),
        routes: table
            .routes()
            .map(|r| RouteElement {
                dest: r.dest.to_string(),
                through: r.through.to_string(),
                id: Some(r.route_id.to_string()),
                distance: Some(r.distance.to_string()),
            })
            .collect(),
    };
    Ok(quick_xml::se::to_string_with_root(ROOT, &doc)?)
}

/// Rebuild a route table owned by `host`. Searches without an id get fresh
/// sequence numbers under their origin; searched parameters restart with a
/// full `max_ttl`.
pub fn route_table_from_xml(
    xml: &str,
    host: PeerId,
    taxonomy: Arc<dyn Taxonomy>,
    max_ttl: u32,
) -> Result<RouteTable, PersistError> {
    let doc: RouteTableDoc = quick_xml::de::from_str(xml)?;
    let mut table = RouteTable::new(host, taxonomy);
    let mut fresh: u32 = u32::MAX;

    for element in doc.searches {
        let origin: PeerId = parse_attr("peer", &element.peer)?;
        let id = match element.id.as_deref() {
            Some(value) => parse_attr::<MessageId>("id", value)?,
            None => {
                fresh -= 1;
                MessageId::new(origin, fresh)
            }
        };
        let sender = match element.sender.as_deref() {
            Some(value) => parse_attr("sender", value)?,
            None => origin,
        };
        let kind = match element.kind.as_deref().map(str::trim) {
            None | Some("") | Some("Exact") => SearchKind::Exact,
            Some("Generic") => SearchKind::Generic,
            Some(other) => {
                return Err(PersistError::InvalidAttribute {
                    attribute: "kind",
                    value: other.to_string(),
                })
            }
        };

        let mut parameters = BTreeMap::new();
        for value in element.parameters {
            let p: Parameter = value.value.parse()?;
            parameters.insert(p, SearchedParameter::new(max_ttl));
        }

        table.restore_search(ActiveSearch {
            id,
            sender,
            distance: 0,
            kind,
            parameters,
            payload: None,
        });
    }

    for element in doc.routes {
        let dest: PeerId = parse_attr("dest", &element.dest)?;
        let through: PeerId = parse_attr("through", &element.through)?;
        let id = match element.id.as_deref() {
            Some(value) => parse_attr::<MessageId>("id", value)?,
            None => {
                fresh -= 1;
                MessageId::new(dest, fresh)
            }
        };
        let distance = match element.distance.as_deref() {
            Some(value) => parse_attr("distance", value)?,
            None => 0,
        };
        table.restore_route(id, dest, through, distance);
    }

    Ok(table)
}

pub fn save_route_table(table: &RouteTable, path: &Path) -> Result<(), PersistError> {
    write_file(path, &route_table_to_xml(table)?)
}

pub fn load_route_table(
    path: &Path,
    host: PeerId,
    taxonomy: Arc<dyn Taxonomy>,
    max_ttl: u32,
) -> Result<RouteTable, PersistError> {
    route_table_from_xml(&read_file(path)?, host, taxonomy, max_ttl)
}
