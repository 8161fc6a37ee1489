//! Capability table documents
//!
//! ```xml
//! <parameterTable>
//!   <parameter id="I-A">
//!     <entry distance="4" neighbor="1" optional="false"/>
//!   </parameter>
//!   <local id="I-A"/>
//! </parameterTable>
//! ```

use super::{parse_attr, read_file, write_file, PersistError};
use crate::dissemination::{CapabilityTable, DistanceEntry};
use crate::parameter::Parameter;
use crate::peer::PeerId;
use crate::taxonomy::Taxonomy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const ROOT: &str = "parameterTable";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableDoc {
    #[serde(rename = "parameter", default)]
    parameters: Vec<ParameterElement>,
    #[serde(rename = "local", default)]
    local: Vec<LocalElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParameterElement {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "entry", default)]
    entries: Vec<EntryElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryElement {
    #[serde(rename = "@distance")]
    distance: String,
    #[serde(rename = "@neighbor")]
    neighbor: String,
    #[serde(rename = "@optional", default)]
    optional: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalElement {
    #[serde(rename = "@id")]
    id: String,
}

pub fn capability_table_to_xml(table: &CapabilityTable) -> Result<String, PersistError> {
    let doc = TableDoc {
        parameters: table
            .rows()
            .map(|(p, distances)| ParameterElement {
                id: p.to_string(),
                entries: distances
                    .iter()
                    .map(|e| EntryElement {
                        distance: e.distance.to_string(),
                        neighbor: e.neighbor.to_string(),
                        optional: Some(e.optional.to_string()),
                    })
                    .collect(),
            })
            .collect(),
        local: table
            .local_parameters()
            .iter()
            .map(|p| LocalElement { id: p.to_string() })
            .collect(),
    };
    Ok(quick_xml::se::to_string_with_root(ROOT, &doc)?)
}

/// Rebuild a table owned by `host` from its XML form
pub fn capability_table_from_xml(
    xml: &str,
    host: PeerId,
    max_distance: u32,
    taxonomy: Arc<dyn Taxonomy>,
) -> Result<CapabilityTable, PersistError> {
    let doc: TableDoc = quick_xml::de::from_str(xml)?;
    let mut table = CapabilityTable::new(host, max_distance, taxonomy);

    for element in doc.parameters {
        let p: Parameter = element.id.parse()?;
        for entry in element.entries {
            let distance: u32 = parse_attr("distance", &entry.distance)?;
            let neighbor: PeerId = parse_attr("neighbor", &entry.neighbor)?;
            let optional = match entry.optional.as_deref().map(str::trim) {
                None | Some("") => false,
                Some(value) => parse_attr("optional", value)?,
            };
            let entry = if optional {
                DistanceEntry::optional(distance, neighbor)
            } else {
                DistanceEntry::new(distance, neighbor)
            };
            table.restore_entry(&p, entry);
        }
    }
    for local in doc.local {
        table.restore_local(local.id.parse()?);
    }

    debug!(peer = %host, groups = table.len(), "restored capability table");
    Ok(table)
}

pub fn save_capability_table(table: &CapabilityTable, path: &Path) -> Result<(), PersistError> {
    write_file(path, &capability_table_to_xml(table)?)
}

pub fn load_capability_table(
    path: &Path,
    host: PeerId,
    max_distance: u32,
    taxonomy: Arc<dyn Taxonomy>,
) -> Result<CapabilityTable, PersistError> {
    capability_table_from_xml(&read_file(path)?, host, max_distance, taxonomy)
}
