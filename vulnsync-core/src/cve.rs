//! CVE JSON 4.0 documents, decoded only as far as triage needs

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Publication state of a CVE (`CVE_data_meta.STATE`)
///
/// The corpus may introduce states this crate does not know; those are kept
/// verbatim in `Other` and never need an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CveState {
    Public,
    Reserved,
    Reject,
    ReplacedBy,
    SplitFrom,
    MergedTo,
    Other(String),
}

impl CveState {
    pub fn as_str(&self) -> &str {
        match self {
            CveState::Public => "PUBLIC",
            CveState::Reserved => "RESERVED",
            CveState::Reject => "REJECT",
            CveState::ReplacedBy => "REPLACED_BY",
            CveState::SplitFrom => "SPLIT_FROM",
            CveState::MergedTo => "MERGED_TO",
            CveState::Other(s) => s,
        }
    }
}

impl fmt::Display for CveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for CveState {
    fn from(s: &str) -> Self {
        match s {
            "PUBLIC" => CveState::Public,
            "RESERVED" => CveState::Reserved,
            "REJECT" => CveState::Reject,
            "REPLACED_BY" => CveState::ReplacedBy,
            "SPLIT_FROM" => CveState::SplitFrom,
            "MERGED_TO" => CveState::MergedTo,
            other => CveState::Other(other.to_string()),
        }
    }
}

impl std::str::FromStr for CveState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CveState::from(s))
    }
}

impl Serialize for CveState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CveState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(CveState::from(s.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveMetadata {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ASSIGNER", default)]
    pub assigner: String,
    #[serde(rename = "STATE")]
    pub state: CveState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangString {
    #[serde(default)]
    pub lang: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub description_data: Vec<LangString>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refsource: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct References {
    #[serde(default)]
    pub reference_data: Vec<Reference>,
}

/// A decoded CVE record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cve {
    #[serde(rename = "CVE_data_meta")]
    pub metadata: CveMetadata,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub references: References,
}

impl Cve {
    /// Decode a CVE from its JSON file content
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn state(&self) -> CveState {
        self.metadata.state.clone()
    }

    pub fn is_public(&self) -> bool {
        self.metadata.state == CveState::Public
    }

    pub fn reference_urls(&self) -> impl Iterator<Item = &str> {
        self.references.reference_data.iter().map(|r| r.url.as_str())
    }

    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.description.description_data.iter().map(|d| d.value.as_str())
    }
}
