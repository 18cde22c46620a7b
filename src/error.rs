use thiserror::Error;

use crate::dfl::ExpressionError;

#[derive(Debug, Error)]
pub enum PlanetError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("invalid {attribute} {value:?} on {element}")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },

    #[error("missing {attribute} on {element}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("invalid timestamp {value:?} on {element}")]
    InvalidTimestamp { element: &'static str, value: String },

    #[error("way {way} references node {node}, which is not declared in the document")]
    DanglingReference { way: u64, node: u64 },

    #[error("{kind} with id {id} already exists at position {position}; it might be present in multiple inputs")]
    DuplicateId {
        kind: &'static str,
        id: u64,
        position: usize,
    },

    #[error("way {0} has no node references; its centroid is undefined")]
    EmptyWay(u64),

    #[error("document has no <osm> root element")]
    MissingRoot,

    #[error(transparent)]
    Filter(#[from] FilterError),
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid number of bounding box values {0}, expected 4")]
    BoundingBox(usize),

    #[error("failed to compile expression {source_text:?}: {message}")]
    Compile {
        source_text: String,
        message: String,
    },

    #[error("failed to evaluate expression: {0}")]
    Evaluate(#[from] ExpressionError),

    #[error("CEL evaluation failed: {0}")]
    Cel(String),

    #[error("expression returned {0}, expected a boolean")]
    NotBoolean(String),
}
