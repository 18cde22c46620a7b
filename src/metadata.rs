use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Authorship and versioning attributes shared by nodes, ways and relations.
///
/// The user name is not stored per element: the planet keeps a single
/// `uid -> name` table, so an element only carries the id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementMeta {
    pub id: u64,
    /// 0 means absent.
    pub version: u16,
    pub timestamp: Option<OffsetDateTime>,
    pub changeset: u64,
    pub uid: u64,
}

impl ElementMeta {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn timestamp_string(&self) -> Option<String> {
        self.timestamp.and_then(format_timestamp)
    }
}

pub fn drop_version(meta: &mut ElementMeta) {
    meta.version = 0;
}

pub fn drop_timestamp(meta: &mut ElementMeta) {
    meta.timestamp = None;
}

pub fn drop_changeset(meta: &mut ElementMeta) {
    meta.changeset = 0;
}

pub fn drop_user_id(meta: &mut ElementMeta) {
    meta.uid = 0;
}

/// Which element attributes a resource suppresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttributeDrops {
    pub version: bool,
    pub timestamp: bool,
    pub changeset: bool,
    pub user_id: bool,
    pub user_name: bool,
}

impl AttributeDrops {
    pub fn any(&self) -> bool {
        self.version || self.timestamp || self.changeset || self.user_id || self.user_name
    }

    pub fn apply(&self, meta: &mut ElementMeta) {
        if self.version {
            drop_version(meta);
        }
        if self.timestamp {
            drop_timestamp(meta);
        }
        if self.changeset {
            drop_changeset(meta);
        }
        if self.user_id {
            drop_user_id(meta);
        }
    }

    /// A copy of `meta` with the dropped attributes cleared.
    pub fn project(&self, meta: &ElementMeta) -> ElementMeta {
        let mut projected = meta.clone();
        self.apply(&mut projected);
        projected
    }
}

pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

pub fn format_timestamp(ts: OffsetDateTime) -> Option<String> {
    ts.format(&Rfc3339).ok()
}
