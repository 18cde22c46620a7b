use std::fmt;

use super::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Osm,
    GeoJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

/// Document codec plus byte-stream compression, resolved once per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceFormat {
    pub codec: Codec,
    pub compression: Compression,
}

impl ResourceFormat {
    pub const OSM: ResourceFormat = ResourceFormat {
        codec: Codec::Osm,
        compression: Compression::None,
    };

    /// Parses a format name such as `osm`, `osm.gz`, `geojson` or `geojson.gz`.
    pub fn from_name(uri: &str, name: &str) -> Result<Self, ResourceError> {
        let lower = name.trim().trim_start_matches('.').to_ascii_lowercase();
        let (base, compression) = if let Some(base) = lower.strip_suffix(".gz") {
            (base, Compression::Gzip)
        } else if let Some(base) = lower.strip_suffix(".bz2") {
            (base, Compression::Bzip2)
        } else {
            (lower.as_str(), Compression::None)
        };

        let codec = match base {
            "osm" | "xml" => Codec::Osm,
            "geojson" => Codec::GeoJson,
            _ => {
                return Err(ResourceError::UnsupportedFormat {
                    uri: uri.to_string(),
                    format: name.to_string(),
                });
            }
        };
        Ok(Self { codec, compression })
    }

    /// Infers the format from the trailing extensions of `path`.
    pub fn from_path(uri: &str, path: &str) -> Result<Self, ResourceError> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
        let mut parts = file_name.rsplitn(3, '.');
        let last = parts.next().unwrap_or_default();
        let previous = parts.next();
        let has_stem = parts.next().is_some();

        let name = match (previous, last) {
            (Some(base), "gz" | "bz2") if has_stem => format!("{base}.{last}"),
            (Some(_), ext) => ext.to_string(),
            (None, _) => {
                return Err(ResourceError::UnsupportedFormat {
                    uri: uri.to_string(),
                    format: String::new(),
                });
            }
        };
        Self::from_name(uri, &name)
    }

    pub fn validate_input(&self, uri: &str) -> Result<(), ResourceError> {
        if self.codec != Codec::Osm {
            return Err(ResourceError::UnsupportedFormat {
                uri: uri.to_string(),
                format: format!("{} (output only)", self),
            });
        }
        Ok(())
    }

    pub fn validate_output(&self, uri: &str) -> Result<(), ResourceError> {
        if self.compression == Compression::Bzip2 {
            return Err(ResourceError::Bzip2Output(uri.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codec = match self.codec {
            Codec::Osm => "osm",
            Codec::GeoJson => "geojson",
        };
        match self.compression {
            Compression::None => write!(f, "{codec}"),
            Compression::Gzip => write!(f, "{codec}.gz"),
            Compression::Bzip2 => write!(f, "{codec}.bz2"),
        }
    }
}
