//! URI addressable inputs and outputs.
//!
//! A `Resource` pairs a parsed `Location` with the `ResourceFormat` resolved for it.
//! Reading applies decompression and writing applies compression, so the codecs only
//! ever see plain byte streams.

mod format;
mod object;

use flate2::Compression as GzLevel;
use reqwest::StatusCode;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use format::{Codec, Compression, ResourceFormat};
pub use object::{Backends, ObjectClient};
#[cfg(test)]
pub use object::memory::MemoryObjectClient;

pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("unknown resource scheme {0:?}")]
    UnknownScheme(String),

    #[error("invalid resource uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },

    #[error("unsupported format {format:?} for {uri}")]
    UnsupportedFormat { uri: String, format: String },

    #[error("bzip2 compression is not supported for outputs ({0})")]
    Bzip2Output(String),

    #[error("{operation} is not supported for {uri}")]
    Unsupported { operation: &'static str, uri: String },

    #[error("no {scheme} client is configured for {uri}")]
    NoClient { scheme: &'static str, uri: String },

    #[error("I/O error on {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP request for {uri} returned status {status}")]
    HttpStatus { uri: String, status: u16 },

    #[error("HTTP request for {uri} failed: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Stream(Stream),
    File(PathBuf),
    Http(String),
    S3 { bucket: String, key: String },
    Hdfs { namenode: String, path: String },
}

const SCHEMES: [&str; 5] = ["file", "http", "https", "s3", "hdfs"];

impl Location {
    pub fn parse(uri: &str) -> Result<Self, ResourceError> {
        match uri {
            "stdin" => return Ok(Location::Stream(Stream::Stdin)),
            "stdout" => return Ok(Location::Stream(Stream::Stdout)),
            "stderr" => return Ok(Location::Stream(Stream::Stderr)),
            "" => {
                return Err(ResourceError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "empty uri",
                });
            }
            _ => {}
        }

        let lower = uri.to_ascii_lowercase();
        let split = SCHEMES.iter().find_map(|scheme| {
            lower
                .strip_prefix(scheme)
                .and_then(|rest| rest.strip_prefix("://"))
                .map(|_| (*scheme, &uri[scheme.len() + 3..]))
        });

        let Some((scheme, rest)) = split else {
            if let Some((scheme, _)) = uri.split_once("://") {
                return Err(ResourceError::UnknownScheme(scheme.to_string()));
            }
            return Ok(Location::File(expand_home(uri)));
        };

        match scheme {
            "file" => Ok(Location::File(expand_home(rest))),
            "http" | "https" => Ok(Location::Http(uri.to_string())),
            "s3" => {
                let (bucket, key) = split_container(uri, rest)?;
                Ok(Location::S3 { bucket, key })
            }
            _ => {
                let (namenode, path) = split_container(uri, rest)?;
                Ok(Location::Hdfs { namenode, path })
            }
        }
    }

    /// Path-like tail used for format inference.
    fn name(&self) -> Option<String> {
        match self {
            Location::Stream(_) => None,
            Location::File(path) => Some(path.to_string_lossy().into_owned()),
            Location::Http(url) => Some(
                url.split(['?', '#'])
                    .next()
                    .unwrap_or(url)
                    .to_string(),
            ),
            Location::S3 { key, .. } => Some(key.clone()),
            Location::Hdfs { path, .. } => Some(path.clone()),
        }
    }
}

fn split_container(uri: &str, rest: &str) -> Result<(String, String), ResourceError> {
    match rest.split_once('/') {
        Some((container, key)) if !container.is_empty() && !key.is_empty() => {
            Ok((container.to_string(), key.to_string()))
        }
        _ => Err(ResourceError::InvalidUri {
            uri: uri.to_string(),
            reason: "path does not include a directory",
        }),
    }
}

/// Maps a HEAD status to existence. Only 404 means absent; any other failure is an
/// error.
fn http_exists(status: StatusCode, uri: &str) -> Result<bool, ResourceError> {
    if status.is_success() {
        Ok(true)
    } else if status == StatusCode::NOT_FOUND {
        Ok(false)
    } else {
        Err(ResourceError::HttpStatus {
            uri: uri.to_string(),
            status: status.as_u16(),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if let Some(rest) = path.strip_prefix("~/") {
                expanded.push(rest);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// Plain byte destination underneath any compression.
enum Destination {
    File(BufWriter<File>),
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    Object {
        client: Arc<dyn ObjectClient>,
        container: String,
        key: String,
        buffer: Vec<u8>,
    },
}

impl Write for Destination {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Destination::File(w) => w.write(buf),
            Destination::Stdout(w) => w.write(buf),
            Destination::Stderr(w) => w.write(buf),
            Destination::Object { buffer, .. } => buffer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Destination::File(w) => w.flush(),
            Destination::Stdout(w) => w.flush(),
            Destination::Stderr(w) => w.flush(),
            Destination::Object { .. } => Ok(()),
        }
    }
}

impl Destination {
    fn finish(self) -> io::Result<()> {
        match self {
            Destination::File(mut w) => {
                w.flush()?;
                w.into_inner().map_err(|e| e.into_error())?.sync_all()
            }
            Destination::Stdout(mut w) => w.flush(),
            Destination::Stderr(mut w) => w.flush(),
            Destination::Object {
                client,
                container,
                key,
                buffer,
            } => client.put(&container, &key, buffer),
        }
    }
}

enum Encoded {
    Plain(Destination),
    Gzip(GzEncoder<Destination>),
}

/// Writer returned by [`Resource::create`]. Must be closed with [`OutputStream::finish`];
/// dropping it may lose buffered data.
pub struct OutputStream {
    uri: String,
    inner: Encoded,
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Encoded::Plain(w) => w.write(buf),
            Encoded::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Encoded::Plain(w) => w.flush(),
            Encoded::Gzip(w) => w.flush(),
        }
    }
}

impl OutputStream {
    pub fn finish(self) -> Result<(), ResourceError> {
        let uri = self.uri;
        let destination = match self.inner {
            Encoded::Plain(w) => w,
            Encoded::Gzip(w) => w.finish().map_err(|source| ResourceError::Io {
                uri: uri.clone(),
                source,
            })?,
        };
        destination
            .finish()
            .map_err(|source| ResourceError::Io { uri, source })
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    uri: String,
    location: Location,
    format: ResourceFormat,
}

impl Resource {
    fn resolve(uri: &str, format: Option<&str>) -> Result<Self, ResourceError> {
        let location = Location::parse(uri)?;
        let format = match (format, location.name()) {
            (Some(name), _) => ResourceFormat::from_name(uri, name)?,
            (None, Some(name)) => ResourceFormat::from_path(uri, &name)?,
            (None, None) => ResourceFormat::OSM,
        };
        Ok(Self {
            uri: uri.to_string(),
            location,
            format,
        })
    }

    /// A readable resource. Only OSM XML (optionally gzip or bzip2 compressed) is accepted.
    pub fn input(uri: &str, format: Option<&str>) -> Result<Self, ResourceError> {
        let resource = Self::resolve(uri, format)?;
        if matches!(resource.location, Location::Stream(Stream::Stdout | Stream::Stderr)) {
            return Err(ResourceError::Unsupported {
                operation: "reading",
                uri: uri.to_string(),
            });
        }
        resource.format.validate_input(uri)?;
        Ok(resource)
    }

    /// A writable resource. Bzip2 compression is rejected here, before any work starts.
    pub fn output(uri: &str, format: Option<&str>) -> Result<Self, ResourceError> {
        let resource = Self::resolve(uri, format)?;
        if matches!(resource.location, Location::Stream(Stream::Stdin) | Location::Http(_)) {
            return Err(ResourceError::Unsupported {
                operation: "writing",
                uri: uri.to_string(),
            });
        }
        resource.format.validate_output(uri)?;
        Ok(resource)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.location, Location::Stream(_))
    }

    fn io_error(&self, source: io::Error) -> ResourceError {
        ResourceError::Io {
            uri: self.uri.clone(),
            source,
        }
    }

    fn http_error(&self, source: reqwest::Error) -> ResourceError {
        ResourceError::Http {
            uri: self.uri.clone(),
            source,
        }
    }

    fn object_client<'a>(
        &self,
        backends: &'a Backends,
    ) -> Result<Option<(&'a Arc<dyn ObjectClient>, String, String)>, ResourceError> {
        let (client, scheme, container, key) = match &self.location {
            Location::S3 { bucket, key } => (&backends.s3, "s3", bucket, key),
            Location::Hdfs { namenode, path } => (&backends.hdfs, "hdfs", namenode, path),
            _ => return Ok(None),
        };
        let client = client.as_ref().ok_or_else(|| ResourceError::NoClient {
            scheme,
            uri: self.uri.clone(),
        })?;
        Ok(Some((client, container.clone(), key.clone())))
    }

    fn http_client(&self) -> Result<reqwest::blocking::Client, ResourceError> {
        reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| self.http_error(e))
    }

    /// Whether the resource is already present. Streams never are.
    pub fn exists(&self, backends: &Backends) -> Result<bool, ResourceError> {
        if let Some((client, container, key)) = self.object_client(backends)? {
            return client.exists(&container, &key).map_err(|e| self.io_error(e));
        }
        match &self.location {
            Location::Stream(_) => Ok(false),
            Location::File(path) => Ok(path.exists()),
            Location::Http(url) => {
                let response = self
                    .http_client()?
                    .head(url)
                    .send()
                    .map_err(|e| self.http_error(e))?;
                http_exists(response.status(), &self.uri)
            }
            Location::S3 { .. } | Location::Hdfs { .. } => Ok(false),
        }
    }

    /// Size in bytes when the backend reports one.
    pub fn stat(&self, backends: &Backends) -> Result<Option<u64>, ResourceError> {
        if let Some((client, container, key)) = self.object_client(backends)? {
            return client.size(&container, &key).map(Some).map_err(|e| self.io_error(e));
        }
        match &self.location {
            Location::Stream(_) => Ok(None),
            Location::File(path) => std::fs::metadata(path)
                .map(|m| Some(m.len()))
                .map_err(|e| self.io_error(e)),
            Location::Http(url) => {
                let response = self
                    .http_client()?
                    .head(url)
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| self.http_error(e))?;
                Ok(response.content_length())
            }
            Location::S3 { .. } | Location::Hdfs { .. } => Ok(None),
        }
    }

    pub fn remove(&self, backends: &Backends) -> Result<(), ResourceError> {
        if let Some((client, container, key)) = self.object_client(backends)? {
            return client.delete(&container, &key).map_err(|e| self.io_error(e));
        }
        match &self.location {
            Location::Stream(_) => Ok(()),
            Location::File(path) => std::fs::remove_file(path).map_err(|e| self.io_error(e)),
            _ => Err(ResourceError::Unsupported {
                operation: "removing",
                uri: self.uri.clone(),
            }),
        }
    }

    /// Opens the resource for reading with decompression applied.
    pub fn open(&self, backends: &Backends, buffer_size: usize) -> Result<Box<dyn BufRead + Send>, ResourceError> {
        let raw: Box<dyn Read + Send> = if let Some((client, container, key)) = self.object_client(backends)? {
            let bytes = client.get(&container, &key).map_err(|e| self.io_error(e))?;
            Box::new(Cursor::new(bytes))
        } else {
            match &self.location {
                Location::Stream(_) => Box::new(io::stdin()),
                Location::File(path) => Box::new(File::open(path).map_err(|e| self.io_error(e))?),
                Location::Http(url) => Box::new(
                    self.http_client()?
                        .get(url)
                        .send()
                        .and_then(|r| r.error_for_status())
                        .map_err(|e| self.http_error(e))?,
                ),
                Location::S3 { .. } | Location::Hdfs { .. } => {
                    return Err(ResourceError::Unsupported {
                        operation: "reading",
                        uri: self.uri.clone(),
                    });
                }
            }
        };

        let capacity = buffer_size.max(1);
        Ok(match self.format.compression {
            Compression::None => Box::new(BufReader::with_capacity(capacity, raw)),
            Compression::Gzip => Box::new(BufReader::with_capacity(capacity, MultiGzDecoder::new(raw))),
            Compression::Bzip2 => Box::new(BufReader::with_capacity(
                capacity,
                bzip2::read::MultiBzDecoder::new(raw),
            )),
        })
    }

    /// Creates (or truncates) the resource for writing with compression applied.
    pub fn create(&self, backends: &Backends) -> Result<OutputStream, ResourceError> {
        let destination = if let Some((client, container, key)) = self.object_client(backends)? {
            Destination::Object {
                client: Arc::clone(client),
                container,
                key,
                buffer: Vec::new(),
            }
        } else {
            match &self.location {
                Location::Stream(Stream::Stdout) => Destination::Stdout(io::stdout()),
                Location::Stream(Stream::Stderr) => Destination::Stderr(io::stderr()),
                Location::File(path) => {
                    if let Some(parent) = path.parent()
                        && !parent.as_os_str().is_empty()
                    {
                        std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
                    }
                    Destination::File(BufWriter::new(File::create(path).map_err(|e| self.io_error(e))?))
                }
                _ => {
                    return Err(ResourceError::Unsupported {
                        operation: "writing",
                        uri: self.uri.clone(),
                    });
                }
            }
        };

        let inner = match self.format.compression {
            Compression::Gzip => Encoded::Gzip(GzEncoder::new(destination, GzLevel::default())),
            Compression::None => Encoded::Plain(destination),
            Compression::Bzip2 => return Err(ResourceError::Bzip2Output(self.uri.clone())),
        };
        Ok(OutputStream {
            uri: self.uri.clone(),
            inner,
        })
    }
}
