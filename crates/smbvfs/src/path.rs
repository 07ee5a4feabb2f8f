//! Virtual path model.
//!
//! Every location is addressed as `/<server>/<share>/<intra-share path>`.
//! The bare root lists connected servers, a single segment names a server
//! (and lists its shares), anything deeper lives inside a share.

use {
    crate::error::Error,
    std::{fmt, str::FromStr},
};

/// Separator used by the wire protocol inside a share.
pub const WIRE_SEPARATOR: char = '\\';

/// An absolute, normalized virtual path.
///
/// Segments are never empty, `.` or `..`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn root() -> VirtualPath {
        VirtualPath::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Join `input` onto this path without normalizing.
    ///
    /// An absolute `input` discards `self`; an empty one yields `self`.
    pub fn combine(&self, input: &str) -> String {
        if input.is_empty() {
            self.to_string()
        } else if input.starts_with('/') {
            input.to_owned()
        } else {
            format!("{}/{}", self, input)
        }
    }

    /// Normalize a raw slash separated path.
    ///
    /// Empty and `.` segments are dropped, `..` pops the previous segment.
    /// Returns `None` when `..` would climb above the root.
    pub fn normalize(raw: &str) -> Option<VirtualPath> {
        let mut segments: Vec<String> = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    segments.pop()?;
                }
                _ => segments.push(seg.to_owned()),
            }
        }

        Some(VirtualPath { segments })
    }

    /// Resolve `input` relative to this path.
    pub fn resolve(&self, input: &str) -> Option<VirtualPath> {
        VirtualPath::normalize(&self.combine(input))
    }

    /// Split into server, share and intra-share path.
    ///
    /// Fails on the root. When `require_share` is set a path naming only a
    /// server fails as well; otherwise the share comes back empty.
    pub fn parse(&self, require_share: bool) -> Option<SharePath> {
        let server = self.segments.first()?.clone();
        let share = self.segments.get(1).cloned().unwrap_or_default();
        if require_share && share.is_empty() {
            return None;
        }

        let path = match self.segments.get(2..) {
            Some(rest) if !rest.is_empty() => format!("/{}", rest.join("/")),
            _ => "/".to_owned(),
        };

        Some(SharePath {
            server,
            share,
            path,
        })
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl FromStr for VirtualPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VirtualPath::normalize(s).ok_or_else(|| Error::PathInvalid(s.to_owned()))
    }
}

/// A virtual path split at the share boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharePath {
    /// Server name or dotted-quad address.
    pub server: String,
    /// Share name, empty when only the server was named.
    pub share: String,
    /// Slash separated path inside the share, always starting with `/`.
    pub path: String,
}

impl SharePath {
    pub fn is_share_root(&self) -> bool {
        self.path == "/"
    }

    pub fn wire_path(&self) -> String {
        to_wire(&self.path)
    }

    /// Pattern matching every entry of the directory at `path`.
    pub fn wire_glob(&self) -> String {
        format!("{}{}*", self.wire_path(), WIRE_SEPARATOR)
    }
}

/// Convert an intra-share path to the protocol's native form.
///
/// The share root maps to the empty string.
pub fn to_wire(path: &str) -> String {
    if path == "/" {
        String::new()
    } else {
        path.replace('/', &WIRE_SEPARATOR.to_string())
    }
}
