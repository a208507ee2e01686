use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Kind of location an input hash is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrlType {
    /// A file on the local file system.
    File,
    /// A URL in the content index.
    Content,
}

impl fmt::Display for UrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Content => f.write_str("content"),
        }
    }
}

impl FromStr for UrlType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "content" => Ok(Self::Content),
            other => Err(TypeError::UnknownUrlType(other.to_string())),
        }
    }
}
