//! Record identifiers derived from detail-page URLs.
//!
//! A detail page lives at `.../digital-collection/<TYPE>/<NUMBER>`; its
//! identifier is `<TYPE>_<NUMBER>`. The mapping is reversible given the
//! collection base URL.

use std::fmt;

use url::Url;

use crate::error::IdentifierError;

const MARKER: &str = "digital-collection";

/// Stable key of one artwork, used to name its output files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    kind: String,
    number: String,
}

impl RecordId {
    /// Derives the identifier from a detail-page URL.
    ///
    /// Query string and fragment are ignored. The path must end in exactly
    /// two non-empty segments after the `digital-collection` marker, and
    /// neither may contain `_`.
    pub fn from_url(url: &Url) -> Result<Self, IdentifierError> {
        let invalid = |reason| IdentifierError {
            url: url.to_string(),
            reason,
        };

        let segments: Vec<&str> = url
            .path_segments()
            .ok_or_else(|| invalid("URL has no path"))?
            .collect();

        let marker = segments
            .iter()
            .rposition(|s| *s == MARKER)
            .ok_or_else(|| invalid("missing `digital-collection` segment"))?;

        let [kind, number] = &segments[marker + 1..] else {
            return Err(invalid(
                "expected exactly two segments after `digital-collection`",
            ));
        };

        if kind.is_empty() || number.is_empty() {
            return Err(invalid("empty segment after `digital-collection`"));
        }
        if kind.contains('_') || number.contains('_') {
            return Err(invalid("segment contains `_`"));
        }

        Ok(Self {
            kind: kind.to_string(),
            number: number.to_string(),
        })
    }

    /// Parses an identifier of the form `<TYPE>_<NUMBER>`.
    pub fn parse(id: &str) -> Option<Self> {
        let (kind, number) = id.split_once('_')?;
        if kind.is_empty() || number.is_empty() || number.contains('_') {
            return None;
        }
        if kind.contains('/') || number.contains('/') {
            return None;
        }
        Some(Self {
            kind: kind.to_string(),
            number: number.to_string(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Rebuilds the canonical detail URL under `collection`, which must end
    /// with the `digital-collection/` segment.
    pub fn canonical_url(&self, collection: &Url) -> Result<Url, url::ParseError> {
        // `./` keeps a kind such as `a:b` from parsing as a scheme
        collection.join(&format!("./{}/{}", self.kind, self.number))
    }

    pub fn metadata_file(&self) -> String {
        format!("{self}.json")
    }

    pub fn image_file(&self) -> String {
        format!("{self}.jpg")
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.number)
    }
}
