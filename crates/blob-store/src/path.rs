use crate::BlobStoreError;
use percent_encoding::percent_decode_str;
use std::fmt::{Display, Formatter};
use url::Url;

/// The location of a blob: a container and a `/`-separated name inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobPath {
    container: String,
    name: String,
}

impl BlobPath {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path of the sibling blob with `suffix` appended to the name.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self::new(self.container.clone(), format!("{}{suffix}", self.name))
    }

    /// Returns the segments of the blob name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name.split('/')
    }

    /// Ensures the path is usable by every backend.
    ///
    /// Names must not be empty, must not start with a slash and must not
    /// contain `.` or `..` segments.
    pub fn validate(&self) -> Result<(), BlobStoreError> {
        let valid_container = !self.container.is_empty()
            && !self.container.contains('/')
            && !self.container.starts_with('.');
        if !valid_container {
            return Err(BlobStoreError::InvalidPath(self.to_string()));
        }

        let valid_name = !self.name.is_empty()
            && self
                .segments()
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !valid_name {
            return Err(BlobStoreError::InvalidPath(self.to_string()));
        }

        Ok(())
    }

    /// Appends the container and name as path segments of `base`.
    pub fn append_to_url(&self, mut base: Url) -> Url {
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop_if_empty();
            segments.push(&self.container);
            segments.extend(self.segments());
        }
        base
    }

    /// Parses the container and name from the path segments of a URL,
    /// skipping the first `skip` segments.
    pub fn from_url_segments(url: &Url, skip: usize) -> Result<Self, BlobStoreError> {
        let invalid = || BlobStoreError::InvalidPath(url.to_string());
        let mut segments = url.path_segments().ok_or_else(invalid)?.skip(skip);

        let container = segments.next().map(decode_segment).ok_or_else(invalid)?;
        let name = segments.map(decode_segment).collect::<Vec<_>>().join("/");

        let path = Self::new(container, name);
        path.validate()?;
        Ok(path)
    }
}

impl Display for BlobPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Decodes a percent-encoded URL path segment.
pub fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
