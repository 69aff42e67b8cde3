//! CAS protocol URL construction.

use std::fmt;
use url::Url;

/// URL builder for CAS endpoints and service URLs.
///
/// Derivation operations return a new value and never mutate the receiver;
/// `Clone` is the explicit duplication operation when a chain of derivations
/// should start from a shared base. Query parameter insertion order is
/// preserved on serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasUrl {
    inner: Url,
}

impl CasUrl {
    /// # Errors
    /// Returns an error if `input` is not an absolute URL.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(|inner| Self { inner })
    }

    /// Append one path segment, keeping exactly one slash at the joint.
    #[must_use]
    pub fn append_path(&self, segment: &str) -> Self {
        let mut url = self.inner.clone();
        let segment = segment.trim_start_matches('/');
        let path = if url.path().ends_with('/') {
            format!("{}{segment}", url.path())
        } else {
            format!("{}/{segment}", url.path())
        };
        url.set_path(&path);
        Self { inner: url }
    }

    /// Add one query parameter, overwriting any same-named key.
    #[must_use]
    pub fn add_param(&self, key: &str, value: &str) -> Self {
        self.add_params(&[(key, value)])
    }

    /// Add query parameters, overwriting same-named keys. Existing
    /// parameters keep their relative order; the new ones are appended in
    /// the order given.
    #[must_use]
    pub fn add_params(&self, params: &[(&str, &str)]) -> Self {
        let mut url = self.inner.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !params.iter().any(|(new_key, _)| key == new_key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut serializer = url.query_pairs_mut();
            serializer.clear();
            for (key, value) in &retained {
                serializer.append_pair(key, value);
            }
            for (key, value) in params {
                serializer.append_pair(key, value);
            }
        }
        Self { inner: url }
    }

    /// Remove every occurrence of a named query parameter.
    #[must_use]
    pub fn remove_param(&self, key: &str) -> Self {
        let mut url = self.inner.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(existing, _)| existing != key)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if retained.is_empty() {
            url.set_query(None);
        } else {
            let mut serializer = url.query_pairs_mut();
            serializer.clear();
            for (key, value) in &retained {
                serializer.append_pair(key, value);
            }
        }
        Self { inner: url }
    }

    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.inner
            .query_pairs()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.into_owned())
    }

    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.inner
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.inner
    }
}

impl fmt::Display for CasUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<Url> for CasUrl {
    fn from(inner: Url) -> Self {
        Self { inner }
    }
}
