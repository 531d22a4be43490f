//! Negotiated session binding a submission endpoint to one event stream.

use url::Url;

/// A session established from the bootstrap frame of an event stream.
///
/// A `Session` can only be built from its submission endpoint, so the token
/// always matches the endpoint's query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    endpoint: Url,
    param: String,
    token: String,
}

impl Session {
    /// Build a session from an absolute endpoint URL carrying `param` in its query.
    ///
    /// Returns `None` when the parameter is missing or empty.
    pub fn from_endpoint(endpoint: Url, param: &str) -> Option<Self> {
        let token = endpoint
            .query_pairs()
            .find(|(key, _)| key == param)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())?;

        Some(Self {
            endpoint,
            param: param.to_string(),
            token,
        })
    }

    /// The opaque session token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Where requests for this session are submitted.
    pub fn submission_endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Name of the query parameter carrying the token.
    pub fn session_param(&self) -> &str {
        &self.param
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.token, self.endpoint)
    }
}
