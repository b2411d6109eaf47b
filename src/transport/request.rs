//! Request descriptors handed to a [`Transport`](super::Transport).
//!
//! The multiplexer treats a descriptor as opaque; only transports look
//! inside it.

use bytes::Bytes;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

/// One request against the database's HTTP interface.
///
/// # Example
///
/// ```ignore
/// use chmux::transport::RequestDescriptor;
///
/// let request = RequestDescriptor::query("SELECT count() FROM hits")
///     .database("events")
///     .format("JSON")
///     .setting("max_threads", "4");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: HttpMethod,
    /// SQL text.
    pub sql: String,
    /// URL parameters (database, default_format, server settings).
    pub params: Vec<(String, String)>,
    /// Data sent alongside the query (e.g. rows for an INSERT).
    pub data: Option<Bytes>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    /// Start a POST request carrying `sql`.
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// Start a GET request carrying `sql` (read-only on the server).
    pub fn get(sql: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            ..Self::query(sql)
        }
    }

    pub fn database(self, database: impl Into<String>) -> Self {
        self.param("database", database)
    }

    /// Ask the server to answer in `format` unless the SQL names one.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.param("default_format", format)
    }

    /// Set a server-side setting for this request only.
    pub fn setting(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.param(name, value)
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(key, _)| *key == name) {
            Some(existing) => existing.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Split into URL parameters and request body.
    ///
    /// Without data the SQL travels in the body; with data (or for GET) it
    /// moves to the `query` parameter.
    pub fn wire_parts(&self) -> (Vec<(String, String)>, Bytes) {
        let mut params = self.params.clone();
        match (&self.data, self.method) {
            (None, HttpMethod::Post) => (params, Bytes::from(self.sql.clone())),
            (data, _) => {
                params.push(("query".to_string(), self.sql.clone()));
                (params, data.clone().unwrap_or_default())
            }
        }
    }
}
