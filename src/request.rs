use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use url::Url;

use crate::cache::Fingerprint;
use crate::error::BuildError;
use crate::util::{parse_header_name, parse_header_value};

const APPLICATION_JSON: &str = "application/json";
const APPLICATION_FORM: &str = "application/x-www-form-urlencoded";

/// Request payload. A request carries at most one body representation.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Raw(Bytes),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Raw(bytes) => bytes.is_empty(),
            Self::Json(_) | Self::Form(_) => false,
        }
    }

    pub(crate) fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => Some(APPLICATION_JSON),
            Self::Form(_) => Some(APPLICATION_FORM),
            Self::Empty | Self::Raw(_) => None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Form(pairs) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (name, value) in pairs {
                    serializer.append_pair(name, value);
                }
                Bytes::from(serializer.finish())
            }
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

/// Fully-built, immutable request description.
///
/// Retries never modify a request in place: [`Request::with_header`] yields a
/// new value for the next attempt.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url.into())
    }

    pub fn get(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::DELETE, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target url, query pairs included.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn with_header(&self, name: HeaderName, value: HeaderValue) -> Self {
        let mut next = self.clone();
        next.headers.insert(name, value);
        next
    }

    pub(crate) fn with_default_headers(mut self, defaults: &HeaderMap) -> Self {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: Body,
}

impl RequestBuilder {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, BuildError> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn query<T>(mut self, params: &T) -> Result<Self, BuildError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params)
            .map_err(|source| BuildError::SerializeForm { source })?;
        self.query_pairs.extend(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        );
        Ok(self)
    }

    pub fn json<T>(mut self, payload: &T) -> Result<Self, BuildError>
    where
        T: Serialize + ?Sized,
    {
        let value =
            serde_json::to_value(payload).map_err(|source| BuildError::SerializeJson { source })?;
        self.body = Body::Json(value);
        Ok(self)
    }

    pub fn form<T>(mut self, payload: &T) -> Result<Self, BuildError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(payload)
            .map_err(|source| BuildError::SerializeForm { source })?;
        let pairs = url::form_urlencoded::parse(encoded.as_bytes())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        self.body = Body::Form(pairs);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Raw(body.into());
        self
    }

    pub fn build(self) -> Result<Request, BuildError> {
        let mut url = Url::parse(&self.url).map_err(|source| BuildError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BuildError::UnsupportedScheme {
                scheme: url.scheme().to_owned(),
                url: self.url,
            });
        }
        if !self.query_pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query_pairs);
        }

        let mut headers = self.headers;
        if let Some(content_type) = self.body.content_type() {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }

        Ok(Request {
            method: self.method,
            url,
            headers,
            body: self.body,
        })
    }
}
