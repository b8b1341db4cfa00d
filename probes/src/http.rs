//! HTTP health probe and the shared client used by HTTP-backed actions.

use std::time::Duration;

use readygate_core::{Probe, ProbeError, ProbeFut};
use url::Url;

use crate::endpoint::redact_userinfo;

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum HttpSetupError {
    #[error("invalid URL `{input}`: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("URL `{0}` cannot carry a path")]
    NotABase(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Username and password lifted out of a URL's userinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

/// Parses `input` and splits off any `user:password@` so it never appears in
/// logs; the credentials are sent as basic auth instead.
pub(crate) fn parse_redacted(input: &str) -> Result<(Url, Option<Credentials>), HttpSetupError> {
    let mut url = Url::parse(input.trim()).map_err(|source| HttpSetupError::InvalidUrl {
        input: redact_userinfo(input),
        source,
    })?;
    if url.cannot_be_a_base() {
        return Err(HttpSetupError::NotABase(redact_userinfo(input)));
    }

    let credentials = if url.username().is_empty() && url.password().is_none() {
        None
    } else {
        Some(Credentials {
            user: url.username().to_string(),
            password: url.password().map(ToString::to_string),
        })
    };
    // Infallible for URLs that can be a base.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Ok((url, credentials))
}

pub(crate) fn http_client() -> Result<reqwest::Client, HttpSetupError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(3))
        .build()
        .map_err(HttpSetupError::from)
}

pub(crate) fn with_credentials(
    builder: reqwest::RequestBuilder,
    credentials: Option<&Credentials>,
) -> reqwest::RequestBuilder {
    match credentials {
        Some(creds) => builder.basic_auth(&creds.user, creds.password.as_deref()),
        None => builder,
    }
}

/// Ready when a GET answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
    credentials: Option<Credentials>,
}

impl HttpProbe {
    pub fn new(url: &str) -> Result<Self, HttpSetupError> {
        let (url, credentials) = parse_redacted(url)?;
        Ok(Self {
            client: http_client()?,
            url,
            credentials,
        })
    }
}

impl Probe for HttpProbe {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn probe(&self) -> ProbeFut<'_> {
        Box::pin(async move {
            let request = with_credentials(self.client.get(self.url.clone()), self.credentials.as_ref());
            let response = request.send().await.map_err(|e| ProbeError::Request {
                endpoint: self.url.to_string(),
                message: e.to_string(),
            })?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(ProbeError::Status {
                    endpoint: self.url.to_string(),
                    status: status.as_u16(),
                })
            }
        })
    }
}
