//! HTTP backend using `reqwest`.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use rollcall_protocol::{
    AttendanceSnapshot, AttendanceWrite, Codec, JsonCodec, MeetingId, ToggleRequest,
    ToggleResponse, TokenResponse, WriteAck,
};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{Backend, TransportError};

const TOKEN_PATH: &str = "session-token";
const TOGGLE_PATH: &str = "session-toggle";
const SNAPSHOT_PATH: &str = "attendance-snapshot";
const WRITE_PATH: &str = "attendance-write";

/// Per-request timeout unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`Backend`] speaking the REST contract over HTTP.
///
/// Every request carries the meeting as a `meeting_id` query parameter.
/// Bodies go through the codec `C` (JSON by default).
#[derive(Debug, Clone)]
pub struct HttpBackend<C: Codec = JsonCodec> {
    client: Client,
    base: Url,
    codec: C,
    bearer: Option<String>,
}

impl HttpBackend<JsonCodec> {
    /// Creates a JSON backend rooted at `base_url`
    /// (e.g. `https://portal.example.edu/api/`).
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_codec(base_url, JsonCodec, DEFAULT_REQUEST_TIMEOUT)
    }
}

impl<C: Codec> HttpBackend<C> {
    /// Creates a backend with an explicit codec and request timeout.
    pub fn with_codec(base_url: &str, codec: C, timeout: Duration) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!("{base_url}: cannot be a base")));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            codec,
            bearer: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` on every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// The full URL of an endpoint, appended to the base path.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(path);
        }
        url
    }

    fn request(&self, method: Method, path: &str, meeting: MeetingId) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.endpoint(path))
            .query(&[("meeting_id", meeting.0)]);
        if let Some(token) = &self.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
    }

    fn with_body<T: serde::Serialize>(
        &self,
        builder: RequestBuilder,
        body: &T,
    ) -> Result<RequestBuilder, TransportError> {
        let bytes = self.codec.encode(body)?;
        Ok(builder
            .header(CONTENT_TYPE, self.codec.content_type())
            .body(bytes))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, TransportError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(self.codec.decode(&body)?)
    }
}

impl<C: Codec> Backend for HttpBackend<C> {
    async fn fetch_token(&self, meeting: MeetingId) -> Result<TokenResponse, TransportError> {
        self.send(self.request(Method::GET, TOKEN_PATH, meeting)).await
    }

    async fn set_enabled(
        &self,
        meeting: MeetingId,
        enabled: bool,
    ) -> Result<ToggleResponse, TransportError> {
        let builder = self.with_body(
            self.request(Method::PUT, TOGGLE_PATH, meeting),
            &ToggleRequest { enabled },
        )?;
        self.send(builder).await
    }

    async fn fetch_snapshot(&self, meeting: MeetingId) -> Result<AttendanceSnapshot, TransportError> {
        self.send(self.request(Method::GET, SNAPSHOT_PATH, meeting)).await
    }

    async fn write_attendance(
        &self,
        meeting: MeetingId,
        write: AttendanceWrite,
    ) -> Result<WriteAck, TransportError> {
        let builder = self.with_body(self.request(Method::POST, WRITE_PATH, meeting), &write)?;
        self.send(builder).await
    }

    fn disable_detached(&self, meeting: MeetingId) -> Result<(), TransportError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::RuntimeUnavailable)?;

        let builder = self.with_body(
            self.request(Method::PUT, TOGGLE_PATH, meeting),
            &ToggleRequest { enabled: false },
        )?;
        let builder = builder.header(CONNECTION, "keep-alive");

        runtime.spawn(async move {
            match builder.send().await {
                Ok(response) => tracing::debug!(
                    %meeting,
                    status = response.status().as_u16(),
                    "detached disable delivered"
                ),
                Err(e) => tracing::debug!(%meeting, error = %e, "detached disable failed"),
            }
        });
        Ok(())
    }
}
