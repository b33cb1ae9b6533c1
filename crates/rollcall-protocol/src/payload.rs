//! The scannable payload: a URL carrying the current token.
//!
//! Students scan a QR code that encodes
//! `<base>/attendance/scan?meeting=<id>&token=<token>`. When token
//! acquisition fails the session keeps broadcasting a token-less URL
//! (degraded mode): scanning still works, but the backend cannot enforce
//! single-use validation.

use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use url::Url;

use crate::{MeetingId, ProtocolError};

/// A validated base URL that scan paths can be appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBase(Url);

impl ScanBase {
    /// Parses and validates a base URL.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidUrl`] if the string is not a URL or
    /// cannot carry a path (`mailto:`, `data:` ...).
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let url = Url::parse(raw).map_err(|e| ProtocolError::InvalidUrl(format!("{raw}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ProtocolError::InvalidUrl(format!("{raw}: cannot be a base")));
        }
        Ok(Self(url))
    }

    /// The underlying URL.
    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

/// What the presentation layer encodes into the QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    /// The full scan URL.
    pub url: String,
    /// The token embedded in `url`, or `None` in degraded mode.
    pub token: Option<String>,
}

impl ScanPayload {
    /// Builds the payload for a meeting, with or without a token.
    pub fn build(base: &ScanBase, meeting: MeetingId, token: Option<&str>) -> Self {
        let mut url = base.0.clone();
        // `ScanBase::parse` rejected cannot-be-a-base URLs, so this
        // always yields segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["attendance", "scan"]);
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("meeting", &meeting.0.to_string());
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }

        Self {
            url: url.into(),
            token: token.map(str::to_owned),
        }
    }

    /// Returns `true` when the payload carries no token.
    pub fn is_degraded(&self) -> bool {
        self.token.is_none()
    }

    /// Renders the payload as an SVG document.
    pub fn to_svg(&self, min_size: u32) -> Result<String, ProtocolError> {
        let code = self.qr()?;
        Ok(code
            .render::<svg::Color>()
            .min_dimensions(min_size, min_size)
            .build())
    }

    /// Renders the payload as half-block characters for a terminal.
    pub fn to_terminal(&self) -> Result<String, ProtocolError> {
        let code = self.qr()?;
        Ok(code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build())
    }

    fn qr(&self) -> Result<QrCode, ProtocolError> {
        QrCode::new(self.url.as_bytes()).map_err(|e| ProtocolError::Render(e.to_string()))
    }
}
