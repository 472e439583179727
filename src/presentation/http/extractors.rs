//! Custom Extractors
//!
//! Axum extractors for transport request parsing.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::domain::value_objects::BrowserId;
use crate::startup::AppState;

/// Browser correlation cookie.
///
/// Tabs of one browser share the cookie, which is how the throttle groups
/// their sessions. A missing or malformed cookie yields `None`.
#[derive(Debug, Clone)]
pub struct BrowserCookie {
    pub browser_id: Option<BrowserId>,
    jar: CookieJar,
    cookie_name: String,
}

impl BrowserCookie {
    /// The presented browser id, or a fresh one plus the jar that sets it.
    pub fn ensure(self) -> (BrowserId, CookieJar) {
        match self.browser_id {
            Some(browser_id) => (browser_id, self.jar),
            None => {
                let browser_id = BrowserId::generate();
                let cookie = Cookie::build((self.cookie_name, browser_id.to_string()))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax)
                    .build();
                tracing::debug!(browser_id = %browser_id, "Issuing browser cookie");
                (browser_id, self.jar.add(cookie))
            }
        }
    }
}

impl FromRequestParts<AppState> for BrowserCookie {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie_name = state.settings.browser.cookie_name.clone();
        let browser_id = jar
            .get(&cookie_name)
            .and_then(|cookie| BrowserId::parse(cookie.value()));

        Ok(Self {
            browser_id,
            jar,
            cookie_name,
        })
    }
}
