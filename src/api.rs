//! Governed HTTP transport for the remote relation API.
//!
//! Every call decodes the remote's `{code, message, data}` envelope and
//! classifies the result before the caller sees it. The [`Governor`] is
//! consulted around every attempt: pre-request pacing, post-response
//! jitter, and the retry decision with exponential backoff. Session
//! credentials (cookies) are consumed as-is from configuration; this
//! layer never performs authentication itself.

use crate::config::{ApiConfig, SessionConfig};
use crate::error::{FoloError, Result};
use crate::governor::Governor;
use crate::model::FollowedUser;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Envelope code for a successful call.
pub const CODE_SUCCESS: i64 = 0;
/// Risk-control rejection: the anti-bot layer throttled us.
pub const CODE_RISK_CONTROL: i64 = -352;
/// Session credentials rejected.
pub const CODE_NOT_AUTHENTICATED: i64 = -101;
/// Precondition failed; treated as a throttling signal.
pub const CODE_PRECONDITION_FAILED: i64 = 412;
/// Follow requested for an account we already follow.
pub const CODE_ALREADY_FOLLOWING: i64 = 22013;
/// Unfollow requested for an account we do not follow.
pub const CODE_NOT_FOLLOWING: i64 = 22015;
/// Relation mutations are being rate limited.
pub const CODE_RELATION_RATE_LIMITED: i64 = 22016;

const FOLLOWINGS_PATH: &str = "/x/relation/followings";
const MODIFY_PATH: &str = "/x/relation/modify";
const NAV_PATH: &str = "/x/web-interface/nav";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal result of one governed call.
#[derive(Debug)]
pub enum Outcome {
    /// Envelope code 0; carries the `data` payload.
    Success(Value),
    /// The remote reports the relation is already in the requested state
    /// (already following / not following). Callers treat this as
    /// success.
    AlreadyInDesiredState(i64),
}

/// A relation mutation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAct {
    Follow,
    Unfollow,
}

impl RelationAct {
    /// The numeric `act` parameter the remote expects.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Follow => 1,
            Self::Unfollow => 2,
        }
    }
}

/// The remote's response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// One following-list page as returned by the remote.
#[derive(Debug, Default, Deserialize)]
pub struct FollowingPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub list: Vec<RawFollowing>,
}

/// One followed account in the remote's wire shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFollowing {
    pub mid: i64,
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub sign: Option<String>,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub vip: Value,
    #[serde(default)]
    pub official: Value,
}

impl From<RawFollowing> for FollowedUser {
    fn from(raw: RawFollowing) -> Self {
        let mut badges = BTreeMap::new();
        if !raw.vip.is_null() {
            badges.insert("vip".to_string(), raw.vip);
        }
        if !raw.official.is_null() {
            badges.insert("official".to_string(), raw.official);
        }

        Self {
            id: raw.mid.to_string(),
            display_name: raw.uname.trim().to_string(),
            bio: raw.sign.as_deref().unwrap_or("").trim().to_string(),
            followed_at: (raw.mtime > 0).then_some(raw.mtime),
            avatar_ref: raw.face,
            badges,
        }
    }
}

/// Classified result of a single attempt, before retry handling.
#[derive(Debug)]
enum Attempt {
    Done(Outcome),
    Unauthenticated(i64),
    RateLimited(i64),
    /// Network failure or non-200 status. Carries the status as the
    /// error code when one exists.
    Transient { code: Option<i64>, reason: String },
    /// HTTP 200 with an unrecognized non-zero application code.
    AppError { code: i64, message: String },
    /// HTTP 200 but the envelope could not be decoded. Not retryable.
    Malformed(String),
}

/// HTTP client wrapping every call in the Governor's pacing and retry
/// policy.
pub struct ApiClient {
    http: Client,
    governor: Arc<Governor>,
    base_url: String,
    session: SessionConfig,
}

impl ApiClient {
    /// Build a client from configuration and a shared governor.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a session cookie value cannot be used
    /// in a header, or if the underlying HTTP client cannot be built.
    pub fn new(api: &ApiConfig, session: SessionConfig, governor: Arc<Governor>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&api.user_agent)
                .map_err(|e| FoloError::config("config.toml", format!("bad user agent: {e}")))?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&api.referer)
                .map_err(|e| FoloError::config("config.toml", format!("bad referer: {e}")))?,
        );
        if !session.cookies.is_empty() {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&session.cookie_header()).map_err(|e| {
                    FoloError::config("config.toml", format!("bad cookie value: {e}"))
                })?,
            );
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            governor,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    /// The governor shared by every call through this client.
    #[must_use]
    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    /// Issue one governed call, retrying per the Governor's policy.
    ///
    /// Bounded by `max_retries + 1` attempts. Exhausting the budget
    /// raises [`FoloError::RetriesExhausted`], distinct from any
    /// single-attempt failure. With pacing disabled, fires exactly one
    /// ungoverned attempt.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` and malformed-envelope `PermanentReject` surface
    /// immediately; rate limiting, transient failures, and unrecognized
    /// application codes are retried while the budget lasts.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Outcome> {
        let mut retries: u32 = 0;

        loop {
            let attempt = self.attempt(method.clone(), url, params).await;

            let (code, reason) = match attempt {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Unauthenticated(code) => {
                    return Err(FoloError::Unauthenticated { code });
                }
                Attempt::Malformed(message) => {
                    return Err(FoloError::permanent(None, message));
                }
                Attempt::RateLimited(code) => (Some(code), format!("rate limited (code {code})")),
                Attempt::AppError { code, message } => {
                    (Some(code), format!("application error {code}: {message}"))
                }
                Attempt::Transient { code, reason } => (code, reason),
            };

            if !self.governor.is_enabled() {
                // Single ungoverned attempt; surface the failure as-is.
                return Err(terminal_error(code, reason));
            }

            // Coded failures go through the Governor's decision; a pure
            // network failure has no code and is retried under the budget
            // alone.
            let retry = code.map_or(
                retries < self.governor.max_retries(),
                |c| self.governor.should_retry(retries, Some(c)),
            );

            if !retry {
                warn!(attempts = retries + 1, %reason, "Retry budget exhausted");
                return Err(FoloError::RetriesExhausted {
                    attempts: retries + 1,
                });
            }

            if let Some(c) = code {
                if !Governor::is_recognized_retryable(c) {
                    warn!(code = c, "Retrying unrecognized application code");
                }
            }

            let delay = self.governor.retry_delay(retries, code);
            debug!(
                retry = retries + 1,
                delay_ms = delay.as_millis(),
                %reason,
                "Backing off before retry"
            );
            sleep(delay).await;
            retries += 1;
        }
    }

    /// One paced attempt: pre-wait, send, post-wait (even on transport
    /// failure), classify.
    async fn attempt(&self, method: Method, url: &str, params: &[(&str, String)]) -> Attempt {
        self.governor.wait_before_request().await;

        let request = if method == Method::GET {
            self.http.get(url).query(params)
        } else {
            self.http.request(method, url).form(params)
        };
        let response = request.send().await;

        self.governor.wait_after_request().await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Transient {
                    code: None,
                    reason: format!("transport: {e}"),
                };
            }
        };

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED || status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::RateLimited(i64::from(status.as_u16()));
        }
        if !status.is_success() {
            return Attempt::Transient {
                code: Some(i64::from(status.as_u16())),
                reason: format!("HTTP {status}"),
            };
        }

        match response.json::<Envelope>().await {
            Ok(envelope) => classify_envelope(envelope),
            Err(e) => Attempt::Malformed(format!("undecodable envelope: {e}")),
        }
    }

    /// Fetch one page of the following list.
    ///
    /// # Errors
    ///
    /// Transport and classification errors per [`Self::execute`];
    /// `MissingCredential` when the session lacks a user id.
    pub async fn following_page(&self, pn: u32, ps: u32) -> Result<FollowingPage> {
        let vmid = self.session.user_id()?.to_string();
        let url = format!("{}{FOLLOWINGS_PATH}", self.base_url);
        let params = [
            ("vmid", vmid),
            ("pn", pn.to_string()),
            ("ps", ps.to_string()),
            ("order", "desc".to_string()),
        ];

        match self.execute(Method::GET, &url, &params).await? {
            Outcome::Success(data) => Ok(serde_json::from_value(data)?),
            Outcome::AlreadyInDesiredState(code) => Err(FoloError::permanent(
                Some(code),
                "unexpected relation-state code on a fetch",
            )),
        }
    }

    /// Follow or unfollow one account.
    ///
    /// `AlreadyInDesiredState` is success: the relation already holds.
    ///
    /// # Errors
    ///
    /// Transport and classification errors per [`Self::execute`];
    /// `MissingCredential` when the session lacks a CSRF token.
    pub async fn modify_relation(&self, fid: &str, act: RelationAct) -> Result<()> {
        let csrf = self.session.csrf()?.to_string();
        let url = format!("{}{MODIFY_PATH}", self.base_url);
        let params = [
            ("fid", fid.to_string()),
            ("act", act.code().to_string()),
            ("csrf", csrf),
        ];

        match self.execute(Method::POST, &url, &params).await? {
            Outcome::Success(_) => Ok(()),
            Outcome::AlreadyInDesiredState(code) => {
                debug!(fid, code, "Relation already in desired state");
                Ok(())
            }
        }
    }

    /// Fetch the logged-in account's profile, verifying the session.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when the remote rejects the credentials.
    pub async fn account_info(&self) -> Result<Value> {
        let url = format!("{}{NAV_PATH}", self.base_url);

        match self.execute(Method::GET, &url, &[]).await? {
            Outcome::Success(data) => Ok(data),
            Outcome::AlreadyInDesiredState(code) => Err(FoloError::permanent(
                Some(code),
                "unexpected relation-state code on nav",
            )),
        }
    }
}

fn classify_envelope(envelope: Envelope) -> Attempt {
    match envelope.code {
        CODE_SUCCESS => Attempt::Done(Outcome::Success(envelope.data)),
        CODE_ALREADY_FOLLOWING | CODE_NOT_FOLLOWING => {
            Attempt::Done(Outcome::AlreadyInDesiredState(envelope.code))
        }
        CODE_RISK_CONTROL | CODE_PRECONDITION_FAILED | CODE_RELATION_RATE_LIMITED => {
            Attempt::RateLimited(envelope.code)
        }
        CODE_NOT_AUTHENTICATED => Attempt::Unauthenticated(envelope.code),
        code => Attempt::AppError {
            code,
            message: envelope.message,
        },
    }
}

fn terminal_error(code: Option<i64>, reason: String) -> FoloError {
    match code {
        Some(c) if c == CODE_RISK_CONTROL
            || c == CODE_PRECONDITION_FAILED
            || c == CODE_RELATION_RATE_LIMITED
            || c == 429 =>
        {
            FoloError::RateLimited { code: c }
        }
        Some(c) if (500..600).contains(&c) => FoloError::transient(reason),
        Some(c) => FoloError::permanent(Some(c), reason),
        None => FoloError::transient(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(code: i64, message: &str, data: Value) -> Envelope {
        Envelope {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn classify_success_carries_payload() {
        let attempt = classify_envelope(envelope(0, "", json!({"total": 3})));
        match attempt {
            Attempt::Done(Outcome::Success(data)) => assert_eq!(data["total"], 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classify_already_in_state_codes() {
        for code in [CODE_ALREADY_FOLLOWING, CODE_NOT_FOLLOWING] {
            match classify_envelope(envelope(code, "", Value::Null)) {
                Attempt::Done(Outcome::AlreadyInDesiredState(c)) => assert_eq!(c, code),
                other => panic!("unexpected for {code}: {other:?}"),
            }
        }
    }

    #[test]
    fn classify_rate_limit_codes() {
        for code in [
            CODE_RISK_CONTROL,
            CODE_PRECONDITION_FAILED,
            CODE_RELATION_RATE_LIMITED,
        ] {
            assert!(matches!(
                classify_envelope(envelope(code, "", Value::Null)),
                Attempt::RateLimited(c) if c == code
            ));
        }
    }

    #[test]
    fn classify_auth_and_unknown_codes() {
        assert!(matches!(
            classify_envelope(envelope(CODE_NOT_AUTHENTICATED, "", Value::Null)),
            Attempt::Unauthenticated(-101)
        ));
        assert!(matches!(
            classify_envelope(envelope(22014, "already processing", Value::Null)),
            Attempt::AppError { code: 22014, .. }
        ));
    }

    #[test]
    fn raw_following_maps_to_entity() {
        let raw: RawFollowing = serde_json::from_value(json!({
            "mid": 12345,
            "uname": "  Ann  ",
            "sign": " rust streams ",
            "mtime": 1_700_000_000,
            "face": "https://example.com/a.jpg",
            "vip": {"type": 1},
            "official": {"desc": "Official channel"}
        }))
        .unwrap();

        let user = FollowedUser::from(raw);
        assert_eq!(user.id, "12345");
        assert_eq!(user.display_name, "Ann");
        assert_eq!(user.bio, "rust streams");
        assert_eq!(user.followed_at, Some(1_700_000_000));
        assert_eq!(user.verified_label(), Some("Official channel"));
    }

    #[test]
    fn raw_following_tolerates_missing_fields() {
        let raw: RawFollowing = serde_json::from_value(json!({"mid": 7})).unwrap();
        let user = FollowedUser::from(raw);
        assert_eq!(user.id, "7");
        assert_eq!(user.display_name, "");
        assert_eq!(user.followed_at, None);
        assert!(user.badges.is_empty());
    }

    #[test]
    fn relation_act_codes() {
        assert_eq!(RelationAct::Follow.code(), 1);
        assert_eq!(RelationAct::Unfollow.code(), 2);
    }

    #[test]
    fn terminal_error_classification() {
        assert!(matches!(
            terminal_error(Some(-352), "x".into()),
            FoloError::RateLimited { code: -352 }
        ));
        assert!(matches!(
            terminal_error(Some(503), "x".into()),
            FoloError::TransientFailure { .. }
        ));
        assert!(matches!(
            terminal_error(Some(22014), "x".into()),
            FoloError::PermanentReject { .. }
        ));
        assert!(matches!(
            terminal_error(None, "x".into()),
            FoloError::TransientFailure { .. }
        ));
    }
}
