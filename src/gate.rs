// Copyright © 2024 The Johns Hopkins Applied Physics Laboratory LLC.
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Affero General Public License,
// version 3, as published by the Free Software Foundation.  If you
// would like to purchase a commercial license for this software, please
// contact APL’s Tech Transfer at 240-592-0817 or
// techtransfer@jhuapl.edu.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.


//! The authorization gate.
//!
//! An [AuthorizationGate] is called by the proxy pipeline once for
//! each intercepted request, before any upstream connection is
//! established.  It checks the `Proxy-Authorization` header, runs the
//! `Negotiate` exchange through a [Negotiator], and either hands the
//! request back (allowing it) or produces a [Rejection] that the
//! pipeline sends to the client in place of forwarding the request.
//!
//! The responses are as follows:
//!
//! - A request carrying no headers at all is rejected with `401
//!   Unauthorized`.
//!
//! - A missing `Proxy-Authorization` header, or one that does not have
//!   the form `Negotiate <token>`, is rejected with `407 Proxy
//!   Authentication Required`, advertising `Proxy-Authenticate:
//!   Negotiate`.
//!
//! - A token that fails to establish a security context in one step is
//!   rejected with `401 Unauthorized`.
//!
//! - A failure on the server side (bad keytab, library error, garbled
//!   token) is rejected with `500 Server error`, carrying the cause.
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use http::header::PROXY_AUTHENTICATE;
use http::header::PROXY_AUTHORIZATION;
use http::HeaderMap;
use http::HeaderValue;
use http::Request;
use http::Response;
use http::StatusCode;
use log::debug;
use log::warn;

use crate::identity::ServiceIdentity;
use crate::negotiate::ContextProvider;
use crate::negotiate::NegotiateError;
use crate::negotiate::NegotiationOutcome;
use crate::negotiate::Negotiator;

/// Authentication scheme accepted by the gate.
const NEGOTIATE_SCHEME: &str = "Negotiate";

/// Kinds of rejection produced by the [AuthorizationGate].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RejectionKind {
    /// Missing or malformed `Proxy-Authorization` header.
    ProxyAuthRequired,
    /// Authentication did not succeed.
    Unauthorized,
    /// Authentication could not be carried out.
    ServerError
}

/// A denied request.
///
/// The pipeline answers the client with [to_response](Rejection::to_response)
/// and does not forward the request.
#[derive(Debug)]
pub struct Rejection<E> {
    kind: RejectionKind,
    /// Underlying failure, for server errors.
    cause: Option<NegotiateError<E>>
}

/// Authentication state of a single request.
///
/// This is created empty when the request arrives, filled in by the
/// [AuthorizationGate] when authentication succeeds, and consulted
/// when the access log record is written (see
/// [annotate](crate::audit::annotate)).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestAuthState {
    principal: Option<String>
}

/// Gate enforcing `Negotiate` authentication on proxied requests.
///
/// A single gate can be shared between any number of concurrent
/// requests; it holds no per-request state.
pub struct AuthorizationGate<P> {
    identity: Arc<ServiceIdentity>,
    /// Host-based service name, derived from `identity`.
    service: String,
    negotiator: Negotiator<P>
}

impl RejectionKind {
    /// Get the HTTP status code.
    #[inline]
    pub fn status(&self) -> StatusCode {
        match self {
            RejectionKind::ProxyAuthRequired => {
                StatusCode::PROXY_AUTHENTICATION_REQUIRED
            }
            RejectionKind::Unauthorized => StatusCode::UNAUTHORIZED,
            RejectionKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// Get the reason phrase.
    #[inline]
    pub fn reason(&self) -> &'static str {
        match self {
            RejectionKind::ProxyAuthRequired => "Proxy Authentication Required",
            RejectionKind::Unauthorized => "Unauthorized",
            RejectionKind::ServerError => "Server error"
        }
    }

    /// Get the headers to send along with the response.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let RejectionKind::ProxyAuthRequired = self {
            headers.insert(
                PROXY_AUTHENTICATE,
                HeaderValue::from_static(NEGOTIATE_SCHEME)
            );
        }

        headers
    }
}

impl<E> Rejection<E> {
    #[inline]
    fn proxy_auth_required() -> Self {
        Rejection {
            kind: RejectionKind::ProxyAuthRequired,
            cause: None
        }
    }

    #[inline]
    fn unauthorized() -> Self {
        Rejection {
            kind: RejectionKind::Unauthorized,
            cause: None
        }
    }

    #[inline]
    fn server_error(cause: NegotiateError<E>) -> Self {
        Rejection {
            kind: RejectionKind::ServerError,
            cause: Some(cause)
        }
    }

    #[inline]
    pub fn kind(&self) -> RejectionKind {
        self.kind
    }

    /// Get the HTTP status code.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Get the reason phrase.
    #[inline]
    pub fn reason(&self) -> &'static str {
        self.kind.reason()
    }

    /// Get the headers to send along with the response.
    #[inline]
    pub fn headers(&self) -> HeaderMap {
        self.kind.headers()
    }

    /// Get the underlying failure, if there is one.
    #[inline]
    pub fn cause(&self) -> Option<&NegotiateError<E>> {
        self.cause.as_ref()
    }

    /// Take the underlying failure, if there is one.
    #[inline]
    pub fn take_cause(self) -> Option<NegotiateError<E>> {
        self.cause
    }

    /// Build the response to send to the client, with an empty body.
    pub fn to_response<B>(&self) -> Response<B>
    where
        B: Default {
        let mut response = Response::new(B::default());

        *response.status_mut() = self.status();
        *response.headers_mut() = self.headers();

        response
    }
}

impl RequestAuthState {
    #[inline]
    pub fn new() -> Self {
        RequestAuthState::default()
    }

    /// Get the authenticated principal, if there is one.
    #[inline]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Record the authenticated principal.
    ///
    /// Only the first principal recorded for a request is kept.
    fn record(
        &mut self,
        principal: String
    ) {
        match &self.principal {
            Some(existing) => {
                warn!(target: "negotiate-gate",
                      "ignoring principal {}, request already authenticated as {}",
                      principal, existing);
            }
            None => self.principal = Some(principal)
        }
    }
}

impl<P> AuthorizationGate<P>
where
    P: ContextProvider
{
    /// Create a new `AuthorizationGate` accepting authentication for
    /// `identity`, using contexts from `provider`.
    #[inline]
    pub fn new(
        identity: Arc<ServiceIdentity>,
        provider: P
    ) -> Self {
        let service = identity.service_name();

        AuthorizationGate {
            identity: identity,
            service: service,
            negotiator: Negotiator::new(provider)
        }
    }

    #[inline]
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Authorize `request`.
    ///
    /// On success, the authenticated principal is recorded in
    /// `state`, and `request` is returned unchanged.  Otherwise, the
    /// [Rejection] to send to the client is returned, and `state` is
    /// left untouched.
    ///
    /// This may block while the security primitive accesses the
    /// credential store.
    pub fn authorize<B>(
        &self,
        state: &mut RequestAuthState,
        request: Request<B>
    ) -> Result<Request<B>, Rejection<P::Error>> {
        let headers = request.headers();

        if headers.is_empty() {
            debug!(target: "negotiate-gate",
                   "request carries no headers");

            return Err(Rejection::unauthorized());
        }

        // Repeated headers: the last one wins.
        let value = match headers.get_all(PROXY_AUTHORIZATION).iter().last() {
            Some(value) => value,
            None => {
                debug!(target: "negotiate-gate",
                       "no {} header",
                       PROXY_AUTHORIZATION);

                return Err(Rejection::proxy_auth_required());
            }
        };
        let token = match negotiate_token(value) {
            Some(token) => token,
            None => {
                debug!(target: "negotiate-gate",
                       "malformed {} header",
                       PROXY_AUTHORIZATION);

                return Err(Rejection::proxy_auth_required());
            }
        };

        match self.negotiator.negotiate(&self.service, token) {
            NegotiationOutcome::Authenticated { principal } => {
                debug!(target: "negotiate-gate",
                       "request authorized for {}",
                       principal);

                state.record(principal);

                Ok(request)
            }
            NegotiationOutcome::Rejected { status } => {
                warn!(target: "negotiate-gate",
                      "accept step did not complete (status = {})",
                      status.code());

                Err(Rejection::unauthorized())
            }
            NegotiationOutcome::Continue => {
                warn!(target: "negotiate-gate",
                      "multi-round negotiation is not supported");

                Err(Rejection::unauthorized())
            }
            NegotiationOutcome::ServerError { error } => {
                debug!(target: "negotiate-gate",
                       "rejecting request after server fault");

                Err(Rejection::server_error(error))
            }
        }
    }
}

/// Extract the token from a `Negotiate <token>` header value.
///
/// The value must consist of exactly two whitespace-separated parts,
/// the first of which is the scheme name (in any case), and the token
/// must be ASCII.
fn negotiate_token(value: &HeaderValue) -> Option<&str> {
    let mut parts = value
        .as_bytes()
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty());
    let scheme = parts.next()?;
    let token = parts.next()?;

    if parts.next().is_some() ||
        !scheme.eq_ignore_ascii_case(NEGOTIATE_SCHEME.as_bytes()) ||
        !token.is_ascii()
    {
        return None;
    }

    std::str::from_utf8(token).ok()
}

impl Display for RejectionKind {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        write!(f, "{} {}", self.status().as_u16(), self.reason())
    }
}

impl<E> Display for Rejection<E>
where
    E: Display
{
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})", self.kind, cause),
            None => self.kind.fmt(f)
        }
    }
}

impl<E> Error for Rejection<E>
where
    E: Error + 'static
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|cause| cause as &(dyn Error + 'static))
    }
}

#[cfg(test)]
use crate::config::ServiceIdentityConfig;
#[cfg(test)]
use crate::init;
#[cfg(test)]
use crate::testing::FakeCredentialStore;
#[cfg(test)]
use crate::testing::FakeError;
#[cfg(test)]
use crate::testing::FakeProvider;
#[cfg(test)]
use crate::testing::FakeStep;

#[cfg(test)]
fn test_gate(step: FakeStep) -> (AuthorizationGate<FakeProvider>, FakeProvider) {
    let store = FakeCredentialStore::with_principal("HTTP@proxy.example.com");
    let config = ServiceIdentityConfig::new("proxy.example.com");
    let identity = ServiceIdentity::new(config, &store).unwrap();
    let provider = FakeProvider::new(step);
    let gate = AuthorizationGate::new(Arc::new(identity), provider.clone());

    (gate, provider)
}

#[cfg(test)]
fn test_request(auth: Option<&'static [u8]>) -> Request<()> {
    let builder = Request::builder()
        .method("GET")
        .uri("http://www.example.com/")
        .header("Host", "www.example.com");

    match auth {
        Some(auth) => builder
            .header(PROXY_AUTHORIZATION, HeaderValue::from_bytes(auth).unwrap())
            .body(())
            .unwrap(),
        None => builder.body(()).unwrap()
    }
}

#[test]
fn test_authorize_ok() {
    init();

    let (gate, provider) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let request = test_request(Some(b"Negotiate QQ=="));
    let request = gate.authorize(&mut state, request).unwrap();

    assert_eq!(request.uri(), "http://www.example.com/");
    assert_eq!(Some("alice@EXAMPLE.COM"), state.principal());
    assert_eq!(
        Some(String::from("HTTP@proxy.example.com")),
        provider.last_service()
    );
    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_authorize_repeated_header_last_wins() {
    init();

    let (gate, provider) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let mut request = test_request(Some(b"Basic Zm9v"));

    request
        .headers_mut()
        .append(PROXY_AUTHORIZATION, HeaderValue::from_static("Negotiate QQ=="));

    assert!(gate.authorize(&mut state, request).is_ok());
    assert_eq!(Some("alice@EXAMPLE.COM"), state.principal());
    assert_eq!(1, provider.acquired())
}

#[test]
fn test_authorize_repeated_header_last_malformed() {
    init();

    let (gate, provider) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let mut request = test_request(Some(b"Negotiate QQ=="));

    request
        .headers_mut()
        .append(PROXY_AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));

    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(RejectionKind::ProxyAuthRequired, rejection.kind());
    assert_eq!(0, provider.acquired())
}

#[test]
fn test_authorize_scheme_case_insensitive() {
    init();

    let (gate, _) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let request = test_request(Some(b"nEgOtIaTe   QQ=="));

    assert!(gate.authorize(&mut state, request).is_ok());
    assert_eq!(Some("alice@EXAMPLE.COM"), state.principal())
}

#[test]
fn test_authorize_no_headers() {
    init();

    let (gate, provider) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let request = Request::new(());
    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(RejectionKind::Unauthorized, rejection.kind());
    assert_eq!(StatusCode::UNAUTHORIZED, rejection.status());
    assert!(rejection.headers().is_empty());
    assert!(!state.is_authenticated());
    assert_eq!(0, provider.acquired())
}

#[test]
fn test_authorize_missing_header() {
    init();

    let (gate, provider) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let request = test_request(None);
    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(StatusCode::PROXY_AUTHENTICATION_REQUIRED, rejection.status());
    assert_eq!("Proxy Authentication Required", rejection.reason());
    assert_eq!(
        Some(&HeaderValue::from_static("Negotiate")),
        rejection.headers().get(PROXY_AUTHENTICATE)
    );
    assert!(rejection.cause().is_none());
    assert!(!state.is_authenticated());
    assert_eq!(0, provider.acquired())
}

#[test]
fn test_authorize_malformed_header() {
    init();

    const MALFORMED: [&[u8]; 6] = [
        b"Basic Zm9vOmJhcg==",
        b"Negotiate",
        b"Negotiate QQ== extra",
        b"QQ==",
        b"NTLM TlRMTVNTUAABAAAA",
        b"Negotiate \xc3\xa9"
    ];

    let (gate, provider) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));

    for auth in MALFORMED.iter() {
        let mut state = RequestAuthState::new();
        let request = test_request(Some(*auth));
        let rejection = gate.authorize(&mut state, request).unwrap_err();

        assert_eq!(RejectionKind::ProxyAuthRequired, rejection.kind());
        assert_eq!(
            Some(&HeaderValue::from_static("Negotiate")),
            rejection.headers().get(PROXY_AUTHENTICATE)
        );
        assert!(!state.is_authenticated());
    }

    assert_eq!(0, provider.acquired())
}

#[test]
fn test_authorize_continue() {
    init();

    let (gate, provider) = test_gate(FakeStep::Continue);
    let mut state = RequestAuthState::new();
    let request = test_request(Some(b"Negotiate QQ=="));
    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(StatusCode::UNAUTHORIZED, rejection.status());
    assert_eq!("Unauthorized", rejection.reason());
    assert!(rejection.headers().is_empty());
    assert!(rejection.cause().is_none());
    assert!(!state.is_authenticated());
    assert_eq!(1, provider.released())
}

#[test]
fn test_authorize_step_fault() {
    init();

    let (gate, provider) = test_gate(FakeStep::Fault);
    let mut state = RequestAuthState::new();
    let request = test_request(Some(b"Negotiate QQ=="));
    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, rejection.status());
    assert_eq!("Server error", rejection.reason());
    assert!(rejection.headers().is_empty());

    match rejection.cause() {
        Some(NegotiateError::Step { .. }) => {}
        other => panic!("expected step error, got {:?}", other)
    }

    assert!(Error::source(&rejection).is_some());
    assert!(!state.is_authenticated());
    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_authorize_init_fault() {
    init();

    let (gate, provider) = test_gate(FakeStep::InitFault);
    let mut state = RequestAuthState::new();
    let request = test_request(Some(b"Negotiate QQ=="));
    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(RejectionKind::ServerError, rejection.kind());

    match rejection.take_cause() {
        Some(NegotiateError::Init { .. }) => {}
        other => panic!("expected init error, got {:?}", other)
    }

    assert!(!state.is_authenticated());
    assert_eq!(0, provider.released())
}

#[test]
fn test_authorize_garbled_token() {
    init();

    let (gate, _) = test_gate(FakeStep::Complete("alice@EXAMPLE.COM"));
    let mut state = RequestAuthState::new();
    let request = test_request(Some(b"Negotiate !!!!"));
    let rejection = gate.authorize(&mut state, request).unwrap_err();

    assert_eq!(RejectionKind::ServerError, rejection.kind());
    assert!(!state.is_authenticated())
}

#[test]
fn test_rejection_to_response() {
    let rejection: Rejection<FakeError> = Rejection::proxy_auth_required();
    let response: Response<Vec<u8>> = rejection.to_response();

    assert_eq!(StatusCode::PROXY_AUTHENTICATION_REQUIRED, response.status());
    assert_eq!(
        Some(&HeaderValue::from_static("Negotiate")),
        response.headers().get(PROXY_AUTHENTICATE)
    );
    assert!(response.body().is_empty());
    assert_eq!("407 Proxy Authentication Required", rejection.to_string())
}

#[test]
fn test_record_keeps_first_principal() {
    let mut state = RequestAuthState::new();

    state.record(String::from("alice@EXAMPLE.COM"));
    state.record(String::from("bob@EXAMPLE.COM"));

    assert_eq!(Some("alice@EXAMPLE.COM"), state.principal())
}
