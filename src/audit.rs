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


//! Access-log annotation.
//!
//! After a request has been handled, the proxy's access logger builds
//! a context of named fields for the log record.  [annotate] adds the
//! authenticated principal to that context.
//!
//! The principal is written to the `client_ip` field, replacing the
//! network address of the client, so that access logs identify users
//! by their Kerberos principal rather than their address.
use std::collections::HashMap;

use crate::gate::RequestAuthState;

/// Field that receives the authenticated principal.
pub const PRINCIPAL_FIELD: &str = "client_ip";

/// Fields of an access log record.
pub type LogContext = HashMap<String, String>;

/// Add the principal recorded in `state`, if there is one, to
/// `context`.
///
/// If the request was not authenticated, `context` is returned
/// unchanged.
pub fn annotate(
    state: &RequestAuthState,
    mut context: LogContext
) -> LogContext {
    if let Some(principal) = state.principal() {
        context.insert(String::from(PRINCIPAL_FIELD), String::from(principal));
    }

    context
}

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use http::Request;

#[cfg(test)]
use crate::config::ServiceIdentityConfig;
#[cfg(test)]
use crate::gate::AuthorizationGate;
#[cfg(test)]
use crate::identity::ServiceIdentity;
#[cfg(test)]
use crate::init;
#[cfg(test)]
use crate::testing::FakeCredentialStore;
#[cfg(test)]
use crate::testing::FakeProvider;
#[cfg(test)]
use crate::testing::FakeStep;

#[cfg(test)]
fn test_context() -> LogContext {
    let mut context = LogContext::new();

    context.insert(String::from("client_ip"), String::from("192.0.2.10"));
    context.insert(String::from("request_method"), String::from("CONNECT"));

    context
}

#[cfg(test)]
fn authorize(step: FakeStep) -> RequestAuthState {
    let store = FakeCredentialStore::with_principal("HTTP@proxy.example.com");
    let config = ServiceIdentityConfig::new("proxy.example.com");
    let identity = ServiceIdentity::new(config, &store).unwrap();
    let gate = AuthorizationGate::new(Arc::new(identity), FakeProvider::new(step));
    let mut state = RequestAuthState::new();
    let request = Request::builder()
        .method("CONNECT")
        .uri("www.example.com:443")
        .header("Proxy-Authorization", "Negotiate QQ==")
        .body(())
        .unwrap();
    let _ = gate.authorize(&mut state, request);

    state
}

#[test]
fn test_annotate_unauthenticated() {
    let state = RequestAuthState::new();
    let expected = test_context();
    let actual = annotate(&state, test_context());

    assert_eq!(expected, actual)
}

#[test]
fn test_annotate_after_rejection() {
    init();

    let state = authorize(FakeStep::Continue);
    let expected = test_context();
    let actual = annotate(&state, test_context());

    assert_eq!(expected, actual)
}

#[test]
fn test_annotate_authenticated() {
    init();

    let state = authorize(FakeStep::Complete("alice@EXAMPLE.COM"));
    let actual = annotate(&state, test_context());

    assert_eq!(
        Some(&String::from("alice@EXAMPLE.COM")),
        actual.get(PRINCIPAL_FIELD)
    );
    assert_eq!(Some(&String::from("CONNECT")), actual.get("request_method"));
    assert_eq!(2, actual.len())
}

#[test]
fn test_annotate_empty_context() {
    init();

    let state = authorize(FakeStep::Complete("alice@EXAMPLE.COM"));
    let actual = annotate(&state, LogContext::new());

    assert_eq!(
        Some(&String::from("alice@EXAMPLE.COM")),
        actual.get(PRINCIPAL_FIELD)
    );
    assert_eq!(1, actual.len())
}
