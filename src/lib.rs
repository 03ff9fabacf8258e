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


#![allow(clippy::redundant_field_names)]
#![allow(clippy::upper_case_acronyms)]

//! Kerberos/SPNEGO (`Negotiate`) authentication for HTTP proxies.
//!
//! This package provides an authentication gate that a proxy calls
//! for every intercepted request before it connects upstream.  The
//! gate requires a `Proxy-Authorization: Negotiate <token>` header,
//! accepts the token with a single GSSAPI accept step, and either
//! lets the request through (recording the authenticated principal)
//! or produces the response to send back to the client in its place.
//!
//! # Components
//!
//! - **Service identity** ([identity]): the proxy's Kerberos service
//!   principal, checked against the keytab once at startup.  This is
//!   configured with a [ServiceIdentityConfig](config::ServiceIdentityConfig),
//!   which can be parsed from YAML using `serde_yaml`.
//!
//! - **Negotiation** ([negotiate]): single-step acceptance of a
//!   `Negotiate` token, yielding the authenticated principal or a
//!   classified failure.  With the `gssapi` feature, the
//!   [gssapi](negotiate::gssapi) module provides the `libgssapi`
//!   implementation of the security primitive.
//!
//! - **Authorization gate** ([gate]): header checks, and the mapping
//!   of negotiation outcomes onto `401`, `407`, and `500` responses.
//!
//! - **Audit** ([audit]): adds the authenticated principal to the
//!   proxy's access log records.
//!
//! # Usage
//!
//! At startup, create the [ServiceIdentity](identity::ServiceIdentity)
//! (failing hard if it cannot be verified) and an
//! [AuthorizationGate](gate::AuthorizationGate).  For each request,
//! create a fresh [RequestAuthState](gate::RequestAuthState), call
//! [authorize](gate::AuthorizationGate::authorize), and answer with
//! [to_response](gate::Rejection::to_response) if it is rejected.
//! When writing the access log record, pass its fields through
//! [annotate](audit::annotate).
pub mod audit;
pub mod config;
pub mod gate;
pub mod identity;
pub mod negotiate;
#[cfg(test)]
mod testing;

#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
use log::LevelFilter;

#[cfg(test)]
static INIT: Once = Once::new();

#[cfg(test)]
fn init() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Trace)
            .init()
    })
}
