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


//! Single-step GSSAPI negotiation.
//!
//! This module provides the [Negotiator], which takes the token
//! carried by a `Negotiate` authorization header and drives a fresh
//! server-side security context through exactly one accept step.
//! The result is a [NegotiationOutcome]: either the authenticated
//! principal, or a classified failure.
//!
//! The security primitive is abstracted by the [ContextProvider] and
//! [ServerContext] traits.  The `gssapi` feature supplies an
//! implementation on top of `libgssapi` in the [gssapi] module.
//!
//! Security contexts are scoped to a single call to
//! [negotiate](Negotiator::negotiate).  Every context that is
//! acquired is released exactly once, on every exit path, by way of a
//! guard object.
//!
//! Multi-round negotiation is not supported.  An accept step that
//! reports that more exchanges are needed is treated as a rejection,
//! and no state is kept for a later request to continue from.
use std::error::Error;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::ops::Deref;
use std::ops::DerefMut;

use base64::engine::general_purpose;
use base64::DecodeError;
use base64::Engine;
use log::debug;
use log::error;
use log::trace;

#[cfg(feature = "gssapi")]
pub mod gssapi;

/// Status reported by an accept step.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NegotiateStatus {
    /// The security context is fully established.
    Complete,
    /// The peer needs to send another token.
    ContinueNeeded
}

/// A server-side security context.
///
/// Instances are only ever used for a single negotiation, and are
/// released by the [Negotiator] when it is finished with them.
pub trait ServerContext {
    /// Errors reported by the security primitive.
    type Error;

    /// Run one accept step on `token`.
    fn accept(
        &mut self,
        token: &[u8]
    ) -> Result<NegotiateStatus, Self::Error>;

    /// Get the name of the authenticated peer.
    ///
    /// This is only meaningful after an accept step has reported
    /// [Complete](NegotiateStatus::Complete).
    fn principal(&mut self) -> Result<String, Self::Error>;

    /// Release the resources held by this context.
    fn release(&mut self);
}

/// Source of fresh [ServerContext]s.
pub trait ContextProvider {
    /// Errors reported by the security primitive.
    type Error: Debug + Display;
    /// Type of security contexts.
    type Context: ServerContext<Error = Self::Error>;

    /// Initialize a fresh security context bound to the host-based
    /// service name `service`.
    fn acquire(
        &self,
        service: &str
    ) -> Result<Self::Context, Self::Error>;
}

/// Errors that can occur during negotiation.
///
/// All of these indicate a problem on the server side (or a garbled
/// token), as opposed to a client that simply failed to
/// authenticate.
#[derive(Debug)]
pub enum NegotiateError<E> {
    /// Failed to initialize the security context.
    Init {
        /// Error from the security primitive.
        error: E
    },
    /// The token was not valid base64.
    Token {
        /// Decoding error.
        error: DecodeError
    },
    /// The accept step failed.
    Step {
        /// Error from the security primitive.
        error: E
    },
    /// The peer name could not be obtained from an established context.
    Principal {
        /// Error from the security primitive.
        error: E
    }
}

/// Result of a single negotiation.
#[derive(Debug)]
pub enum NegotiationOutcome<E> {
    /// The peer was authenticated.
    Authenticated {
        /// Name of the authenticated principal.
        principal: String
    },
    /// The peer needs to continue the exchange.
    ///
    /// This is never produced by [Negotiator], which does not support
    /// multi-round negotiation.
    Continue,
    /// The accept step did not establish the context.
    Rejected {
        /// Status reported by the accept step.
        status: NegotiateStatus
    },
    /// Negotiation failed on the server side.
    ServerError {
        /// The cause of the failure.
        error: NegotiateError<E>
    }
}

/// Guard that releases a [ServerContext] when dropped.
struct ScopedContext<Ctx: ServerContext> {
    ctx: Ctx
}

/// Drives single-step negotiations using contexts obtained from a
/// [ContextProvider].
#[derive(Clone, Debug)]
pub struct Negotiator<P> {
    provider: P
}

impl NegotiateStatus {
    /// Get the GSSAPI major status code for this status.
    #[inline]
    pub fn code(&self) -> u32 {
        match self {
            NegotiateStatus::Complete => 0,
            NegotiateStatus::ContinueNeeded => 1
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self, NegotiateStatus::Complete)
    }
}

impl<Ctx> ScopedContext<Ctx>
where
    Ctx: ServerContext
{
    #[inline]
    fn new(ctx: Ctx) -> Self {
        ScopedContext { ctx: ctx }
    }
}

impl<Ctx> Deref for ScopedContext<Ctx>
where
    Ctx: ServerContext
{
    type Target = Ctx;

    #[inline]
    fn deref(&self) -> &Ctx {
        &self.ctx
    }
}

impl<Ctx> DerefMut for ScopedContext<Ctx>
where
    Ctx: ServerContext
{
    #[inline]
    fn deref_mut(&mut self) -> &mut Ctx {
        &mut self.ctx
    }
}

impl<Ctx> Drop for ScopedContext<Ctx>
where
    Ctx: ServerContext
{
    #[inline]
    fn drop(&mut self) {
        trace!(target: "negotiate",
               "releasing security context");

        self.ctx.release()
    }
}

impl<P> Negotiator<P>
where
    P: ContextProvider
{
    /// Create a new `Negotiator` from `provider`.
    #[inline]
    pub fn new(provider: P) -> Self {
        Negotiator { provider: provider }
    }

    /// Get the [ContextProvider].
    #[inline]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one negotiation for the service `service` on the
    /// base64-encoded `token`.
    ///
    /// This may block while the security primitive accesses the
    /// credential store.
    pub fn negotiate(
        &self,
        service: &str,
        token: &str
    ) -> NegotiationOutcome<P::Error> {
        match self.accept(service, token) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target: "negotiate",
                       "server-side negotiation failure: {}",
                       err);

                NegotiationOutcome::ServerError { error: err }
            }
        }
    }

    fn accept(
        &self,
        service: &str,
        token: &str
    ) -> Result<NegotiationOutcome<P::Error>, NegotiateError<P::Error>> {
        debug!(target: "negotiate",
               "beginning negotiation for {}",
               service);

        let mut ctx = self
            .provider
            .acquire(service)
            .map(ScopedContext::new)
            .map_err(|err| NegotiateError::Init { error: err })?;
        let token = general_purpose::STANDARD
            .decode(token)
            .map_err(|err| NegotiateError::Token { error: err })?;
        let status = ctx
            .accept(&token)
            .map_err(|err| NegotiateError::Step { error: err })?;

        match status {
            NegotiateStatus::Complete => {
                let principal = ctx
                    .principal()
                    .map_err(|err| NegotiateError::Principal { error: err })?;

                debug!(target: "negotiate",
                       "authenticated {} for {}",
                       principal, service);

                Ok(NegotiationOutcome::Authenticated {
                    principal: principal
                })
            }
            status => {
                trace!(target: "negotiate",
                       "accept step did not complete ({})",
                       status);

                Ok(NegotiationOutcome::Rejected { status: status })
            }
        }
    }
}

impl Display for NegotiateStatus {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            NegotiateStatus::Complete => write!(f, "complete"),
            NegotiateStatus::ContinueNeeded => write!(f, "continue needed")
        }
    }
}

impl<E> Display for NegotiateError<E>
where
    E: Display
{
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            NegotiateError::Init { error } => {
                write!(f, "failed to initialize security context ({})", error)
            }
            NegotiateError::Token { error } => {
                write!(f, "malformed negotiate token ({})", error)
            }
            NegotiateError::Step { error } => {
                write!(f, "accept step failed ({})", error)
            }
            NegotiateError::Principal { error } => {
                write!(f, "failed to get peer name ({})", error)
            }
        }
    }
}

impl<E> Error for NegotiateError<E>
where
    E: Error + 'static
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NegotiateError::Init { error } => Some(error),
            NegotiateError::Token { error } => Some(error),
            NegotiateError::Step { error } => Some(error),
            NegotiateError::Principal { error } => Some(error)
        }
    }
}

#[cfg(test)]
use crate::init;
#[cfg(test)]
use crate::testing::FakeProvider;
#[cfg(test)]
use crate::testing::FakeStep;

#[test]
fn test_negotiate_complete() {
    init();

    let provider = FakeProvider::new(FakeStep::Complete("alice@EXAMPLE.COM"));
    let negotiator = Negotiator::new(provider.clone());

    match negotiator.negotiate("HTTP@proxy.example.com", "QQ==") {
        NegotiationOutcome::Authenticated { principal } => {
            assert_eq!("alice@EXAMPLE.COM", principal)
        }
        other => panic!("expected authentication, got {:?}", other)
    }

    assert_eq!(Some(b"A".to_vec()), provider.last_token());
    assert_eq!(
        Some(String::from("HTTP@proxy.example.com")),
        provider.last_service()
    );
    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_negotiate_continue_rejected() {
    init();

    let provider = FakeProvider::new(FakeStep::Continue);
    let negotiator = Negotiator::new(provider.clone());

    match negotiator.negotiate("HTTP@proxy.example.com", "QQ==") {
        NegotiationOutcome::Rejected { status } => {
            assert_eq!(NegotiateStatus::ContinueNeeded, status);
            assert_eq!(1, status.code())
        }
        other => panic!("expected rejection, got {:?}", other)
    }

    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_negotiate_step_fault() {
    init();

    let provider = FakeProvider::new(FakeStep::Fault);
    let negotiator = Negotiator::new(provider.clone());

    match negotiator.negotiate("HTTP@proxy.example.com", "QQ==") {
        NegotiationOutcome::ServerError {
            error: NegotiateError::Step { .. }
        } => {}
        other => panic!("expected step error, got {:?}", other)
    }

    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_negotiate_init_fault() {
    init();

    let provider = FakeProvider::new(FakeStep::InitFault);
    let negotiator = Negotiator::new(provider.clone());

    match negotiator.negotiate("HTTP@proxy.example.com", "QQ==") {
        NegotiationOutcome::ServerError {
            error: NegotiateError::Init { .. }
        } => {}
        other => panic!("expected init error, got {:?}", other)
    }

    assert_eq!(0, provider.acquired());
    assert_eq!(0, provider.released());
    assert_eq!(None, provider.last_token())
}

#[test]
fn test_negotiate_principal_fault() {
    init();

    let provider = FakeProvider::new(FakeStep::PrincipalFault);
    let negotiator = Negotiator::new(provider.clone());

    match negotiator.negotiate("HTTP@proxy.example.com", "QQ==") {
        NegotiationOutcome::ServerError {
            error: NegotiateError::Principal { .. }
        } => {}
        other => panic!("expected principal error, got {:?}", other)
    }

    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_negotiate_garbled_token() {
    init();

    let provider = FakeProvider::new(FakeStep::Complete("alice@EXAMPLE.COM"));
    let negotiator = Negotiator::new(provider.clone());

    match negotiator.negotiate("HTTP@proxy.example.com", "not*base64") {
        NegotiationOutcome::ServerError {
            error: NegotiateError::Token { .. }
        } => {}
        other => panic!("expected token error, got {:?}", other)
    }

    assert_eq!(None, provider.last_token());
    assert_eq!(1, provider.acquired());
    assert_eq!(1, provider.released())
}

#[test]
fn test_negotiate_fresh_context_per_call() {
    init();

    let provider = FakeProvider::new(FakeStep::Continue);
    let negotiator = Negotiator::new(provider.clone());

    for _ in 0..3 {
        negotiator.negotiate("HTTP@proxy.example.com", "QQ==");
    }

    assert_eq!(3, provider.acquired());
    assert_eq!(3, provider.released());
    assert_eq!(0, provider.double_releases())
}
