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


//! `libgssapi`-backed security primitive.
//!
//! [GSSAPIAcceptor] acquires acceptor credentials for the host-based
//! service name of the proxy from the system keytab, canonicalized
//! for the Kerberos mechanism.  It serves both as the
//! [CredentialStore] used to validate the
//! [ServiceIdentity](crate::identity::ServiceIdentity) at startup and
//! as the [ContextProvider] for per-request negotiation.
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::string::FromUtf8Error;
use std::time::Duration;

use libgssapi::context::SecurityContext;
use libgssapi::context::ServerCtx;
use libgssapi::credential::Cred;
use libgssapi::credential::CredUsage;
use libgssapi::name::Name;
use libgssapi::oid::Oid;
use libgssapi::oid::OidSet;
use libgssapi::oid::GSS_MECH_KRB5;
use libgssapi::oid::GSS_MECH_SPNEGO;
use libgssapi::oid::GSS_NT_HOSTBASED_SERVICE;
use log::trace;

use crate::identity::CredentialStore;
use crate::negotiate::ContextProvider;
use crate::negotiate::NegotiateStatus;
use crate::negotiate::ServerContext;

/// Mechanisms accepted on the server side.
///
/// HTTP clients wrap their Kerberos tokens in SPNEGO, so the acceptor
/// credential needs an SPNEGO element as well as a Kerberos one.
static ACCEPTOR_MECHS: [&Oid; 2] = [&GSS_MECH_SPNEGO, &GSS_MECH_KRB5];

/// Errors from the `libgssapi` backend.
#[derive(Debug)]
pub enum GSSAPIBackendError {
    /// GSSAPI error.
    GSSAPI {
        /// GSSAPI error.
        error: libgssapi::error::Error
    },
    /// The peer name was not valid UTF-8.
    Utf8 {
        /// Decoding error.
        error: FromUtf8Error
    },
    /// The context was used after being released.
    Released
}

/// Acceptor-side GSSAPI credentials and contexts.
#[derive(Clone, Debug, Default)]
pub struct GSSAPIAcceptor {
    /// Requested credential lifetime.
    time_req: Option<Duration>
}

/// [ServerContext] wrapping a `libgssapi` [ServerCtx].
pub struct GSSAPIServerContext {
    ctx: Option<ServerCtx>
}

impl GSSAPIAcceptor {
    #[inline]
    pub fn new() -> Self {
        GSSAPIAcceptor::default()
    }

    /// Create a `GSSAPIAcceptor` that requests credentials valid for
    /// at least `time_req`.
    #[inline]
    pub fn with_time_req(time_req: Duration) -> Self {
        GSSAPIAcceptor {
            time_req: Some(time_req)
        }
    }

    /// Acquire acceptor credentials for the host-based service name
    /// `service`.
    fn acquire_cred(
        &self,
        service: &str
    ) -> Result<Cred, libgssapi::error::Error> {
        // Prepare the mechanisms.
        let mut mechs = OidSet::new()?;

        for mech in ACCEPTOR_MECHS.iter() {
            mechs.add(mech)?;
        }

        // Prepare the principal name.
        let name =
            Name::new(service.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))?;
        let name = name.canonicalize(Some(&GSS_MECH_KRB5))?;

        trace!(target: "negotiate",
               "acquiring acceptor credential for {}",
               name);

        Cred::acquire(
            Some(&name),
            self.time_req,
            CredUsage::Accept,
            Some(&mechs)
        )
    }
}

impl CredentialStore for GSSAPIAcceptor {
    type Error = GSSAPIBackendError;

    fn verify(
        &self,
        service_type: &str,
        hostname: &str
    ) -> Result<(), GSSAPIBackendError> {
        let service = format!("{}@{}", service_type, hostname);

        self.acquire_cred(&service)
            .map(|_| ())
            .map_err(|err| GSSAPIBackendError::GSSAPI { error: err })
    }
}

impl ContextProvider for GSSAPIAcceptor {
    type Context = GSSAPIServerContext;
    type Error = GSSAPIBackendError;

    fn acquire(
        &self,
        service: &str
    ) -> Result<GSSAPIServerContext, GSSAPIBackendError> {
        let cred = self
            .acquire_cred(service)
            .map_err(|err| GSSAPIBackendError::GSSAPI { error: err })?;

        Ok(GSSAPIServerContext {
            ctx: Some(ServerCtx::new(cred.into()))
        })
    }
}

impl GSSAPIServerContext {
    #[inline]
    fn ctx(&mut self) -> Result<&mut ServerCtx, GSSAPIBackendError> {
        self.ctx.as_mut().ok_or(GSSAPIBackendError::Released)
    }
}

impl ServerContext for GSSAPIServerContext {
    type Error = GSSAPIBackendError;

    fn accept(
        &mut self,
        token: &[u8]
    ) -> Result<NegotiateStatus, GSSAPIBackendError> {
        let ctx = self.ctx()?;

        // The output token is only needed for mutual authentication,
        // which the single-step exchange does not send back.
        ctx.step(token)
            .map_err(|err| GSSAPIBackendError::GSSAPI { error: err })?;

        if ctx.is_complete() {
            Ok(NegotiateStatus::Complete)
        } else {
            Ok(NegotiateStatus::ContinueNeeded)
        }
    }

    fn principal(&mut self) -> Result<String, GSSAPIBackendError> {
        let name = self
            .ctx()?
            .source_name()
            .map_err(|err| GSSAPIBackendError::GSSAPI { error: err })?;
        let buf = name
            .display_name()
            .map_err(|err| GSSAPIBackendError::GSSAPI { error: err })?;

        principal_from_display(&buf)
    }

    #[inline]
    fn release(&mut self) {
        // Dropping the context deletes it.
        self.ctx = None
    }
}

/// Decode the display form of a peer name.
#[inline]
fn principal_from_display(buf: &[u8]) -> Result<String, GSSAPIBackendError> {
    String::from_utf8(buf.to_vec())
        .map_err(|err| GSSAPIBackendError::Utf8 { error: err })
}

impl Display for GSSAPIBackendError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            GSSAPIBackendError::GSSAPI { error } => error.fmt(f),
            GSSAPIBackendError::Utf8 { error } => {
                write!(f, "peer name is not valid UTF-8 ({})", error)
            }
            GSSAPIBackendError::Released => {
                write!(f, "security context already released")
            }
        }
    }
}

impl Error for GSSAPIBackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GSSAPIBackendError::GSSAPI { error } => Some(error),
            GSSAPIBackendError::Utf8 { error } => Some(error),
            GSSAPIBackendError::Released => None
        }
    }
}

#[test]
fn test_released_context_rejects_use() {
    let mut ctx = GSSAPIServerContext { ctx: None };

    match ctx.accept(b"A") {
        Err(GSSAPIBackendError::Released) => {}
        other => panic!("expected released error, got {:?}", other)
    }

    match ctx.principal() {
        Err(GSSAPIBackendError::Released) => {}
        other => panic!("expected released error, got {:?}", other)
    }
}

#[test]
fn test_acceptor_mechs_include_spnego() {
    assert!(ACCEPTOR_MECHS.iter().any(|mech| **mech == GSS_MECH_SPNEGO));
    assert!(ACCEPTOR_MECHS.iter().any(|mech| **mech == GSS_MECH_KRB5))
}

#[test]
fn test_principal_from_display() {
    let principal = principal_from_display(b"alice@EXAMPLE.COM").unwrap();

    assert_eq!("alice@EXAMPLE.COM", principal)
}

#[test]
fn test_principal_from_display_bad_utf8() {
    match principal_from_display(b"alice\xff@EXAMPLE.COM") {
        Err(GSSAPIBackendError::Utf8 { .. }) => {}
        other => panic!("expected UTF-8 error, got {:?}", other)
    }
}
