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


//! Process-wide Kerberos service identity.
//!
//! A [ServiceIdentity] is constructed once at startup from a
//! [ServiceIdentityConfig].  Construction checks the system
//! credential store (usually the keytab) through a
//! [CredentialStore], and fails if no usable credential exists for
//! the service principal.  This is a configuration error, and should
//! prevent the proxy from serving any requests.
//!
//! Once constructed, a `ServiceIdentity` is immutable, and is shared
//! read-only by every [AuthorizationGate](crate::gate::AuthorizationGate).
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

use log::debug;
use log::error;

use crate::config::ServiceIdentityConfig;

/// Access to the system credential store.
///
/// Implementations check whether a usable acceptor credential exists
/// for a service principal.  The credential itself is not retained;
/// this only proves that it can be obtained.
pub trait CredentialStore {
    /// Errors that can occur when querying the store.
    type Error: Display;

    /// Verify that a credential for `service_type@hostname` can be
    /// obtained.
    fn verify(
        &self,
        service_type: &str,
        hostname: &str
    ) -> Result<(), Self::Error>;
}

/// Errors that can occur when establishing the [ServiceIdentity].
#[derive(Debug)]
pub enum ServiceIdentityError<E> {
    /// The hostname was empty.
    EmptyHostname,
    /// The service type was empty.
    EmptyServiceType,
    /// No usable credential could be found for the service principal.
    Credential {
        /// Service principal name.
        service: String,
        /// Error from the credential store.
        error: E
    }
}

/// The Kerberos service principal under which the proxy accepts
/// authentication.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceIdentity {
    /// Kerberos service type.
    service_type: String,
    /// Hostname of the server.
    hostname: String
}

impl ServiceIdentity {
    /// Create the service identity from `config`, verifying it
    /// against `store`.
    ///
    /// # Errors
    ///
    /// Fails if either part of the principal is empty, or if `store`
    /// cannot supply a credential for it.
    pub fn new<S>(
        config: ServiceIdentityConfig,
        store: &S
    ) -> Result<Self, ServiceIdentityError<S::Error>>
    where
        S: CredentialStore {
        let (service_type, hostname) = config.take();

        if service_type.is_empty() {
            return Err(ServiceIdentityError::EmptyServiceType);
        }

        if hostname.is_empty() {
            return Err(ServiceIdentityError::EmptyHostname);
        }

        debug!(target: "service-identity",
               "verifying credential for {}@{}",
               service_type, hostname);

        store.verify(&service_type, &hostname).map_err(|err| {
            let service = format!("{}@{}", service_type, hostname);

            error!(target: "service-identity",
                   "no usable credential for {}: {}",
                   service, err);

            ServiceIdentityError::Credential {
                service: service,
                error: err
            }
        })?;

        Ok(ServiceIdentity {
            service_type: service_type,
            hostname: hostname
        })
    }

    /// Get the Kerberos service type.
    #[inline]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Get the hostname.
    #[inline]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Get the GSSAPI host-based service name,
    /// `<service-type>@<hostname>`.
    #[inline]
    pub fn service_name(&self) -> String {
        format!("{}@{}", self.service_type, self.hostname)
    }
}

impl<E> Display for ServiceIdentityError<E>
where
    E: Display
{
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            ServiceIdentityError::EmptyHostname => {
                write!(f, "service hostname is empty")
            }
            ServiceIdentityError::EmptyServiceType => {
                write!(f, "service type is empty")
            }
            ServiceIdentityError::Credential { service, error } => {
                write!(f, "no usable credential for {} ({})", service, error)
            }
        }
    }
}

impl<E> Error for ServiceIdentityError<E>
where
    E: Error + 'static
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServiceIdentityError::Credential { error, .. } => Some(error),
            _ => None
        }
    }
}

#[cfg(test)]
use crate::init;
#[cfg(test)]
use crate::testing::FakeCredentialStore;

#[test]
fn test_service_identity_ok() {
    init();

    let store = FakeCredentialStore::with_principal("HTTP@proxy.example.com");
    let config = ServiceIdentityConfig::new("proxy.example.com");
    let identity = ServiceIdentity::new(config, &store).unwrap();

    assert_eq!("HTTP", identity.service_type());
    assert_eq!("proxy.example.com", identity.hostname());
    assert_eq!("HTTP@proxy.example.com", identity.service_name());
    assert_eq!(1, store.queries())
}

#[test]
fn test_service_identity_no_credential() {
    init();

    let store = FakeCredentialStore::with_principal("HTTP@other.example.com");
    let config = ServiceIdentityConfig::new("proxy.example.com");

    match ServiceIdentity::new(config, &store) {
        Err(ServiceIdentityError::Credential { service, .. }) => {
            assert_eq!("HTTP@proxy.example.com", service)
        }
        other => panic!("expected credential error, got {:?}", other)
    }
}

#[test]
fn test_service_identity_empty_hostname() {
    init();

    let store = FakeCredentialStore::with_principal("HTTP@");
    let config = ServiceIdentityConfig::new("");

    match ServiceIdentity::new(config, &store) {
        Err(ServiceIdentityError::EmptyHostname) => {}
        other => panic!("expected empty hostname error, got {:?}", other)
    }

    assert_eq!(0, store.queries())
}

#[test]
fn test_service_identity_custom_service_type() {
    init();

    let store = FakeCredentialStore::with_principal("host@proxy.example.com");
    let config =
        ServiceIdentityConfig::new("proxy.example.com").with_service_type("host");
    let identity = ServiceIdentity::new(config, &store).unwrap();

    assert_eq!("host@proxy.example.com", identity.service_name())
}
