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


//! Configuration structures.
//!
//! This module contains the configuration for the service identity
//! under which the proxy accepts Negotiate authentication.  The
//! configuration has a YAML format, which can be parsed using
//! `serde_yaml`, thus allowing it to be loaded from the same text
//! files as the rest of the proxy's configuration.
use serde::Deserialize;
use serde::Serialize;

/// Default Kerberos service type.
const DEFAULT_SERVICE_TYPE: &str = "HTTP";

/// Configuration for the Kerberos service principal used by the
/// proxy.
///
/// The service principal is formed from the service type and the
/// hostname, as `<service-type>@<hostname>` (a GSSAPI host-based
/// service name).  The matching key must be present in the system
/// keytab.
///
/// # YAML Format
///
/// The YAML format has two fields:
///
/// - `service-type`: The Kerberos service type.  This is optional, and
///   defaults to `HTTP`.
///
/// - `hostname`: The hostname of the server.  This is required.
///
/// ## Examples
///
/// The following is an example of the YAML format:
///
/// ```yaml
/// service-type: HTTP
/// hostname: proxy.example.com
/// ```
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename = "service-identity")]
#[serde(rename_all = "kebab-case")]
pub struct ServiceIdentityConfig {
    /// Kerberos service type.
    #[serde(default = "ServiceIdentityConfig::default_service_type")]
    service_type: String,
    /// Hostname of the server.
    hostname: String
}

impl ServiceIdentityConfig {
    /// Create a new `ServiceIdentityConfig` for `hostname`, with the
    /// default service type.
    #[inline]
    pub fn new<S>(hostname: S) -> Self
    where
        S: Into<String> {
        ServiceIdentityConfig {
            service_type: Self::default_service_type(),
            hostname: hostname.into()
        }
    }

    /// Replace the service type.
    #[inline]
    pub fn with_service_type<S>(
        self,
        service_type: S
    ) -> Self
    where
        S: Into<String> {
        ServiceIdentityConfig {
            service_type: service_type.into(),
            hostname: self.hostname
        }
    }

    #[inline]
    fn default_service_type() -> String {
        String::from(DEFAULT_SERVICE_TYPE)
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

    /// Decompose this into the service type and the hostname.
    #[inline]
    pub fn take(self) -> (String, String) {
        (self.service_type, self.hostname)
    }
}

#[test]
fn test_deserialize_service_identity_cfg() {
    let yaml = concat!("service-type: host\n", "hostname: proxy.example.com\n");
    let expected = ServiceIdentityConfig {
        service_type: String::from("host"),
        hostname: String::from("proxy.example.com")
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_deserialize_service_identity_cfg_default_type() {
    let yaml = concat!("hostname: proxy.example.com\n");
    let expected = ServiceIdentityConfig::new("proxy.example.com");
    let actual: ServiceIdentityConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual);
    assert_eq!("HTTP", actual.service_type())
}

#[test]
fn test_deserialize_service_identity_cfg_no_hostname() {
    let yaml = concat!("service-type: HTTP\n");
    let actual: Result<ServiceIdentityConfig, _> = serde_yaml::from_str(yaml);

    assert!(actual.is_err())
}

#[test]
fn test_service_identity_cfg_with_service_type() {
    let cfg = ServiceIdentityConfig::new("proxy.example.com")
        .with_service_type("host");

    assert_eq!("host", cfg.service_type());
    assert_eq!("proxy.example.com", cfg.hostname())
}
