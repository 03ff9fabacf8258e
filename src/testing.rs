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


//! Instrumented fakes of the security primitive, for tests.
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::identity::CredentialStore;
use crate::negotiate::ContextProvider;
use crate::negotiate::NegotiateStatus;
use crate::negotiate::ServerContext;

/// Scripted behavior of a [FakeProvider].
#[derive(Clone, Copy, Debug)]
pub enum FakeStep {
    /// Accept step completes, authenticating the given principal.
    Complete(&'static str),
    /// Accept step asks for another round.
    Continue,
    /// Accept step fails.
    Fault,
    /// Context initialization fails.
    InitFault,
    /// Accept step completes, but the peer name can't be obtained.
    PrincipalFault
}

#[derive(Debug)]
pub struct FakeError {
    message: &'static str
}

#[derive(Default)]
struct FakeCounters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    double_releases: AtomicUsize,
    last_service: Mutex<Option<String>>,
    last_token: Mutex<Option<Vec<u8>>>
}

/// [ContextProvider] that counts acquisitions and releases.
#[derive(Clone)]
pub struct FakeProvider {
    step: FakeStep,
    counters: Arc<FakeCounters>
}

pub struct FakeContext {
    step: FakeStep,
    released: bool,
    counters: Arc<FakeCounters>
}

/// [CredentialStore] holding a credential for a single service.
pub struct FakeCredentialStore {
    service: String,
    queries: AtomicUsize
}

impl FakeProvider {
    pub fn new(step: FakeStep) -> Self {
        FakeProvider {
            step: step,
            counters: Arc::new(FakeCounters::default())
        }
    }

    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn double_releases(&self) -> usize {
        self.counters.double_releases.load(Ordering::SeqCst)
    }

    pub fn last_service(&self) -> Option<String> {
        self.counters.last_service.lock().unwrap().clone()
    }

    pub fn last_token(&self) -> Option<Vec<u8>> {
        self.counters.last_token.lock().unwrap().clone()
    }
}

impl ContextProvider for FakeProvider {
    type Context = FakeContext;
    type Error = FakeError;

    fn acquire(
        &self,
        service: &str
    ) -> Result<FakeContext, FakeError> {
        *self.counters.last_service.lock().unwrap() = Some(String::from(service));

        if let FakeStep::InitFault = self.step {
            return Err(FakeError {
                message: "no acceptor credential"
            });
        }

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(FakeContext {
            step: self.step,
            released: false,
            counters: self.counters.clone()
        })
    }
}

impl ServerContext for FakeContext {
    type Error = FakeError;

    fn accept(
        &mut self,
        token: &[u8]
    ) -> Result<NegotiateStatus, FakeError> {
        assert!(!self.released, "accept on released context");

        *self.counters.last_token.lock().unwrap() = Some(token.to_vec());

        match self.step {
            FakeStep::Complete(_) | FakeStep::PrincipalFault => {
                Ok(NegotiateStatus::Complete)
            }
            FakeStep::Continue => Ok(NegotiateStatus::ContinueNeeded),
            FakeStep::Fault | FakeStep::InitFault => Err(FakeError {
                message: "defective token"
            })
        }
    }

    fn principal(&mut self) -> Result<String, FakeError> {
        assert!(!self.released, "principal on released context");

        match self.step {
            FakeStep::Complete(principal) => Ok(String::from(principal)),
            _ => Err(FakeError {
                message: "no peer name"
            })
        }
    }

    fn release(&mut self) {
        if self.released {
            self.counters.double_releases.fetch_add(1, Ordering::SeqCst);
        } else {
            self.released = true;
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl FakeCredentialStore {
    pub fn with_principal(service: &str) -> Self {
        FakeCredentialStore {
            service: String::from(service),
            queries: AtomicUsize::new(0)
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl CredentialStore for FakeCredentialStore {
    type Error = FakeError;

    fn verify(
        &self,
        service_type: &str,
        hostname: &str
    ) -> Result<(), FakeError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if format!("{}@{}", service_type, hostname) == self.service {
            Ok(())
        } else {
            Err(FakeError {
                message: "no keytab entry"
            })
        }
    }
}

impl Display for FakeError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.message)
    }
}

impl Error for FakeError {}
