use crate::{directory::Directory, kdc::KdcClient};
use dns_lookup::AddrInfoHints;
use std::sync::Mutex;

/// How the connection authenticated to the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginType {
    UserAccount,
    ComputerAccount,
}

/// What connecting discovered about the domain and this host.
#[derive(Debug, Clone)]
pub struct Domain {
    pub name: String,
    pub realm: String,
    pub naming_context: String,
    pub host_fqdn: String,
    pub login_type: LoginType,
}

/// The connection collaborator: discovered domain facts plus open
/// directory and Kerberos handles. The enrollment context borrows this
/// and never closes the underlying connections.
pub struct Connection {
    domain: Domain,
    directory: Mutex<Box<dyn Directory>>,
    kdc: Mutex<Box<dyn KdcClient>>,
    last_error: Mutex<Option<String>>,
}

impl Connection {
    pub fn new(domain: Domain, directory: Box<dyn Directory>, kdc: Box<dyn KdcClient>) -> Self {
        Self {
            domain,
            directory: Mutex::new(directory),
            kdc: Mutex::new(kdc),
            last_error: Mutex::new(None),
        }
    }

    /// This host's fully qualified name: the canonical name when the
    /// resolver knows one, otherwise whatever the kernel reports.
    pub fn discover_host_fqdn() -> anyhow::Result<String> {
        let hostname = dns_lookup::get_hostname()?;
        let hints = AddrInfoHints {
            flags: nix::libc::AI_CANONNAME,
            ..AddrInfoHints::default()
        };
        if let Ok(addrs) = dns_lookup::getaddrinfo(Some(&hostname), None, Some(hints)) {
            for addr in addrs.flatten() {
                match addr.canonname {
                    Some(canonical) if canonical.contains('.') => return Ok(canonical),
                    _ => (),
                }
            }
        }
        Ok(hostname)
    }

    pub fn domain_name(&self) -> &str {
        &self.domain.name
    }

    pub fn domain_realm(&self) -> &str {
        &self.domain.realm
    }

    pub fn naming_context(&self) -> &str {
        &self.domain.naming_context
    }

    pub fn host_fqdn(&self) -> &str {
        &self.domain.host_fqdn
    }

    pub fn login_type(&self) -> LoginType {
        self.domain.login_type
    }

    pub(crate) fn directory(&self) -> &Mutex<Box<dyn Directory>> {
        &self.directory
    }

    pub(crate) fn kdc(&self) -> &Mutex<Box<dyn KdcClient>> {
        &self.kdc
    }

    /// The diagnostic from the most recent hard failure, for callers
    /// that report errors after the fact.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub(crate) fn clear_last_error(&self) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = None;
        }
    }

    pub(crate) fn set_last_error(&self, message: &str) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(message.to_owned());
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
