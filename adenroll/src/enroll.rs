mod account;
mod attrs;
mod keytab_update;
mod locate;
mod params;
mod password;

use crate::{
    connection::Connection,
    directory::{DirectoryError, Entry},
    error::{Error, ErrorKind},
    keytab::{Keytab, Kvno},
    crypto::{Enctype, DEFAULT_ENCTYPES},
    principal::Principal,
    Flags,
};
use std::sync::{Arc, Mutex};
use zeroize::Zeroize;

pub type JoinFlags = Flags;

/// Update an account that already exists instead of failing.
pub const JOIN_ALLOW_OVERWRITE: JoinFlags = 1 << 0;
/// Join without opening or writing a keytab.
pub const JOIN_NO_KEYTAB: JoinFlags = 1 << 1;

/// How an enrollment field got its value. `Derived` values are wiped
/// when a join resets state; `Explicit` ones belong to the caller and
/// survive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Setting<T> {
    #[default]
    Unset,
    /// Explicitly configured to carry no value.
    Cleared,
    Derived(T),
    Explicit(T),
}

impl<T> Setting<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Derived(value) | Self::Explicit(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.value().is_some()
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    pub fn clear_derived(&mut self) {
        if matches!(self, Self::Derived(_)) {
            *self = Self::Unset;
        }
    }
}

/// A computer-account password: printable ASCII octets that are wiped
/// when the buffer goes away.
pub struct HostPassword(Vec<u8>);

impl HostPassword {
    pub fn new(octets: Vec<u8>) -> Self {
        Self(octets)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for HostPassword {
    fn from(password: &str) -> Self {
        Self(password.as_bytes().to_vec())
    }
}

impl Drop for HostPassword {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for HostPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostPassword({} octets)", self.0.len())
    }
}

/// The enrollment context. It accumulates derived state across the join
/// pipeline and owns everything it derives; the connection is shared
/// and never closed here.
#[derive(Debug)]
pub struct Enrollment {
    conn: Arc<Connection>,

    host_fqdn: Setting<String>,
    computer_name: Setting<String>,
    computer_sam: Option<String>,
    computer_principal: Option<Principal>,
    computer_password: Setting<HostPassword>,
    reset_password: bool,

    preferred_ou: Option<String>,
    preferred_ou_validated: bool,
    computer_container: Option<String>,
    computer_dn: Setting<String>,
    computer_attributes: Option<Entry>,

    service_names: Setting<Vec<String>>,
    service_principals: Setting<Vec<String>>,
    keytab_principals: Vec<Principal>,

    kvno: Setting<Kvno>,
    keytab_name: Option<String>,
    keytab: Option<Arc<Mutex<Keytab>>>,
    keytab_enctypes: Setting<Vec<Enctype>>,
}

impl Enrollment {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            host_fqdn: Setting::Unset,
            computer_name: Setting::Unset,
            computer_sam: None,
            computer_principal: None,
            computer_password: Setting::Unset,
            reset_password: false,
            preferred_ou: None,
            preferred_ou_validated: false,
            computer_container: None,
            computer_dn: Setting::Unset,
            computer_attributes: None,
            service_names: Setting::Unset,
            service_principals: Setting::Unset,
            keytab_principals: vec![],
            kvno: Setting::Unset,
            keytab_name: None,
            keytab: None,
            keytab_enctypes: Setting::Unset,
        }
    }

    /// Derives every enrollment parameter and opens the keytab (unless
    /// `JOIN_NO_KEYTAB`), without touching the directory.
    pub fn prepare(&mut self, flags: JoinFlags) -> anyhow::Result<()> {
        self.conn.clear_last_error();

        self.ensure_host_fqdn();
        self.ensure_computer_name()?;
        self.ensure_computer_sam()?;
        self.ensure_computer_password()?;
        if flags & JOIN_NO_KEYTAB == 0 {
            self.ensure_host_keytab()?;
        }
        self.ensure_service_names();
        self.ensure_service_principals()?;
        Ok(())
    }

    /// Joins the host to the domain: locates or creates the computer
    /// account, rotates its password, reconciles its attributes, and
    /// rewrites the keytab. Requires a discovered, bound connection.
    pub fn join(&mut self, flags: JoinFlags) -> anyhow::Result<()> {
        self.conn.clear_last_error();
        self.clear_state();

        self.prepare(flags)?;

        // Figure out where to place the computer account
        if self.computer_dn.value().is_none() {
            if self.preferred_ou.is_some() {
                self.validate_preferred_ou()?;
            } else {
                self.lookup_preferred_ou()?;
            }
            self.lookup_computer_container()?;
            self.calc_computer_account()?;
        }

        self.create_or_update_computer_account(flags & JOIN_ALLOW_OVERWRITE != 0)?;

        self.set_account_password()?;

        // The password set bumped the account kvno; read it back before
        // anything derives keys from it.
        self.retrieve_computer_account_info()?;

        self.synchronize_account_attributes()?;

        if flags & JOIN_NO_KEYTAB != 0 {
            return Ok(());
        }

        self.update_keytab_for_principals()
    }

    fn clear_state(&mut self) {
        self.keytab_principals.clear();
        self.keytab = None;
        self.computer_sam = None;
        self.computer_principal = None;
        self.computer_password.clear_derived();
        self.computer_dn.clear_derived();
        self.service_principals.clear_derived();
        self.kvno.clear_derived();
        self.computer_attributes = None;
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn host_fqdn(&self) -> Option<&str> {
        self.host_fqdn.value().map(String::as_str)
    }

    /// `None` leaves the host without a DNS name: no FQDN is derived and
    /// no FQDN-based service principals are produced.
    pub fn set_host_fqdn(&mut self, value: Option<&str>) {
        self.host_fqdn = match value {
            Some(value) => Setting::Explicit(value.to_owned()),
            None => Setting::Cleared,
        };
    }

    pub fn computer_name(&self) -> Option<&str> {
        self.computer_name.value().map(String::as_str)
    }

    pub fn set_computer_name(&mut self, value: &str) {
        self.computer_name = Setting::Explicit(value.to_owned());
    }

    pub fn computer_sam(&self) -> Option<&str> {
        self.computer_sam.as_deref()
    }

    pub fn computer_password(&self) -> Option<&HostPassword> {
        self.computer_password.value()
    }

    pub fn set_computer_password(&mut self, password: &str) {
        self.computer_password = Setting::Explicit(HostPassword::from(password));
        self.reset_password = false;
    }

    /// Forget any configured password and use the well-known reset
    /// password on the next join.
    pub fn reset_computer_password(&mut self) {
        self.computer_password = Setting::Unset;
        self.reset_password = true;
    }

    pub fn preferred_ou(&self) -> Option<&str> {
        self.preferred_ou.as_deref()
    }

    pub fn set_preferred_ou(&mut self, value: &str) {
        self.preferred_ou_validated = false;
        self.preferred_ou = Some(value.to_owned());
    }

    pub fn computer_container(&self) -> Option<&str> {
        self.computer_container.as_deref()
    }

    pub fn set_computer_container(&mut self, value: &str) {
        self.computer_container = Some(value.to_owned());
    }

    pub fn computer_dn(&self) -> Option<&str> {
        self.computer_dn.value().map(String::as_str)
    }

    pub fn set_computer_dn(&mut self, value: &str) {
        self.computer_dn = Setting::Explicit(value.to_owned());
    }

    pub fn service_names(&mut self) -> &[String] {
        self.ensure_service_names();
        self.service_names.value().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_service_names(&mut self, values: &[&str]) {
        self.service_names = Setting::Explicit(values.iter().map(|v| (*v).to_owned()).collect());
    }

    pub fn add_service_name(&mut self, value: &str) {
        match &mut self.service_names {
            Setting::Derived(names) | Setting::Explicit(names) => names.push(value.to_owned()),
            _ => self.service_names = Setting::Explicit(vec![value.to_owned()]),
        }
    }

    pub fn service_principals(&self) -> Option<&[String]> {
        self.service_principals.value().map(Vec::as_slice)
    }

    pub fn set_service_principals(&mut self, values: &[&str]) {
        self.service_principals =
            Setting::Explicit(values.iter().map(|v| (*v).to_owned()).collect());
    }

    pub fn kvno(&self) -> Kvno {
        self.kvno.value().copied().unwrap_or(0)
    }

    pub fn set_kvno(&mut self, value: Kvno) {
        self.kvno = Setting::Explicit(value);
    }

    pub fn keytab(&self) -> Option<Arc<Mutex<Keytab>>> {
        self.keytab.as_ref().map(Arc::clone)
    }

    pub fn keytab_name(&self) -> Option<&str> {
        self.keytab_name.as_deref()
    }

    /// Names the keytab to write. An already opened handle is dropped so
    /// the next use opens the named one.
    pub fn set_keytab_name(&mut self, value: &str) {
        self.keytab = None;
        self.keytab_name = Some(value.to_owned());
    }

    pub fn keytab_enctypes(&self) -> &[Enctype] {
        self.keytab_enctypes
            .value()
            .map(Vec::as_slice)
            .unwrap_or(&DEFAULT_ENCTYPES)
    }

    pub fn set_keytab_enctypes(&mut self, values: &[Enctype]) {
        self.keytab_enctypes = Setting::Explicit(values.to_vec());
    }

    pub(crate) fn fail(&self, kind: ErrorKind, message: String) -> anyhow::Error {
        log::error!("{}", message);
        self.conn.set_last_error(&message);
        Error { kind, message }.into()
    }

    pub(crate) fn config_failure(&self, message: String) -> anyhow::Error {
        self.fail(ErrorKind::Config, message)
    }

    pub(crate) fn directory_failure(
        &self,
        task: &str,
        target: Option<&str>,
        err: &DirectoryError,
        kind: ErrorKind,
    ) -> anyhow::Error {
        let message = match target {
            Some(target) => format!("{}: {}: {}", task, target, err),
            None => format!("{}: {}", task, err),
        };
        self.fail(kind, message)
    }
}
