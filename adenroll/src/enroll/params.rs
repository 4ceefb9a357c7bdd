use super::{Enrollment, HostPassword, Setting};
use crate::{error::ErrorKind, keytab::Keytab, principal::Principal};
use rand::RngCore;

const GENERATED_PASSWORD_LENGTH: usize = 120;

impl Enrollment {
    pub(super) fn ensure_host_fqdn(&mut self) {
        match &self.host_fqdn {
            Setting::Derived(fqdn) | Setting::Explicit(fqdn) => {
                log::info!("Using fully qualified name: {}", fqdn);
            }
            Setting::Cleared => log::info!("Not setting fully qualified name"),
            Setting::Unset => {
                // By default use the host name discovered during connecting
                let fqdn = self.conn.host_fqdn().to_owned();
                self.host_fqdn = Setting::Derived(fqdn);
            }
        }
    }

    pub(super) fn ensure_computer_name(&mut self) -> anyhow::Result<()> {
        if let Some(name) = self.computer_name.value() {
            log::info!("Enrolling computer name: {}", name);
            return Ok(());
        }

        let fqdn = match self.host_fqdn.value() {
            Some(fqdn) => fqdn,
            None => {
                return Err(self.config_failure(
                    "No host name from which to determine the computer name".to_owned(),
                ))
            }
        };

        // The label before the first dot; a missing dot, or a dot first
        // or last, leaves nothing to name the account after.
        let label_end = match fqdn.find('.') {
            Some(at) if at != 0 && at + 1 != fqdn.len() => at,
            _ => {
                let fqdn = fqdn.clone();
                return Err(self.config_failure(format!(
                    "Couldn't determine the computer account name from host name: {}",
                    fqdn
                )));
            }
        };

        let name = fqdn[..label_end].to_uppercase();
        log::info!(
            "Enrolling computer account name calculated from fqdn: {}",
            name
        );
        self.computer_name = Setting::Derived(name);
        Ok(())
    }

    pub(super) fn ensure_computer_sam(&mut self) -> anyhow::Result<()> {
        let name = match self.computer_name.value() {
            Some(name) => name.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer name to derive the account name from".to_owned(),
                ))
            }
        };

        let sam = format!("{}$", name);
        let principal = match Principal::parse_with_realm(&sam, self.conn.domain_realm()) {
            Ok(principal) => principal,
            Err(err) => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    format!("Couldn't parse computer account principal: {}: {}", sam, err),
                ))
            }
        };

        self.computer_sam = Some(sam);
        self.computer_principal = Some(principal);
        Ok(())
    }

    pub(super) fn ensure_computer_password(&mut self) -> anyhow::Result<()> {
        if self.computer_password.is_set() {
            return Ok(());
        }

        if self.reset_password {
            let name = match self.computer_name.value() {
                Some(name) => name.clone(),
                None => {
                    return Err(self.fail(
                        ErrorKind::Unexpected,
                        "No computer name to derive the reset password from".to_owned(),
                    ))
                }
            };
            // The well-known password AD gives freshly reset machine
            // accounts: the lowercased computer name.
            self.computer_password =
                Setting::Derived(HostPassword::new(name.to_lowercase().into_bytes()));
            log::info!("Using default reset computer password");
        } else {
            let password =
                generate_host_password(GENERATED_PASSWORD_LENGTH, &mut rand::thread_rng());
            log::info!(
                "Generated {} character computer password",
                GENERATED_PASSWORD_LENGTH
            );
            self.computer_password = Setting::Derived(password);
        }

        Ok(())
    }

    pub(super) fn ensure_host_keytab(&mut self) -> anyhow::Result<()> {
        if self.keytab.is_some() {
            return Ok(());
        }

        let keytab = match self.keytab_name.clone() {
            Some(name) => Keytab::resolve(&name).map_err(|err| {
                self.fail(
                    ErrorKind::Fail,
                    format!("Failed to open keytab: {}: {}", name, err),
                )
            })?,
            None => {
                let name = match Keytab::default_name() {
                    Ok(name) => name,
                    Err(err) => {
                        return Err(self.fail(
                            ErrorKind::Fail,
                            format!("Failed to open default keytab: {}", err),
                        ))
                    }
                };
                let keytab = Keytab::resolve(&name).map_err(|err| {
                    self.fail(
                        ErrorKind::Fail,
                        format!("Failed to open default keytab: {}", err),
                    )
                })?;
                self.keytab_name = Some(name);
                keytab
            }
        };

        log::info!(
            "Using keytab: {}",
            self.keytab_name.as_deref().unwrap_or("")
        );
        self.keytab = Some(keytab);
        Ok(())
    }

    pub(super) fn ensure_service_names(&mut self) {
        if self.service_names.is_set() {
            return;
        }
        // The default services specified by MS
        self.service_names = Setting::Derived(vec![
            "HOST".to_owned(),
            "RestrictedKrbHost".to_owned(),
        ]);
    }

    pub(super) fn ensure_service_principals(&mut self) -> anyhow::Result<()> {
        if !self.service_principals.is_set() {
            let name = match self.computer_name.value() {
                Some(name) => name.clone(),
                None => {
                    return Err(self.fail(
                        ErrorKind::Unexpected,
                        "No computer name to derive service principals from".to_owned(),
                    ))
                }
            };
            let mut principals = vec![];
            for service in self.service_names.value().into_iter().flatten() {
                principals.push(format!("{}/{}", service, name));
                if let Some(fqdn) = self.host_fqdn.value() {
                    principals.push(format!("{}/{}", service, fqdn));
                }
            }
            self.service_principals = Setting::Derived(principals);
        }

        // Prepare the principals that will go into the keytab: the
        // account principal first, then every service principal pinned
        // to the connection realm.
        let computer_principal = match &self.computer_principal {
            Some(principal) => principal.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer account principal derived".to_owned(),
                ))
            }
        };

        let mut keytab_principals = vec![computer_principal];
        let realm = self.conn.domain_realm().to_owned();
        for name in self.service_principals.value().into_iter().flatten() {
            match Principal::parse_with_realm(name, &realm) {
                Ok(principal) => keytab_principals.push(principal),
                Err(err) => {
                    let message =
                        format!("Couldn't parse kerberos service principal: {}: {}", name, err);
                    return Err(self.config_failure(message));
                }
            }
        }
        self.keytab_principals = keytab_principals;
        Ok(())
    }
}

/// MS documents that their servers reliably accept only ASCII between
/// 32 and 122 inclusive; everything else is filtered out.
pub(crate) fn filter_password_chars(octets: &[u8]) -> Vec<u8> {
    octets
        .iter()
        .copied()
        .filter(|octet| (32..=122).contains(octet))
        .collect()
}

/// Draws random octets and rejection-samples them into the accepted
/// range until `length` octets are gathered.
pub(crate) fn generate_host_password(length: usize, rng: &mut dyn RngCore) -> HostPassword {
    let mut password = Vec::with_capacity(length);
    while password.len() != length {
        let mut buffer = vec![0u8; length - password.len()];
        rng.fill_bytes(&mut buffer);
        password.extend_from_slice(&filter_password_chars(&buffer));
    }
    HostPassword::new(password)
}
