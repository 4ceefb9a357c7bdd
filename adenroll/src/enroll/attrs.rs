use super::{account::filter_necessary_mods, Enrollment, Setting};
use crate::{
    crypto::{format_supported_enctypes, parse_supported_enctypes},
    directory::{AttrMod, Entry, ResultCode, Scope},
    error::{error_kind, ErrorKind},
    keytab::Kvno,
};

const INFO_ATTRS: [&str; 4] = [
    "msDS-KeyVersionNumber",
    "msDS-supportedEncryptionTypes",
    "dNSHostName",
    "servicePrincipalName",
];

impl Enrollment {
    /// Reads the account back after the password set, so the kvno and
    /// current attribute state reflect the new key.
    pub(super) fn retrieve_computer_account_info(&mut self) -> anyhow::Result<()> {
        let dn = match self.computer_dn.value() {
            Some(dn) => dn.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer account location computed".to_owned(),
                ))
            }
        };

        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.search(&dn, Scope::Base, "(objectClass=*)", &INFO_ATTRS)
        };

        let entry = match result {
            Ok(mut entries) if !entries.is_empty() => entries.remove(0),
            Ok(_) => Entry {
                dn: dn.clone(),
                ..Entry::default()
            },
            Err(err) => {
                return Err(self.directory_failure(
                    "Couldn't retrieve computer account info",
                    Some(&dn),
                    &err,
                    ErrorKind::Directory,
                ))
            }
        };

        if self.kvno.is_set() {
            log::info!("Using preset kvno '{}'", self.kvno());
        } else {
            match entry.value("msDS-KeyVersionNumber") {
                Some(value) => match value.parse::<Kvno>() {
                    Ok(kvno) => {
                        self.kvno = Setting::Derived(kvno);
                        log::info!(
                            "Retrieved kvno '{}' for computer account in directory: {}",
                            value,
                            dn
                        );
                    }
                    Err(_) => {
                        return Err(self.fail(
                            ErrorKind::Directory,
                            format!(
                                "Invalid kvno '{}' for computer account in directory: {}",
                                value, dn
                            ),
                        ))
                    }
                },
                None => {
                    // Old AD did not carry the attribute, use zero
                    self.kvno = Setting::Derived(0);
                    log::info!("No kvno found for computer account in directory: {}", dn);
                }
            }
        }

        self.computer_attributes = Some(entry);
        Ok(())
    }

    /// Writes back whichever of the account's enctypes, DNS name and
    /// service principals disagree with the desired state. Only an
    /// unrepresentable enctype list aborts; everything else is logged
    /// and swallowed so the join can finish.
    pub(super) fn synchronize_account_attributes(&mut self) -> anyhow::Result<()> {
        if let Err(err) = self.update_enctypes() {
            if error_kind(&err) == Some(ErrorKind::Config) {
                return Err(err);
            }
            log::warn!("{}", err);
        }
        if let Err(err) = self.update_dns_host_name() {
            log::warn!("{}", err);
        }
        if let Err(err) = self.update_service_principals() {
            log::warn!("{}", err);
        }
        Ok(())
    }

    // The server has to know the encryption types usable on this client:
    // a keytab cannot pick up a new type the KDC throws at it.
    fn update_enctypes(&mut self) -> anyhow::Result<()> {
        let dn = self.computer_dn.value().cloned().unwrap_or_default();
        let current = self
            .computer_attributes
            .as_ref()
            .and_then(|entry| entry.value("msDS-supportedEncryptionTypes"))
            .map(str::to_owned);

        // Adopt what the account already advertises, unless the caller
        // pinned a list.
        if !self.keytab_enctypes.is_explicit() {
            if let Some(value) = &current {
                match parse_supported_enctypes(value) {
                    Some(enctypes) => self.keytab_enctypes = Setting::Derived(enctypes),
                    None => log::warn!(
                        "Invalid or unsupported encryption types are set on the computer account ({})",
                        value
                    ),
                }
            }
        }

        let new_value = match format_supported_enctypes(self.keytab_enctypes()) {
            Some(value) => value,
            None => {
                return Err(self.config_failure(
                    "The encryption types desired are not available in active directory"
                        .to_owned(),
                ))
            }
        };

        if current.as_deref() == Some(new_value.as_str()) {
            return Ok(());
        }

        let mods = vec![AttrMod {
            attr: "msDS-supportedEncryptionTypes".to_owned(),
            values: vec![new_value],
        }];
        self.modify_account_attribute(&dn, mods, "set encryption types on computer account")
    }

    fn update_dns_host_name(&mut self) -> anyhow::Result<()> {
        let dn = self.computer_dn.value().cloned().unwrap_or_default();
        let fqdn = match self.host_fqdn.value() {
            Some(fqdn) => fqdn.clone(),
            None => return Ok(()),
        };

        let mods = vec![AttrMod {
            attr: "dNSHostName".to_owned(),
            values: vec![fqdn],
        }];
        let mods = filter_necessary_mods(self.computer_attributes.as_ref(), mods);
        if mods.is_empty() {
            return Ok(());
        }
        self.modify_account_attribute(&dn, mods, "set host name on computer account")
    }

    fn update_service_principals(&mut self) -> anyhow::Result<()> {
        let dn = self.computer_dn.value().cloned().unwrap_or_default();
        let principals = match self.service_principals.value() {
            Some(principals) => principals.clone(),
            None => return Ok(()),
        };

        let mods = vec![AttrMod {
            attr: "servicePrincipalName".to_owned(),
            values: principals,
        }];
        let mods = filter_necessary_mods(self.computer_attributes.as_ref(), mods);
        if mods.is_empty() {
            return Ok(());
        }
        self.modify_account_attribute(&dn, mods, "set service principals on computer account")
    }

    fn modify_account_attribute(
        &self,
        dn: &str,
        mods: Vec<AttrMod>,
        what: &str,
    ) -> anyhow::Result<()> {
        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.modify(dn, &mods)
        };

        match result {
            Err(err) if err.code == ResultCode::INSUFFICIENT_ACCESS => {
                Err(self.directory_failure(
                    &format!("Insufficient permissions to {}", what),
                    Some(dn),
                    &err,
                    ErrorKind::Credentials,
                ))
            }
            Err(err) => Err(self.directory_failure(
                &format!("Couldn't {}", what),
                Some(dn),
                &err,
                ErrorKind::Directory,
            )),
            Ok(()) => Ok(()),
        }
    }
}
