use super::{Enrollment, Setting};
use crate::{
    directory::Scope,
    error::ErrorKind,
};

const WELL_KNOWN_COMPUTERS_PREFIX: &str = "B:32:AA312825768811D1ADED00C04FD8D5CD:";

impl Enrollment {
    pub(super) fn validate_preferred_ou(&mut self) -> anyhow::Result<()> {
        let ou = match &self.preferred_ou {
            Some(ou) => ou.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No organizational unit to validate".to_owned(),
                ))
            }
        };

        if self.preferred_ou_validated {
            return Ok(());
        }

        // The naming context itself gets a pass
        if ou.eq_ignore_ascii_case(self.conn.naming_context()) {
            self.preferred_ou_validated = true;
            return Ok(());
        }

        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.compare(&ou, "objectClass", "organizationalUnit")
        };

        match result {
            Ok(true) => {
                log::info!("The computer organizational unit is valid: {}", ou);
                self.preferred_ou_validated = true;
                Ok(())
            }
            Ok(false) => Err(self.config_failure(format!(
                "The computer organizational unit is invalid: {}",
                ou
            ))),
            Err(err) => Err(self.directory_failure(
                "Couldn't check preferred organizational unit",
                Some(&ou),
                &err,
                ErrorKind::Directory,
            )),
        }
    }

    pub(super) fn lookup_preferred_ou(&mut self) -> anyhow::Result<()> {
        let base = self.conn.naming_context().to_owned();

        // TODO: the documented way to find `preferredOU` filters on
        // objectClass computer at the naming context; no tested domain
        // has carried the attribute, so the fallback below is what
        // actually runs. Verify against a domain that has one.
        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.search(&base, Scope::Base, "(objectClass=computer)", &["preferredOU"])
        };

        let entries = match result {
            Ok(entries) => entries,
            Err(err) => {
                return Err(self.directory_failure(
                    "Couldn't lookup preferred organizational unit",
                    None,
                    &err,
                    ErrorKind::Directory,
                ))
            }
        };

        match entries.first().and_then(|entry| entry.value("preferredOU")) {
            Some(ou) => self.preferred_ou = Some(ou.to_owned()),
            None => {
                log::info!(
                    "No preferred organizational unit found, using directory base: {}",
                    base
                );
                self.preferred_ou = Some(base);
            }
        }
        Ok(())
    }

    pub(super) fn lookup_computer_container(&mut self) -> anyhow::Result<()> {
        let ou = match &self.preferred_ou {
            Some(ou) => ou.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No organizational unit to search for the computer container".to_owned(),
                ))
            }
        };

        if self.computer_container.is_some() {
            return Ok(());
        }

        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.search(&ou, Scope::Base, "(objectClass=*)", &["wellKnownObjects"])
        };

        let entries = match result {
            Ok(entries) => entries,
            Err(err) => {
                return Err(self.directory_failure(
                    "Couldn't lookup computer container",
                    None,
                    &err,
                    ErrorKind::Directory,
                ))
            }
        };

        for value in entries
            .iter()
            .filter_map(|entry| entry.values("wellKnownObjects"))
            .flatten()
        {
            if let Some(container) = value.strip_prefix(WELL_KNOWN_COMPUTERS_PREFIX) {
                log::info!("Found well known computer container at: {}", container);
                self.computer_container = Some(container.to_owned());
                break;
            }
        }

        // Try harder
        if self.computer_container.is_none() {
            let result = {
                let mut directory = self
                    .conn
                    .directory()
                    .lock()
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
                directory.search(
                    &ou,
                    Scope::Subtree,
                    "(&(objectClass=container)(cn=Computers))",
                    &["cn"],
                )
            };
            if let Ok(entries) = result {
                if let Some(entry) = entries.first() {
                    log::info!(
                        "Well known computer container not found, but found suitable one at: {}",
                        entry.dn
                    );
                    self.computer_container = Some(entry.dn.clone());
                }
            }
        }

        if self.computer_container.is_none() {
            log::warn!(
                "Couldn't find a computer container in the ou, creating computer account directly in: {}",
                ou
            );
            self.computer_container = Some(ou);
        }

        Ok(())
    }

    pub(super) fn calc_computer_account(&mut self) -> anyhow::Result<()> {
        let name = match self.computer_name.value() {
            Some(name) => name.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer name to place in the directory".to_owned(),
                ))
            }
        };
        let container = match &self.computer_container {
            Some(container) => container.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No container to place the computer account in".to_owned(),
                ))
            }
        };

        let dn = format!("CN={},{}", name, container);
        log::info!("Calculated computer DN: {}", dn);
        self.computer_dn = Setting::Derived(dn);
        Ok(())
    }
}
