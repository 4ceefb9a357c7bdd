const REALM_SEP: u8 = b'@';
const COMPONENT_SEP: u8 = b'/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameType(pub i32);

macro_rules! name_type {
    ($name_type:ident, $int:expr) => {
        pub const $name_type: NameType = NameType($int);
    };
}

impl NameType {
    name_type!(UNKNOWN, 0);
    name_type!(PRINCIPAL, 1);
    name_type!(SRV_INST, 2);
    name_type!(SRV_HST, 3);
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub realm: Vec<u8>,
    pub components: Vec<Vec<u8>>,
    pub name_type: NameType,
}

impl Principal {
    /// Parses `name` of the form `component[/component...][@REALM]`. The
    /// quoting rules of the full Kerberos grammar are not needed for
    /// account and service principals and are not implemented.
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        let (name, realm) = match name.rsplit_once(REALM_SEP as char) {
            Some((name, realm)) if !realm.is_empty() => (name, realm.as_bytes().to_vec()),
            Some(_) => Err(anyhow::anyhow!("Malformed principal name: {}", name))?,
            None => (name, vec![]),
        };
        let components: Vec<Vec<u8>> = name
            .split(COMPONENT_SEP as char)
            .map(|component| component.as_bytes().to_vec())
            .collect();
        if components.iter().any(|component| component.is_empty()) {
            Err(anyhow::anyhow!("Malformed principal name: {}", name))?
        }
        Ok(Self {
            realm,
            components,
            name_type: NameType::PRINCIPAL,
        })
    }

    /// Parses `name` and forces its realm, the way service principals are
    /// normalized against the connection realm.
    pub fn parse_with_realm(name: &str, realm: &str) -> anyhow::Result<Self> {
        let mut principal = Self::parse(name)?;
        principal.realm = realm.as_bytes().to_vec();
        Ok(principal)
    }

    pub fn unparse_name(&self) -> anyhow::Result<String> {
        let name = self.components.to_vec().join(&COMPONENT_SEP);
        let name = vec![name, self.realm.clone()].join(&REALM_SEP);
        Ok(String::from_utf8(name)?)
    }

    /// Whether two principals name the same entity. The name type is not
    /// significant, matching `krb5_principal_compare`.
    pub fn matches(&self, other: &Self) -> bool {
        self.realm == other.realm && self.components == other.components
    }

    /// The standard Kerberos salt: the realm followed by every name
    /// component, concatenated without separators.
    pub fn canonical_salt(&self) -> Vec<u8> {
        let mut salt = self.realm.clone();
        for component in &self.components {
            salt.extend_from_slice(component);
        }
        salt
    }
}

/// The Windows 2003 style machine-account salt:
/// `REALM + "host" + lower(computer_name) + "." + lower(realm)`.
pub fn w2k3_machine_salt(realm: &str, computer_name: &str) -> Vec<u8> {
    let mut salt = realm.as_bytes().to_vec();
    salt.extend_from_slice(b"host");
    salt.extend_from_slice(computer_name.to_lowercase().as_bytes());
    salt.push(b'.');
    salt.extend_from_slice(realm.to_lowercase().as_bytes());
    salt
}
