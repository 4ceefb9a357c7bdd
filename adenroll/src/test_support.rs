use crate::{
    connection::{Connection, Domain, LoginType},
    directory::{AttrMod, Directory, DirectoryError, Entry, ResultCode, Scope},
    kdc::{KdcClient, PasswordOutcome},
    keytab::Kvno,
    principal::{w2k3_machine_salt, Principal},
    Enctype, Keyblock,
};
use rand::RngCore;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Which key salt the scripted realm accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaltFlavor {
    Canonical,
    W2k3,
    Empty,
    /// Nothing authenticates, whatever the salt.
    None,
}

/// Shared state behind the scripted directory and KDC: the realm's view
/// of the account password and kvno, the directory tree, and counters
/// the tests assert on.
pub(crate) struct FakeRealmState {
    realm: String,
    computer_name: String,
    entries: Mutex<HashMap<String, Entry>>,
    kvno: Mutex<Kvno>,
    password: Mutex<Option<Vec<u8>>>,
    password_sets: Mutex<usize>,
    set_calls: Mutex<usize>,
    change_calls: Mutex<usize>,
    accepted_salt: Mutex<SaltFlavor>,
    selected_salts: Mutex<Vec<Vec<u8>>>,
    probes: Mutex<usize>,
    modify_log: Mutex<Vec<Vec<String>>>,
    searches: Mutex<usize>,
    compares: Mutex<usize>,
    fail_add: Mutex<Option<ResultCode>>,
    fail_modify: Mutex<Option<ResultCode>>,
    password_rejection: Mutex<Option<(i32, String, Option<String>)>>,
    password_transport_broken: Mutex<bool>,
}

impl FakeRealmState {
    fn new() -> Self {
        Self {
            realm: "CORP.EXAMPLE.COM".to_owned(),
            computer_name: "HOST01".to_owned(),
            entries: Mutex::new(HashMap::new()),
            kvno: Mutex::new(0),
            password: Mutex::new(None),
            password_sets: Mutex::new(0),
            set_calls: Mutex::new(0),
            change_calls: Mutex::new(0),
            accepted_salt: Mutex::new(SaltFlavor::Canonical),
            selected_salts: Mutex::new(vec![]),
            probes: Mutex::new(0),
            modify_log: Mutex::new(vec![]),
            searches: Mutex::new(0),
            compares: Mutex::new(0),
            fail_add: Mutex::new(None),
            fail_modify: Mutex::new(None),
            password_rejection: Mutex::new(None),
            password_transport_broken: Mutex::new(false),
        }
    }

    pub(crate) fn insert_entry(&self, dn: &str, attrs: &[AttrMod]) {
        let entry = Entry {
            dn: dn.to_owned(),
            attrs: attrs
                .iter()
                .map(|m| (m.attr.clone(), m.values.clone()))
                .collect(),
        };
        self.entries.lock().unwrap().insert(dn.to_owned(), entry);
    }

    pub(crate) fn insert_existing_account(&self, dn: &str) {
        self.insert_entry(
            dn,
            &[
                AttrMod::new("objectClass", &["computer"]),
                AttrMod::new("sAMAccountName", &["HOST01$"]),
                AttrMod::new("userAccountControl", &["4096"]),
            ],
        );
    }

    pub(crate) fn directory_entry(&self, dn: &str) -> Option<Entry> {
        self.entries.lock().unwrap().get(dn).cloned()
    }

    pub(crate) fn modify_count(&self) -> usize {
        self.modify_log.lock().unwrap().len()
    }

    pub(crate) fn modify_count_for(&self, attr: &str) -> usize {
        self.modify_log
            .lock()
            .unwrap()
            .iter()
            .filter(|attrs| attrs.iter().any(|a| a == attr))
            .count()
    }

    pub(crate) fn search_count(&self) -> usize {
        *self.searches.lock().unwrap()
    }

    pub(crate) fn compare_count(&self) -> usize {
        *self.compares.lock().unwrap()
    }

    pub(crate) fn password_sets(&self) -> usize {
        *self.password_sets.lock().unwrap()
    }

    pub(crate) fn set_password_calls(&self) -> usize {
        *self.set_calls.lock().unwrap()
    }

    pub(crate) fn change_password_calls(&self) -> usize {
        *self.change_calls.lock().unwrap()
    }

    pub(crate) fn probe_count(&self) -> usize {
        *self.probes.lock().unwrap()
    }

    pub(crate) fn selected_salts(&self) -> Vec<Vec<u8>> {
        self.selected_salts.lock().unwrap().clone()
    }

    pub(crate) fn set_accepted_salt(&self, flavor: SaltFlavor) {
        *self.accepted_salt.lock().unwrap() = flavor;
    }

    pub(crate) fn force_kvno(&self, kvno: Kvno) {
        *self.kvno.lock().unwrap() = kvno;
    }

    pub(crate) fn store_current_password(&self, password: &[u8]) {
        *self.password.lock().unwrap() = Some(password.to_vec());
    }

    pub(crate) fn fail_add_with(&self, code: ResultCode) {
        *self.fail_add.lock().unwrap() = Some(code);
    }

    pub(crate) fn fail_modify_with(&self, code: ResultCode) {
        *self.fail_modify.lock().unwrap() = Some(code);
    }

    pub(crate) fn reject_password(&self, code: i32, code_string: &str, message: Option<&str>) {
        *self.password_rejection.lock().unwrap() =
            Some((code, code_string.to_owned(), message.map(str::to_owned)));
    }

    pub(crate) fn fail_password_transport(&self) {
        *self.password_transport_broken.lock().unwrap() = true;
    }

    /// Whether `key` was derived from the realm's current password with
    /// this exact salt.
    pub(crate) fn key_uses_salt(&self, key: &Keyblock, salt: &[u8]) -> bool {
        match self.password.lock().unwrap().as_deref() {
            Some(password) => key.contents == derive_key(key.enctype, password, salt),
            None => false,
        }
    }

    fn expected_salt(&self, principal: &Principal) -> Option<Vec<u8>> {
        match *self.accepted_salt.lock().unwrap() {
            SaltFlavor::Canonical => Some(principal.canonical_salt()),
            SaltFlavor::W2k3 => Some(w2k3_machine_salt(&self.realm, &self.computer_name)),
            SaltFlavor::Empty => Some(vec![]),
            SaltFlavor::None => None,
        }
    }

    fn password_exchange(&self, counter: &Mutex<usize>, new_password: &[u8]) -> anyhow::Result<PasswordOutcome> {
        *counter.lock().unwrap() += 1;
        if *self.password_transport_broken.lock().unwrap() {
            return Err(anyhow::anyhow!("Cannot contact any KDC for realm"));
        }
        if let Some((code, code_string, message)) = self.password_rejection.lock().unwrap().clone()
        {
            return Ok(PasswordOutcome {
                code,
                code_string,
                message,
            });
        }
        *self.password.lock().unwrap() = Some(new_password.to_vec());
        let mut kvno = self.kvno.lock().unwrap();
        // A fresh account sits at kvno 1 before its first password set
        *kvno = if *kvno == 0 { 2 } else { *kvno + 1 };
        *self.password_sets.lock().unwrap() += 1;
        Ok(PasswordOutcome {
            code: 0,
            code_string: "Success".to_owned(),
            message: None,
        })
    }
}

fn derive_key(enctype: Enctype, password: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut contents = format!("K{}:", enctype.0).into_bytes();
    contents.extend_from_slice(password);
    contents.push(0xff);
    contents.extend_from_slice(salt);
    contents
}

pub(crate) struct FakeDirectory {
    state: Arc<FakeRealmState>,
}

impl FakeDirectory {
    pub(crate) fn realm_bare() -> (Arc<FakeRealmState>, FakeDirectory, FakeKdc) {
        let state = Arc::new(FakeRealmState::new());
        (
            Arc::clone(&state),
            FakeDirectory {
                state: Arc::clone(&state),
            },
            FakeKdc { state },
        )
    }

    /// A root naming context whose well-known objects point at the
    /// standard Computers container.
    pub(crate) fn realm_with_computers_container(
    ) -> (Arc<FakeRealmState>, FakeDirectory, FakeKdc) {
        let (state, directory, kdc) = Self::realm_bare();
        state.insert_entry(
            "DC=corp,DC=example,DC=com",
            &[AttrMod::new(
                "wellKnownObjects",
                &["B:32:AA312825768811D1ADED00C04FD8D5CD:CN=Computers,DC=corp,DC=example,DC=com"],
            )],
        );
        (state, directory, kdc)
    }

    fn overlay(&self, mut entry: Entry) -> Entry {
        let kvno = *self.state.kvno.lock().unwrap();
        let account_rdn = format!("CN={}", self.state.computer_name);
        if kvno > 0 && entry.dn.split(',').next() == Some(account_rdn.as_str()) {
            entry
                .attrs
                .insert("msDS-KeyVersionNumber".to_owned(), vec![kvno.to_string()]);
        }
        entry
    }
}

fn match_condition(condition: &str, entry: &Entry) -> bool {
    match condition.split_once('=') {
        Some(("objectClass", "*")) => true,
        Some((attr, "*")) => entry.attrs.contains_key(attr),
        Some((attr, value)) => entry
            .values(attr)
            .map(|values| values.iter().any(|v| v == value))
            .unwrap_or(false),
        None => false,
    }
}

fn match_filter(filter: &str, entry: &Entry) -> bool {
    match filter
        .strip_prefix("(&")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(conjunction) => conjunction
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(")(")
            .all(|condition| match_condition(condition, entry)),
        None => match_condition(
            filter.trim_start_matches('(').trim_end_matches(')'),
            entry,
        ),
    }
}

impl Directory for FakeDirectory {
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        _attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        *self.state.searches.lock().unwrap() += 1;
        let entries = self.state.entries.lock().unwrap();
        if !entries.contains_key(base) {
            return Err(DirectoryError::new(ResultCode::NO_SUCH_OBJECT, ""));
        }
        let child_suffix = format!(",{}", base);
        let mut matched: Vec<Entry> = entries
            .values()
            .filter(|entry| match scope {
                Scope::Base => entry.dn == base,
                Scope::OneLevel => entry
                    .dn
                    .split_once(',')
                    .map(|(_, parent)| parent == base)
                    .unwrap_or(false),
                Scope::Subtree => entry.dn == base || entry.dn.ends_with(&child_suffix),
            })
            .filter(|entry| match_filter(filter, entry))
            .cloned()
            .collect();
        drop(entries);
        matched.sort_by(|a, b| a.dn.cmp(&b.dn));
        Ok(matched
            .into_iter()
            .map(|entry| self.overlay(entry))
            .collect())
    }

    fn compare(&mut self, dn: &str, attr: &str, value: &str) -> Result<bool, DirectoryError> {
        *self.state.compares.lock().unwrap() += 1;
        let entries = self.state.entries.lock().unwrap();
        match entries.get(dn) {
            Some(entry) => Ok(entry
                .values(attr)
                .map(|values| values.iter().any(|v| v == value))
                .unwrap_or(false)),
            None => Err(DirectoryError::new(ResultCode::NO_SUCH_OBJECT, "")),
        }
    }

    fn add(&mut self, dn: &str, mods: &[AttrMod]) -> Result<(), DirectoryError> {
        if let Some(code) = *self.state.fail_add.lock().unwrap() {
            return Err(DirectoryError::new(code, "scripted add failure"));
        }
        let mut entries = self.state.entries.lock().unwrap();
        if entries.contains_key(dn) {
            return Err(DirectoryError::new(ResultCode(68), "Entry already exists"));
        }
        entries.insert(
            dn.to_owned(),
            Entry {
                dn: dn.to_owned(),
                attrs: mods
                    .iter()
                    .map(|m| (m.attr.clone(), m.values.clone()))
                    .collect(),
            },
        );
        Ok(())
    }

    fn modify(&mut self, dn: &str, mods: &[AttrMod]) -> Result<(), DirectoryError> {
        if let Some(code) = *self.state.fail_modify.lock().unwrap() {
            return Err(DirectoryError::new(code, "scripted modify failure"));
        }
        let mut entries = self.state.entries.lock().unwrap();
        let entry = match entries.get_mut(dn) {
            Some(entry) => entry,
            None => return Err(DirectoryError::new(ResultCode::NO_SUCH_OBJECT, "")),
        };
        for m in mods {
            entry.attrs.insert(m.attr.clone(), m.values.clone());
        }
        self.state
            .modify_log
            .lock()
            .unwrap()
            .push(mods.iter().map(|m| m.attr.clone()).collect());
        Ok(())
    }
}

pub(crate) struct FakeKdc {
    state: Arc<FakeRealmState>,
}

impl KdcClient for FakeKdc {
    fn string_to_key(
        &mut self,
        enctype: Enctype,
        password: &[u8],
        salt: &[u8],
    ) -> anyhow::Result<Keyblock> {
        Ok(Keyblock {
            enctype,
            contents: derive_key(enctype, password, salt),
        })
    }

    fn request_initial_ticket(
        &mut self,
        principal: &Principal,
        kvno: Kvno,
        key: &Keyblock,
    ) -> anyhow::Result<bool> {
        *self.state.probes.lock().unwrap() += 1;
        let expected_salt = match self.state.expected_salt(principal) {
            Some(salt) => salt,
            None => return Ok(false),
        };
        let password = self.state.password.lock().unwrap().clone();
        let password = match password {
            Some(password) => password,
            None => return Ok(false),
        };
        if kvno != *self.state.kvno.lock().unwrap() {
            return Ok(false);
        }
        if key.contents != derive_key(key.enctype, &password, &expected_salt) {
            return Ok(false);
        }
        self.state
            .selected_salts
            .lock()
            .unwrap()
            .push(expected_salt);
        Ok(true)
    }

    fn set_password(
        &mut self,
        _target: &Principal,
        new_password: &[u8],
    ) -> anyhow::Result<PasswordOutcome> {
        self.state
            .password_exchange(&self.state.set_calls, new_password)
    }

    fn change_password(
        &mut self,
        _target: &Principal,
        new_password: &[u8],
    ) -> anyhow::Result<PasswordOutcome> {
        self.state
            .password_exchange(&self.state.change_calls, new_password)
    }
}

/// Replays a scripted byte stream, cycling when it runs out.
pub(crate) struct ScriptedRng {
    bytes: Vec<u8>,
    at: usize,
}

impl ScriptedRng {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, at: 0 }
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.bytes[self.at % self.bytes.len()];
            self.at += 1;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

pub(crate) fn test_connection(directory: FakeDirectory, kdc: FakeKdc) -> Arc<Connection> {
    test_connection_with_login(directory, kdc, LoginType::UserAccount)
}

pub(crate) fn test_connection_with_login(
    directory: FakeDirectory,
    kdc: FakeKdc,
    login_type: LoginType,
) -> Arc<Connection> {
    Arc::new(Connection::new(
        Domain {
            name: "corp.example.com".to_owned(),
            realm: "CORP.EXAMPLE.COM".to_owned(),
            naming_context: "DC=corp,DC=example,DC=com".to_owned(),
            host_fqdn: "host01.corp.example.com".to_owned(),
            login_type,
        },
        Box::new(directory),
        Box::new(kdc),
    ))
}
