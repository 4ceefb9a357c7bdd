mod file_data;
mod keytab_entry;
mod memory_data;

pub use self::keytab_entry::{KeytabEntry, Kvno};
use self::{
    file_data::{FileData, DFL_OPS, KTF_OPS, KTF_WRITABLE_OPS},
    memory_data::{MemoryData, MKT_OPS},
};
use crate::profile::Profile;
use std::sync::{Arc, Mutex};

const OPS_LIST: [&Ops; 3] = [KTF_OPS, KTF_WRITABLE_OPS, MKT_OPS];
const DEFAULT_KEYTAB_NAME: &str = "FILE:/etc/krb5.keytab";

#[derive(Debug)]
pub struct Keytab {
    ops: &'static Ops,
    data: KeytabData,
}

impl Keytab {
    /// The keytab name the realm configuration selects:
    /// `libdefaults.default_keytab_name` with residency tokens expanded,
    /// or the compiled-in default.
    pub fn default_name() -> anyhow::Result<String> {
        let name = Profile::new()?
            .get_string("libdefaults.default_keytab_name")
            .unwrap_or_else(|| DEFAULT_KEYTAB_NAME.to_owned());
        Profile::expand_path_tokens(&name)
    }

    pub fn default() -> anyhow::Result<Arc<Mutex<Self>>> {
        Self::resolve(&Self::default_name()?)
    }

    pub fn resolve(name: &str) -> anyhow::Result<Arc<Mutex<Self>>> {
        let (prefix, real_name) = match name.split_once(':') {
            None => return (DFL_OPS.resolve)(name),
            // Use `FILE` when prefix is a drive letter
            Some((p, _)) if p.len() == 1 && p.as_bytes()[0].is_ascii_alphabetic() => ("FILE", name),
            Some(_) if name.starts_with('/') => ("FILE", name),
            Some((prefix, real_name)) => (prefix, real_name),
        };
        match OPS_LIST.iter().filter(|ops| ops.prefix == prefix).next() {
            Some(ops) => (ops.resolve)(real_name),
            None => Err(anyhow::anyhow!("Unknown key table type: {}", prefix))?,
        }
    }

    pub fn get_name(&self, length: usize) -> anyhow::Result<String> {
        match format!("{}:{}", self.ops.prefix, self.data.name()) {
            name if name.len() > length => Err(anyhow::anyhow!("Keytab name too long"))?,
            name => Ok(name),
        }
    }

    pub fn entries_iter<'a>(
        &'a mut self,
    ) -> anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<Arc<KeytabEntry>>> + 'a>> {
        (self.ops.entries_iter)(self)
    }

    pub fn add_entry(&mut self, entry: &KeytabEntry) -> anyhow::Result<()> {
        (self.ops.add_entry)(self, entry)
    }

    /// Removes every entry the predicate selects and reports how many
    /// went away. A keytab that does not exist yet holds no entries.
    pub fn remove_entries(
        &mut self,
        predicate: &dyn Fn(&KeytabEntry) -> bool,
    ) -> anyhow::Result<usize> {
        (self.ops.remove_entries)(self, predicate)
    }
}

#[derive(Debug)]
struct Ops {
    prefix: &'static str,
    resolve: fn(&str) -> anyhow::Result<Arc<Mutex<Keytab>>>,
    entries_iter: for<'a> fn(
        &'a mut Keytab,
    ) -> anyhow::Result<
        Box<dyn Iterator<Item = anyhow::Result<Arc<KeytabEntry>>> + 'a>,
    >,
    add_entry: fn(&mut Keytab, &KeytabEntry) -> anyhow::Result<()>,
    remove_entries: fn(&mut Keytab, &dyn Fn(&KeytabEntry) -> bool) -> anyhow::Result<usize>,
}

#[derive(Debug)]
enum KeytabData {
    FileData(FileData),
    MemoryData(MemoryData),
}

impl KeytabData {
    fn name(&self) -> &str {
        match self {
            Self::FileData(data) => &data.name,
            Self::MemoryData(data) => &data.name,
        }
    }
}

macro_rules! downcast_data {
    ($data:expr, $data_type:ident) => {
        match $data {
            KeytabData::$data_type(data) => data,
            _ => unreachable!(),
        }
    };
}

pub(self) use downcast_data;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Enctype, Keyblock, NameType, Principal};

    fn entry(principal: &str, vno: Kvno, enctype: Enctype) -> KeytabEntry {
        KeytabEntry {
            principal: Principal::parse(principal).unwrap(),
            timestamp: 1700000000,
            vno,
            key: Keyblock {
                enctype,
                contents: vec![0xab; 16],
            },
        }
    }

    fn collect(keytab: &mut Keytab) -> Vec<Arc<KeytabEntry>> {
        let mut entries = vec![];
        let mut iter = keytab.entries_iter().unwrap();
        while let Some(entry) = iter.next().transpose().unwrap() {
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn resolves_prefixes() {
        let keytab = Keytab::resolve("MEMORY:resolver").unwrap();
        let keytab = keytab.lock().unwrap();
        assert_eq!(keytab.get_name(crate::BUFSIZ).unwrap(), "MEMORY:resolver");

        let keytab = Keytab::resolve("/etc/krb5.keytab").unwrap();
        let keytab = keytab.lock().unwrap();
        assert_eq!(
            keytab.get_name(crate::BUFSIZ).unwrap(),
            "FILE:/etc/krb5.keytab"
        );

        assert!(Keytab::resolve("BOGUS:whatever").is_err());
    }

    #[test]
    fn memory_keytab_adds_and_removes() {
        let keytab = Keytab::resolve("MEMORY:adds-and-removes").unwrap();
        let mut keytab = keytab.lock().unwrap();
        keytab
            .add_entry(&entry("HOST01$@EXAMPLE.COM", 2, Enctype::AES256_CTS_HMAC_SHA1_96))
            .unwrap();
        keytab
            .add_entry(&entry("HOST01$@EXAMPLE.COM", 3, Enctype::AES256_CTS_HMAC_SHA1_96))
            .unwrap();
        assert_eq!(collect(&mut keytab).len(), 2);

        let removed = keytab.remove_entries(&|e| e.vno < 3).unwrap();
        assert_eq!(removed, 1);
        let entries = collect(&mut keytab);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].vno, 3);
    }

    #[test]
    fn file_keytab_round_trips() {
        let path = std::env::temp_dir().join(format!("adenroll-kt-{}", std::process::id()));
        let name = format!("FILE:{}", path.display());
        let _ = std::fs::remove_file(&path);

        {
            let keytab = Keytab::resolve(&name).unwrap();
            let mut keytab = keytab.lock().unwrap();
            // Missing file reads back as empty
            assert_eq!(collect(&mut keytab).len(), 0);
            assert_eq!(keytab.remove_entries(&|_| true).unwrap(), 0);

            keytab
                .add_entry(&entry(
                    "HOST/host01.example.com@EXAMPLE.COM",
                    2,
                    Enctype::AES256_CTS_HMAC_SHA1_96,
                ))
                .unwrap();
            keytab
                .add_entry(&entry(
                    "HOST/host01.example.com@EXAMPLE.COM",
                    2,
                    Enctype::ARCFOUR_HMAC,
                ))
                .unwrap();
        }

        let keytab = Keytab::resolve(&name).unwrap();
        let mut keytab = keytab.lock().unwrap();
        let entries = collect(&mut keytab);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].principal.unparse_name().unwrap(),
            "HOST/host01.example.com@EXAMPLE.COM"
        );
        assert_eq!(entries[0].principal.name_type, NameType::PRINCIPAL);
        assert_eq!(entries[0].vno, 2);
        assert_eq!(entries[0].timestamp, 1700000000);
        assert_eq!(entries[0].key.contents, vec![0xab; 16]);
        assert_eq!(entries[1].key.enctype, Enctype::ARCFOUR_HMAC);

        let removed = keytab
            .remove_entries(&|e| e.key.enctype == Enctype::ARCFOUR_HMAC)
            .unwrap();
        assert_eq!(removed, 1);
        let entries = collect(&mut keytab);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.enctype, Enctype::AES256_CTS_HMAC_SHA1_96);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn file_keytab_preserves_large_vno() {
        let path =
            std::env::temp_dir().join(format!("adenroll-kt-vno-{}", std::process::id()));
        let name = format!("FILE:{}", path.display());
        let _ = std::fs::remove_file(&path);

        {
            let keytab = Keytab::resolve(&name).unwrap();
            let mut keytab = keytab.lock().unwrap();
            keytab
                .add_entry(&entry("HOST01$@EXAMPLE.COM", 700, Enctype::AES128_CTS_HMAC_SHA1_96))
                .unwrap();
        }

        let keytab = Keytab::resolve(&name).unwrap();
        let mut keytab = keytab.lock().unwrap();
        let entries = collect(&mut keytab);
        // The 8-bit field truncates; the 32-bit extension must win
        assert_eq!(entries[0].vno, 700);

        let _ = std::fs::remove_file(&path);
    }
}
