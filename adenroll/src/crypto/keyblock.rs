use super::Enctype;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyblock {
    pub enctype: Enctype,
    pub contents: Vec<u8>,
}
