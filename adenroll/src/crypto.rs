mod enctype;
mod keyblock;

pub use self::{
    enctype::{format_supported_enctypes, parse_supported_enctypes, Enctype, DEFAULT_ENCTYPES},
    keyblock::Keyblock,
};
