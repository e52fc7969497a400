use crate::{ParsedBox, Result, type_to_string};

/// Scheme Type Box (schm) - identifies the protection scheme.
///
/// The scheme type indicates which encryption scheme is used:
/// - `cenc` (0x63656E63) - AES-CTR full sample encryption
/// - `cens` (0x63656E73) - AES-CTR subsample encryption
/// - `cbc1` (0x63626331) - AES-CBC full sample encryption
/// - `cbcs` (0x63626373) - AES-CBC pattern encryption
pub struct SchmBox {
    /// The scheme type as a 4-byte code (e.g., 'cenc', 'cbcs').
    pub scheme_type: u32,
    /// The version of the scheme.
    pub scheme_version: u32,
}

impl SchmBox {
    /// Parse a schm box from a ParsedBox.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        let scheme_type = reader.read_u32()?;
        let scheme_version = reader.read_u32()?;

        Ok(Self {
            scheme_type,
            scheme_version,
        })
    }

    /// The scheme type as a fourcc string.
    pub fn scheme_name(&self) -> String {
        type_to_string(self.scheme_type).unwrap_or_else(|_| format!("{:#010x}", self.scheme_type))
    }
}
