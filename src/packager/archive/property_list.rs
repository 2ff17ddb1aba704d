//! Info.plist identity patching.
//!
//! Documents are parsed into [`plist::Value`], which keeps dictionary key
//! order, patched in place and written back in the format they came in.

use crate::packager::error::{Error, Result};
use plist::{Dictionary, Value};
use std::io::Cursor;

const BINARY_MAGIC: &[u8] = b"bplist00";

/// A parsed property list document.
#[derive(Debug, Clone)]
pub struct PropertyList {
    root: Value,
    binary: bool,
}

impl PropertyList {
    /// Parses an XML or binary property list.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let root = Value::from_reader(Cursor::new(bytes))?;
        Ok(Self {
            root,
            binary: bytes.starts_with(BINARY_MAGIC),
        })
    }

    /// Root dictionary, if the document has one.
    pub fn dict(&self) -> Option<&Dictionary> {
        self.root.as_dictionary()
    }

    /// Sets string fields on the root dictionary, leaving every other key
    /// and the key order untouched. New keys are appended.
    pub fn set_strings<'a>(
        &mut self,
        fields: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Result<()> {
        let dict = self
            .root
            .as_dictionary_mut()
            .ok_or_else(|| Error::GenericError("property list root is not a dictionary".into()))?;
        for (key, value) in fields {
            dict.insert(key.to_string(), Value::String(value));
        }
        Ok(())
    }

    /// String value of a root key.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.dict()?.get(key)?.as_string()
    }

    /// Serializes back to the original format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if self.binary {
            self.root.to_writer_binary(&mut out)?;
        } else {
            self.root.to_writer_xml(&mut out)?;
        }
        Ok(out)
    }
}

/// Identity written into a bundle's Info.plist.
#[derive(Debug, Clone)]
pub struct BundleIdentity {
    /// CFBundleIdentifier
    pub identifier: String,
    /// CFBundleName and CFBundleDisplayName
    pub name: String,
    /// CFBundleExecutable, when the executable was renamed
    pub executable: Option<String>,
    /// CFBundleShortVersionString and CFBundleVersion
    pub version: String,
    /// CFBundleIconFile
    pub icon_file: Option<String>,
}

/// Patches identity fields of an Info.plist document.
pub fn patch_identity(bytes: &[u8], identity: &BundleIdentity) -> Result<Vec<u8>> {
    let mut plist = PropertyList::parse(bytes)?;
    let mut fields = vec![
        ("CFBundleIdentifier", identity.identifier.clone()),
        ("CFBundleName", identity.name.clone()),
        ("CFBundleDisplayName", identity.name.clone()),
        ("CFBundleShortVersionString", identity.version.clone()),
        ("CFBundleVersion", identity.version.clone()),
    ];
    if let Some(executable) = &identity.executable {
        fields.push(("CFBundleExecutable", executable.clone()));
    }
    if let Some(icon) = &identity.icon_file {
        fields.push(("CFBundleIconFile", icon.clone()));
    }
    plist.set_strings(fields)?;
    plist.to_bytes()
}
