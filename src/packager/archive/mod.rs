//! Output archive assembly.
//!
//! The [`ArchiveAssembler`] builds a [`VirtualArchive`] from the prepared
//! project files and, for desktop targets, the fetched runtime archive, then
//! serializes it into the final zip.

mod assembler;
pub mod icons;
mod layout;
pub mod property_list;
mod tree;

pub use assembler::{ArchiveAssembler, InnerFiles};
pub use icons::Icon;
pub use layout::{AppIdentity, DesktopLayout, RuntimeLayout, launcher_script};
pub use tree::{EXECUTABLE_MODE, Entry, FILE_MODE, RuntimeArchive, VirtualArchive, safe_path};

#[cfg(test)]
pub(crate) mod testing {
    use bytes::Bytes;
    use std::io::{Cursor, Write};
    use zip::{ZipWriter, write::SimpleFileOptions};

    /// Builds an in-memory zip of `(path, contents, mode)` entries.
    pub fn zip_of(files: &[(&str, &[u8], u32)]) -> Bytes {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, mode) in files {
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(*mode))
                .unwrap();
            writer.write_all(data).unwrap();
        }
        Bytes::from(writer.finish().unwrap().into_inner())
    }
}
