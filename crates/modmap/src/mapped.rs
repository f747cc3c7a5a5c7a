//! A live, mapped PE32+ module.
//!
//! [`MappedImage`] owns the virtual region the loader staged the image
//! into, plus the auxiliary host modules pulled in to satisfy imports.
//! Raw-pointer access to the region is confined to this type: the headers
//! are re-parsed once at construction and everything else goes through
//! checked byte-slice views and offset accessors.

use std::slice;

use crate::host::{Host, ModuleHandle};
use crate::pe::parser::{
    self, DataDirectory, PeError, SectionHeader, IMAGE_DIRECTORY_ENTRY_BASERELOC,
    IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DIRECTORY_ENTRY_IMPORT, IMAGE_DIRECTORY_ENTRY_TLS,
};

/// A mapped module image, relocated and linked in place.
///
/// The region and every recorded import module are released on drop; there
/// is no separate unload API.  `DLL_PROCESS_DETACH` TLS callbacks are
/// deliberately not delivered on teardown.
pub struct MappedImage<H: Host> {
    base: *mut u8,
    image_size: usize,
    host: H,
    import_modules: Vec<ModuleHandle>,
    sections: Vec<SectionHeader>,
    data_directories: Vec<DataDirectory>,
}

impl<H: Host> std::fmt::Debug for MappedImage<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedImage")
            .field("base", &self.base)
            .field("image_size", &self.image_size)
            .field("import_modules", &self.import_modules.len())
            .field("sections", &self.sections.len())
            .field("data_directories", &self.data_directories.len())
            .finish()
    }
}

impl<H: Host> MappedImage<H> {
    /// Wrap and validate a region the image headers were already copied to.
    ///
    /// Re-runs the DOS/NT/machine validation on the copied headers and
    /// overwrites `OptionalHeader.ImageBase` in the mapped copy with the
    /// actual base address, so the live headers describe the live module.
    ///
    /// On error the caller keeps ownership of the region; on success the
    /// returned image owns it and releases it through `host` on drop.
    ///
    /// # Safety
    ///
    /// `base` must point to a readable and writable region of at least
    /// `image_size` bytes that stays exclusively owned by the returned
    /// image (no other references, for its whole lifetime).
    pub unsafe fn new(base: *mut u8, image_size: usize, host: H) -> Result<Self, PeError> {
        let view = slice::from_raw_parts_mut(base, image_size);
        let headers = parser::parse_headers(view)?;

        // Keep every section's virtual extent inside the region so the
        // fixup passes can index it without further checks.
        for section in &headers.sections {
            let end = section.virtual_address as u64 + section.virtual_size as u64;
            if end > image_size as u64 {
                return Err(PeError::InvalidPeFormat);
            }
        }

        // The headers were copied verbatim from disk; fix the recorded
        // base to where the module actually lives.
        let image_base_offset = headers.pe_offset + 4 + 20 + 24;
        parser::put_u64(view, image_base_offset, base as u64);

        Ok(MappedImage {
            base,
            image_size,
            host,
            import_modules: Vec::new(),
            sections: headers.sections,
            data_directories: headers.data_directories,
        })
    }

    // -- accessors ----------------------------------------------------------

    /// Base address of the mapped region.
    pub fn image_base(&self) -> *mut u8 {
        self.base
    }

    /// Size of the mapped region in bytes (`SizeOfImage`).
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// The whole region `[base, base + image_size)`.
    pub fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.base, self.image_size) }
    }

    /// Mutable view of the whole region.
    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base, self.image_size) }
    }

    /// Section table as re-indexed from the mapped headers.
    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// Record a host module loaded to satisfy this image's imports.
    /// It will be released when the image is dropped.
    pub fn add_import_module(&mut self, handle: ModuleHandle) {
        self.import_modules.push(handle);
    }

    /// Offset of the live `IMAGE_IMPORT_DESCRIPTOR` array in the region.
    pub fn import_directory(&self) -> Option<usize> {
        self.directory_offset(IMAGE_DIRECTORY_ENTRY_IMPORT)
    }

    /// Offset of the live export directory in the region.
    pub fn export_directory(&self) -> Option<usize> {
        self.directory_offset(IMAGE_DIRECTORY_ENTRY_EXPORT)
    }

    /// Offset of the first base-relocation block in the region.
    pub fn relocation_directory(&self) -> Option<usize> {
        self.directory_offset(IMAGE_DIRECTORY_ENTRY_BASERELOC)
    }

    /// Offset of the live `IMAGE_TLS_DIRECTORY64` in the region.
    pub fn tls_directory(&self) -> Option<usize> {
        self.directory_offset(IMAGE_DIRECTORY_ENTRY_TLS)
    }

    /// Resolve a data directory against the live image.
    ///
    /// These RVAs index the mapped region directly, not the on-disk file.
    /// Absent, empty, and out-of-range directories all resolve to `None`.
    fn directory_offset(&self, index: usize) -> Option<usize> {
        let dir = self.data_directories.get(index).filter(|d| d.size != 0)?;
        let offset = dir.virtual_address as usize;
        (offset < self.image_size).then_some(offset)
    }
}

impl<H: Host> Drop for MappedImage<H> {
    fn drop(&mut self) {
        for handle in self.import_modules.drain(..) {
            self.host.free_library(handle);
        }

        self.host.free(self.base, self.image_size);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
