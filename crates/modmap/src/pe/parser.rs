//! On-disk PE32+ image parser.
//!
//! Validates and indexes a raw PE file held in a `Vec<u8>`, reading only
//! through little-endian helpers over the byte buffer.  The parser is
//! intentionally lean: just enough structure for a manual mapper to copy
//! headers and sections, build the import address table, apply base
//! relocations, and finalize page protections.
//!
//! Only 64-bit (PE32+) images for the AMD64 machine are accepted; anything
//! else is rejected up front so the mapping pipeline never sees it.

use std::fmt;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced while validating a PE image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeError {
    /// Bad DOS magic, bad PE signature, or malformed/out-of-bounds headers.
    InvalidPeFormat,
    /// The `Machine` field is not `IMAGE_FILE_MACHINE_AMD64`.
    NotSupportedMachine,
}

impl fmt::Display for PeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeError::InvalidPeFormat => write!(f, "invalid PE format"),
            PeError::NotSupportedMachine => {
                write!(f, "unsupported machine (expected AMD64)")
            }
        }
    }
}

impl std::error::Error for PeError {}

// ---------------------------------------------------------------------------
// Little-endian read helpers
// ---------------------------------------------------------------------------

/// Read a `u16` at `offset` (little-endian).
pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16, PeError> {
    let end = offset.checked_add(2).ok_or(PeError::InvalidPeFormat)?;
    if end > data.len() {
        return Err(PeError::InvalidPeFormat);
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

/// Read a `u32` at `offset` (little-endian).
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32, PeError> {
    let end = offset.checked_add(4).ok_or(PeError::InvalidPeFormat)?;
    if end > data.len() {
        return Err(PeError::InvalidPeFormat);
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..end]);
    Ok(u32::from_le_bytes(buf))
}

/// Read a `u64` at `offset` (little-endian).
pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64, PeError> {
    let end = offset.checked_add(8).ok_or(PeError::InvalidPeFormat)?;
    if end > data.len() {
        return Err(PeError::InvalidPeFormat);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..end]);
    Ok(u64::from_le_bytes(buf))
}

/// Write a `u64` at `offset` (little-endian).  Caller guarantees bounds.
pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Well-known constants
// ---------------------------------------------------------------------------

/// `MZ` -- DOS header magic.
pub const DOS_MAGIC: u16 = 0x5A4D;
/// `PE\0\0` -- PE signature.
pub const PE_SIGNATURE: u32 = 0x0000_4550;
/// Optional-header magic for PE32+ (64-bit).
pub const PE32PLUS_MAGIC: u16 = 0x020B;
/// IMAGE_FILE_MACHINE_AMD64
pub const MACHINE_AMD64: u16 = 0x8664;

/// Size of `IMAGE_DOS_HEADER`; `e_lfanew` may not point inside it.
pub(crate) const DOS_HEADER_SIZE: u32 = 64;
/// Size of one section-table entry.
pub(crate) const SECTION_HEADER_SIZE: usize = 40;
/// Fixed part of the PE32+ optional header, before the data directories.
pub(crate) const OPTIONAL_HEADER64_FIXED: usize = 112;

// Data directory indices.
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
pub const IMAGE_DIRECTORY_ENTRY_IMPORT: usize = 1;
pub const IMAGE_DIRECTORY_ENTRY_BASERELOC: usize = 5;
pub const IMAGE_DIRECTORY_ENTRY_TLS: usize = 9;

// Section characteristics consumed by the protection pass.
/// IMAGE_SCN_MEM_EXECUTE
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
/// IMAGE_SCN_MEM_READ
pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
/// IMAGE_SCN_MEM_WRITE
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

/// High bit of a 64-bit import thunk: resolve by ordinal.
pub const IMAGE_ORDINAL_FLAG64: u64 = 1 << 63;
/// Base-relocation type: padding entry.
pub const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
/// Base-relocation type: 64-bit absolute address fixup.
pub const IMAGE_REL_BASED_DIR64: u16 = 10;

// ---------------------------------------------------------------------------
// Structures
// ---------------------------------------------------------------------------

/// The DOS header -- only the two fields the mapper needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    /// Must be `0x5A4D` (`MZ`).
    pub e_magic: u16,
    /// File offset of the NT headers.
    pub e_lfanew: u32,
}

/// COFF file header subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// PE32+ optional header subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalHeader {
    /// Always `0x020B` once parsed.
    pub magic: u16,
    pub entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub number_of_rva_and_sizes: u32,
}

/// A single entry in the data-directory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

/// A single section header (40 bytes in the file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Raw 8-byte name (not necessarily null-terminated).
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    /// Section name as UTF-8, trimmed at the first NUL.
    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }

    /// Whether `rva` lies within this section's virtual extent.
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && (rva as u64) < self.virtual_address as u64 + self.virtual_size as u64
    }
}

/// Everything `parse_headers` extracts from a header block.
///
/// Shared between the on-disk parser and the mapped-image re-validation,
/// which run the same header walk over different byte regions.
pub(crate) struct RawHeaders {
    pub dos: DosHeader,
    pub pe_offset: usize,
    pub coff: CoffHeader,
    pub optional: OptionalHeader,
    pub data_directories: Vec<DataDirectory>,
    pub sections: Vec<SectionHeader>,
    pub section_table_offset: usize,
}

/// Walk DOS header, NT headers, data directories, and the section table.
///
/// Performs the signature, machine, and in-bounds checks common to the
/// on-disk and mapped views.  File-level raw-data bounds are the caller's
/// concern (the mapped view has no raw file behind it).
pub(crate) fn parse_headers(data: &[u8]) -> Result<RawHeaders, PeError> {
    // --- DOS header --------------------------------------------------------
    let e_magic = read_u16(data, 0)?;
    let e_lfanew = read_u32(data, 0x3C)?;
    if e_magic != DOS_MAGIC || e_lfanew < DOS_HEADER_SIZE {
        return Err(PeError::InvalidPeFormat);
    }
    let dos = DosHeader { e_magic, e_lfanew };
    let pe_offset = e_lfanew as usize;

    // --- PE signature ------------------------------------------------------
    if read_u32(data, pe_offset)? != PE_SIGNATURE {
        return Err(PeError::InvalidPeFormat);
    }

    // --- COFF header -------------------------------------------------------
    let coff_offset = pe_offset + 4;
    let machine = read_u16(data, coff_offset)?;
    if machine != MACHINE_AMD64 {
        return Err(PeError::NotSupportedMachine);
    }
    let number_of_sections = read_u16(data, coff_offset + 2)?;
    let size_of_optional_header = read_u16(data, coff_offset + 16)?;
    let characteristics = read_u16(data, coff_offset + 18)?;
    let coff = CoffHeader {
        machine,
        number_of_sections,
        size_of_optional_header,
        characteristics,
    };

    // --- Optional header (PE32+ only) --------------------------------------
    let opt_offset = coff_offset + 20;
    let magic = read_u16(data, opt_offset)?;
    if magic != PE32PLUS_MAGIC {
        return Err(PeError::InvalidPeFormat);
    }

    let optional = OptionalHeader {
        magic,
        entry_point: read_u32(data, opt_offset + 16)?,
        image_base: read_u64(data, opt_offset + 24)?,
        section_alignment: read_u32(data, opt_offset + 32)?,
        file_alignment: read_u32(data, opt_offset + 36)?,
        size_of_image: read_u32(data, opt_offset + 56)?,
        size_of_headers: read_u32(data, opt_offset + 60)?,
        number_of_rva_and_sizes: read_u32(data, opt_offset + 108)?,
    };

    // --- Data directories --------------------------------------------------
    // They must fit inside the declared optional-header size.
    let num_dirs = optional.number_of_rva_and_sizes as usize;
    let dirs_end = OPTIONAL_HEADER64_FIXED
        .checked_add(num_dirs.checked_mul(8).ok_or(PeError::InvalidPeFormat)?)
        .ok_or(PeError::InvalidPeFormat)?;
    if dirs_end > size_of_optional_header as usize {
        return Err(PeError::InvalidPeFormat);
    }

    let mut data_directories = Vec::with_capacity(num_dirs);
    for i in 0..num_dirs {
        let base = opt_offset + OPTIONAL_HEADER64_FIXED + i * 8;
        data_directories.push(DataDirectory {
            virtual_address: read_u32(data, base)?,
            size: read_u32(data, base + 4)?,
        });
    }

    // --- Section headers ----------------------------------------------------
    // The table immediately follows the optional header.
    let section_table_offset = opt_offset + size_of_optional_header as usize;
    let num_sections = number_of_sections as usize;
    let table_end = section_table_offset
        .checked_add(
            num_sections
                .checked_mul(SECTION_HEADER_SIZE)
                .ok_or(PeError::InvalidPeFormat)?,
        )
        .ok_or(PeError::InvalidPeFormat)?;
    if table_end > data.len() {
        return Err(PeError::InvalidPeFormat);
    }

    let mut sections = Vec::with_capacity(num_sections);
    for i in 0..num_sections {
        let base = section_table_offset + i * SECTION_HEADER_SIZE;
        let mut name = [0u8; 8];
        name.copy_from_slice(&data[base..base + 8]);

        sections.push(SectionHeader {
            name,
            virtual_size: read_u32(data, base + 8)?,
            virtual_address: read_u32(data, base + 12)?,
            size_of_raw_data: read_u32(data, base + 16)?,
            pointer_to_raw_data: read_u32(data, base + 20)?,
            characteristics: read_u32(data, base + 36)?,
        });
    }

    Ok(RawHeaders {
        dos,
        pe_offset,
        coff,
        optional,
        data_directories,
        sections,
        section_table_offset,
    })
}

// ---------------------------------------------------------------------------
// PeImage
// ---------------------------------------------------------------------------

/// A validated on-disk PE32+ image held entirely in memory.
///
/// The buffer is consumed and stored inside the returned `PeImage`; the
/// parser never mutates it.
#[derive(Debug, Clone)]
pub struct PeImage {
    data: Vec<u8>,
    dos: DosHeader,
    pe_offset: usize,
    coff: CoffHeader,
    optional: OptionalHeader,
    data_directories: Vec<DataDirectory>,
    sections: Vec<SectionHeader>,
    section_table_offset: usize,
}

impl PeImage {
    /// Parse and validate a PE32+ image from a raw byte buffer.
    ///
    /// Beyond the header walk this verifies, for every section, that the
    /// raw-data range lies within the file and that the virtual extent lies
    /// within `SizeOfImage`, so truncated or crafted images are rejected
    /// before any mapping happens.
    pub fn parse(data: Vec<u8>) -> Result<PeImage, PeError> {
        let headers = parse_headers(&data)?;

        for section in &headers.sections {
            let raw_end =
                section.pointer_to_raw_data as u64 + section.size_of_raw_data as u64;
            if raw_end > data.len() as u64 {
                return Err(PeError::InvalidPeFormat);
            }

            let virtual_end =
                section.virtual_address as u64 + section.virtual_size as u64;
            if virtual_end > headers.optional.size_of_image as u64 {
                return Err(PeError::InvalidPeFormat);
            }
        }

        Ok(PeImage {
            data,
            dos: headers.dos,
            pe_offset: headers.pe_offset,
            coff: headers.coff,
            optional: headers.optional,
            data_directories: headers.data_directories,
            sections: headers.sections,
            section_table_offset: headers.section_table_offset,
        })
    }

    // -- accessors ----------------------------------------------------------

    /// The raw on-disk bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn dos_header(&self) -> DosHeader {
        self.dos
    }

    /// File offset of the NT headers (`e_lfanew`).
    pub fn nt_offset(&self) -> usize {
        self.pe_offset
    }

    pub fn coff_header(&self) -> CoffHeader {
        self.coff
    }

    pub fn optional_header(&self) -> OptionalHeader {
        self.optional
    }

    /// `OptionalHeader.SizeOfImage` -- the size of the mapped region.
    pub fn image_size(&self) -> u32 {
        self.optional.size_of_image
    }

    /// The image's preferred load address.
    pub fn image_base(&self) -> u64 {
        self.optional.image_base
    }

    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.data_directories
    }

    /// Ordered section-table view.
    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// Look up a section by its (ASCII) name, e.g. `".text"`.
    pub fn find_section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.name_str() == name)
    }

    /// Length of the image up to and including the section table.
    ///
    /// This is the exact header span a mapper copies to offset 0 of the
    /// mapped region before staging the individual sections.
    pub fn header_bytes(&self) -> usize {
        self.section_table_offset + self.sections.len() * SECTION_HEADER_SIZE
    }

    /// Convert an RVA to a raw file offset through the covering section.
    ///
    /// Returns `None` when no section covers `rva`.
    pub fn rva_to_raw(&self, rva: u32) -> Option<u32> {
        let section = self.sections.iter().find(|s| s.contains_rva(rva))?;
        (rva - section.virtual_address).checked_add(section.pointer_to_raw_data)
    }

    /// File offset of the on-disk `IMAGE_IMPORT_DESCRIPTOR` array, or
    /// `None` when the import data directory is absent or empty.
    pub fn import_directory_offset(&self) -> Option<usize> {
        let dir = self
            .data_directories
            .get(IMAGE_DIRECTORY_ENTRY_IMPORT)
            .filter(|d| d.size != 0)?;
        self.rva_to_raw(dir.virtual_address).map(|raw| raw as usize)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- helpers to build minimal synthetic PE32+ images --------------------

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    const PE_OFFSET: usize = 0x80;
    const COFF_OFFSET: usize = PE_OFFSET + 4;
    const OPT_OFFSET: usize = COFF_OFFSET + 20;
    const OPT_HEADER_SIZE: u16 = 112 + 16 * 8; // 240
    const SECTION_TABLE_OFFSET: usize = OPT_OFFSET + OPT_HEADER_SIZE as usize;

    /// Build a minimal structurally valid PE32+ image with one `.text`
    /// section and import/reloc/TLS data directories set.
    fn build_minimal_pe64() -> Vec<u8> {
        let text_raw_offset: u32 = 0x200;
        let text_raw_size: u32 = 0x200;
        let total_size = text_raw_offset as usize + text_raw_size as usize;

        let mut buf = vec![0u8; total_size];

        // DOS header
        put_u16(&mut buf, 0, DOS_MAGIC);
        put_u32(&mut buf, 0x3C, PE_OFFSET as u32);

        // PE signature
        put_u32(&mut buf, PE_OFFSET, PE_SIGNATURE);

        // COFF header
        put_u16(&mut buf, COFF_OFFSET, MACHINE_AMD64);
        put_u16(&mut buf, COFF_OFFSET + 2, 1); // NumberOfSections
        put_u16(&mut buf, COFF_OFFSET + 16, OPT_HEADER_SIZE);
        put_u16(&mut buf, COFF_OFFSET + 18, 0x0022); // EXECUTABLE | LARGE_ADDRESS_AWARE

        // Optional header (PE32+)
        put_u16(&mut buf, OPT_OFFSET, PE32PLUS_MAGIC);
        put_u32(&mut buf, OPT_OFFSET + 16, 0x1000); // AddressOfEntryPoint
        put_u64(&mut buf, OPT_OFFSET + 24, 0x0000_0001_4000_0000); // ImageBase
        put_u32(&mut buf, OPT_OFFSET + 32, 0x1000); // SectionAlignment
        put_u32(&mut buf, OPT_OFFSET + 36, 0x200); // FileAlignment
        put_u32(&mut buf, OPT_OFFSET + 56, 0x3000); // SizeOfImage
        put_u32(&mut buf, OPT_OFFSET + 60, 0x200); // SizeOfHeaders
        put_u32(&mut buf, OPT_OFFSET + 108, 16); // NumberOfRvaAndSizes

        // Data directories: import (1), reloc (5), TLS (9)
        let dd = OPT_OFFSET + 112;
        put_u32(&mut buf, dd + 8, 0x1100);
        put_u32(&mut buf, dd + 8 + 4, 0x80);
        put_u32(&mut buf, dd + 5 * 8, 0x1500);
        put_u32(&mut buf, dd + 5 * 8 + 4, 0x40);
        put_u32(&mut buf, dd + 9 * 8, 0x1600);
        put_u32(&mut buf, dd + 9 * 8 + 4, 0x28);

        // Section table: .text at RVA 0x1000, raw 0x200..0x400
        let s = SECTION_TABLE_OFFSET;
        buf[s..s + 5].copy_from_slice(b".text");
        put_u32(&mut buf, s + 8, 0x1000); // VirtualSize
        put_u32(&mut buf, s + 12, 0x1000); // VirtualAddress
        put_u32(&mut buf, s + 16, text_raw_size);
        put_u32(&mut buf, s + 20, text_raw_offset);
        put_u32(&mut buf, s + 36, 0x6000_0020); // CODE | EXECUTE | READ

        // Recognisable pattern in .text
        buf[text_raw_offset as usize] = 0xCC;
        buf[text_raw_offset as usize + 1] = 0xC3;

        buf
    }

    // -- accept path --------------------------------------------------------

    #[test]
    fn parse_accepts_minimal_image() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert_eq!(pe.dos_header().e_magic, DOS_MAGIC);
        assert_eq!(pe.dos_header().e_lfanew, PE_OFFSET as u32);
        assert_eq!(pe.nt_offset(), PE_OFFSET);
        assert_eq!(pe.coff_header().machine, MACHINE_AMD64);
        assert_eq!(pe.coff_header().number_of_sections, 1);
    }

    #[test]
    fn parse_optional_header_fields() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        let opt = pe.optional_header();
        assert_eq!(opt.magic, PE32PLUS_MAGIC);
        assert_eq!(opt.entry_point, 0x1000);
        assert_eq!(pe.image_base(), 0x0000_0001_4000_0000);
        assert_eq!(pe.image_size(), 0x3000);
        assert_eq!(opt.section_alignment, 0x1000);
        assert_eq!(opt.file_alignment, 0x200);
    }

    #[test]
    fn parse_sections() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert_eq!(pe.section_headers().len(), 1);

        let text = &pe.section_headers()[0];
        assert_eq!(text.name_str(), ".text");
        assert_eq!(text.virtual_address, 0x1000);
        assert_eq!(text.pointer_to_raw_data, 0x200);
        assert_eq!(text.characteristics, 0x6000_0020);
    }

    #[test]
    fn parse_data_directories() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert_eq!(pe.data_directories().len(), 16);

        let import = pe.data_directories()[IMAGE_DIRECTORY_ENTRY_IMPORT];
        assert_eq!(import.virtual_address, 0x1100);
        assert_eq!(import.size, 0x80);

        let reloc = pe.data_directories()[IMAGE_DIRECTORY_ENTRY_BASERELOC];
        assert_eq!(reloc.virtual_address, 0x1500);

        let tls = pe.data_directories()[IMAGE_DIRECTORY_ENTRY_TLS];
        assert_eq!(tls.virtual_address, 0x1600);
    }

    #[test]
    fn header_bytes_covers_section_table() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert_eq!(pe.header_bytes(), SECTION_TABLE_OFFSET + 40);
    }

    #[test]
    fn find_section_by_name() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert!(pe.find_section(".text").is_some());
        assert!(pe.find_section(".data").is_none());
    }

    // -- rva translation ----------------------------------------------------

    #[test]
    fn rva_to_raw_within_section() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert_eq!(pe.rva_to_raw(0x1000), Some(0x200));
        assert_eq!(pe.rva_to_raw(0x1010), Some(0x210));
    }

    #[test]
    fn rva_to_raw_outside_any_section() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        assert_eq!(pe.rva_to_raw(0x0), None);
        assert_eq!(pe.rva_to_raw(0x5000), None);
    }

    #[test]
    fn import_directory_offset_resolves_through_sections() {
        let pe = PeImage::parse(build_minimal_pe64()).expect("parse should succeed");
        // Import RVA 0x1100 lives in .text (RVA 0x1000, raw 0x200).
        assert_eq!(pe.import_directory_offset(), Some(0x300));
    }

    #[test]
    fn import_directory_absent_when_size_zero() {
        let mut data = build_minimal_pe64();
        let dd = OPT_OFFSET + 112;
        put_u32(&mut data, dd + 8 + 4, 0); // import size = 0
        let pe = PeImage::parse(data).expect("parse should succeed");
        assert_eq!(pe.import_directory_offset(), None);
    }

    // -- reject path --------------------------------------------------------

    #[test]
    fn invalid_dos_magic_rejected() {
        let mut data = build_minimal_pe64();
        data[0] = b'X';
        data[1] = b'X';
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn e_lfanew_inside_dos_header_rejected() {
        let mut data = build_minimal_pe64();
        put_u32(&mut data, 0x3C, 0x20);
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn invalid_pe_signature_rejected() {
        let mut data = build_minimal_pe64();
        put_u32(&mut data, PE_OFFSET, 0x0000_4C45);
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn i386_machine_rejected() {
        let mut data = build_minimal_pe64();
        put_u16(&mut data, COFF_OFFSET, 0x014C); // IMAGE_FILE_MACHINE_I386
        assert_eq!(
            PeImage::parse(data).unwrap_err(),
            PeError::NotSupportedMachine
        );
    }

    #[test]
    fn pe32_magic_rejected() {
        let mut data = build_minimal_pe64();
        put_u16(&mut data, OPT_OFFSET, 0x010B); // PE32
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn truncated_file_rejected() {
        let data = vec![0x4Du8, 0x5A]; // just "MZ"
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn section_raw_data_past_eof_rejected() {
        let mut data = build_minimal_pe64();
        // .text SizeOfRawData blown past the end of the file.
        put_u32(&mut data, SECTION_TABLE_OFFSET + 16, 0x10_0000);
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn section_virtual_extent_past_image_rejected() {
        let mut data = build_minimal_pe64();
        // .text VirtualSize blown past SizeOfImage (0x3000).
        put_u32(&mut data, SECTION_TABLE_OFFSET + 8, 0x4000);
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn section_table_past_eof_rejected() {
        let mut data = build_minimal_pe64();
        put_u16(&mut data, COFF_OFFSET + 2, 200); // NumberOfSections
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    #[test]
    fn data_directories_exceeding_optional_header_rejected() {
        let mut data = build_minimal_pe64();
        put_u32(&mut data, OPT_OFFSET + 108, 64); // NumberOfRvaAndSizes
        assert_eq!(PeImage::parse(data).unwrap_err(), PeError::InvalidPeFormat);
    }

    // -- misc ---------------------------------------------------------------

    #[test]
    fn parser_does_not_mutate_its_buffer() {
        let data = build_minimal_pe64();
        let pe = PeImage::parse(data.clone()).expect("parse should succeed");
        assert_eq!(pe.data(), &data[..]);
    }

    #[test]
    fn section_name_with_full_8_bytes() {
        let header = SectionHeader {
            name: *b"longname",
            virtual_size: 0,
            virtual_address: 0,
            size_of_raw_data: 0,
            pointer_to_raw_data: 0,
            characteristics: 0,
        };
        assert_eq!(header.name_str(), "longname");
    }

    #[test]
    fn pe_error_display() {
        assert_eq!(PeError::InvalidPeFormat.to_string(), "invalid PE format");
        assert_eq!(
            PeError::NotSupportedMachine.to_string(),
            "unsupported machine (expected AMD64)"
        );
    }
}
