//! End-to-end manual mapping pipeline.
//!
//! [`Loader::load`] turns a parsed on-disk image into a live
//! [`MappedImage`]: allocate a region of `SizeOfImage`, stage headers and
//! sections through a [`ByteCursor`], re-validate in place, build the
//! import address table, apply base relocations, finalize per-section page
//! protections, and run the image's process-attach TLS callbacks.
//!
//! Every internal failure collapses to an absent result; the pipeline
//! fails fast on the first fatal condition and never retries.  Partial
//! work is released either explicitly (before the region is owned) or by
//! the [`MappedImage`] destructor.

use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::slice;

use crate::host::{Host, PageProtection, SymbolRef};
use crate::mapped::MappedImage;
use crate::pe::cursor::ByteCursor;
use crate::pe::parser::{self, PeImage, IMAGE_ORDINAL_FLAG64, IMAGE_REL_BASED_DIR64};

/// `DLL_PROCESS_ATTACH` reason delivered to TLS callbacks.
const DLL_PROCESS_ATTACH: u32 = 1;

/// Size of one `IMAGE_IMPORT_DESCRIPTOR` entry.
const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// `PIMAGE_TLS_CALLBACK`
type TlsCallback = unsafe extern "system" fn(*mut c_void, u32, *mut c_void);

/// Maps validated PE32+ images into the current process.
pub struct Loader<H: Host> {
    host: H,
}

impl<H: Host> Loader<H> {
    pub fn new(host: H) -> Loader<H> {
        Loader { host }
    }

    /// Map `image` into a private region and link it in place.
    ///
    /// Returns `None` on any failure: allocation, a staging write that
    /// does not fit, header re-validation, an unresolvable import, a
    /// malformed relocation walk, or a protection change the host
    /// rejects.  Absent import/relocation/TLS directories are no-ops.
    pub fn load(&self, image: &PeImage) -> Option<MappedImage<H>> {
        let image_size = image.image_size() as usize;

        let base = self.host.allocate(image_size);
        if base.is_null() {
            return None;
        }

        // Until the region is wrapped it has no owner; release it on
        // every early exit.
        if !stage_image(image, base, image_size) {
            self.host.free(base, image_size);
            return None;
        }

        let mut module =
            match unsafe { MappedImage::new(base, image_size, self.host.clone()) } {
                Ok(module) => module,
                Err(_) => {
                    self.host.free(base, image_size);
                    return None;
                }
            };

        // From here on a failure drops `module`, which releases the
        // region and every import module recorded so far.
        if !self.build_iat(&mut module) {
            return None;
        }

        let delta = (base as u64).wrapping_sub(image.image_base());
        if delta != 0 && !apply_relocations(&mut module, delta) {
            return None;
        }

        if !self.finalize_sections(&module) {
            return None;
        }

        unsafe { run_tls_callbacks(&module) };

        Some(module)
    }

    /// Phase 5: resolve every import and patch the IAT in place.
    fn build_iat(&self, module: &mut MappedImage<H>) -> bool {
        let Some(import_offset) = module.import_directory() else {
            return true;
        };

        let mut descriptor = import_offset;
        loop {
            // IMAGE_IMPORT_DESCRIPTOR: OriginalFirstThunk, TimeDateStamp,
            // ForwarderChain, Name, FirstThunk -- five u32 fields.
            let Some(original_first_thunk) = read_u32(module, descriptor) else {
                return false;
            };
            let Some(name_rva) = read_u32(module, descriptor + 12) else {
                return false;
            };
            let Some(first_thunk) = read_u32(module, descriptor + 16) else {
                return false;
            };

            // An all-zero descriptor terminates the array.  A zero
            // OriginalFirstThunk with a non-zero Name means the linker
            // omitted the thunk template; the IAT then doubles as it.
            if original_first_thunk == 0 && name_rva == 0 {
                break;
            }

            let Some(dll_name) = c_string_at(module, name_rva as usize) else {
                return false;
            };
            let Some(handle) = self.host.load_library(dll_name.as_c_str()) else {
                return false;
            };
            // Recorded before resolution, so a failure below still
            // releases the handle through the destructor.
            module.add_import_module(handle);

            let template_rva = if original_first_thunk != 0 {
                original_first_thunk
            } else {
                first_thunk
            };

            let mut index = 0usize;
            loop {
                let Some(thunk) = read_u64(module, template_rva as usize + index * 8)
                else {
                    return false;
                };
                if thunk == 0 {
                    break;
                }

                let address = if thunk & IMAGE_ORDINAL_FLAG64 != 0 {
                    self.host
                        .resolve_symbol(handle, SymbolRef::Ordinal(thunk as u16))
                } else {
                    // IMAGE_IMPORT_BY_NAME: u16 hint, then the name.
                    let Some(symbol) = c_string_at(module, thunk as usize + 2) else {
                        return false;
                    };
                    self.host
                        .resolve_symbol(handle, SymbolRef::Name(symbol.as_c_str()))
                };

                let Some(address) = address else {
                    return false;
                };
                if !write_u64(module, first_thunk as usize + index * 8, address as u64) {
                    return false;
                }

                index += 1;
            }

            descriptor += IMPORT_DESCRIPTOR_SIZE;
        }

        true
    }

    /// Phase 7: translate section characteristics into page protections.
    fn finalize_sections(&self, module: &MappedImage<H>) -> bool {
        let base = module.image_base();

        for section in module.section_headers() {
            if section.virtual_size == 0 {
                continue;
            }

            let protection = PageProtection::from_section_flags(section.characteristics);
            let address = unsafe { base.add(section.virtual_address as usize) };
            if !self
                .host
                .protect(address, section.virtual_size as usize, protection)
            {
                return false;
            }
        }

        true
    }
}

/// Phases 2 and 3: copy the header block and every section's raw data
/// into the region at their virtual addresses.
///
/// The header write covers the image up to and including the section
/// table, in a single pass.  BSS tails (`VirtualSize > SizeOfRawData`)
/// keep the allocator's zero fill.
fn stage_image(image: &PeImage, base: *mut u8, image_size: usize) -> bool {
    let region = unsafe { slice::from_raw_parts_mut(base, image_size) };
    let mut cursor = ByteCursor::new(region);
    let raw = image.data();

    if !cursor.write(&raw[..image.header_bytes()]) {
        return false;
    }

    for section in image.section_headers() {
        if section.size_of_raw_data == 0 {
            continue;
        }

        let start = section.pointer_to_raw_data as usize;
        let end = start + section.size_of_raw_data as usize;
        if !cursor.seek(section.virtual_address as usize) {
            return false;
        }
        if !cursor.write(&raw[start..end]) {
            return false;
        }
    }

    true
}

/// Phase 6: walk the relocation blocks and add `delta` to every
/// `DIR64`-named 64-bit value.
///
/// A block with `VirtualAddress == 0` terminates the walk; an entry of 0
/// terminates its block (alignment padding).  Types other than `DIR64`
/// carry no meaning on x86-64 and are skipped.
fn apply_relocations<H: Host>(module: &mut MappedImage<H>, delta: u64) -> bool {
    let Some(directory) = module.relocation_directory() else {
        return true;
    };

    let mut block = directory;
    loop {
        let Some(page_rva) = read_u32(module, block) else {
            return false;
        };
        if page_rva == 0 {
            break;
        }
        let Some(size_of_block) = read_u32(module, block + 4) else {
            return false;
        };
        if size_of_block < 8 {
            return false;
        }

        let entry_count = (size_of_block as usize - 8) / 2;
        for index in 0..entry_count {
            let Some(entry) = read_u16(module, block + 8 + index * 2) else {
                return false;
            };
            if entry == 0 {
                break;
            }

            if entry >> 12 == IMAGE_REL_BASED_DIR64 {
                let target = page_rva as usize + (entry & 0x0FFF) as usize;
                let Some(value) = read_u64(module, target) else {
                    return false;
                };
                if !write_u64(module, target, value.wrapping_add(delta)) {
                    return false;
                }
            }
        }

        block += size_of_block as usize;
    }

    true
}

/// Phase 8: invoke the image's TLS callbacks with `DLL_PROCESS_ATTACH`.
///
/// `AddressOfCallBacks` is a live virtual address (already relocated)
/// pointing at a null-terminated array of callback pointers.  Callbacks
/// report nothing back; the loader assumes success.
///
/// # Safety
///
/// Executes code from the mapped image.  The image must be fully staged,
/// linked, relocated, and protected.
unsafe fn run_tls_callbacks<H: Host>(module: &MappedImage<H>) {
    let Some(tls_offset) = module.tls_directory() else {
        return;
    };

    // IMAGE_TLS_DIRECTORY64.AddressOfCallBacks sits 24 bytes in.
    let Some(callbacks_va) = read_u64(module, tls_offset + 24) else {
        return;
    };
    if callbacks_va == 0 {
        return;
    }

    let base = module.image_base();
    let Some(array_offset) = callbacks_va.checked_sub(base as u64) else {
        return;
    };

    let mut offset = array_offset as usize;
    loop {
        let Some(callback) = read_u64(module, offset) else {
            return;
        };
        if callback == 0 {
            break;
        }

        let callback: TlsCallback = std::mem::transmute(callback as usize);
        callback(base.cast(), DLL_PROCESS_ATTACH, ptr::null_mut());

        offset += 8;
    }
}

// ---------------------------------------------------------------------------
// Checked region access
// ---------------------------------------------------------------------------

fn read_u16<H: Host>(module: &MappedImage<H>, offset: usize) -> Option<u16> {
    parser::read_u16(module.data(), offset).ok()
}

fn read_u32<H: Host>(module: &MappedImage<H>, offset: usize) -> Option<u32> {
    parser::read_u32(module.data(), offset).ok()
}

fn read_u64<H: Host>(module: &MappedImage<H>, offset: usize) -> Option<u64> {
    parser::read_u64(module.data(), offset).ok()
}

fn write_u64<H: Host>(module: &mut MappedImage<H>, offset: usize, value: u64) -> bool {
    let data = module.data_mut();
    let Some(end) = offset.checked_add(8) else {
        return false;
    };
    if end > data.len() {
        return false;
    }

    data[offset..end].copy_from_slice(&value.to_le_bytes());
    true
}

/// Owned copy of the NUL-terminated string at `offset` in the region.
fn c_string_at<H: Host>(module: &MappedImage<H>, offset: usize) -> Option<CString> {
    let bytes = module.data().get(offset..)?;
    CStr::from_bytes_until_nul(bytes).ok().map(CStr::to_owned)
}
