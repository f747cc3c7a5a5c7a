//! Host virtual-memory and library surface.
//!
//! The loader consumes the operating system through this provider trait:
//! allocate/protect/free for the mapped region, and load-library /
//! resolve-symbol / free-library for satisfying imports.  [`WindowsHost`]
//! binds the trait to the Win32 API; tests drive the pipeline through a
//! recording mock instead.

use std::ffi::{c_void, CStr};

use crate::pe::parser::{IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_WRITE};

/// Opaque handle to a host-loaded module (`HMODULE` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHandle(pub *mut c_void);

/// Page protection applied to a mapped section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProtection {
    ReadOnly,
    ReadWrite,
    ExecuteRead,
    ExecuteReadWrite,
}

impl PageProtection {
    /// Translate `IMAGE_SCN_MEM_WRITE`/`IMAGE_SCN_MEM_EXECUTE` section
    /// characteristics into the protection for its pages.
    pub fn from_section_flags(characteristics: u32) -> PageProtection {
        let writable = characteristics & IMAGE_SCN_MEM_WRITE == IMAGE_SCN_MEM_WRITE;
        let executable = characteristics & IMAGE_SCN_MEM_EXECUTE == IMAGE_SCN_MEM_EXECUTE;

        match (writable, executable) {
            (false, false) => PageProtection::ReadOnly,
            (false, true) => PageProtection::ExecuteRead,
            (true, false) => PageProtection::ReadWrite,
            (true, true) => PageProtection::ExecuteReadWrite,
        }
    }
}

/// How an imported symbol is named in the thunk table.
#[derive(Debug, Clone, Copy)]
pub enum SymbolRef<'a> {
    /// Resolve by the embedded `IMAGE_IMPORT_BY_NAME` name.
    Name(&'a CStr),
    /// Resolve by export ordinal (low 16 bits of the thunk).
    Ordinal(u16),
}

/// The host operating-system surface the loader runs against.
///
/// Every call is blocking; the loader performs no retries.  `Clone` exists
/// so the returned mapped image can carry its own handle to the provider
/// for teardown.
pub trait Host: Clone {
    /// Commit a read-write region of `size` bytes with a top-down placement
    /// hint.  Returns null on failure.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Release a region previously returned by [`Host::allocate`].
    /// Must tolerate a null `base`.
    fn free(&self, base: *mut u8, size: usize);

    /// Change the protection of `size` bytes at `base`.
    fn protect(&self, base: *mut u8, size: usize, protection: PageProtection) -> bool;

    /// Load an auxiliary module by name.
    fn load_library(&self, name: &CStr) -> Option<ModuleHandle>;

    /// Release a handle returned by [`Host::load_library`].
    fn free_library(&self, handle: ModuleHandle);

    /// Resolve an exported function from a loaded module.
    fn resolve_symbol(&self, handle: ModuleHandle, symbol: SymbolRef<'_>)
        -> Option<*const c_void>;
}

// ---------------------------------------------------------------------------
// Win32 binding
// ---------------------------------------------------------------------------

#[cfg(windows)]
mod windows {
    use super::{Host, ModuleHandle, PageProtection, SymbolRef};
    use std::ffi::{c_void, CStr};
    use std::ptr;

    use windows_sys::Win32::System::LibraryLoader::{
        FreeLibrary, GetProcAddress, LoadLibraryA,
    };
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_TOP_DOWN,
        PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, PAGE_READONLY,
        PAGE_READWRITE,
    };

    /// [`Host`] implementation over the Win32 API.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct WindowsHost;

    fn to_win32_protection(protection: PageProtection) -> PAGE_PROTECTION_FLAGS {
        match protection {
            PageProtection::ReadOnly => PAGE_READONLY,
            PageProtection::ReadWrite => PAGE_READWRITE,
            PageProtection::ExecuteRead => PAGE_EXECUTE_READ,
            PageProtection::ExecuteReadWrite => PAGE_EXECUTE_READWRITE,
        }
    }

    impl Host for WindowsHost {
        fn allocate(&self, size: usize) -> *mut u8 {
            // Top-down keeps the region away from the preferred bases of
            // host-loaded images, so relocation is actually exercised.
            unsafe {
                VirtualAlloc(ptr::null(), size, MEM_COMMIT | MEM_TOP_DOWN, PAGE_READWRITE)
                    .cast()
            }
        }

        fn free(&self, base: *mut u8, _size: usize) {
            if base.is_null() {
                return;
            }
            // MEM_RELEASE requires a zero size.
            unsafe {
                VirtualFree(base.cast(), 0, MEM_RELEASE);
            }
        }

        fn protect(
            &self,
            base: *mut u8,
            size: usize,
            protection: PageProtection,
        ) -> bool {
            let mut old: PAGE_PROTECTION_FLAGS = 0;
            unsafe {
                VirtualProtect(base.cast(), size, to_win32_protection(protection), &mut old)
                    != 0
            }
        }

        fn load_library(&self, name: &CStr) -> Option<ModuleHandle> {
            let handle = unsafe { LoadLibraryA(name.as_ptr().cast()) };
            if handle.is_null() {
                None
            } else {
                Some(ModuleHandle(handle.cast()))
            }
        }

        fn free_library(&self, handle: ModuleHandle) {
            unsafe {
                FreeLibrary(handle.0.cast());
            }
        }

        fn resolve_symbol(
            &self,
            handle: ModuleHandle,
            symbol: SymbolRef<'_>,
        ) -> Option<*const c_void> {
            let proc = match symbol {
                SymbolRef::Name(name) => unsafe {
                    GetProcAddress(handle.0.cast(), name.as_ptr().cast())
                },
                // Ordinal imports pass the ordinal in the low word of the
                // name pointer, per the GetProcAddress contract.
                SymbolRef::Ordinal(ordinal) => unsafe {
                    GetProcAddress(handle.0.cast(), ordinal as usize as *const u8)
                },
            };
            proc.map(|f| f as *const c_void)
        }
    }
}

#[cfg(windows)]
pub use windows::WindowsHost;

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
