//! Manual mapper for PE32+ images.
//!
//! `modmap` maps the on-disk bytes of a 64-bit Windows module into the
//! current process without going through the operating system's image
//! loader: the result is a private, relocated, import-linked, and
//! correctly page-protected copy, with its process-attach TLS callbacks
//! already delivered.
//!
//! The pipeline is split into four pieces:
//!
//! - [`pe::PeImage`] -- validates and indexes the on-disk image.
//! - [`pe::ByteCursor`] -- bounded writer that stages bytes into the
//!   mapped region.
//! - [`MappedImage`] -- owns the live region and the auxiliary modules
//!   loaded for imports; releases both on drop.
//! - [`Loader`] -- drives allocate, copy, link, relocate, protect, and
//!   TLS dispatch end to end.
//!
//! The operating system is consumed through the [`Host`] trait;
//! `WindowsHost` binds it to Win32 on Windows targets, and tests can
//! substitute a recording mock to drive the whole pipeline anywhere.
//!
//! The loader resolves imports and runs TLS callbacks but never calls the
//! image's entry point, and no `DLL_PROCESS_DETACH` is delivered on drop;
//! it exists to surface a module's code, not to emulate every side effect
//! of the system loader.

pub mod host;
pub mod loader;
pub mod mapped;
pub mod pe;

pub use host::{Host, ModuleHandle, PageProtection, SymbolRef};
#[cfg(windows)]
pub use host::WindowsHost;
pub use loader::Loader;
pub use mapped::MappedImage;
pub use pe::{ByteCursor, PeError, PeImage};
